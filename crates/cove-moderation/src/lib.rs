//! Content moderation engine for the Cove platform.
//!
//! Classifies candidate messages before they are persisted or broadcast:
//! banned-term detection, spam-pattern detection, severity classification,
//! content filtering, and contextual policy layers (sender reputation,
//! channel kind). The engine is pure: it holds only compiled rules, never
//! errors, and computes a fresh [`Verdict`] per call. Callers that skip it
//! bypass all guarantees: this is a pre-publish gate, not a post-hoc audit.
//!
//! Policy constants are deliberately coarse (substring lists, fixed ratios)
//! and live in [`ModerationConfig`] rather than in code.

mod engine;
mod rules;

pub use engine::{ModerationConfig, ModerationContext, ModerationEngine, Severity, Verdict};

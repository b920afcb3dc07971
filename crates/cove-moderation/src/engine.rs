//! Verdict computation and contextual policy layers.

use crate::rules::{self, SpamRule};
use cove_types::ChannelKind;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse classification of how strongly a message violates content policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// The outcome of reviewing one message.
///
/// Transient: computed per call, never persisted. `filtered_content` is
/// what gets published when the message is allowed but triggered findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// True when no findings were recorded.
    pub is_clean: bool,
    /// Ordered finding labels, e.g. `banned:시발`, `spam:short_link`.
    pub issues: Vec<String>,
    pub severity: Severity,
    /// Whether the message must be rejected instead of published.
    pub should_block: bool,
    /// Content with every banned-term occurrence replaced by asterisks of
    /// equal length.
    pub filtered_content: String,
}

impl Verdict {
    fn clean(content: &str) -> Self {
        Self {
            is_clean: true,
            issues: Vec::new(),
            severity: Severity::Low,
            should_block: false,
            filtered_content: content.to_string(),
        }
    }
}

/// Policy constants for the moderation engine.
///
/// The thresholds are carried over from the platform's original policy as
/// plain configuration. They were never derived from a tuning process and
/// deployments are expected to adjust them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Terms matched case-insensitively; every occurrence is a finding.
    pub banned_terms: Vec<String>,
    /// Severe subset tested by the keystroke-level quick check.
    pub severe_terms: Vec<String>,
    /// Minimum identical-character run length flagged as spam.
    pub repeat_run_len: usize,
    /// Uppercase-to-letter ratio above which content is flagged.
    pub uppercase_ratio: f32,
    /// Special-character-to-content ratio above which content is flagged.
    pub special_char_ratio: f32,
    /// Ratio heuristics only apply to content longer than this many chars.
    pub heuristic_min_chars: usize,
    /// Total findings at or above which a message is blocked.
    pub block_issue_threshold: usize,
    /// Tightened threshold for public channels.
    pub public_issue_threshold: usize,
    /// Reputation strictly above this relaxes a medium verdict.
    pub high_reputation: u8,
    /// Reputation strictly below this escalates any flagged verdict.
    pub low_reputation: u8,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            banned_terms: rules::DEFAULT_BANNED_TERMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            severe_terms: rules::DEFAULT_SEVERE_TERMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            repeat_run_len: 5,
            uppercase_ratio: 0.5,
            special_char_ratio: 0.3,
            heuristic_min_chars: 10,
            block_issue_threshold: 3,
            public_issue_threshold: 2,
            high_reputation: 80,
            low_reputation: 30,
        }
    }
}

/// Context for the policy layers applied after the base verdict.
///
/// Both fields are optional: a missing reputation or channel kind simply
/// skips that layer, so the engine stays usable from code paths that have
/// not resolved the sender or the channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModerationContext {
    /// Sender reputation in 0..=100.
    pub reputation: Option<u8>,
    /// Kind of the channel the message targets.
    pub channel_kind: Option<ChannelKind>,
}

/// The moderation engine. Compiles its rule set once at construction; all
/// review methods are read-only and never error.
pub struct ModerationEngine {
    config: ModerationConfig,
    banned: Option<Regex>,
    spam_rules: Vec<SpamRule>,
    severe_terms_lower: Vec<String>,
}

impl Default for ModerationEngine {
    fn default() -> Self {
        Self::new(ModerationConfig::default())
    }
}

impl ModerationEngine {
    pub fn new(config: ModerationConfig) -> Self {
        let banned = rules::compile_banned_terms(&config.banned_terms);
        let severe_terms_lower = config
            .severe_terms
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        Self {
            config,
            banned,
            spam_rules: rules::compile_spam_rules(),
            severe_terms_lower,
        }
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    /// Reviews a message with no contextual adjustments.
    ///
    /// State machine per message: empty content is trivially clean; then
    /// banned-term scan, spam scan, severity derivation, block decision,
    /// and filtering. See the crate docs for the full policy.
    pub fn review(&self, content: &str) -> Verdict {
        let mut verdict = self.base_verdict(content);
        verdict.should_block = verdict.severity == Severity::High
            || verdict.issues.len() >= self.config.block_issue_threshold;
        verdict
    }

    /// Reviews a message and applies the contextual policy layers.
    ///
    /// Layer order: the channel kind picks the block threshold, reputation
    /// then relaxes or escalates the verdict, and finally direct/private
    /// channels drop blocking and filtering entirely. The transport is
    /// trusted, not the content, so not even a low-reputation sender is
    /// blocked in a dm.
    pub fn review_in_context(&self, content: &str, ctx: &ModerationContext) -> Verdict {
        let mut verdict = self.base_verdict(content);

        let threshold = match ctx.channel_kind {
            Some(ChannelKind::Public) => self.config.public_issue_threshold,
            _ => self.config.block_issue_threshold,
        };
        verdict.should_block =
            verdict.severity == Severity::High || verdict.issues.len() >= threshold;

        if let Some(reputation) = ctx.reputation {
            if reputation > self.config.high_reputation && verdict.severity == Severity::Medium {
                verdict.severity = Severity::Low;
                verdict.should_block = false;
            } else if reputation < self.config.low_reputation && !verdict.issues.is_empty() {
                verdict.severity = verdict.severity.max(Severity::Medium);
                verdict.should_block = true;
            }
        }

        if matches!(
            ctx.channel_kind,
            Some(ChannelKind::Dm) | Some(ChannelKind::Private)
        ) {
            verdict.should_block = false;
            verdict.filtered_content = content.to_string();
        }

        verdict
    }

    /// Keystroke-level gate: returns true when the content is clean enough
    /// to keep streaming typing indicators.
    ///
    /// Deliberately a different code path from [`review`](Self::review):
    /// a plain substring scan over the short severe-term subset, traded
    /// for latency over precision.
    pub fn quick_typing_check(&self, content: &str) -> bool {
        if content.is_empty() {
            return true;
        }
        let lower = content.to_lowercase();
        !self
            .severe_terms_lower
            .iter()
            .any(|term| lower.contains(term.as_str()))
    }

    fn base_verdict(&self, content: &str) -> Verdict {
        if content.trim().is_empty() {
            return Verdict::clean(content);
        }

        let mut issues = Vec::new();
        let mut banned_hits = 0usize;
        let mut spam_hits = 0usize;

        if let Some(banned) = &self.banned {
            for found in banned.find_iter(content) {
                issues.push(format!("banned:{}", found.as_str().to_lowercase()));
                banned_hits += 1;
            }
        }

        if rules::has_repeated_run(content, self.config.repeat_run_len) {
            issues.push("spam:repeated_chars".to_string());
            spam_hits += 1;
        }
        for rule in &self.spam_rules {
            if rule.pattern.is_match(content) {
                issues.push(rule.label.to_string());
                spam_hits += 1;
            }
        }

        let char_len = content.chars().count();
        if char_len > self.config.heuristic_min_chars {
            if uppercase_ratio(content) > self.config.uppercase_ratio {
                issues.push("spam:uppercase_ratio".to_string());
                spam_hits += 1;
            }
            if special_char_ratio(content) > self.config.special_char_ratio {
                issues.push("spam:special_chars".to_string());
                spam_hits += 1;
            }
        }

        let severity = if banned_hits > 0 && spam_hits > 0 {
            Severity::High
        } else if banned_hits > 0 || spam_hits > 0 {
            Severity::Medium
        } else {
            Severity::Low
        };

        let filtered_content = match &self.banned {
            Some(banned) if banned_hits > 0 => banned
                .replace_all(content, |caps: &regex::Captures<'_>| {
                    "*".repeat(caps[0].chars().count())
                })
                .into_owned(),
            _ => content.to_string(),
        };

        Verdict {
            is_clean: issues.is_empty(),
            issues,
            severity,
            should_block: false,
            filtered_content,
        }
    }
}

/// Ratio of uppercase letters among alphabetic characters (0 when there are
/// no letters).
fn uppercase_ratio(content: &str) -> f32 {
    let mut letters = 0usize;
    let mut upper = 0usize;
    for ch in content.chars() {
        if ch.is_alphabetic() {
            letters += 1;
            if ch.is_uppercase() {
                upper += 1;
            }
        }
    }
    if letters == 0 {
        return 0.0;
    }
    upper as f32 / letters as f32
}

/// Ratio of special characters (not alphanumeric, not whitespace) among all
/// characters.
fn special_char_ratio(content: &str) -> f32 {
    let total = content.chars().count();
    if total == 0 {
        return 0.0;
    }
    let special = content
        .chars()
        .filter(|ch| !ch.is_alphanumeric() && !ch.is_whitespace())
        .count();
    special as f32 / total as f32
}

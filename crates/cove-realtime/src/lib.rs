//! Real-time channel messaging core for the Cove platform.
//!
//! A single-process fan-out layer: long-lived subscriber connections are
//! held in a [`ConnectionRegistry`], typed events are delivered to every
//! matching connection by the [`Broadcaster`], presence is a pure
//! projection of the registry, and [`ChannelSessions`] glues the pieces
//! into a per-connection lifecycle.
//!
//! Delivery guarantees are deliberately modest: best-effort, FIFO per
//! connection within a channel, no ordering across channels, no delivery
//! after unregistration. Failed sinks are pruned lazily during fan-out;
//! there is no heartbeat. Horizontal (multi-process) fan-out is an
//! extension point at the registry/broadcaster seam, not a feature of this
//! crate.

mod event;
mod fanout;
mod presence;
mod registry;
mod session;
mod sink;

pub use event::{BroadcastEvent, EventKind, MessagePayload};
pub use fanout::{Broadcaster, DeliveryReport};
pub use presence::PresenceSnapshot;
pub use registry::{ConnectionEntry, ConnectionRegistry};
pub use session::ChannelSessions;
pub use sink::{EventSink, SinkError};

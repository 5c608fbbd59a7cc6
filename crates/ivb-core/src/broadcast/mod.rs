//! Broadcast engine: recipient resolution, retrying sends, and the sequential
//! dispatch loop that streams progress events.

pub mod dispatch;
pub mod events;
pub mod guard;
pub mod media;
pub mod recipients;
pub mod retry;

pub use dispatch::{BroadcastPayload, BroadcastRun, Broadcaster};
pub use events::{BroadcastEvent, BroadcastStats, SendResult};
pub use guard::{BroadcastGuard, BroadcastPermit};
pub use recipients::{ChatIdSource, RecipientMode, RecipientResolver, Recipients, TestConfig};
pub use retry::RetryPolicy;

//! `surgecart-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no storage or transport
//! concerns): typed identifiers, money, the clock seam, and the structured
//! event sink the service layer emits into.

pub mod clock;
pub mod error;
pub mod event;
pub mod id;
pub mod money;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use event::{CollectingSink, EventRecord, EventSink, NullSink, TracingSink};
pub use id::{HoldId, OrderId, ProductId, TaskId, WebhookEventId};
pub use money::Money;

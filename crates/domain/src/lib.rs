//! `surgecart-domain`: plain data records and state machines.
//!
//! Entities here are passive rows: no entity mutates its own storage or
//! cascades into related entities. All cross-entity orchestration lives in
//! `surgecart-checkout`, which keeps transaction boundaries and lock
//! ordering in one auditable place. Eligibility rules (usable, due for
//! expiry, waiting for order) are pure predicates on the records.

pub mod hold;
pub mod order;
pub mod product;
pub mod webhook;

pub use hold::{Hold, HoldStatus};
pub use order::{Order, OrderStatus};
pub use product::Product;
pub use webhook::{payload, WebhookEvent, WebhookOutcome};

//! Order fulfillment and license-key assignment.
//!
//! - [`pool`]: the single key-claiming primitive
//! - [`ledger`]: order records and their lifecycle
//! - [`engine`]: turns a confirmed payment into assigned keys, idempotently
//! - [`checkout`]: creates pending orders against a payment provider
//! - [`purchase`]: synchronous purchases paid from stored balance

pub mod checkout;
pub mod engine;
pub mod ledger;
pub mod pool;
pub mod purchase;

pub use engine::{ConfirmationSource, PaymentConfirmation, fulfill_order};
pub use ledger::{AssignedLicense, FulfillmentResult};

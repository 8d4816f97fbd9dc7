//! Identity primitives: password hashing and policy, TOTP, and the
//! capability check every admin operation goes through.

mod bootstrap;
mod capability;
pub mod password;
pub mod totp;

pub use bootstrap::*;
pub use capability::*;

mod license;
mod order;
mod product;
mod purchase;
mod user;

pub use license::*;
pub use order::*;
pub use product::*;
pub use purchase::*;
pub use user::*;

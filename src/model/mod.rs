pub mod common;
pub mod fixture;
pub mod index;
pub mod release;
pub mod user;

pub use common::*;
pub use fixture::*;
pub use index::*;
pub use release::*;
pub use user::*;

#![forbid(unsafe_code)]

mod engine;
mod error;
mod query;
mod store;
mod validator;

pub use engine::*;
pub use error::*;
pub use query::*;
pub use store::*;
pub use validator::*;

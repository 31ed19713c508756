#![forbid(unsafe_code)]

mod change_unit;
mod config;
mod error;
mod executor;
mod history;
mod lock;
mod migrator;
mod registry;
mod report;
mod rollback;
mod status;

pub use change_unit::*;
pub use config::*;
pub use error::*;
pub use executor::Executor;
pub use history::*;
pub use lock::*;
pub use migrator::*;
pub use registry::*;
pub use report::*;
pub use rollback::*;
pub use status::*;

pub use docmigrate_store::{
    Condition, Filter, Store, StoreError, Update, ValidationAction, ValidationLevel, Validator,
};

#[cfg(feature = "memory")]
pub use docmigrate_store::MemoryStore;
#[cfg(feature = "pg")]
pub use docmigrate_store::PgStore;

pub use tokio_util::sync::CancellationToken;

//! Domain types, configuration, and the error taxonomy shared by every fecore crate.

mod config;
mod error;
mod types;

pub use config::Config;
pub use error::Error;
pub use types::{
    BackendKind, Function, FunctionKind, FunctionStat, FunctionStats, Policy, Replica,
    StartupType, MAX_EXTRA, MAX_KEEPALIVE_TIME, STATS_WINDOW,
};

pub type Result<T> = std::result::Result<T, Error>;

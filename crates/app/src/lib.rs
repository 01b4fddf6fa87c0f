pub mod config;
pub mod logging;
pub mod notify;
pub mod runtime;
pub mod tasks;

pub mod config;
pub mod logging;

pub mod connectivity;
pub mod dispatcher;
pub mod scheduler;
pub mod store;
pub mod units;

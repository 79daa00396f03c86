//! HTTP request handlers.

mod health;
mod report;
mod workers;

pub use health::{health_check, metrics_handler};
pub use report::get_report;
pub use workers::{deregister_worker, list_workers, register_worker};

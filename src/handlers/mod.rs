pub mod clean;
pub mod config;
pub mod get;
pub mod probe;

// Re-export all handlers
pub use clean::handle_clean;
pub use config::handle_config;
pub use get::{GetArgs, handle_get};
pub use probe::handle_probe;

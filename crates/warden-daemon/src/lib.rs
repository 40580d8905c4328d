//! Warden daemon library
//!
//! Components of `wardend`:
//! - REST directory client for the chat platform
//! - Periodic maintenance loops
//! - Server lifecycle and audit forwarding

pub mod config;
pub mod directory;
pub mod error;
pub mod scheduler;
pub mod server;

pub use config::DaemonConfig;
pub use directory::HttpDirectory;
pub use error::{DaemonError, DaemonResult};
pub use scheduler::{Scheduler, SweepIntervals};
pub use server::Server;

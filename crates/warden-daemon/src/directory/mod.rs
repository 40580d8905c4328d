//! Directory backends for the daemon

mod http;

pub use http::HttpDirectory;

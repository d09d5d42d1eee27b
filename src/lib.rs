pub mod config;
pub mod dashboard;
pub mod error;
pub mod logs;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod worker;

pub mod agent;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod proto;

pub use error::{Error, Result};

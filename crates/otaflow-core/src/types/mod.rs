//! Type definitions for otaflow configuration and update documents

mod runtime_config;
mod update_config;

pub use runtime_config::*;
pub use update_config::*;

//! # otaflow-core
//!
//! Core library for otaflow providing:
//! - Runtime configuration types and the hierarchical loader
//! - The update config document model (`UpdateConfig`) and directory loading
//! - Dotted version comparison used by the incremental/full fallback policy

pub mod config;
pub mod error;
pub mod types;
pub mod utils;
pub mod version;

pub use config::HierarchicalConfigLoader;
pub use error::{Error, ErrorKind, Result};
pub use types::{
    config_names, load_update_configs, InstallType, PackageFile, RuntimeConfig, UpdateConfig,
};
pub use utils::get_home_dir;
pub use version::{compare_versions, DottedVersion};

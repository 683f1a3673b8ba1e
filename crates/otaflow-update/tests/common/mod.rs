//! Common test infrastructure for otaflow-update tests
//!
//! # Usage
//!
//! In your test file, add:
//! ```ignore
//! mod common;
//! use common::*;
//! ```
//!
//! # Modules
//!
//! - `constants`: Versions, config names and payload contents
//! - `builders`: Fluent builders for update configs and packed packages
//! - `fakes`: In-process update engine, verifier and event recorder
//! - `mock_server`: Wiremock setup helpers for config and package downloads
//! - `assertions`: Semantic assertions over recorded events
//! - `harness`: A fully wired orchestrator rooted in a temp directory

// Not every test binary uses every helper
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod assertions;
pub mod builders;
pub mod constants;
pub mod fakes;
pub mod harness;
pub mod mock_server;

pub use assertions::*;
pub use builders::*;
pub use constants::*;
pub use fakes::*;
pub use harness::*;
pub use mock_server::*;

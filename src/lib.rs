//! ROM Patcher Library.
//!
//! This library provides the core components for the `rompatch` tool.
//! It is organized into several modules:
//! - `config`: CLI configuration and patch format constants.
//! - `record`: S-record transport codec.
//! - `blob`: Aggregation of records into contiguous ranges.
//! - `metadata`: The patch metadata blob.
//! - `patch`: Loading a patch file.
//! - `image`: Random-access image storage.
//! - `engine`: Verify, apply, reverse and baseline extraction.
//! - `commit`: The copy, verify, promote workflow.

pub mod blob;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod image;
pub mod metadata;
pub mod patch;
pub mod record;
pub mod utils;

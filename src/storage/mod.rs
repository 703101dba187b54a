//! Storage management
//!
//! Handles virtual path resolution and filesystem operations.

pub mod operations;
pub mod validation;

pub use validation::{
    is_staging_name, resolve_path, resolve_virtual_path, staging_name, virtual_to_real_path,
};

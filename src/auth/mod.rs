//! Authentication system
//!
//! Handles user accounts, credential validation, and permission queries.

pub mod credentials;
pub mod permissions;
pub mod validator;

pub use credentials::User;
pub use permissions::{Permission, Permissions};
pub use validator::Authorizer;

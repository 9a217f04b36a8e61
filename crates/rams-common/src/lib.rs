//! RAMS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and utilities for the RAMS workspace.
//!
//! # Overview
//!
//! - **Logging**: centralized `tracing` subscriber setup driven by `LOG_*` variables
//! - **Identity**: the authenticated actor injected by upstream authentication
//! - **Errors**: error and result types shared by workspace members
//!
//! # Example
//!
//! ```no_run
//! use rams_common::identity::{Actor, Role};
//! use uuid::Uuid;
//!
//! let actor = Actor::new(Uuid::new_v4(), Role::Auditor);
//! assert!(actor.role.can_read_audit());
//! assert!(!actor.role.is_privileged());
//! ```

pub mod error;
pub mod identity;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use identity::{Actor, Role};

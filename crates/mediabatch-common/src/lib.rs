//! Mediabatch-Common: Shared types and utilities.
//!
//! This crate provides common functionality used across mediabatch:
//!
//! - **Typed IDs**: [`JobId`] and [`OwnerId`] wrappers
//! - **Media model**: the target format allow-list and content sniffing
//! - **Storage paths**: per-owner namespace resolution without traversal
//! - **Error Handling**: the unified error type and result alias
//!
//! # Examples
//!
//! ```
//! use mediabatch_common::{ImageFormat, OwnerId};
//! use mediabatch_common::paths::base_name;
//!
//! let format: ImageFormat = "image/webp".parse().unwrap();
//! assert_eq!(format.extension(), "webp");
//!
//! let owner = OwnerId::new("alice").unwrap();
//! assert_eq!(owner.as_str(), "alice");
//!
//! assert_eq!(base_name("holiday/beach.png"), "beach.png");
//! ```

pub mod error;
pub mod ids;
pub mod media;
pub mod paths;

pub use error::{Error, Result};
pub use ids::{JobId, OwnerId};
pub use media::{ImageFormat, MediaKind, SniffedType};

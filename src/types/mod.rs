//! Shared types for Studbook

mod error;

pub use error::{Result, StudbookError};

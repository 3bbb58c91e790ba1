//! Utility functions for display formatting and payload parsing.

pub mod format;
pub mod serde_helpers;

pub use format::{format_remaining, mask_token};

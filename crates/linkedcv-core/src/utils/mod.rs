//! Utility functions for string formatting and manipulation.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{escape_html, nl2br, to_base36, truncate_string};

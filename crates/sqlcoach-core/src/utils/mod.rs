//! Formatting helpers shared by the CLI.

pub mod format;

pub use format::{format_date, format_remaining, truncate_string};

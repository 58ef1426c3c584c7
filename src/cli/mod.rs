//! CLI command handlers

pub mod commands;

pub use commands::{convert, load_layout, print_layout, resolve_output};

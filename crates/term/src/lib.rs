#![deny(unsafe_code)]

/// Interactive prompt loop.
pub mod app;
/// Prompt line parsing.
pub mod input;
/// Incremental transcript printing.
pub mod render;
/// Settings persistence.
pub mod settings;

//! Services kept apart from the editing logic

pub mod io;

pub use io::{ImageIOService, OutputFormat};

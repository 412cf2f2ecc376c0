//! Music library: track models and the directory scanner.

pub mod models;
pub mod scanner;

pub use {
    models::Track,
    scanner::{LibraryScanner, ScannerConfig},
};

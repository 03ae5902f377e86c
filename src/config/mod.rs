//! Configuration loading and validation.

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{Config, SegmenterSettings, StorageSettings};

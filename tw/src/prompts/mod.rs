//! Prompt catalog
//!
//! Embedded templates for every role, with file-based overrides.

pub mod embedded;
mod loader;

pub use loader::PromptLoader;

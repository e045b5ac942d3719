//! LLM invocation layer
//!
//! - [`LlmInvoker`] - uniform capability for the primary and challenger backends
//! - [`CliInvoker`] - subprocess adapter for CLI-based backends
//! - [`parser`] - tolerant extraction of structured results from raw output

pub mod cli;
pub mod error;
pub mod invoker;
pub mod parser;

pub use cli::{BackendCommand, CliInvoker};
pub use error::LlmError;
pub use invoker::{InvokeOptions, InvokeRequest, LlmInvoker, StreamChunk, mock};
pub use parser::{ChallengerVerdict, ParseError, parse_edits, parse_issues, parse_verdict};

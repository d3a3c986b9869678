//! # Keel Platform
//!
//! Shared types for the keel SSH client.
//!
//! This crate provides:
//! - The unified error type (`KeelError`, `KeelResult`)
//! - The collaborator contracts the protocol core is written against
//!   (`Transport`, `Terminal`, `Operator`)
//!
//! # Examples
//!
//! ```
//! use keel_platform::{KeelError, KeelResult};
//!
//! fn example_function() -> KeelResult<String> {
//!     Ok("Hello, keel!".to_string())
//! }
//!
//! # fn main() -> KeelResult<()> {
//! let result = example_function()?;
//! assert_eq!(result, "Hello, keel!");
//! assert_eq!(KeelError::Protocol("bad".into()).disconnect_reason(), Some(2));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod traits;

pub use error::{KeelError, KeelResult};
pub use traits::{Operator, TerminalSize, Terminal, Transport};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

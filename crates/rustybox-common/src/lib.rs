//! Common infrastructure for rustybox applets.
//!
//! This crate provides the pieces every applet shares:
//!
//! - [`error`]: Error types and exit-code mapping
//! - [`Streams`]: The stdin/stdout/stderr context an applet runs against
//! - [`args`]: getopt-style option parsing
//! - [`shell`]: Quoting, word splitting and external command execution
//!
//! # Applet shape
//!
//! Every applet is a plain function over its argv and a [`Streams`]:
//!
//! ```
//! use rustybox_common::{AppletResult, Getopt, Streams};
//!
//! fn hello_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
//!     let opts = Getopt::new("l").parse(args)?;
//!     let greeting = if opts.has('l') { "HELLO" } else { "hello" };
//!     io.println(greeting)?;
//!     Ok(0)
//! }
//! ```

pub mod args;
pub mod error;
pub mod shell;
pub mod streams;

// Re-export commonly used items at crate root
pub use args::{expand_numeric_shorthand, parse_count, Getopt, Options};
pub use error::{
    io_message, AppletError, AppletResult, EXIT_FAILURE, EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND,
    EXIT_SYNTAX,
};
pub use streams::{operands_or_stdin, split_lines, Streams, STDIN_OPERAND};

/// Signature shared by every native applet.
pub type AppletFn = fn(&[String], &mut Streams<'_>) -> AppletResult<i32>;

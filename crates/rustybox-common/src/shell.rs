//! Command-line quoting, word splitting and external command execution.
//!
//! The mini shell splits input lines into words with [`split_words`] and
//! falls back to [`run_external`] for anything that is not an applet.
//! [`shellquote`] renders argv back into a line for messages and logs.
//!
//! # Example
//!
//! ```
//! use rustybox_common::shell::{shellquote, split_words};
//!
//! let words = split_words(r#"echo "hello world" it\'s"#).unwrap();
//! assert_eq!(words, vec!["echo", "hello world", "it's"]);
//! assert_eq!(shellquote("a$b"), "\"a\\$b\"");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

use crate::error::{AppletError, AppletResult};

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Characters that never need quoting.
static SHELL_SAFE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_@%+=:,./-]+$").expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// Wraps the string in double quotes and escapes `$`, `` ` ``, `"`, `\`
/// and newline.
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Renders argv as a command line, quoting only the words that need it.
pub fn join_command_line<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if SHELL_SAFE_RE.is_match(arg) {
                arg.to_string()
            } else {
                shellquote(arg)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Splits a command line into words.
///
/// Supports single quotes (literal), double quotes (with `\"`, `\\`, `\$`
/// and `` \` `` escapes) and backslash escapes outside quotes. No
/// expansion of any kind is performed.
pub fn split_words(line: &str) -> AppletResult<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => current.push('\\'),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(AppletError::syntax("unterminated quoted string"));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Environment changes applied to an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// Start from an empty environment.
    pub clear: bool,
    /// Variables removed from the inherited environment.
    pub unset: Vec<String>,
    /// Variables set (after clearing/unsetting).
    pub set: Vec<(String, String)>,
}

/// Runs an external program with inherited stdio and returns its exit code.
///
/// Processes killed by a signal report `128 + signal`, as shells do.
pub fn run_external<S: AsRef<str>>(args: &[S]) -> AppletResult<i32> {
    run_external_env(args, &EnvOverrides::default())
}

/// Like [`run_external`], with environment changes applied to the child.
pub fn run_external_env<S: AsRef<str>>(args: &[S], env: &EnvOverrides) -> AppletResult<i32> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| AppletError::usage("no command given"))?;
    let program = program.as_ref();

    tracing::debug!(command = %join_command_line(args), "Executing external command");

    let mut command = Command::new(program);
    command.args(rest.iter().map(AsRef::as_ref));
    if env.clear {
        command.env_clear();
    }
    for name in &env.unset {
        command.env_remove(name);
    }
    for (name, value) in &env.set {
        command.env(name, value);
    }

    let status = command
        .status()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AppletError::not_found(program),
            _ => AppletError::NotExecutable {
                command: program.to_string(),
                source: e,
            },
        })?;

    let code = match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    };

    if code != 0 {
        tracing::trace!(command = %program, exit_code = code, "External command failed");
    }
    Ok(code)
}

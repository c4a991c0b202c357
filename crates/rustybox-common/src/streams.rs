//! Standard stream context handed to every applet.
//!
//! Applets never touch the process stdio directly. The registry passes a
//! [`Streams`] borrowing whatever the caller wants: the locked process
//! streams for a normal run, `io::sink()` for benchmarks, in-memory buffers
//! for tests.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};

use crate::error::{AppletError, AppletResult};

/// Operand naming standard input.
pub const STDIN_OPERAND: &str = "-";

/// The three standard streams of one applet invocation.
pub struct Streams<'a> {
    /// Standard input.
    pub stdin: &'a mut dyn BufRead,
    /// Standard output.
    pub stdout: &'a mut dyn Write,
    /// Standard error.
    pub stderr: &'a mut dyn Write,
}

impl<'a> Streams<'a> {
    /// Creates a stream context from borrowed reader/writers.
    pub fn new(
        stdin: &'a mut dyn BufRead,
        stdout: &'a mut dyn Write,
        stderr: &'a mut dyn Write,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    /// Reads an operand fully: a file path, or stdin for `-`.
    pub fn read_operand(&mut self, operand: &str) -> AppletResult<Vec<u8>> {
        let mut data = Vec::new();
        if operand == STDIN_OPERAND {
            self.stdin.read_to_end(&mut data)?;
        } else {
            File::open(operand)
                .and_then(|mut f| f.read_to_end(&mut data))
                .map_err(|e| AppletError::io(operand, e))?;
        }
        Ok(data)
    }

    /// Opens an operand as a buffered reader and hands it to `f` together
    /// with stdout, so filters can write while they read.
    pub fn with_reader<T, F>(&mut self, operand: &str, f: F) -> AppletResult<T>
    where
        F: FnOnce(&mut dyn BufRead, &mut dyn Write) -> AppletResult<T>,
    {
        if operand == STDIN_OPERAND {
            return f(&mut *self.stdin, &mut *self.stdout);
        }
        let file = File::open(operand).map_err(|e| AppletError::io(operand, e))?;
        let mut reader = BufReader::new(file);
        f(&mut reader, &mut *self.stdout)
    }

    /// Feeds an operand to `f` one line at a time, terminator included.
    /// Reading stops at end of input or as soon as `f` returns false.
    pub fn for_each_line<F>(&mut self, operand: &str, mut f: F) -> AppletResult<()>
    where
        F: FnMut(&[u8], &mut dyn Write) -> AppletResult<bool>,
    {
        self.with_reader(operand, |reader, out| {
            let mut line = Vec::new();
            loop {
                line.clear();
                let n = reader
                    .read_until(b'\n', &mut line)
                    .map_err(|e| AppletError::io(operand, e))?;
                if n == 0 || !f(&line, out)? {
                    return Ok(());
                }
            }
        })
    }

    /// Reads an operand as text, replacing invalid UTF-8.
    pub fn read_operand_text(&mut self, operand: &str) -> AppletResult<String> {
        let data = self.read_operand(operand)?;
        Ok(String::from_utf8(data)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    /// Streams an operand to stdout without buffering it whole.
    pub fn copy_operand(&mut self, operand: &str) -> AppletResult<u64> {
        if operand == STDIN_OPERAND {
            return Ok(io::copy(&mut *self.stdin, &mut *self.stdout)?);
        }
        let file = File::open(operand).map_err(|e| AppletError::io(operand, e))?;
        let mut reader = BufReader::new(file);
        let mut buf = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| AppletError::io(operand, e))?;
            if n == 0 {
                break;
            }
            self.stdout.write_all(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    /// Writes one line to stdout.
    pub fn println(&mut self, line: impl AsRef<str>) -> AppletResult<()> {
        self.stdout.write_all(line.as_ref().as_bytes())?;
        self.stdout.write_all(b"\n")?;
        Ok(())
    }

    /// Writes `APPLET: message` to stderr; failures to do so are ignored.
    pub fn warn(&mut self, applet: &str, message: impl std::fmt::Display) {
        let _ = writeln!(self.stderr, "{}: {}", applet, message);
    }
}

/// Splits text into lines, dropping the empty tail a trailing newline leaves.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n').collect()
}

/// Returns `operands`, or `["-"]` when there are none.
pub fn operands_or_stdin(operands: Vec<String>) -> Vec<String> {
    if operands.is_empty() {
        vec![STDIN_OPERAND.to_string()]
    } else {
        operands
    }
}

//! Line and byte oriented text applets: cat, head, tail, wc, rev, tac, nl,
//! fold, paste, tee, comm, expand, hexdump, shuf.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, Write};

use rand::seq::SliceRandom;
use rustybox_common::{
    expand_numeric_shorthand, operands_or_stdin, parse_count, split_lines, AppletError,
    AppletResult, Getopt, Streams, STDIN_OPERAND,
};

use super::{next_line, read_or_warn, warn_operand};

/// Splits into lines keeping each terminator; a final unterminated line is kept.
fn lines_inclusive(data: &[u8]) -> Vec<&[u8]> {
    data.split_inclusive(|&b| b == b'\n').collect()
}

fn strip_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// Writes the `==> NAME <==` header used by head and tail with several files.
fn write_header(out: &mut dyn Write, name: &str, first: bool) -> AppletResult<()> {
    let shown = if name == STDIN_OPERAND {
        "standard input"
    } else {
        name
    };
    if !first {
        out.write_all(b"\n")?;
    }
    writeln!(out, "==> {} <==", shown)?;
    Ok(())
}

// =============================================================================
// cat
// =============================================================================

/// `cat [-nbu] [FILE...]`
pub fn cat_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("nbu").parse(args)?;
    let number_nonblank = opts.has('b');
    let number_all = opts.has('n') && !number_nonblank;

    let mut status = 0;
    let mut line_no = 0usize;
    for name in operands_or_stdin(opts.operands) {
        if !number_all && !number_nonblank {
            let copied = io.copy_operand(&name);
            if warn_operand(io, "cat", copied)?.is_none() {
                status = 1;
            }
            continue;
        }

        let numbered = io.for_each_line(&name, |line, out| {
            let blank = strip_newline(line).is_empty();
            if number_all || !blank {
                line_no += 1;
                write!(out, "{:>6}\t", line_no)?;
            }
            out.write_all(line)?;
            Ok(true)
        });
        if warn_operand(io, "cat", numbered)?.is_none() {
            status = 1;
        }
    }
    Ok(status)
}

// =============================================================================
// head / tail
// =============================================================================

/// Copies at most `count` lines and stops reading there.
fn head_lines(
    reader: &mut dyn BufRead,
    out: &mut dyn Write,
    name: &str,
    count: usize,
) -> AppletResult<()> {
    let mut line = Vec::new();
    for _ in 0..count {
        if !next_line(reader, name, &mut line)? {
            break;
        }
        out.write_all(&line)?;
    }
    Ok(())
}

/// Copies at most `count` bytes and stops reading there.
fn head_bytes(
    reader: &mut dyn BufRead,
    out: &mut dyn Write,
    name: &str,
    count: usize,
) -> AppletResult<()> {
    let mut left = count;
    while left > 0 {
        let buf = reader.fill_buf().map_err(|e| AppletError::io(name, e))?;
        if buf.is_empty() {
            break;
        }
        let n = buf.len().min(left);
        out.write_all(&buf[..n])?;
        reader.consume(n);
        left -= n;
    }
    Ok(())
}

/// `head [-n N|-N] [-c N] [-q|-v] [FILE...]`
pub fn head_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let args = expand_numeric_shorthand(args, 'n');
    let opts = Getopt::new("n:c:qv").parse(&args)?;
    let lines = opts.value('n').map(parse_count).transpose()?.unwrap_or(10);
    let bytes = opts.value('c').map(parse_count).transpose()?;

    let files = operands_or_stdin(opts.operands.clone());
    let headers = match opts.last_of(&['q', 'v']) {
        Some('q') => false,
        Some('v') => true,
        _ => files.len() > 1,
    };

    let mut status = 0;
    for (i, name) in files.iter().enumerate() {
        let copied = io.with_reader(name, |reader, out| {
            if headers {
                write_header(out, name, i == 0)?;
            }
            match bytes {
                Some(count) => head_bytes(reader, out, name, count),
                None => head_lines(reader, out, name, lines),
            }
        });
        if warn_operand(io, "head", copied)?.is_none() {
            status = 1;
        }
    }
    Ok(status)
}

/// Which part of the input tail prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TailStart {
    /// The last N lines.
    Last(usize),
    /// Everything from line N (1-based) on.
    From(usize),
}

fn parse_tail_count(value: &str) -> AppletResult<TailStart> {
    match value.strip_prefix('+') {
        Some(rest) => Ok(TailStart::From(parse_count(rest)?)),
        None => Ok(TailStart::Last(parse_count(
            value.strip_prefix('-').unwrap_or(value),
        )?)),
    }
}

/// Copies the selected tail of one input. Only the last N lines are ever
/// held in memory.
fn copy_tail(
    reader: &mut dyn BufRead,
    out: &mut dyn Write,
    name: &str,
    start: TailStart,
) -> AppletResult<()> {
    let mut line = Vec::new();
    let mut ring: VecDeque<Vec<u8>> = VecDeque::new();
    let mut seen = 0usize;
    while next_line(reader, name, &mut line)? {
        seen += 1;
        match start {
            TailStart::From(n) => {
                if seen >= n {
                    out.write_all(&line)?;
                }
            }
            TailStart::Last(0) => {}
            TailStart::Last(n) => {
                if ring.len() == n {
                    ring.pop_front();
                }
                ring.push_back(line.clone());
            }
        }
    }
    for kept in ring {
        out.write_all(&kept)?;
    }
    Ok(())
}

/// `tail [-n [+]N|-N] [-q|-v] [FILE...]`
pub fn tail_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let args = expand_numeric_shorthand(args, 'n');
    let opts = Getopt::new("n:qv").parse(&args)?;
    let start = opts
        .value('n')
        .map(parse_tail_count)
        .transpose()?
        .unwrap_or(TailStart::Last(10));

    let files = operands_or_stdin(opts.operands.clone());
    let headers = match opts.last_of(&['q', 'v']) {
        Some('q') => false,
        Some('v') => true,
        _ => files.len() > 1,
    };

    let mut status = 0;
    for (i, name) in files.iter().enumerate() {
        let copied = io.with_reader(name, |reader, out| {
            if headers {
                write_header(out, name, i == 0)?;
            }
            copy_tail(reader, out, name, start)
        });
        if warn_operand(io, "tail", copied)?.is_none() {
            status = 1;
        }
    }
    Ok(status)
}

// =============================================================================
// wc
// =============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    lines: usize,
    words: usize,
    bytes: usize,
    chars: usize,
    longest: usize,
}

impl Counts {
    /// Counts one line, terminator included.
    fn add_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        if line.ends_with(b"\n") {
            self.lines += 1;
        }
        self.words += text.split_whitespace().count();
        self.bytes += line.len();
        self.chars += text.chars().count();
        let width = text
            .trim_end_matches('\n')
            .chars()
            .filter(|&c| c != '\r')
            .count();
        self.longest = self.longest.max(width);
    }

    #[cfg(test)]
    fn of(data: &[u8]) -> Self {
        let mut counts = Self::default();
        for line in lines_inclusive(data) {
            counts.add_line(line);
        }
        counts
    }

    fn add(&mut self, other: &Counts) {
        self.lines += other.lines;
        self.words += other.words;
        self.bytes += other.bytes;
        self.chars += other.chars;
        self.longest = self.longest.max(other.longest);
    }
}

/// `wc [-lwcmL] [FILE...]`
pub fn wc_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("lwcmL").parse(args)?;
    let defaults = !['l', 'w', 'c', 'm', 'L'].iter().any(|&c| opts.has(c));
    let mut columns: Vec<fn(&Counts) -> usize> = Vec::new();
    if defaults || opts.has('l') {
        columns.push(|c| c.lines);
    }
    if defaults || opts.has('w') {
        columns.push(|c| c.words);
    }
    if opts.has('m') {
        columns.push(|c| c.chars);
    }
    if defaults || opts.has('c') {
        columns.push(|c| c.bytes);
    }
    if opts.has('L') {
        columns.push(|c| c.longest);
    }

    let named = !opts.operands.is_empty();
    let files = operands_or_stdin(opts.operands);
    let padded = columns.len() > 1 || files.len() > 1;

    let render = |io: &mut Streams<'_>, counts: &Counts, name: Option<&str>| {
        let mut line = columns
            .iter()
            .map(|column| {
                if padded {
                    format!("{:>7}", column(counts))
                } else {
                    column(counts).to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(name) = name {
            line.push(' ');
            line.push_str(name);
        }
        io.println(line)
    };

    let mut status = 0;
    let mut total = Counts::default();
    for name in &files {
        let mut counts = Counts::default();
        let counted = io.for_each_line(name, |line, _| {
            counts.add_line(line);
            Ok(true)
        });
        if warn_operand(io, "wc", counted)?.is_none() {
            status = 1;
            continue;
        }
        total.add(&counts);
        render(io, &counts, named.then_some(name.as_str()))?;
    }
    if files.len() > 1 {
        render(io, &total, Some("total"))?;
    }
    Ok(status)
}

// =============================================================================
// rev / tac
// =============================================================================

/// `rev [FILE...]`
pub fn rev_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    let mut status = 0;
    for name in operands_or_stdin(opts.operands) {
        let reversed = io.for_each_line(&name, |line, out| {
            let body = String::from_utf8_lossy(strip_newline(line));
            let reversed: String = body.chars().rev().collect();
            out.write_all(reversed.as_bytes())?;
            if line.ends_with(b"\n") {
                out.write_all(b"\n")?;
            }
            Ok(true)
        });
        if warn_operand(io, "rev", reversed)?.is_none() {
            status = 1;
        }
    }
    Ok(status)
}

/// `tac [FILE...]`
pub fn tac_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    let mut status = 0;
    for name in operands_or_stdin(opts.operands) {
        let Some(data) = read_or_warn(io, "tac", &name) else {
            status = 1;
            continue;
        };
        for line in lines_inclusive(&data).into_iter().rev() {
            io.stdout.write_all(strip_newline(line))?;
            io.stdout.write_all(b"\n")?;
        }
    }
    Ok(status)
}

// =============================================================================
// nl
// =============================================================================

/// `nl [-b a|t|n] [-w N] [-s SEP] [-v START] [-i INCR] [FILE...]`
pub fn nl_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("b:w:s:v:i:").parse(args)?;
    let style = opts.value('b').unwrap_or("t");
    if !matches!(style, "a" | "t" | "n") {
        return Err(AppletError::usage(format!("invalid line numbering style: '{}'", style)));
    }
    let width = opts.value('w').map(parse_count).transpose()?.unwrap_or(6);
    let separator = opts.value('s').unwrap_or("\t");
    let mut number = opts.value('v').map(parse_count).transpose()?.unwrap_or(1);
    let increment = opts.value('i').map(parse_count).transpose()?.unwrap_or(1);
    let blank_prefix = " ".repeat(width + separator.chars().count());

    let mut status = 0;
    for name in operands_or_stdin(opts.operands.clone()) {
        let numbered = io.for_each_line(&name, |line, out| {
            let numbered = match style {
                "a" => true,
                "t" => !strip_newline(line).is_empty(),
                _ => false,
            };
            if numbered {
                write!(out, "{:>width$}{}", number, separator, width = width)?;
                number += increment;
            } else {
                out.write_all(blank_prefix.as_bytes())?;
            }
            out.write_all(line)?;
            Ok(true)
        });
        if warn_operand(io, "nl", numbered)?.is_none() {
            status = 1;
        }
    }
    Ok(status)
}

// =============================================================================
// fold
// =============================================================================

/// Breaks one line (without its newline) into pieces of at most `width`
/// characters; with `at_spaces`, breaks after the last blank that fits.
pub(crate) fn fold_line(line: &str, width: usize, at_spaces: bool) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;
    while chars.len() - start > width {
        let mut end = start + width;
        if at_spaces {
            if let Some(pos) = chars[start..end].iter().rposition(|c| c.is_whitespace()) {
                if pos > 0 {
                    end = start + pos + 1;
                }
            }
        }
        pieces.push(chars[start..end].iter().collect());
        start = end;
    }
    pieces.push(chars[start..].iter().collect());
    pieces
}

/// `fold [-s] [-w N] [FILE...]`
pub fn fold_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("bsw:").parse(args)?;
    let width = opts.value('w').map(parse_count).transpose()?.unwrap_or(80);
    if width == 0 {
        return Err(AppletError::invalid_number("0"));
    }
    let at_spaces = opts.has('s');

    let mut status = 0;
    for name in operands_or_stdin(opts.operands) {
        let folded = io.for_each_line(&name, |line, out| {
            let body = String::from_utf8_lossy(strip_newline(line));
            let pieces = fold_line(&body, width, at_spaces);
            let last = pieces.len() - 1;
            for (i, piece) in pieces.iter().enumerate() {
                out.write_all(piece.as_bytes())?;
                if i < last || line.ends_with(b"\n") {
                    out.write_all(b"\n")?;
                }
            }
            Ok(true)
        });
        if warn_operand(io, "fold", folded)?.is_none() {
            status = 1;
        }
    }
    Ok(status)
}

// =============================================================================
// paste
// =============================================================================

/// Expands paste's delimiter list; `\0` is the empty delimiter.
fn parse_delimiters(list: &str) -> Vec<String> {
    let mut delims = Vec::new();
    let mut chars = list.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            delims.push(c.to_string());
            continue;
        }
        match chars.next() {
            Some('n') => delims.push("\n".to_string()),
            Some('t') => delims.push("\t".to_string()),
            Some('0') => delims.push(String::new()),
            Some(other) => delims.push(other.to_string()),
            None => delims.push("\\".to_string()),
        }
    }
    if delims.is_empty() {
        delims.push(String::new());
    }
    delims
}

/// `paste [-s] [-d LIST] [FILE...]`
pub fn paste_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("d:s").parse(args)?;
    let delims = parse_delimiters(opts.value('d').unwrap_or("\t"));

    let mut status = 0;
    let mut columns: Vec<Vec<String>> = Vec::new();
    for name in operands_or_stdin(opts.operands.clone()) {
        match read_or_warn(io, "paste", &name) {
            Some(data) => columns.push(
                lines_inclusive(&data)
                    .into_iter()
                    .map(|l| String::from_utf8_lossy(strip_newline(l)).into_owned())
                    .collect(),
            ),
            None => status = 1,
        }
    }

    let join = |fields: &[&str]| {
        let mut out = String::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                out.push_str(&delims[(i - 1) % delims.len()]);
            }
            out.push_str(field);
        }
        out
    };

    if opts.has('s') {
        for lines in &columns {
            let fields: Vec<&str> = lines.iter().map(String::as_str).collect();
            io.println(join(&fields))?;
        }
        return Ok(status);
    }

    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    for row in 0..rows {
        let fields: Vec<&str> = columns
            .iter()
            .map(|lines| lines.get(row).map(String::as_str).unwrap_or(""))
            .collect();
        io.println(join(&fields))?;
    }
    Ok(status)
}

// =============================================================================
// tee
// =============================================================================

/// `tee [-a] [-i] [FILE...]`
pub fn tee_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("ai").parse(args)?;
    let append = opts.has('a');

    let mut status = 0;
    let mut outputs: Vec<(String, File)> = Vec::new();
    for name in &opts.operands {
        let opened = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(name);
        match opened {
            Ok(file) => outputs.push((name.clone(), file)),
            Err(e) => {
                io.warn("tee", AppletError::io(name.as_str(), e));
                status = 1;
            }
        }
    }

    let mut buf = [0u8; 8192];
    loop {
        let n = io.stdin.read(&mut buf)?;
        if n == 0 {
            break;
        }
        io.stdout.write_all(&buf[..n])?;
        let mut failed = Vec::new();
        for (i, (name, file)) in outputs.iter_mut().enumerate() {
            if let Err(e) = file.write_all(&buf[..n]) {
                io.warn("tee", AppletError::io(name.as_str(), e));
                failed.push(i);
            }
        }
        for i in failed.into_iter().rev() {
            outputs.remove(i);
            status = 1;
        }
    }
    io.stdout.flush()?;
    Ok(status)
}

// =============================================================================
// comm
// =============================================================================

/// `comm [-123] FILE1 FILE2`
///
/// Both inputs are expected sorted. Column two is indented by one tab and
/// column three by one tab per shown column before it.
pub fn comm_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("123").parse(args)?;
    let [first, second] = opts.operands.as_slice() else {
        let message = match opts.operands.as_slice() {
            [] => "missing operand".to_string(),
            [only] => format!("missing operand after '{}'", only),
            [_, _, extra, ..] => format!("extra operand '{}'", extra),
            _ => "missing operand".to_string(),
        };
        return Err(AppletError::usage(message));
    };
    let left_data = io.read_operand(first)?;
    let right_data = io.read_operand(second)?;
    let left: Vec<&[u8]> = lines_inclusive(&left_data).into_iter().map(strip_newline).collect();
    let right: Vec<&[u8]> = lines_inclusive(&right_data).into_iter().map(strip_newline).collect();

    let show = [!opts.has('1'), !opts.has('2'), !opts.has('3')];
    let second_prefix = if show[0] { "\t" } else { "" };
    let third_prefix: String = show[..2].iter().filter(|shown| **shown).map(|_| '\t').collect();

    let (mut i, mut j) = (0, 0);
    loop {
        let (column, line) = match (left.get(i), right.get(j)) {
            (None, None) => break,
            (Some(a), None) => {
                i += 1;
                (0, *a)
            }
            (None, Some(b)) => {
                j += 1;
                (1, *b)
            }
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Less => {
                    i += 1;
                    (0, *a)
                }
                Ordering::Greater => {
                    j += 1;
                    (1, *b)
                }
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                    (2, *a)
                }
            },
        };
        if !show[column] {
            continue;
        }
        let prefix = match column {
            0 => "",
            1 => second_prefix,
            _ => third_prefix.as_str(),
        };
        io.stdout.write_all(prefix.as_bytes())?;
        io.stdout.write_all(line)?;
        io.stdout.write_all(b"\n")?;
    }
    Ok(0)
}

// =============================================================================
// expand
// =============================================================================

/// Replaces tabs with spaces up to the next multiple of `tab`. With
/// `initial_only`, tabs after the first non-blank are kept.
pub(crate) fn expand_line(line: &str, tab: usize, initial_only: bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut column = 0;
    let mut leading = true;
    for c in line.chars() {
        match c {
            '\t' if leading || !initial_only => {
                let spaces = tab - column % tab;
                out.extend(std::iter::repeat(' ').take(spaces));
                column += spaces;
            }
            '\u{8}' => {
                out.push(c);
                column = column.saturating_sub(1);
            }
            _ => {
                leading &= c == ' ' || c == '\t';
                out.push(c);
                column += 1;
            }
        }
    }
    out
}

/// `expand [-i] [-t N] [FILE...]`
pub fn expand_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let args = expand_numeric_shorthand(args, 't');
    let opts = Getopt::new("t:i").parse(&args)?;
    let tab = opts.value('t').map(parse_count).transpose()?.unwrap_or(8);
    if tab == 0 {
        return Err(AppletError::usage("tab size cannot be 0"));
    }
    let initial_only = opts.has('i');

    let mut status = 0;
    for name in operands_or_stdin(opts.operands) {
        let expanded = io.for_each_line(&name, |line, out| {
            let text = String::from_utf8_lossy(line);
            out.write_all(expand_line(&text, tab, initial_only).as_bytes())?;
            Ok(true)
        });
        if warn_operand(io, "expand", expanded)?.is_none() {
            status = 1;
        }
    }
    Ok(status)
}

// =============================================================================
// hexdump
// =============================================================================

/// Incremental hexdump renderer. Lines are 16 bytes; a run of full lines
/// identical to the one before collapses into a single `*`.
pub(crate) struct HexDump {
    canonical: bool,
    squeeze: bool,
    offset: u64,
    pending: Vec<u8>,
    previous: Option<Vec<u8>>,
    squeezing: bool,
}

impl HexDump {
    pub(crate) fn new(canonical: bool, squeeze: bool) -> Self {
        Self {
            canonical,
            squeeze,
            offset: 0,
            pending: Vec::with_capacity(16),
            previous: None,
            squeezing: false,
        }
    }

    pub(crate) fn feed(&mut self, data: &[u8], out: &mut dyn Write) -> AppletResult<()> {
        self.pending.extend_from_slice(data);
        let full = self.pending.len() / 16 * 16;
        let ready: Vec<u8> = self.pending.drain(..full).collect();
        for chunk in ready.chunks(16) {
            self.line(chunk, out)?;
        }
        Ok(())
    }

    /// Flushes the partial last line and prints the final offset.
    pub(crate) fn finish(mut self, out: &mut dyn Write) -> AppletResult<()> {
        let rest = std::mem::take(&mut self.pending);
        if !rest.is_empty() {
            self.line(&rest, out)?;
        }
        if self.canonical {
            writeln!(out, "{:08x}", self.offset)?;
        } else {
            writeln!(out, "{:07x}", self.offset)?;
        }
        Ok(())
    }

    fn line(&mut self, chunk: &[u8], out: &mut dyn Write) -> AppletResult<()> {
        let repeated =
            self.squeeze && chunk.len() == 16 && self.previous.as_deref() == Some(chunk);
        if repeated {
            if !self.squeezing {
                out.write_all(b"*\n")?;
                self.squeezing = true;
            }
        } else {
            self.squeezing = false;
            out.write_all(self.render(chunk).as_bytes())?;
            self.previous = Some(chunk.to_vec());
        }
        self.offset += chunk.len() as u64;
        Ok(())
    }

    fn render(&self, chunk: &[u8]) -> String {
        let mut line = String::with_capacity(80);
        if self.canonical {
            let _ = write!(line, "{:08x} ", self.offset);
            for i in 0..16 {
                if i == 8 {
                    line.push(' ');
                }
                match chunk.get(i) {
                    Some(b) => {
                        let _ = write!(line, " {:02x}", b);
                    }
                    None => line.push_str("   "),
                }
            }
            line.push_str("  |");
            line.extend(chunk.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    char::from(b)
                } else {
                    '.'
                }
            }));
            line.push_str("|\n");
        } else {
            let _ = write!(line, "{:07x}", self.offset);
            for pair in chunk.chunks(2) {
                let high = pair.get(1).map_or(0, |b| u16::from(*b) << 8);
                let _ = write!(line, " {:04x}", u16::from(pair[0]) | high);
            }
            line.push('\n');
        }
        line
    }
}

/// `hexdump [-Cv] [FILE...]`
///
/// All operands are dumped as one continuous stream.
pub fn hexdump_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("Cv").parse(args)?;
    let mut dump = HexDump::new(opts.has('C'), !opts.has('v'));

    let mut status = 0;
    for name in operands_or_stdin(opts.operands) {
        let dumped = io.with_reader(&name, |reader, out| loop {
            let chunk = reader
                .fill_buf()
                .map_err(|e| AppletError::io(name.as_str(), e))?;
            if chunk.is_empty() {
                return Ok(());
            }
            dump.feed(chunk, out)?;
            let n = chunk.len();
            reader.consume(n);
        });
        if warn_operand(io, "hexdump", dumped)?.is_none() {
            status = 1;
        }
    }
    dump.finish(&mut *io.stdout)?;
    Ok(status)
}

// =============================================================================
// shuf
// =============================================================================

fn parse_range(text: &str) -> AppletResult<(u64, u64)> {
    let invalid = || AppletError::failed(format!("invalid input range: '{}'", text));
    let (low, high) = text.split_once('-').ok_or_else(invalid)?;
    let low: u64 = low.parse().map_err(|_| invalid())?;
    let high: u64 = high.parse().map_err(|_| invalid())?;
    if low > high {
        return Err(invalid());
    }
    Ok((low, high))
}

/// `shuf [-n COUNT] [-e ARG... | -i LO-HI | FILE]`
pub fn shuf_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("ei:n:").parse(args)?;
    let limit = opts.value('n').map(parse_count).transpose()?;

    let mut lines: Vec<String> = if let Some(range) = opts.value('i') {
        let (low, high) = parse_range(range)?;
        (low..=high).map(|n| n.to_string()).collect()
    } else if opts.has('e') {
        opts.operands.clone()
    } else {
        if let Some(extra) = opts.operands.get(1) {
            return Err(AppletError::usage(format!("extra operand '{}'", extra)));
        }
        let name = opts.operands.first().map_or(STDIN_OPERAND, String::as_str);
        let text = io.read_operand_text(name)?;
        split_lines(&text).into_iter().map(str::to_string).collect()
    };
    lines.shuffle(&mut rand::thread_rng());

    for line in lines.iter().take(limit.unwrap_or(usize::MAX)) {
        io.println(line)?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lines_inclusive() {
        assert_eq!(lines_inclusive(b"a\nb"), vec![&b"a\n"[..], &b"b"[..]]);
        assert!(lines_inclusive(b"").is_empty());
    }

    #[test]
    fn test_parse_tail_count() {
        assert_eq!(parse_tail_count("3").unwrap(), TailStart::Last(3));
        assert_eq!(parse_tail_count("-3").unwrap(), TailStart::Last(3));
        assert_eq!(parse_tail_count("+2").unwrap(), TailStart::From(2));
        assert!(parse_tail_count("x").is_err());
    }

    #[test]
    fn test_counts() {
        let counts = Counts::of(b"one two\nthree\n");
        assert_eq!(counts.lines, 2);
        assert_eq!(counts.words, 3);
        assert_eq!(counts.bytes, 14);
        assert_eq!(counts.longest, 7);

        let accented = Counts::of("h\u{e9}llo\n".as_bytes());
        assert_eq!((accented.chars, accented.bytes), (6, 7));
        let unterminated = Counts::of(b"a b");
        assert_eq!((unterminated.lines, unterminated.words), (0, 2));
    }

    #[test]
    fn test_fold_line() {
        assert_eq!(fold_line("abcdef", 4, false), vec!["abcd", "ef"]);
        assert_eq!(fold_line("ab cd ef", 5, true), vec!["ab ", "cd ef"]);
        assert_eq!(fold_line("", 4, false), vec![""]);
    }

    #[test]
    fn test_parse_delimiters() {
        assert_eq!(parse_delimiters(",;"), vec![",", ";"]);
        assert_eq!(parse_delimiters("\\t\\0"), vec!["\t", ""]);
    }
    #[test]
    fn test_expand_line() {
        assert_eq!(expand_line("a\tb\n", 8, false), "a       b\n");
        assert_eq!(expand_line("\tx\ty", 4, false), "    x   y");
        assert_eq!(expand_line("\tx\ty", 4, true), "    x\ty");
        assert_eq!(expand_line("abcd\te", 4, false), "abcd    e");
    }

    fn dump(data: &[u8], canonical: bool, squeeze: bool) -> String {
        let mut out = Vec::new();
        let mut dump = HexDump::new(canonical, squeeze);
        // Feed in uneven pieces: output must not depend on chunking.
        for piece in data.chunks(7) {
            dump.feed(piece, &mut out).unwrap();
        }
        dump.finish(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_hexdump_canonical() {
        assert_eq!(
            dump(b"hello\n", true, true),
            "00000000  68 65 6c 6c 6f 0a                                 |hello.|\n00000006\n"
        );
        assert_eq!(
            dump(b"0123456789abcdef", true, true),
            "00000000  30 31 32 33 34 35 36 37  38 39 61 62 63 64 65 66  |0123456789abcdef|\n00000010\n"
        );
    }

    #[test]
    fn test_hexdump_words_and_squeeze() {
        assert_eq!(dump(b"hello\n", false, true), "0000000 6568 6c6c 0a6f\n0000006\n");
        assert_eq!(dump(b"abc", false, true), "0000000 6261 0063\n0000003\n");

        let zeros = [0u8; 64];
        let squeezed = dump(&zeros, false, true);
        assert_eq!(
            squeezed,
            "0000000 0000 0000 0000 0000 0000 0000 0000 0000\n*\n0000040\n"
        );
        assert_eq!(dump(&zeros, false, false).lines().count(), 5);
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("1-5").unwrap(), (1, 5));
        assert_eq!(parse_range("3-3").unwrap(), (3, 3));
        assert!(parse_range("5-1").is_err());
        assert!(parse_range("x").is_err());
    }
}

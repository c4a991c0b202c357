//! Formatting and arithmetic applets: printf, expr.

use std::fmt;
use std::io::Write;

use regex::Regex;
use rustybox_common::{AppletError, AppletResult, Streams};

use super::basic::expand_echo_escapes;
use super::filter::basic_to_extended;

// =============================================================================
// printf
// =============================================================================

/// Arguments consumed by the directives of a printf format.
struct ArgFeed<'a> {
    args: &'a [String],
    next: usize,
    errors: Vec<String>,
}

impl<'a> ArgFeed<'a> {
    /// The next argument; missing arguments read as empty strings.
    fn text(&mut self) -> &'a str {
        let arg = self.args.get(self.next).map_or("", String::as_str);
        self.next += 1;
        arg
    }

    fn integer(&mut self) -> i64 {
        let text = self.text();
        parse_integer(text).unwrap_or_else(|partial| {
            self.errors.push(format!("invalid number '{}'", text));
            partial
        })
    }

    fn float(&mut self) -> f64 {
        let text = self.text();
        let trimmed = text.trim();
        if let Ok(value) = trimmed.parse::<f64>() {
            return value;
        }
        match parse_integer(text) {
            Ok(value) => value as f64,
            Err(partial) => {
                self.errors.push(format!("invalid number '{}'", text));
                partial as f64
            }
        }
    }
}

/// Parses an integer argument the way C literals read: `0x` hex, leading
/// `0` octal, or `'c` for the code of a character. On failure the error
/// carries the value to print anyway.
pub(crate) fn parse_integer(text: &str) -> Result<i64, i64> {
    let trimmed = text.trim_start();
    if let Some(quoted) = trimmed.strip_prefix(['\'', '"']) {
        return Ok(quoted.chars().next().map_or(0, |c| i64::from(u32::from(c))));
    }
    if trimmed.is_empty() {
        return Ok(0);
    }
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (radix, body) = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => (16, hex),
        None if digits.len() > 1 && digits.starts_with('0') => (8, &digits[1..]),
        None => (10, digits),
    };
    let value = i64::from_str_radix(body, radix).map_err(|_| 0)?;
    Ok(if negative { -value } else { value })
}

/// Flags, width and precision of one `%` directive.
#[derive(Debug, Default, Clone, Copy)]
struct Directive {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
}

impl Directive {
    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }

    /// Pads `sign + prefix + digits` to the field width; zeros go between
    /// the prefix and the digits.
    fn pad(&self, sign: &str, prefix: &str, digits: &str, zero_ok: bool) -> String {
        let len = sign.len() + prefix.len() + digits.chars().count();
        let fill = self.width.saturating_sub(len);
        if self.left {
            format!("{}{}{}{}", sign, prefix, digits, " ".repeat(fill))
        } else if self.zero && zero_ok {
            format!("{}{}{}{}", sign, prefix, "0".repeat(fill), digits)
        } else {
            format!("{}{}{}{}", " ".repeat(fill), sign, prefix, digits)
        }
    }

    fn integer(&self, value: i64, conversion: char) -> String {
        let magnitude = value.unsigned_abs();
        let (negative, mut digits) = match conversion {
            'd' | 'i' => (value < 0, magnitude.to_string()),
            'u' => (false, (value as u64).to_string()),
            'o' => (false, format!("{:o}", value as u64)),
            'x' => (false, format!("{:x}", value as u64)),
            _ => (false, format!("{:X}", value as u64)),
        };
        if let Some(precision) = self.precision {
            if precision == 0 && value == 0 {
                digits.clear();
            } else if digits.len() < precision {
                digits = format!("{}{}", "0".repeat(precision - digits.len()), digits);
            }
        }
        let prefix = match conversion {
            'o' if self.alt && !digits.starts_with('0') => "0",
            'x' if self.alt && value != 0 => "0x",
            'X' if self.alt && value != 0 => "0X",
            _ => "",
        };
        let sign = if matches!(conversion, 'd' | 'i') {
            self.sign(negative)
        } else {
            ""
        };
        self.pad(sign, prefix, &digits, self.precision.is_none())
    }

    fn float(&self, value: f64, conversion: char) -> String {
        let upper = conversion.is_ascii_uppercase();
        let sign = self.sign(value.is_sign_negative() && !value.is_nan());
        if !value.is_finite() {
            let text = if value.is_nan() { "nan" } else { "inf" };
            let text = if upper { text.to_uppercase() } else { text.to_string() };
            return self.pad(sign, "", &text, false);
        }
        let precision = self.precision.unwrap_or(6);
        let magnitude = value.abs();
        let body = match conversion {
            'f' | 'F' => format!("{:.*}", precision, magnitude),
            'e' | 'E' => exponent_form(magnitude, precision, upper),
            _ => general_form(magnitude, precision, self.alt, upper),
        };
        self.pad(sign, "", &body, true)
    }

    fn text(&self, value: &str) -> String {
        let shown: String = match self.precision {
            Some(precision) => value.chars().take(precision).collect(),
            None => value.to_string(),
        };
        self.pad("", "", &shown, false)
    }
}

/// `%e`: one digit, the fraction, and an exponent of at least two digits.
fn exponent_form(magnitude: f64, precision: usize, upper: bool) -> String {
    let rendered = format!("{:.*e}", precision, magnitude);
    let (mantissa, exponent) = rendered.split_once('e').unwrap_or((rendered.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    format!(
        "{}{}{}{:02}",
        mantissa,
        if upper { 'E' } else { 'e' },
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

/// `%g`: `%e` or `%f` depending on the exponent, trailing zeros removed.
fn general_form(magnitude: f64, precision: usize, alt: bool, upper: bool) -> String {
    let precision = precision.max(1);
    let exponent = if magnitude == 0.0 {
        0
    } else {
        let rendered = format!("{:.*e}", precision - 1, magnitude);
        rendered
            .split_once('e')
            .and_then(|(_, e)| e.parse::<i64>().ok())
            .unwrap_or(0)
    };
    let limit = i64::try_from(precision).unwrap_or(i64::MAX);
    let rendered = if exponent < -4 || exponent >= limit {
        exponent_form(magnitude, precision - 1, upper)
    } else {
        let decimals = usize::try_from(limit - 1 - exponent).unwrap_or(0);
        format!("{:.*}", decimals, magnitude)
    };
    if alt {
        return rendered;
    }
    let split = rendered.find(['e', 'E']).unwrap_or(rendered.len());
    let (mantissa, exponent) = rendered.split_at(split);
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{}{}", mantissa, exponent)
}

/// Expands one backslash escape of a format string starting at `bytes[*i]`
/// (the backslash). Returns true for `\c`.
fn format_escape(bytes: &[u8], i: &mut usize, out: &mut Vec<u8>) -> bool {
    let Some(&next) = bytes.get(*i + 1) else {
        out.push(b'\\');
        *i += 1;
        return false;
    };
    *i += 2;
    match next {
        b'a' => out.push(0x07),
        b'b' => out.push(0x08),
        b'c' => return true,
        b'e' => out.push(0x1b),
        b'f' => out.push(0x0c),
        b'n' => out.push(b'\n'),
        b'r' => out.push(b'\r'),
        b't' => out.push(b'\t'),
        b'v' => out.push(0x0b),
        b'\\' | b'"' | b'\'' => out.push(next),
        b'0'..=b'7' => {
            let mut value = u32::from(next - b'0');
            let mut digits = 1;
            while digits < 3 {
                match bytes.get(*i) {
                    Some(&d @ b'0'..=b'7') => {
                        value = value * 8 + u32::from(d - b'0');
                        digits += 1;
                        *i += 1;
                    }
                    _ => break,
                }
            }
            out.push(value.to_le_bytes()[0]);
        }
        b'x' => {
            let mut value = 0u32;
            let mut digits = 0;
            while digits < 2 {
                match bytes.get(*i).and_then(|b| char::from(*b).to_digit(16)) {
                    Some(d) => {
                        value = value * 16 + d;
                        digits += 1;
                        *i += 1;
                    }
                    None => break,
                }
            }
            if digits == 0 {
                out.extend_from_slice(b"\\x");
            } else {
                out.push(value.to_le_bytes()[0]);
            }
        }
        other => {
            out.push(b'\\');
            out.push(other);
        }
    }
    false
}

/// Renders `format` once, taking arguments from `feed`. Returns true when
/// a `\c` asked to stop all output.
fn render(format: &str, feed: &mut ArgFeed<'_>, out: &mut Vec<u8>) -> AppletResult<bool> {
    let bytes = format.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if format_escape(bytes, &mut i, out) {
                    return Ok(true);
                }
                continue;
            }
            b'%' if bytes.get(i + 1) == Some(&b'%') => {
                out.push(b'%');
                i += 2;
                continue;
            }
            b'%' => {}
            b => {
                out.push(b);
                i += 1;
                continue;
            }
        }

        let start = i;
        i += 1;
        let mut directive = Directive::default();
        while let Some(&flag) = bytes.get(i) {
            match flag {
                b'-' => directive.left = true,
                b'+' => directive.plus = true,
                b' ' => directive.space = true,
                b'#' => directive.alt = true,
                b'0' => directive.zero = true,
                _ => break,
            }
            i += 1;
        }
        if bytes.get(i) == Some(&b'*') {
            let width = feed.integer();
            directive.left |= width < 0;
            directive.width = usize::try_from(width.unsigned_abs()).unwrap_or(0);
            i += 1;
        } else {
            while let Some(d @ b'0'..=b'9') = bytes.get(i).copied() {
                directive.width = directive.width * 10 + usize::from(d - b'0');
                i += 1;
            }
        }
        if bytes.get(i) == Some(&b'.') {
            i += 1;
            if bytes.get(i) == Some(&b'*') {
                directive.precision = usize::try_from(feed.integer()).ok();
                i += 1;
            } else {
                let mut precision = 0;
                while let Some(d @ b'0'..=b'9') = bytes.get(i).copied() {
                    precision = precision * 10 + usize::from(d - b'0');
                    i += 1;
                }
                directive.precision = Some(precision);
            }
        }
        while matches!(bytes.get(i), Some(b'h' | b'l' | b'L' | b'q' | b'j' | b'z' | b't')) {
            i += 1;
        }

        let Some(&conversion) = bytes.get(i) else {
            return Err(AppletError::failed(format!(
                "{}: missing format character",
                String::from_utf8_lossy(&bytes[start..])
            )));
        };
        i += 1;
        let rendered = match conversion {
            b'd' | b'i' | b'u' | b'o' | b'x' | b'X' => {
                directive.integer(feed.integer(), char::from(conversion))
            }
            b'f' | b'F' | b'e' | b'E' | b'g' | b'G' => {
                directive.float(feed.float(), char::from(conversion))
            }
            b'c' => {
                let first: String = feed.text().chars().take(1).collect();
                directive.pad("", "", &first, false)
            }
            b's' => directive.text(feed.text()),
            b'b' => {
                let mut expanded = Vec::new();
                let stop = expand_echo_escapes(feed.text(), &mut expanded);
                let text = String::from_utf8_lossy(&expanded).into_owned();
                out.extend_from_slice(directive.text(&text).as_bytes());
                if stop {
                    return Ok(true);
                }
                continue;
            }
            _ => {
                return Err(AppletError::failed(format!(
                    "{}: invalid conversion specification",
                    String::from_utf8_lossy(&bytes[start..i])
                )))
            }
        };
        out.extend_from_slice(rendered.as_bytes());
    }
    Ok(false)
}

/// `printf FORMAT [ARGUMENT...]`
///
/// The format is reused while arguments remain, as long as each pass
/// consumes at least one.
pub fn printf_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let Some(format) = args.get(1) else {
        return Err(AppletError::usage("missing operand"));
    };
    let mut feed = ArgFeed {
        args: &args[2..],
        next: 0,
        errors: Vec::new(),
    };
    let mut out = Vec::new();
    loop {
        let before = feed.next;
        let stopped = render(format, &mut feed, &mut out)?;
        if stopped || feed.next == before || feed.next >= feed.args.len() {
            break;
        }
    }
    io.stdout.write_all(&out)?;
    for error in &feed.errors {
        io.warn("printf", error);
    }
    Ok(i32::from(!feed.errors.is_empty()))
}

// =============================================================================
// expr
// =============================================================================

/// An expr value. Strings that look like integers take part in arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(s) => {
                let digits = s.strip_prefix('-').unwrap_or(s);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                s.parse().ok()
            }
        }
    }

    /// Empty strings and zero are null: false in `|`/`&` and exit status 1.
    pub(crate) fn is_null(&self) -> bool {
        match self {
            Value::Str(s) if s.is_empty() => true,
            other => other.as_int() == Some(0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
        }
    }
}

fn syntax_error() -> AppletError {
    AppletError::syntax("syntax error")
}

/// Recursive descent over expr's tokens, lowest precedence first.
struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn accept(&mut self, ops: &[&str]) -> Option<&'a str> {
        let token = self.peek().filter(|t| ops.contains(t))?;
        self.pos += 1;
        Some(token)
    }

    fn or(&mut self) -> AppletResult<Value> {
        let mut left = self.and()?;
        while self.accept(&["|"]).is_some() {
            let right = self.and()?;
            left = if !left.is_null() {
                left
            } else if !right.is_null() {
                right
            } else {
                Value::Int(0)
            };
        }
        Ok(left)
    }

    fn and(&mut self) -> AppletResult<Value> {
        let mut left = self.comparison()?;
        while self.accept(&["&"]).is_some() {
            let right = self.comparison()?;
            if left.is_null() || right.is_null() {
                left = Value::Int(0);
            }
        }
        Ok(left)
    }

    fn comparison(&mut self) -> AppletResult<Value> {
        let mut left = self.additive()?;
        while let Some(op) = self.accept(&["<", "<=", "=", "==", "!=", ">=", ">"]) {
            let right = self.additive()?;
            let ordering = match (left.as_int(), right.as_int()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => left.to_string().cmp(&right.to_string()),
            };
            let holds = match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                "=" | "==" => ordering.is_eq(),
                "!=" => ordering.is_ne(),
                ">=" => ordering.is_ge(),
                _ => ordering.is_gt(),
            };
            left = Value::Int(i64::from(holds));
        }
        Ok(left)
    }

    fn additive(&mut self) -> AppletResult<Value> {
        let mut left = self.multiplicative()?;
        while let Some(op) = self.accept(&["+", "-"]) {
            let right = self.multiplicative()?;
            left = arithmetic(op, &left, &right)?;
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> AppletResult<Value> {
        let mut left = self.matching()?;
        while let Some(op) = self.accept(&["*", "/", "%"]) {
            let right = self.matching()?;
            left = arithmetic(op, &left, &right)?;
        }
        Ok(left)
    }

    fn matching(&mut self) -> AppletResult<Value> {
        let mut left = self.primary()?;
        while self.accept(&[":"]).is_some() {
            let pattern = self.primary()?;
            left = regex_match(&left.to_string(), &pattern.to_string())?;
        }
        Ok(left)
    }

    fn operand(&mut self) -> AppletResult<String> {
        Ok(self.primary()?.to_string())
    }

    fn primary(&mut self) -> AppletResult<Value> {
        match self.next() {
            None | Some(")") => Err(syntax_error()),
            Some("(") => {
                let value = self.or()?;
                if self.next() != Some(")") {
                    return Err(AppletError::syntax("syntax error: expecting ')'"));
                }
                Ok(value)
            }
            Some("+") => self
                .next()
                .map(|token| Value::Str(token.to_string()))
                .ok_or_else(syntax_error),
            Some("length") => {
                let text = self.operand()?;
                Ok(Value::Int(i64::try_from(text.chars().count()).unwrap_or(i64::MAX)))
            }
            Some("match") => {
                let text = self.operand()?;
                let pattern = self.operand()?;
                regex_match(&text, &pattern)
            }
            Some("substr") => {
                let text = self.operand()?;
                let position = Value::Str(self.operand()?).as_int();
                let length = Value::Str(self.operand()?).as_int();
                Ok(Value::Str(substring(&text, position, length)))
            }
            Some("index") => {
                let text = self.operand()?;
                let set = self.operand()?;
                let found = text
                    .chars()
                    .position(|c| set.contains(c))
                    .map_or(0, |idx| idx + 1);
                Ok(Value::Int(i64::try_from(found).unwrap_or(0)))
            }
            Some(token) => Ok(Value::Str(token.to_string())),
        }
    }
}

fn arithmetic(op: &str, left: &Value, right: &Value) -> AppletResult<Value> {
    let (Some(a), Some(b)) = (left.as_int(), right.as_int()) else {
        return Err(AppletError::syntax("non-integer argument"));
    };
    let result = match op {
        "+" => a.checked_add(b),
        "-" => a.checked_sub(b),
        "*" => a.checked_mul(b),
        "/" | "%" if b == 0 => return Err(AppletError::syntax("division by zero")),
        "/" => a.checked_div(b),
        _ => a.checked_rem(b),
    };
    result
        .map(Value::Int)
        .ok_or_else(|| AppletError::syntax("result out of range"))
}

/// `substr`: 1-based character positions; anything out of range is empty.
fn substring(text: &str, position: Option<i64>, length: Option<i64>) -> String {
    match (position, length) {
        (Some(position), Some(length)) if position >= 1 && length >= 1 => {
            let skip = usize::try_from(position - 1).unwrap_or(usize::MAX);
            let take = usize::try_from(length).unwrap_or(usize::MAX);
            text.chars().skip(skip).take(take).collect()
        }
        _ => String::new(),
    }
}

/// `STRING : REGEX`, anchored at the start. With a `\(...\)` group the
/// value is the captured text, otherwise the number of matched characters.
pub(crate) fn regex_match(text: &str, pattern: &str) -> AppletResult<Value> {
    let anchored = format!("^(?:{})", basic_to_extended(pattern));
    let re = Regex::new(&anchored)
        .map_err(|e| AppletError::syntax(format!("invalid regular expression: {}", e)))?;
    let grouped = re.captures_len() > 1;
    let value = match re.captures(text) {
        Some(caps) if grouped => {
            Value::Str(caps.get(1).map_or("", |m| m.as_str()).to_string())
        }
        Some(caps) => {
            let matched = caps.get(0).map_or(0, |m| m.as_str().chars().count());
            Value::Int(i64::try_from(matched).unwrap_or(i64::MAX))
        }
        None if grouped => Value::Str(String::new()),
        None => Value::Int(0),
    };
    Ok(value)
}

/// Evaluates an expr command line.
pub(crate) fn evaluate(tokens: &[String]) -> AppletResult<Value> {
    if tokens.is_empty() {
        return Err(AppletError::syntax("missing operand"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.or()?;
    match parser.peek() {
        Some(extra) => Err(AppletError::syntax(format!(
            "syntax error: unexpected argument '{}'",
            extra
        ))),
        None => Ok(value),
    }
}

/// `expr EXPRESSION`
///
/// Exit status is 0 for a non-null result, 1 for null, 2 for errors.
pub fn expr_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let mut tokens = args.get(1..).unwrap_or_default();
    if tokens.first().map(String::as_str) == Some("--") {
        tokens = &tokens[1..];
    }
    let value = evaluate(tokens)?;
    io.println(value.to_string())?;
    Ok(i32::from(value.is_null()))
}

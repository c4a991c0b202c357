//! Checksum applets: md5sum, sha256sum, sha512sum, cksum.

use std::fmt::Write as _;
use std::io::BufRead;

use md5::Md5;
use rustybox_common::{operands_or_stdin, AppletError, AppletResult, Getopt, Streams};
use sha2::{Digest, Sha256, Sha512};

use super::{next_line, warn_operand};

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// Feeds every chunk of `reader` to `update`.
fn consume_all(
    reader: &mut dyn BufRead,
    operand: &str,
    mut update: impl FnMut(&[u8]),
) -> AppletResult<()> {
    loop {
        let chunk = reader
            .fill_buf()
            .map_err(|e| AppletError::io(operand, e))?;
        if chunk.is_empty() {
            return Ok(());
        }
        update(chunk);
        let n = chunk.len();
        reader.consume(n);
    }
}

/// Hex digest of one operand.
fn digest_operand<D: Digest>(io: &mut Streams<'_>, operand: &str) -> AppletResult<String> {
    io.with_reader(operand, |reader, _| {
        let mut hasher = D::new();
        consume_all(reader, operand, |chunk| hasher.update(chunk))?;
        Ok(to_hex(&hasher.finalize()))
    })
}

/// Splits a `HASH  NAME` (or `HASH *NAME`) line of a check list.
pub(crate) fn parse_check_line(line: &str) -> Option<(&str, &str)> {
    let (hash, rest) = line.split_once(' ')?;
    let name = rest.strip_prefix([' ', '*'])?;
    let valid = !hash.is_empty() && hash.bytes().all(|b| b.is_ascii_hexdigit());
    (valid && !name.is_empty()).then_some((hash, name))
}

/// Runs `-c`: verifies every `HASH  NAME` line of the lists.
fn check_lists<D: Digest>(
    applet: &str,
    lists: &[String],
    quiet: bool,
    status_only: bool,
    io: &mut Streams<'_>,
) -> AppletResult<i32> {
    let mut entries = Vec::new();
    let mut status = 0;
    for list in lists {
        let mut lines = Vec::new();
        let read = io.with_reader(list, |reader, _| {
            let mut line = Vec::new();
            while next_line(reader, list, &mut line)? {
                lines.push(String::from_utf8_lossy(&line).trim_end_matches('\n').to_string());
            }
            Ok(())
        });
        if warn_operand(io, applet, read)?.is_none() {
            status = 1;
            continue;
        }
        for line in lines.iter().filter(|l| !l.is_empty()) {
            match parse_check_line(line) {
                Some((hash, name)) => entries.push((hash.to_lowercase(), name.to_string())),
                None => {
                    if !status_only {
                        io.warn(applet, format!("{}: improperly formatted checksum line", list));
                    }
                    status = 1;
                }
            }
        }
    }

    let mut mismatched = 0;
    let mut unreadable = 0;
    for (expected, name) in entries {
        let verdict = match digest_operand::<D>(io, &name) {
            Ok(actual) if actual == expected => "OK",
            Ok(_) => {
                mismatched += 1;
                "FAILED"
            }
            Err(e @ AppletError::Stream(_)) => return Err(e),
            Err(e) => {
                if !status_only {
                    io.warn(applet, e);
                }
                unreadable += 1;
                "FAILED open or read"
            }
        };
        if status_only || (quiet && verdict == "OK") {
            continue;
        }
        io.println(format!("{}: {}", name, verdict))?;
    }

    if !status_only {
        if unreadable > 0 {
            let noun = if unreadable == 1 { "file" } else { "files" };
            io.warn(applet, format!("WARNING: {} listed {} could not be read", unreadable, noun));
        }
        if mismatched > 0 {
            let noun = if mismatched == 1 { "checksum" } else { "checksums" };
            io.warn(applet, format!("WARNING: {} computed {} did NOT match", mismatched, noun));
        }
    }
    if mismatched > 0 || unreadable > 0 {
        status = 1;
    }
    Ok(status)
}

/// Body of the `*sum` applets: `APPLET [-c [-s] [-w]] [FILE...]`.
fn hash_sum_main<D: Digest>(
    applet: &str,
    args: &[String],
    io: &mut Streams<'_>,
) -> AppletResult<i32> {
    let opts = Getopt::new("cbtsqw").parse(args)?;
    let operands = operands_or_stdin(opts.operands.clone());
    if opts.has('c') {
        return check_lists::<D>(applet, &operands, opts.has('q'), opts.has('s'), io);
    }

    let mut status = 0;
    for operand in &operands {
        let digest = digest_operand::<D>(io, operand);
        match warn_operand(io, applet, digest)? {
            Some(hex) => io.println(format!("{}  {}", hex, operand))?,
            None => status = 1,
        }
    }
    Ok(status)
}

pub fn md5sum_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    hash_sum_main::<Md5>("md5sum", args, io)
}

pub fn sha256sum_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    hash_sum_main::<Sha256>("sha256sum", args, io)
}

pub fn sha512sum_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    hash_sum_main::<Sha512>("sha512sum", args, io)
}

// =============================================================================
// cksum
// =============================================================================

/// Table for the CRC-32 polynomial 0x04C11DB7, most significant bit first.
const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = crc_table();

/// The POSIX `cksum` CRC: the data, then its length in as few bytes as
/// possible (least significant first), then complemented.
#[derive(Debug, Default, Clone)]
pub(crate) struct Cksum {
    crc: u32,
    len: u64,
}

impl Cksum {
    fn push(&mut self, byte: u8) {
        let index = ((self.crc >> 24) ^ u32::from(byte)) & 0xff;
        self.crc = (self.crc << 8) ^ CRC_TABLE[index as usize];
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.push(byte);
        }
        self.len += data.len() as u64;
    }

    pub(crate) fn finish(mut self) -> (u32, u64) {
        let total = self.len;
        let mut len = total;
        while len != 0 {
            self.push(len.to_le_bytes()[0]);
            len >>= 8;
        }
        (!self.crc, total)
    }
}

/// `cksum [FILE...]`
pub fn cksum_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    let named = !opts.operands.is_empty();
    let operands = operands_or_stdin(opts.operands.clone());

    let mut status = 0;
    for operand in &operands {
        let sum = io.with_reader(operand, |reader, _| {
            let mut cksum = Cksum::default();
            consume_all(reader, operand, |chunk| cksum.update(chunk))?;
            Ok(cksum.finish())
        });
        match warn_operand(io, "cksum", sum)? {
            Some((crc, size)) if named => io.println(format!("{} {} {}", crc, size, operand))?,
            Some((crc, size)) => io.println(format!("{} {}", crc, size))?,
            None => status = 1,
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cksum_of(data: &[u8]) -> (u32, u64) {
        let mut cksum = Cksum::default();
        cksum.update(data);
        cksum.finish()
    }

    #[test]
    fn test_cksum_known_values() {
        assert_eq!(cksum_of(b""), (4_294_967_295, 0));
        assert_eq!(cksum_of(b"123456789"), (930_766_865, 9));
    }

    #[test]
    fn test_cksum_chunking_does_not_matter() {
        let mut split = Cksum::default();
        split.update(b"hello ");
        split.update(b"world\n");
        assert_eq!(split.finish(), cksum_of(b"hello world\n"));
    }

    #[test]
    fn test_parse_check_line() {
        assert_eq!(parse_check_line("abc123  file.txt"), Some(("abc123", "file.txt")));
        assert_eq!(parse_check_line("abc123 *bin.dat"), Some(("abc123", "bin.dat")));
        assert_eq!(parse_check_line("abc123  name with spaces"), Some(("abc123", "name with spaces")));
        assert_eq!(parse_check_line("xyz  file"), None);
        assert_eq!(parse_check_line("abc123"), None);
        assert_eq!(parse_check_line("abc123 file"), None);
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}

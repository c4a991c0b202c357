//! Listing and status applets: ls, stat, du, df.

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use nix::sys::stat::{lstat, stat, FileStat};
use nix::sys::statvfs::statvfs;
use nix::unistd::{Gid, Group, Uid, User};
use rustybox_common::{io_message, AppletError, AppletResult, Getopt, Streams};

use super::human_size;
use super::perms::{mode_string, permission_string};

fn owner_name(uid: u32) -> String {
    User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| uid.to_string())
}

fn group_name(gid: u32) -> String {
    Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|group| group.name)
        .unwrap_or_else(|| gid.to_string())
}

fn local_time(secs: i64, nanos: i64) -> Option<DateTime<Local>> {
    let nanos = u32::try_from(nanos).unwrap_or(0);
    Local.timestamp_opt(secs, nanos).single()
}

// =============================================================================
// ls
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct LsOptions {
    all: bool,
    almost_all: bool,
    long: bool,
    one_per_line: bool,
    human: bool,
    directory: bool,
    classify: bool,
    recursive: bool,
}

/// One name to print with the metadata of what it names.
struct Entry {
    name: String,
    path: PathBuf,
    meta: Metadata,
}

/// The `-F` indicator for an entry.
fn classify_suffix(meta: &Metadata) -> &'static str {
    let kind = meta.file_type();
    if kind.is_dir() {
        "/"
    } else if kind.is_symlink() {
        "@"
    } else if kind.is_fifo() {
        "|"
    } else if kind.is_socket() {
        "="
    } else if meta.permissions().mode() & 0o111 != 0 {
        "*"
    } else {
        ""
    }
}

/// The time column of `ls -l`: the year replaces the clock for files more
/// than six months old or in the future.
fn list_time(mtime: i64) -> String {
    const SIX_MONTHS: i64 = 183 * 24 * 3600;
    let Some(time) = local_time(mtime, 0) else {
        return mtime.to_string();
    };
    let now = Local::now().timestamp();
    if mtime > now || now - mtime > SIX_MONTHS {
        time.format("%b %e  %Y").to_string()
    } else {
        time.format("%b %e %H:%M").to_string()
    }
}

fn format_entry(entry: &Entry, opts: LsOptions) -> String {
    let mut name = entry.name.clone();
    if opts.classify {
        name.push_str(classify_suffix(&entry.meta));
    }
    if !opts.long {
        return name;
    }
    if entry.meta.file_type().is_symlink() {
        if let Ok(target) = fs::read_link(&entry.path) {
            name = format!("{} -> {}", entry.name, target.display());
        }
    }
    let size = if opts.human {
        human_size(entry.meta.size())
    } else {
        entry.meta.size().to_string()
    };
    format!(
        "{} {:>2} {:<8} {:<8} {:>8} {} {}",
        mode_string(&entry.meta),
        entry.meta.nlink(),
        owner_name(entry.meta.uid()),
        group_name(entry.meta.gid()),
        size,
        list_time(entry.meta.mtime()),
        name
    )
}

fn print_entries(entries: &[Entry], opts: LsOptions, io: &mut Streams<'_>) -> AppletResult<()> {
    if entries.is_empty() {
        return Ok(());
    }
    if opts.long || opts.one_per_line {
        for entry in entries {
            io.println(format_entry(entry, opts))?;
        }
        return Ok(());
    }
    let names: Vec<String> = entries.iter().map(|e| format_entry(e, opts)).collect();
    io.println(names.join("  "))
}

fn read_entries(dir: &Path, opts: LsOptions) -> std::io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    if opts.all {
        for dot in [".", ".."] {
            let path = dir.join(dot);
            let meta = fs::symlink_metadata(&path)?;
            entries.push(Entry {
                name: dot.to_string(),
                path,
                meta,
            });
        }
    }
    for item in fs::read_dir(dir)? {
        let item = item?;
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') && !(opts.all || opts.almost_all) {
            continue;
        }
        let path = item.path();
        let meta = fs::symlink_metadata(&path)?;
        entries.push(Entry { name, path, meta });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn list_directory(
    dir: &Path,
    label: &str,
    show_label: bool,
    opts: LsOptions,
    io: &mut Streams<'_>,
) -> AppletResult<i32> {
    let entries = match read_entries(dir, opts) {
        Ok(entries) => entries,
        Err(e) => {
            io.warn(
                "ls",
                format!("cannot open directory '{}': {}", label, io_message(&e)),
            );
            return Ok(1);
        }
    };
    if show_label {
        io.println(format!("{}:", label))?;
    }
    if opts.long {
        let blocks: u64 = entries.iter().map(|e| e.meta.blocks()).sum();
        io.println(format!("total {}", blocks / 2))?;
    }
    print_entries(&entries, opts, io)?;

    let mut status = 0;
    if opts.recursive {
        for entry in &entries {
            if entry.meta.is_dir() && entry.name != "." && entry.name != ".." {
                io.println("")?;
                let sub_label = format!("{}/{}", label.trim_end_matches('/'), entry.name);
                status |= list_directory(&entry.path, &sub_label, true, opts, io)?;
            }
        }
    }
    Ok(status)
}

/// `ls [-1aAlhdFR] [FILE...]`
pub fn ls_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let parsed = Getopt::new("1aAlhdFR").parse(args)?;
    let opts = LsOptions {
        all: parsed.has('a'),
        almost_all: parsed.has('A'),
        long: parsed.has('l'),
        one_per_line: parsed.has('1'),
        human: parsed.has('h'),
        directory: parsed.has('d'),
        classify: parsed.has('F'),
        recursive: parsed.has('R'),
    };
    let mut operands = parsed.operands;
    if operands.is_empty() {
        operands.push(".".to_string());
    }
    operands.sort();

    let mut status = 0;
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for operand in &operands {
        // Operands are followed, entries inside directories are not.
        let meta = fs::metadata(operand).or_else(|_| fs::symlink_metadata(operand));
        match meta {
            Ok(meta) if meta.is_dir() && !opts.directory => dirs.push(operand.clone()),
            Ok(meta) => files.push(Entry {
                name: operand.clone(),
                path: PathBuf::from(operand),
                meta,
            }),
            Err(e) => {
                io.warn("ls", format!("cannot access '{}': {}", operand, io_message(&e)));
                status = 1;
            }
        }
    }

    print_entries(&files, opts, io)?;
    let show_labels = operands.len() > 1 || opts.recursive;
    for (i, dir) in dirs.iter().enumerate() {
        if i > 0 || !files.is_empty() {
            io.println("")?;
        }
        status |= list_directory(Path::new(dir), dir, show_labels, opts, io)?;
    }
    Ok(status)
}

// =============================================================================
// stat
// =============================================================================

fn file_kind(mode: u32) -> &'static str {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => "directory",
        libc::S_IFLNK => "symbolic link",
        libc::S_IFCHR => "character special file",
        libc::S_IFBLK => "block special file",
        libc::S_IFIFO => "fifo",
        libc::S_IFSOCK => "socket",
        _ => "regular file",
    }
}

fn type_char(mode: u32) -> char {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => 'd',
        libc::S_IFLNK => 'l',
        libc::S_IFCHR => 'c',
        libc::S_IFBLK => 'b',
        libc::S_IFIFO => 'p',
        libc::S_IFSOCK => 's',
        _ => '-',
    }
}

fn stat_time(secs: i64, nanos: i64) -> String {
    match local_time(secs, nanos) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S%.9f %z").to_string(),
        None => secs.to_string(),
    }
}

/// Expands one `stat -c` format for `name`.
pub(crate) fn format_stat(format: &str, name: &str, st: &FileStat) -> String {
    let mode = u32::from(st.st_mode);
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push_str(name),
            Some('s') => out.push_str(&st.st_size.to_string()),
            Some('a') => out.push_str(&format!("{:o}", mode & 0o7777)),
            Some('A') => {
                out.push(type_char(mode));
                out.push_str(&permission_string(mode));
            }
            Some('b') => out.push_str(&st.st_blocks.to_string()),
            Some('F') => out.push_str(file_kind(mode)),
            Some('h') => out.push_str(&st.st_nlink.to_string()),
            Some('i') => out.push_str(&st.st_ino.to_string()),
            Some('u') => out.push_str(&st.st_uid.to_string()),
            Some('U') => out.push_str(&owner_name(st.st_uid)),
            Some('g') => out.push_str(&st.st_gid.to_string()),
            Some('G') => out.push_str(&group_name(st.st_gid)),
            Some('X') => out.push_str(&st.st_atime.to_string()),
            Some('Y') => out.push_str(&st.st_mtime.to_string()),
            Some('Z') => out.push_str(&st.st_ctime.to_string()),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn describe_stat(name: &str, st: &FileStat) -> Vec<String> {
    let mode = u32::from(st.st_mode);
    let shown = if mode & libc::S_IFMT == libc::S_IFLNK {
        match fs::read_link(name) {
            Ok(target) => format!("'{}' -> '{}'", name, target.display()),
            Err(_) => name.to_string(),
        }
    } else {
        name.to_string()
    };
    vec![
        format!("  File: {}", shown),
        format!(
            "  Size: {:<15} Blocks: {:<10} IO Block: {:<6} {}",
            st.st_size,
            st.st_blocks,
            st.st_blksize,
            file_kind(mode)
        ),
        format!(
            "Device: {:x}h/{}d\tInode: {:<11} Links: {}",
            st.st_dev, st.st_dev, st.st_ino, st.st_nlink
        ),
        format!(
            "Access: ({:04o}/{}{})  Uid: ({:>5}/{:>8})   Gid: ({:>5}/{:>8})",
            mode & 0o7777,
            type_char(mode),
            permission_string(mode),
            st.st_uid,
            owner_name(st.st_uid),
            st.st_gid,
            group_name(st.st_gid)
        ),
        format!("Access: {}", stat_time(st.st_atime, st.st_atime_nsec)),
        format!("Modify: {}", stat_time(st.st_mtime, st.st_mtime_nsec)),
        format!("Change: {}", stat_time(st.st_ctime, st.st_ctime_nsec)),
    ]
}

/// `stat [-L] [-c FORMAT] FILE...`
pub fn stat_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("Lc:").parse(args)?;
    if opts.operands.is_empty() {
        return Err(AppletError::usage("missing operand"));
    }
    let follow = opts.has('L');

    let mut status = 0;
    for name in &opts.operands {
        let result = if follow {
            stat(name.as_str())
        } else {
            lstat(name.as_str())
        };
        let st = match result {
            Ok(st) => st,
            Err(e) => {
                io.warn("stat", format!("cannot stat '{}': {}", name, e.desc()));
                status = 1;
                continue;
            }
        };
        match opts.value('c') {
            Some(format) => io.println(format_stat(format, name, &st))?,
            None => {
                for line in describe_stat(name, &st) {
                    io.println(line)?;
                }
            }
        }
    }
    Ok(status)
}

// =============================================================================
// du
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct DuOptions {
    summarize: bool,
    all: bool,
    human: bool,
}

fn du_line(bytes: u64, path: &Path, opts: DuOptions) -> String {
    let size = if opts.human {
        human_size(bytes)
    } else {
        bytes.div_ceil(1024).to_string()
    };
    format!("{}\t{}", size, path.display())
}

/// Returns the disk usage of `path` in bytes, printing directories (and
/// with `-a` files) below the top level as it goes. Hard links count once.
fn disk_usage(
    path: &Path,
    depth: usize,
    opts: DuOptions,
    seen: &mut HashSet<(u64, u64)>,
    status: &mut i32,
    io: &mut Streams<'_>,
) -> AppletResult<u64> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            io.warn("du", format!("cannot access '{}': {}", path.display(), io_message(&e)));
            *status = 1;
            return Ok(0);
        }
    };
    if meta.nlink() > 1 && !meta.is_dir() && !seen.insert((meta.dev(), meta.ino())) {
        return Ok(0);
    }
    let mut total = meta.blocks() * 512;
    if meta.is_dir() {
        match fs::read_dir(path) {
            Ok(entries) => {
                let mut children: Vec<PathBuf> =
                    entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
                children.sort();
                for child in children {
                    total += disk_usage(&child, depth + 1, opts, seen, status, io)?;
                }
            }
            Err(e) => {
                io.warn(
                    "du",
                    format!("cannot read directory '{}': {}", path.display(), io_message(&e)),
                );
                *status = 1;
            }
        }
    }
    let show = depth == 0 || (!opts.summarize && (meta.is_dir() || opts.all));
    if show {
        io.println(du_line(total, path, opts))?;
    }
    Ok(total)
}

/// `du [-sahk] [FILE...]`
pub fn du_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let parsed = Getopt::new("sahk").parse(args)?;
    let opts = DuOptions {
        summarize: parsed.has('s'),
        all: parsed.has('a'),
        human: parsed.last_of(&['h', 'k']) == Some('h'),
    };
    let mut operands = parsed.operands;
    if operands.is_empty() {
        operands.push(".".to_string());
    }
    let mut seen = HashSet::new();
    let mut status = 0;
    for operand in &operands {
        disk_usage(Path::new(operand), 0, opts, &mut seen, &mut status, io)?;
    }
    Ok(status)
}

// =============================================================================
// df
// =============================================================================

/// One line of `/proc/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Mount {
    pub source: String,
    pub target: PathBuf,
}

/// Undoes the octal escapes (`\040` for a space) the kernel writes into
/// mount table fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = bytes.get(i + 1..i + 4).filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)));
        match (bytes[i], octal) {
            (b'\\', Some(digits)) => {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(u8::try_from(value).unwrap_or(b'?'));
                i += 4;
            }
            (b, _) => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub(crate) fn parse_mounts(table: &str) -> Vec<Mount> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some(Mount {
                source: unescape_mount_field(source),
                target: PathBuf::from(unescape_mount_field(target)),
            })
        })
        .collect()
}

/// The mount holding `path`: the one with the longest matching target.
fn mount_of<'m>(mounts: &'m [Mount], path: &Path) -> Option<&'m Mount> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.target))
        .max_by_key(|m| m.target.as_os_str().len())
}

fn df_row(source: &str, target: &Path, human: bool) -> AppletResult<Option<String>> {
    let vfs = statvfs(target).map_err(|e| {
        AppletError::failed(format!("{}: {}", target.display(), e.desc()))
    })?;
    let unit = u64::from(vfs.fragment_size());
    let total = u64::from(vfs.blocks()) * unit;
    if total == 0 {
        return Ok(None);
    }
    let free = u64::from(vfs.blocks_free()) * unit;
    let available = u64::from(vfs.blocks_available()) * unit;
    let used = total.saturating_sub(free);
    let percent = match used + available {
        0 => "-".to_string(),
        base => format!("{}%", (used * 100).div_ceil(base)),
    };
    let size = |bytes: u64| {
        if human {
            human_size(bytes)
        } else {
            (bytes / 1024).to_string()
        }
    };
    Ok(Some(format!(
        "{:<20} {:>9} {:>9} {:>9} {:>4} {}",
        source,
        size(total),
        size(used),
        size(available),
        percent,
        target.display()
    )))
}

/// `df [-hk] [FILE...]`
pub fn df_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("hk").parse(args)?;
    let human = opts.last_of(&['h', 'k']) == Some('h');
    let table = fs::read_to_string("/proc/mounts").map_err(|e| AppletError::io("/proc/mounts", e))?;
    let mounts = parse_mounts(&table);

    let mut rows: Vec<(String, PathBuf)> = Vec::new();
    let mut status = 0;
    if opts.operands.is_empty() {
        let mut shown = HashSet::new();
        for mount in &mounts {
            if shown.insert(mount.target.clone()) {
                rows.push((mount.source.clone(), mount.target.clone()));
            }
        }
    } else {
        for operand in &opts.operands {
            match fs::canonicalize(operand) {
                Ok(path) => match mount_of(&mounts, &path) {
                    Some(mount) => rows.push((mount.source.clone(), mount.target.clone())),
                    None => rows.push(("-".to_string(), path)),
                },
                Err(e) => {
                    io.warn("df", format!("{}: {}", operand, io_message(&e)));
                    status = 1;
                }
            }
        }
    }

    let header = if human { "Size" } else { "1K-blocks" };
    let avail = if human { "Avail" } else { "Available" };
    io.println(format!(
        "{:<20} {:>9} {:>9} {:>9} {:>4} Mounted on",
        "Filesystem", header, "Used", avail, "Use%"
    ))?;
    let explicit = !opts.operands.is_empty();
    for (source, target) in rows {
        match df_row(&source, &target, human) {
            Ok(Some(line)) => io.println(line)?,
            // Pseudo filesystems with no blocks are only shown when asked for.
            Ok(None) if explicit => io.println(format!(
                "{:<20} {:>9} {:>9} {:>9} {:>4} {}",
                source,
                0,
                0,
                0,
                "-",
                target.display()
            ))?,
            Ok(None) => {}
            Err(e) => {
                if explicit {
                    io.warn("df", e);
                    status = 1;
                }
            }
        }
    }
    Ok(status)
}

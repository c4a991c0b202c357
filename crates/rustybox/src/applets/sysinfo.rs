//! Environment and system information applets: env, printenv, whoami,
//! logname, hostname, uname, arch, nproc, which, clear, hostid, tty, free,
//! pwdx, id, date.

use std::ffi::{CStr, CString};
use std::fmt::Display;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use nix::sys::utsname::{uname, UtsName};
use nix::unistd::{
    getegid, geteuid, getgid, getgrouplist, getgroups, gethostname, getuid, sethostname,
    sysconf, ttyname, Gid, Group, SysconfVar, Uid, User,
};
use rustybox_common::shell::{run_external_env, EnvOverrides};
use rustybox_common::{AppletError, AppletResult, Getopt, Streams};

// =============================================================================
// env / printenv
// =============================================================================

/// Splits `NAME=VALUE`; names must be non-empty.
fn split_assignment(word: &str) -> Option<(&str, &str)> {
    word.split_once('=').filter(|(name, _)| !name.is_empty())
}

/// `env [-i] [-0] [-u NAME]... [-] [NAME=VALUE]... [COMMAND [ARG...]]`
pub fn env_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("i0u:").stop_at_operand(true).parse(args)?;
    let mut overrides = EnvOverrides {
        clear: opts.has('i'),
        unset: opts.values('u').into_iter().map(str::to_string).collect(),
        set: Vec::new(),
    };

    let mut operands = opts.operands.iter().peekable();
    if operands.peek().is_some_and(|w| w.as_str() == "-") {
        overrides.clear = true;
        operands.next();
    }
    while let Some((name, value)) = operands.peek().and_then(|w| split_assignment(w)) {
        overrides.set.push((name.to_string(), value.to_string()));
        operands.next();
    }

    let command: Vec<&String> = operands.collect();
    if !command.is_empty() {
        io.stdout.flush()?;
        return run_external_env(&command, &overrides);
    }

    let mut vars: Vec<(String, String)> = if overrides.clear {
        Vec::new()
    } else {
        std::env::vars_os()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
            .filter(|(k, _)| !overrides.unset.contains(k))
            .collect()
    };
    for (name, value) in overrides.set {
        match vars.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => vars.push((name, value)),
        }
    }

    let terminator: &[u8] = if opts.has('0') { b"\0" } else { b"\n" };
    for (name, value) in vars {
        write!(io.stdout, "{}={}", name, value)?;
        io.stdout.write_all(terminator)?;
    }
    Ok(0)
}

/// `printenv [-0] [NAME...]`
pub fn printenv_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("0").parse(args)?;
    let terminator: &[u8] = if opts.has('0') { b"\0" } else { b"\n" };

    if opts.operands.is_empty() {
        for (name, value) in std::env::vars_os() {
            write!(io.stdout, "{}={}", name.to_string_lossy(), value.to_string_lossy())?;
            io.stdout.write_all(terminator)?;
        }
        return Ok(0);
    }

    let mut status = 0;
    for name in &opts.operands {
        match std::env::var_os(name) {
            Some(value) => {
                io.stdout.write_all(value.to_string_lossy().as_bytes())?;
                io.stdout.write_all(terminator)?;
            }
            None => status = 1,
        }
    }
    Ok(status)
}

// =============================================================================
// whoami / logname / hostname
// =============================================================================

/// `whoami`
pub fn whoami_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    Getopt::new("").parse(args)?;
    let uid = geteuid();
    let user = User::from_uid(uid)
        .map_err(|e| AppletError::failed(e.desc()))?
        .ok_or_else(|| AppletError::failed(format!("cannot find name for user ID {}", uid)))?;
    io.println(user.name)?;
    Ok(0)
}

/// `logname`
pub fn logname_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    Getopt::new("").parse(args)?;
    // Safety: getlogin returns NULL or a pointer to a static buffer that stays
    // valid until the next getlogin call; we copy it out immediately.
    let name = unsafe {
        let ptr = libc::getlogin();
        if ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    };
    match name {
        Some(name) => {
            io.println(name)?;
            Ok(0)
        }
        None => Err(AppletError::failed("no login name")),
    }
}

/// `hostname [-s|-d] [NAME]`
pub fn hostname_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("sdf").parse(args)?;

    if let Some(name) = opts.operands.first() {
        sethostname(name).map_err(|e| AppletError::failed(e.desc()))?;
        return Ok(0);
    }

    let host = gethostname().map_err(|e| AppletError::failed(e.desc()))?;
    let host = host.to_string_lossy();
    let shown = match opts.last_of(&['s', 'd', 'f']) {
        Some('s') => host.split('.').next().unwrap_or_default().to_string(),
        Some('d') => host.split_once('.').map(|(_, d)| d.to_string()).unwrap_or_default(),
        _ => host.into_owned(),
    };
    io.println(shown)?;
    Ok(0)
}

// =============================================================================
// uname / arch / nproc
// =============================================================================

fn utsname() -> AppletResult<UtsName> {
    uname().map_err(|e| AppletError::failed(e.desc()))
}

/// `uname [-asnrvmpio]`
pub fn uname_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("asnrvmpio").parse(args)?;
    let uts = utsname()?;
    let all = opts.has('a');

    let mut fields: Vec<String> = Vec::new();
    let mut add = |flag: char, value: &std::ffi::OsStr| {
        if all || opts.has(flag) {
            fields.push(value.to_string_lossy().into_owned());
        }
    };
    add('s', uts.sysname());
    add('n', uts.nodename());
    add('r', uts.release());
    add('v', uts.version());
    add('m', uts.machine());
    // -p and -i are only printed when asked for explicitly
    if opts.has('p') {
        fields.push(uts.machine().to_string_lossy().into_owned());
    }
    if opts.has('i') {
        fields.push(uts.machine().to_string_lossy().into_owned());
    }
    if all || opts.has('o') {
        fields.push(operating_system().to_string());
    }
    if fields.is_empty() {
        fields.push(uts.sysname().to_string_lossy().into_owned());
    }

    io.println(fields.join(" "))?;
    Ok(0)
}

fn operating_system() -> &'static str {
    if cfg!(target_os = "linux") {
        "GNU/Linux"
    } else {
        std::env::consts::OS
    }
}

/// `arch`
pub fn arch_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    Getopt::new("").parse(args)?;
    let uts = utsname()?;
    io.println(uts.machine().to_string_lossy())?;
    Ok(0)
}

/// `nproc [--all] [--ignore=N]`
pub fn nproc_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let mut all = false;
    let mut ignore = 0usize;
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--all" => all = true,
            "--ignore" => {
                let value = iter.next().ok_or_else(|| AppletError::missing_argument("ignore"))?;
                ignore = rustybox_common::parse_count(value)?;
            }
            other => match other.strip_prefix("--ignore=") {
                Some(value) => ignore = rustybox_common::parse_count(value)?,
                None => return Err(AppletError::invalid_option(other.trim_start_matches('-'))),
            },
        }
    }

    let count = if all {
        sysconf(SysconfVar::_NPROCESSORS_CONF)
            .ok()
            .flatten()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(1)
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    };
    io.println(count.saturating_sub(ignore).max(1).to_string())?;
    Ok(0)
}

// =============================================================================
// which / clear
// =============================================================================

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Returns every executable named `name` along `$PATH`, in order.
pub(crate) fn search_path(name: &str, path_var: &str) -> Vec<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return if is_executable(&path) { vec![path] } else { Vec::new() };
    }
    path_var
        .split(':')
        .map(|dir| if dir.is_empty() { "." } else { dir })
        .map(|dir| Path::new(dir).join(name))
        .filter(|candidate| is_executable(candidate))
        .collect()
}

/// `which [-a] NAME...`
pub fn which_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("a").parse(args)?;
    if opts.operands.is_empty() {
        return Err(AppletError::usage("usage: which [-a] COMMAND..."));
    }
    let path_var = std::env::var("PATH").unwrap_or_else(|_| "/bin:/usr/bin".to_string());

    let mut status = 0;
    for name in &opts.operands {
        let found = search_path(name, &path_var);
        if found.is_empty() {
            status = 1;
            continue;
        }
        let shown = if opts.has('a') { found.len() } else { 1 };
        for path in found.iter().take(shown) {
            io.println(path.to_string_lossy())?;
        }
    }
    Ok(status)
}

/// `clear`
pub fn clear_main(_args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    io.stdout.write_all(b"\x1b[H\x1b[J")?;
    Ok(0)
}

// =============================================================================
// hostid / tty
// =============================================================================

/// `hostid`
pub fn hostid_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    Getopt::new("").parse(args)?;
    // Safety: gethostid takes no arguments and returns a plain integer.
    let id = unsafe { libc::gethostid() };
    io.println(format!("{:08x}", i64::from(id) & 0xffff_ffff))?;
    Ok(0)
}

/// `tty [-s]` -- reports the terminal on the process's standard input.
pub fn tty_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("s").parse(args)?;
    let silent = opts.has('s');
    match ttyname(std::io::stdin()) {
        Ok(path) => {
            if !silent {
                io.println(path.to_string_lossy())?;
            }
            Ok(0)
        }
        Err(_) => {
            if !silent {
                io.println("not a tty")?;
            }
            Ok(1)
        }
    }
}

// =============================================================================
// free
// =============================================================================

/// The `/proc/meminfo` fields free reports, in KiB.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MemInfo {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub shared: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

impl MemInfo {
    pub(crate) fn parse(text: &str) -> Self {
        let mut info = Self::default();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(value) = value.parse::<u64>() else {
                continue;
            };
            let slot = match key {
                "MemTotal:" => &mut info.total,
                "MemFree:" => &mut info.free,
                "MemAvailable:" => &mut info.available,
                "Buffers:" => &mut info.buffers,
                "Cached:" => &mut info.cached,
                "Shmem:" => &mut info.shared,
                "SwapTotal:" => &mut info.swap_total,
                "SwapFree:" => &mut info.swap_free,
                _ => continue,
            };
            *slot = value;
        }
        info
    }

    pub(crate) fn used(&self) -> u64 {
        self.total
            .saturating_sub(self.free)
            .saturating_sub(self.buffers)
            .saturating_sub(self.cached)
    }

    pub(crate) fn swap_used(&self) -> u64 {
        self.swap_total.saturating_sub(self.swap_free)
    }
}

/// `free [-b|-k|-m|-g|-h]`
pub fn free_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("bkmgh").parse(args)?;
    let text = std::fs::read_to_string("/proc/meminfo")
        .map_err(|e| AppletError::io("/proc/meminfo", e))?;
    let mem = MemInfo::parse(&text);

    let unit = opts.last_of(&['b', 'k', 'm', 'g', 'h']).unwrap_or('k');
    let show = |kib: u64| match unit {
        'b' => (kib * 1024).to_string(),
        'm' => (kib >> 10).to_string(),
        'g' => (kib >> 20).to_string(),
        'h' => super::human_size(kib * 1024),
        _ => kib.to_string(),
    };

    io.println(format!(
        "{:<15} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "", "total", "used", "free", "shared", "buff/cache", "available"
    ))?;
    io.println(format!(
        "{:<15} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "Mem:",
        show(mem.total),
        show(mem.used()),
        show(mem.free),
        show(mem.shared),
        show(mem.buffers + mem.cached),
        show(mem.available)
    ))?;
    io.println(format!(
        "{:<15} {:>12} {:>12} {:>12}",
        "Swap:",
        show(mem.swap_total),
        show(mem.swap_used()),
        show(mem.swap_free)
    ))?;
    Ok(0)
}

// =============================================================================
// pwdx
// =============================================================================

/// `pwdx PID...`
pub fn pwdx_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    if opts.operands.is_empty() {
        return Err(AppletError::usage("usage: pwdx PID..."));
    }
    let mut status = 0;
    for pid in &opts.operands {
        if pid.parse::<u32>().is_err() {
            io.warn("pwdx", format_args!("invalid process id: {}", pid));
            status = 1;
            continue;
        }
        match std::fs::read_link(format!("/proc/{}/cwd", pid)) {
            Ok(cwd) => io.println(format!("{}: {}", pid, cwd.display()))?,
            Err(e) => {
                io.warn("pwdx", format_args!("{}: {}", pid, rustybox_common::io_message(&e)));
                status = 1;
            }
        }
    }
    Ok(status)
}

// =============================================================================
// id
// =============================================================================

fn user_name(uid: Uid) -> Option<String> {
    User::from_uid(uid).ok().flatten().map(|u| u.name)
}

fn group_name(gid: Gid) -> Option<String> {
    Group::from_gid(gid).ok().flatten().map(|g| g.name)
}

/// `N(name)`, or just `N` when the id has no name.
fn id_with_name(id: impl Display, name: Option<String>) -> String {
    match name {
        Some(name) => format!("{}({})", id, name),
        None => id.to_string(),
    }
}

/// `id [-u|-g|-G] [-n] [-r] [USER]`
pub fn id_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("ugGnr").parse(args)?;
    let names = opts.has('n');

    let (uid, gid, mut groups) = match opts.operands.as_slice() {
        [] => {
            let (uid, gid) = if opts.has('r') {
                (getuid(), getgid())
            } else {
                (geteuid(), getegid())
            };
            let mut groups = getgroups().map_err(|e| AppletError::failed(e.desc()))?;
            if !groups.contains(&gid) {
                groups.insert(0, gid);
            }
            (uid, gid, groups)
        }
        [name] => {
            let user = User::from_name(name)
                .ok()
                .flatten()
                .ok_or_else(|| AppletError::failed(format!("'{}': no such user", name)))?;
            let cname = CString::new(name.as_str())
                .map_err(|_| AppletError::failed(format!("'{}': no such user", name)))?;
            let groups = getgrouplist(&cname, user.gid).unwrap_or_else(|_| vec![user.gid]);
            (user.uid, user.gid, groups)
        }
        _ => return Err(AppletError::usage("usage: id [-ugGnr] [USER]")),
    };
    groups.dedup();

    let line = match opts.last_of(&['u', 'g', 'G']) {
        Some('u') => match user_name(uid).filter(|_| names) {
            Some(name) => name,
            None => uid.to_string(),
        },
        Some('g') => match group_name(gid).filter(|_| names) {
            Some(name) => name,
            None => gid.to_string(),
        },
        Some(_) => groups
            .iter()
            .map(|&g| match group_name(g).filter(|_| names) {
                Some(name) => name,
                None => g.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        None => {
            let listed = groups
                .iter()
                .map(|&g| id_with_name(g, group_name(g)))
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "uid={} gid={} groups={}",
                id_with_name(uid, user_name(uid)),
                id_with_name(gid, group_name(gid)),
                listed
            )
        }
    };
    io.println(line)?;
    Ok(0)
}

// =============================================================================
// date
// =============================================================================

/// Default `date` output format.
pub const DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Z %Y";

/// Checks a strftime format up front; chrono reports bad specifiers only
/// while rendering.
fn check_format(format: &str) -> AppletResult<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(AppletError::usage(format!("invalid date format '{}'", format)));
    }
    Ok(())
}

/// Parses `-d` values: `@EPOCH`, `YYYY-MM-DD HH:MM[:SS]` or `YYYY-MM-DD`.
fn parse_date(text: &str, utc: bool) -> AppletResult<DateTime<Utc>> {
    let invalid = || AppletError::failed(format!("invalid date '{}'", text));
    if let Some(epoch) = text.strip_prefix('@') {
        let secs: i64 = epoch.trim().parse().map_err(|_| invalid())?;
        return DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(invalid);
    }
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(invalid)?;
    if utc {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(invalid)
}

/// `date [-u] [-d DATE] [+FORMAT]`
pub fn date_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("ud:R").parse(args)?;
    let utc = opts.has('u');
    let format = match opts.operands.as_slice() {
        [] if opts.has('R') => "%a, %d %b %Y %H:%M:%S %z",
        [] => DATE_FORMAT,
        [spec] => match spec.strip_prefix('+') {
            Some(format) => format,
            None => return Err(AppletError::failed("setting the date is not supported")),
        },
        _ => return Err(AppletError::usage("usage: date [-u] [-d DATE] [+FORMAT]")),
    };
    check_format(format)?;

    let instant = match opts.value('d') {
        Some(text) => parse_date(text, utc)?,
        None => Utc::now(),
    };
    let rendered = if utc {
        instant.format(format).to_string()
    } else {
        instant.with_timezone(&Local).format(format).to_string()
    };
    io.println(rendered)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_assignment() {
        assert_eq!(split_assignment("A=1"), Some(("A", "1")));
        assert_eq!(split_assignment("A="), Some(("A", "")));
        assert_eq!(split_assignment("=1"), None);
        assert_eq!(split_assignment("ls"), None);
    }

    #[test]
    fn test_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("plain");
        std::fs::write(&plain, "").unwrap();

        let path_var = format!("/nonexistent:{}", dir.path().display());
        assert_eq!(search_path("tool", &path_var), vec![tool.clone()]);
        assert!(search_path("plain", &path_var).is_empty());
        assert_eq!(search_path(tool.to_str().unwrap(), ""), vec![tool]);
    }

    #[test]
    fn test_meminfo() {
        let text = "MemTotal:       1000 kB\nMemFree:         300 kB\n\
                    MemAvailable:    600 kB\nBuffers:          50 kB\n\
                    Cached:          150 kB\nShmem:            20 kB\n\
                    SwapTotal:       400 kB\nSwapFree:        100 kB\nbogus\n";
        let mem = MemInfo::parse(text);
        assert_eq!(mem.total, 1000);
        assert_eq!(mem.shared, 20);
        assert_eq!(mem.used(), 500);
        assert_eq!(mem.swap_used(), 300);
        assert_eq!(MemInfo::parse("").used(), 0);
    }

    #[test]
    fn test_date_parsing() {
        assert_eq!(parse_date("@86400", true).unwrap().timestamp(), 86400);
        assert_eq!(
            parse_date("1970-01-02 00:00:30", true).unwrap().timestamp(),
            86430
        );
        assert_eq!(parse_date("1970-01-03", true).unwrap().timestamp(), 172800);
        assert!(parse_date("yesterday", true).is_err());
        assert!(check_format("%Y-%m-%d").is_ok());
        assert!(check_format("%Q").is_err());
    }

    #[test]
    fn test_id_with_name() {
        assert_eq!(id_with_name(0, Some("root".to_string())), "0(root)");
        assert_eq!(id_with_name(4242, None), "4242");
    }
}

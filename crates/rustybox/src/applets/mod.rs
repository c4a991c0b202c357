//! Native applet implementations.
//!
//! Every applet is an [`AppletFn`]: it receives its full argv (argv[0] is the
//! name it was invoked as) and a [`Streams`] context, and returns its exit
//! status. Errors are reported by the registry as `APPLET: message`.

pub mod basic;
pub mod checksum;
pub mod copy;
pub mod filter;
pub mod format;
pub mod fs;
pub mod listing;
pub mod perms;
pub mod sysinfo;
pub mod text;

use std::io::BufRead;

use rustybox_common::{AppletError, AppletFn, AppletResult, Streams};

/// Reads an input operand, warning `APPLET: message` on failure so the
/// caller can move on to the next operand.
pub(crate) fn read_or_warn(io: &mut Streams<'_>, applet: &str, operand: &str) -> Option<Vec<u8>> {
    match io.read_operand(operand) {
        Ok(data) => Some(data),
        Err(e) => {
            io.warn(applet, &e);
            None
        }
    }
}

/// Turns a failure to open or read an operand into a warning so the caller
/// can move on; failures writing stdout still propagate.
pub(crate) fn warn_operand<T>(
    io: &mut Streams<'_>,
    applet: &str,
    result: AppletResult<T>,
) -> AppletResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ AppletError::Stream(_)) => Err(e),
        Err(e) => {
            io.warn(applet, &e);
            Ok(None)
        }
    }
}

/// Reads the next line of `operand` into `line`, terminator included.
/// Returns false at end of input.
pub(crate) fn next_line(
    reader: &mut dyn BufRead,
    operand: &str,
    line: &mut Vec<u8>,
) -> AppletResult<bool> {
    line.clear();
    let n = reader
        .read_until(b'\n', line)
        .map_err(|e| AppletError::io(operand, e))?;
    Ok(n > 0)
}

/// Formats a byte count the way `-h` options print it: one decimal and a
/// `K`, `M`, `G` or `T` suffix.
pub(crate) fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64 / 1024.0;
    for unit in ['K', 'M', 'G'] {
        if value < 1024.0 {
            return format!("{:.1}{}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1}T", value)
}

/// Name and entry point of every native applet, sorted by name.
pub static NATIVE_APPLETS: &[(&str, AppletFn)] = &[
    ("[", test::bracket_main),
    ("arch", sysinfo::arch_main),
    ("basename", basic::basename_main),
    ("cat", text::cat_main),
    ("chgrp", perms::chgrp_main),
    ("chmod", perms::chmod_main),
    ("chown", perms::chown_main),
    ("cksum", checksum::cksum_main),
    ("clear", sysinfo::clear_main),
    ("comm", text::comm_main),
    ("cp", copy::cp_main),
    ("cut", filter::cut_main),
    ("date", sysinfo::date_main),
    ("df", listing::df_main),
    ("dirname", basic::dirname_main),
    ("du", listing::du_main),
    ("echo", basic::echo_main),
    ("egrep", filter::grep_main),
    ("env", sysinfo::env_main),
    ("expand", text::expand_main),
    ("expr", format::expr_main),
    ("false", basic::false_main),
    ("fgrep", filter::grep_main),
    ("fold", text::fold_main),
    ("free", sysinfo::free_main),
    ("fsync", fs::fsync_main),
    ("grep", filter::grep_main),
    ("head", text::head_main),
    ("hexdump", text::hexdump_main),
    ("hostid", sysinfo::hostid_main),
    ("hostname", sysinfo::hostname_main),
    ("id", sysinfo::id_main),
    ("link", fs::link_main),
    ("ln", fs::ln_main),
    ("logname", sysinfo::logname_main),
    ("ls", listing::ls_main),
    ("md5sum", checksum::md5sum_main),
    ("mkdir", fs::mkdir_main),
    ("mktemp", fs::mktemp_main),
    ("mv", copy::mv_main),
    ("nl", text::nl_main),
    ("nproc", sysinfo::nproc_main),
    ("paste", text::paste_main),
    ("printenv", sysinfo::printenv_main),
    ("printf", format::printf_main),
    ("pwd", basic::pwd_main),
    ("pwdx", sysinfo::pwdx_main),
    ("readlink", fs::readlink_main),
    ("realpath", fs::realpath_main),
    ("rev", text::rev_main),
    ("rm", fs::rm_main),
    ("rmdir", fs::rmdir_main),
    ("seq", basic::seq_main),
    ("sha256sum", checksum::sha256sum_main),
    ("sha512sum", checksum::sha512sum_main),
    ("shuf", text::shuf_main),
    ("sleep", basic::sleep_main),
    ("sort", filter::sort_main),
    ("stat", listing::stat_main),
    ("sync", fs::sync_main),
    ("tac", text::tac_main),
    ("tail", text::tail_main),
    ("tee", text::tee_main),
    ("test", test::test_main),
    ("touch", fs::touch_main),
    ("tr", filter::tr_main),
    ("true", basic::true_main),
    ("truncate", fs::truncate_main),
    ("tty", sysinfo::tty_main),
    ("uname", sysinfo::uname_main),
    ("uniq", filter::uniq_main),
    ("unlink", fs::unlink_main),
    ("usleep", basic::usleep_main),
    ("wc", text::wc_main),
    ("which", sysinfo::which_main),
    ("whoami", sysinfo::whoami_main),
    ("yes", basic::yes_main),
];

/// Looks up a native applet by name.
pub fn find(name: &str) -> Option<AppletFn> {
    NATIVE_APPLETS
        .binary_search_by(|(candidate, _)| candidate.cmp(&name))
        .ok()
        .map(|idx| NATIVE_APPLETS[idx].1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_unique() {
        for pair in NATIVE_APPLETS.windows(2) {
            assert!(pair[0].0 < pair[1].0, "{} >= {}", pair[0].0, pair[1].0);
        }
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "0.5K");
        assert_eq!(human_size(1536), "1.5K");
        assert_eq!(human_size(5 << 20), "5.0M");
        assert_eq!(human_size(3 << 30), "3.0G");
        assert_eq!(human_size(2 << 40), "2.0T");
    }

    #[test]
    fn test_find() {
        assert!(find("echo").is_some());
        assert!(find("[").is_some());
        assert!(find("nosuch").is_none());
    }
}

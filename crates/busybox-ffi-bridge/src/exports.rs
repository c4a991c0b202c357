//! Rust functions exported for a patched BusyBox ash to call.
//!
//! When ash runs inside rustybox it asks these hooks whether a command is
//! provided natively and, if so, runs it in-process as a built-in instead of
//! forking. Each function uses `extern "C"` ABI and C naming conventions.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr};

// =============================================================================
// Thread-local command provider
// =============================================================================

// ash calls back on the thread that entered ash_main, so the provider only
// needs to live on that thread.
thread_local! {
    static COMMAND_PROVIDER: RefCell<Option<Box<dyn CommandProvider>>> = RefCell::new(None);
}

/// Exit code reported when a command cannot be dispatched.
pub const DISPATCH_NOT_FOUND: c_int = 127;

/// Interface the host implements so ash can run its commands as built-ins.
///
/// Implementations must not call back into libbusybox: the bridge lock is
/// already held by the `ash_main` call that is dispatching.
pub trait CommandProvider: Send {
    /// Returns true if the command is implemented in-process.
    fn has_command(&self, name: &str) -> bool;

    /// Runs a command; `args[0]` is the command name.
    fn dispatch(&self, args: &[String]) -> i32;

    /// Returns the sorted list of in-process commands.
    fn list_commands(&self) -> Vec<String>;
}

// =============================================================================
// Registration functions
// =============================================================================

/// Registers the command provider for the current thread.
pub fn register_command_provider(provider: Box<dyn CommandProvider>) {
    COMMAND_PROVIDER.with(|cell| {
        *cell.borrow_mut() = Some(provider);
    });
}

/// Unregisters the command provider for the current thread.
pub fn unregister_command_provider() {
    COMMAND_PROVIDER.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Returns true if a provider is registered on this thread.
pub fn has_command_provider() -> bool {
    COMMAND_PROVIDER.with(|cell| cell.borrow().is_some())
}

/// Copies `src` into `dst`, truncating as needed and always leaving a
/// trailing NUL. Returns the number of bytes copied, excluding the NUL.
fn copy_nul_terminated(src: &[u8], dst: &mut [u8]) -> usize {
    let Some(room) = dst.len().checked_sub(1) else {
        return 0;
    };
    let len = src.len().min(room);
    dst[..len].copy_from_slice(&src[..len]);
    dst[len] = 0;
    len
}

// =============================================================================
// Exported C functions (called from ash)
// =============================================================================

/// Returns 1 if rustybox implements `name`, 0 otherwise.
///
/// # Safety
///
/// - `name` must be NULL or a valid null-terminated C string
#[no_mangle]
pub unsafe extern "C" fn rustybox_has_command(name: *const c_char) -> c_int {
    if name.is_null() {
        return 0;
    }

    let name = match CStr::from_ptr(name).to_str() {
        Ok(s) => s,
        Err(_) => return 0,
    };

    COMMAND_PROVIDER.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|provider| c_int::from(provider.has_command(name)))
            .unwrap_or(0)
    })
}

/// Alias of [`rustybox_has_command`] under the name ash looks up.
///
/// # Safety
///
/// Same as [`rustybox_has_command`].
#[no_mangle]
pub unsafe extern "C" fn is_rustybox_command(name: *const c_char) -> c_int {
    rustybox_has_command(name)
}

/// Runs a command in-process and returns its exit code.
///
/// Returns 127 if argv is empty or no provider is registered. NULL entries
/// within the first `argc` slots are skipped.
///
/// # Safety
///
/// - `argv` must be NULL or point to at least `argc` C string pointers
#[no_mangle]
pub unsafe extern "C" fn rustybox_dispatch(argc: c_int, argv: *mut *mut c_char) -> c_int {
    if argv.is_null() || argc <= 0 {
        return DISPATCH_NOT_FOUND;
    }

    let count = usize::try_from(argc).unwrap_or(0);
    let mut args = Vec::with_capacity(count);
    for i in 0..count {
        let arg = *argv.add(i);
        if !arg.is_null() {
            args.push(CStr::from_ptr(arg).to_string_lossy().into_owned());
        }
    }

    if args.is_empty() {
        return DISPATCH_NOT_FOUND;
    }

    COMMAND_PROVIDER.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|provider| provider.dispatch(&args))
            .unwrap_or(DISPATCH_NOT_FOUND)
    })
}

/// Alias of [`rustybox_dispatch`] used by ash's built-in table.
///
/// # Safety
///
/// Same as [`rustybox_dispatch`].
#[no_mangle]
pub unsafe extern "C" fn rustybox_builtin_wrapper(argc: c_int, argv: *mut *mut c_char) -> c_int {
    rustybox_dispatch(argc, argv)
}

/// Writes the space-separated command list into `buffer` for completion.
///
/// The list is truncated to fit and always NUL-terminated. Returns the number
/// of commands, or 0 if no provider is registered. Nothing is written when
/// `bufsize <= 0`.
///
/// # Safety
///
/// - `buffer` must be NULL or valid for `bufsize` bytes of writes
#[no_mangle]
pub unsafe extern "C" fn rustybox_list_commands(buffer: *mut c_char, bufsize: c_int) -> c_int {
    let commands = COMMAND_PROVIDER.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|provider| provider.list_commands())
    });
    let Some(commands) = commands else {
        return 0;
    };

    if !buffer.is_null() && bufsize > 0 {
        let len = usize::try_from(bufsize).unwrap_or(0);
        let dst = std::slice::from_raw_parts_mut(buffer.cast::<u8>(), len);
        copy_nul_terminated(commands.join(" ").as_bytes(), dst);
    }

    c_int::try_from(commands.len()).unwrap_or(c_int::MAX)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::ffi::CString;

    struct MockProvider;

    impl CommandProvider for MockProvider {
        fn has_command(&self, name: &str) -> bool {
            matches!(name, "echo" | "true")
        }

        fn dispatch(&self, args: &[String]) -> i32 {
            match args[0].as_str() {
                "true" => 0,
                "echo" => i32::try_from(args.len()).unwrap_or(-1),
                _ => 127,
            }
        }

        fn list_commands(&self) -> Vec<String> {
            vec!["echo".to_string(), "true".to_string()]
        }
    }

    #[test]
    fn test_no_provider_registered() {
        unregister_command_provider();

        let name = CString::new("echo").unwrap();
        assert_eq!(unsafe { rustybox_has_command(name.as_ptr()) }, 0);
        assert_eq!(
            unsafe { rustybox_list_commands(std::ptr::null_mut(), 0) },
            0
        );
    }

    #[test]
    fn test_has_command() {
        register_command_provider(Box::new(MockProvider));

        let echo = CString::new("echo").unwrap();
        let cat = CString::new("cat").unwrap();
        assert_eq!(unsafe { is_rustybox_command(echo.as_ptr()) }, 1);
        assert_eq!(unsafe { rustybox_has_command(cat.as_ptr()) }, 0);
        assert_eq!(unsafe { rustybox_has_command(std::ptr::null()) }, 0);

        unregister_command_provider();
    }

    #[test]
    fn test_dispatch() {
        register_command_provider(Box::new(MockProvider));

        let args: Vec<CString> = ["echo", "a", "b"]
            .iter()
            .map(|s| CString::new(*s).unwrap())
            .collect();
        let mut argv: Vec<*mut c_char> = args.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        argv.push(std::ptr::null_mut());

        let code = unsafe { rustybox_builtin_wrapper(3, argv.as_mut_ptr()) };
        assert_eq!(code, 3);

        assert_eq!(unsafe { rustybox_dispatch(0, argv.as_mut_ptr()) }, 127);
        assert_eq!(
            unsafe { rustybox_dispatch(1, std::ptr::null_mut()) },
            127
        );

        unregister_command_provider();
    }

    #[test]
    fn test_list_commands_truncates() {
        register_command_provider(Box::new(MockProvider));

        let mut buf: [c_char; 8] = [0x7f; 8];
        let count = unsafe { rustybox_list_commands(buf.as_mut_ptr(), 8) };
        assert_eq!(count, 2);
        let listed = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(listed.to_str().unwrap(), "echo tr");

        let mut big: [c_char; 64] = [0; 64];
        unsafe { rustybox_list_commands(big.as_mut_ptr(), 64) };
        let listed = unsafe { CStr::from_ptr(big.as_ptr()) };
        assert_eq!(listed.to_str().unwrap(), "echo true");

        unregister_command_provider();
    }

    #[test]
    fn test_copy_nul_terminated() {
        let mut dst = [1u8; 4];
        assert_eq!(copy_nul_terminated(b"abcdef", &mut dst), 3);
        assert_eq!(&dst, b"abc\0");

        let mut empty: [u8; 0] = [];
        assert_eq!(copy_nul_terminated(b"abc", &mut empty), 0);
    }
}

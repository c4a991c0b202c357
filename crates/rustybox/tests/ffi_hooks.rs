//! Tests for the C hooks ash uses to run rustybox commands as built-ins,
//! with the real applet registry registered as the provider.

use std::ffi::{c_char, CStr, CString};

use busybox_ffi_bridge::{
    has_command_provider, is_rustybox_command, register_command_provider, rustybox_dispatch,
    rustybox_has_command, rustybox_list_commands, unregister_command_provider, CommandProvider,
};
use pretty_assertions::assert_eq;
use rustybox::{AppletRegistry, Implementation};

/// Registers a native registry for the current test thread and removes it
/// again on drop.
struct ProviderGuard;

impl ProviderGuard {
    fn install() -> Self {
        register_command_provider(Box::new(AppletRegistry::new(Implementation::Native)));
        Self
    }
}

impl Drop for ProviderGuard {
    fn drop(&mut self) {
        unregister_command_provider();
    }
}

fn dispatch(words: &[&str]) -> i32 {
    let args: Vec<CString> = words.iter().map(|w| CString::new(*w).unwrap()).collect();
    let mut argv: Vec<*mut c_char> = args.iter().map(|a| a.as_ptr() as *mut c_char).collect();
    argv.push(std::ptr::null_mut());
    unsafe { rustybox_dispatch(words.len() as i32, argv.as_mut_ptr()) }
}

#[test]
fn test_has_command() {
    let _guard = ProviderGuard::install();
    assert!(has_command_provider());

    let cat = CString::new("cat").unwrap();
    let bracket = CString::new("[").unwrap();
    let unknown = CString::new("no-such-applet").unwrap();
    assert_eq!(unsafe { rustybox_has_command(cat.as_ptr()) }, 1);
    assert_eq!(unsafe { is_rustybox_command(bracket.as_ptr()) }, 1);
    assert_eq!(unsafe { rustybox_has_command(unknown.as_ptr()) }, 0);
}

#[test]
fn test_dispatch_exit_codes() {
    let _guard = ProviderGuard::install();
    assert_eq!(dispatch(&["true"]), 0);
    assert_eq!(dispatch(&["false"]), 1);
    assert_eq!(dispatch(&["test", "3", "-gt", "2"]), 0);
    assert_eq!(dispatch(&["/usr/bin/test", "3", "-lt", "2"]), 1);
}

#[test]
fn test_dispatch_without_provider() {
    unregister_command_provider();
    assert_eq!(dispatch(&["true"]), 127);
}

#[test]
fn test_list_commands() {
    let _guard = ProviderGuard::install();
    let registry = AppletRegistry::new(Implementation::Native);
    let expected = CommandProvider::list_commands(&registry);

    let mut buffer = vec![0 as c_char; 4096];
    let count = unsafe { rustybox_list_commands(buffer.as_mut_ptr(), buffer.len() as i32) };
    assert_eq!(count as usize, expected.len());

    let listed = unsafe { CStr::from_ptr(buffer.as_ptr()) }.to_str().unwrap();
    assert_eq!(listed, expected.join(" "));

    // A short buffer still gets a NUL-terminated prefix.
    let mut small = vec![0 as c_char; 4];
    unsafe { rustybox_list_commands(small.as_mut_ptr(), small.len() as i32) };
    let prefix = unsafe { CStr::from_ptr(small.as_ptr()) }.to_str().unwrap();
    assert_eq!(prefix, &expected.join(" ")[..3]);
}

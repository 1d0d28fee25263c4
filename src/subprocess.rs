//! Running the user's command at the end of the chain.

use std::env;
use std::io;

use std::ffi::CString;
use std::path::PathBuf;

use nix::unistd::{execvp, getuid, User};

use crate::err::*;

/// Accumulated prompt decoration, outermost tunnel first.
pub const SHELL_PREFIX_VAR: &str = "NETNS_TUNNEL_SHELL_PREFIX";

/// The real user's login shell, or /bin/sh if the password database
/// has nothing for us.
pub fn shell_path() -> String {
    let from_passwd = User::from_uid(getuid()).ok()
        .and_then(|u| u)
        .map(|u| u.shell)
        .filter(|s: &PathBuf| !s.as_os_str().is_empty());
    match from_passwd {
        Some(shell) => shell.to_string_lossy().into_owned(),
        None => String::from("/bin/sh"),
    }
}

/// Internal: the values for the prefix variable and PROMPT_COMMAND,
/// given the prefix inherited from any enclosing tunnel.
fn shell_prefix_vars(inherited: Option<&str>, prefix: &str)
                     -> (String, String) {
    let mut combined = String::from(inherited.unwrap_or(""));
    combined.push_str(prefix);
    let prompt = format!("PS1=\"${}$PS1\" PROMPT_COMMAND=", SHELL_PREFIX_VAR);
    (combined, prompt)
}

/// Arrange for an interactive bash to show `prefix` ahead of its usual
/// prompt.  Purely cosmetic.
pub fn prepend_shell_prefix(prefix: &str) {
    let inherited = env::var(SHELL_PREFIX_VAR).ok();
    let (combined, prompt) = shell_prefix_vars(inherited.as_deref(), prefix);
    env::set_var(SHELL_PREFIX_VAR, combined);
    env::set_var("PROMPT_COMMAND", prompt);
}

pub fn describe(command: &[String]) -> String {
    // FIXME: shell-quote as necessary.
    command.join(" ")
}

/// Replace the current process image with `command`, searching PATH.
/// Only returns if that fails.
pub fn ezexec(command: &[String]) -> HLError {
    if command.is_empty() {
        return map_io_err(io::Error::from(io::ErrorKind::InvalidInput),
                          String::from("exec: empty command"));
    }
    let argv: Result<Vec<CString>, _> = command.iter()
        .map(|a| CString::new(a.as_bytes()))
        .collect();
    let argv = match argv {
        Ok(v) => v,
        Err(e) => return map_io_err(io::Error::from(e),
                                    format!("exec {}", describe(command))),
    };

    log::debug!("exec {}", describe(command));
    match execvp(&argv[0], &argv) {
        Ok(never) => match never {},
        Err(e) => map_nix_err(e, format!("exec {}", command[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outermost_prefix_comes_first() {
        let (combined, prompt) =
            shell_prefix_vars(Some("[tunnelserver] "), "[tunnelclient 1.2.3.4:5] ");
        assert_eq!(combined, "[tunnelserver] [tunnelclient 1.2.3.4:5] ");
        assert_eq!(prompt,
                   "PS1=\"$NETNS_TUNNEL_SHELL_PREFIX$PS1\" PROMPT_COMMAND=");
    }

    #[test]
    fn prefix_without_enclosing_tunnel() {
        let (combined, _) = shell_prefix_vars(None, "[tunnelserver] ");
        assert_eq!(combined, "[tunnelserver] ");
    }

    #[test]
    fn shell_path_is_absolute() {
        assert!(shell_path().starts_with('/'));
    }

    #[test]
    fn exec_of_missing_program_reports_failure() {
        let e = ezexec(&[String::from("/nonexistent/definitely-not-here")]);
        assert!(e.to_string().starts_with("exec /nonexistent/"));
    }

    #[test]
    fn exec_rejects_interior_nul() {
        let e = ezexec(&[String::from("a\0b")]);
        assert!(e.to_string().starts_with("exec a"));
    }
}

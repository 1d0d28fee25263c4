//! The invoking user's environment.
//!
//! Everything here runs with root privileges, so the environment
//! variables the user handed us are captured and wiped from the process
//! as the very first thing `main` does.  Privileged code never sees them
//! again, with one exception: `reinstate_for_lookup` puts them back for
//! the duration of one scoped lookup.  They go back for good only in the
//! unprivileged child, via `restore`.

use std::env;
use std::cell::Cell;
use std::ffi::{OsStr, OsString};

use crate::err::*;

/// Variable through which an outer tunnel tells nested ones its egress
/// address.
pub const BASE_VAR: &str = "NETNS_TUNNEL_BASE";

fn process_env_is_empty() -> bool {
    env::vars_os().next().is_none()
}

fn clear_process_env() {
    for (k, _) in env::vars_os() {
        env::remove_var(k);
    }
}

fn install(vars: &[(OsString, OsString)]) {
    for (k, v) in vars {
        env::set_var(k, v);
    }
}

pub struct SavedEnvironment {
    vars: Vec<(OsString, OsString)>,
    reinstated: Cell<bool>,
}

impl SavedEnvironment {
    /// Take the process environment into custody and clear it.
    pub fn capture() -> Result<SavedEnvironment, HLError> {
        let vars: Vec<(OsString, OsString)> = env::vars_os().collect();
        clear_process_env();
        let saved = SavedEnvironment { vars, reinstated: Cell::new(false) };
        saved.check_cleared("SavedEnvironment::capture")?;
        Ok(saved)
    }

    /// Fail unless the process environment is currently empty.
    pub fn check_cleared(&self, detail: &'static str) -> Result<(), HLError> {
        if process_env_is_empty() {
            Ok(())
        } else {
            Err(HLError::EnvNotCleared { detail })
        }
    }

    /// Put the saved variables back into the process environment until
    /// the returned guard is dropped.  Cannot be nested.
    pub fn reinstate_for_lookup(&self)
                                -> Result<ReinstatedEnvironment<'_>, HLError> {
        if self.reinstated.get() || !process_env_is_empty() {
            return Err(HLError::EnvReentered);
        }
        self.reinstated.set(true);
        install(&self.vars);
        Ok(ReinstatedEnvironment { owner: self })
    }

    /// Hand the environment back to the process for good.  Only to be
    /// called once privileges are gone.
    pub fn restore(self) -> Result<(), HLError> {
        self.check_cleared("SavedEnvironment::restore")?;
        install(&self.vars);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Proof that the saved environment is temporarily back in place.
/// Clears it again when dropped, whichever way the scope is left.
pub struct ReinstatedEnvironment<'a> {
    owner: &'a SavedEnvironment,
}

impl<'a> ReinstatedEnvironment<'a> {
    pub fn var<K: AsRef<OsStr>>(&self, key: K) -> Option<String> {
        env::var(key).ok()
    }
}

impl<'a> Drop for ReinstatedEnvironment<'a> {
    fn drop(&mut self) {
        clear_process_env();
        self.owner.reinstated.set(false);
    }
}

/// Set `key` unless the (restored) environment already has it.
pub fn set_default_var(key: &str, value: &str) {
    if env::var_os(key).is_none() {
        env::set_var(key, value);
    }
}

//! Privilege checks and privilege dropping.
//!
//! The programs run setuid root: the real ids belong to the invoking
//! user and only the effective ids are 0.

use nix::unistd::{getuid, geteuid, getgid, getegid, seteuid, setegid,
                  setresuid, setresgid, setuid, setgid, Uid, Gid};

use crate::err::*;

fn requirement_error(euid: Uid, ruid: Uid, progname: &str)
                     -> Option<HLError> {
    if !euid.is_root() {
        Some(HLError::Requirement {
            detail: format!("{}: needs to be installed setuid root",
                            progname)
        })
    } else if ruid.is_root() {
        Some(HLError::Requirement {
            detail: format!("{}: please run as non-root", progname)
        })
    } else {
        None
    }
}

/// Refuse to run unless we are a setuid-root program invoked by an
/// ordinary user.
pub fn check_requirements(progname: &str) -> Result<(), HLError> {
    match requirement_error(geteuid(), getuid(), progname) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// While this guard is alive the effective ids are the real user's.
/// Dropping it regains root.
pub struct TemporarilyUnprivileged {
    orig_euid: Uid,
    orig_egid: Gid,
}

impl TemporarilyUnprivileged {
    pub fn new() -> Result<TemporarilyUnprivileged, HLError> {
        let guard = TemporarilyUnprivileged {
            orig_euid: geteuid(),
            orig_egid: getegid(),
        };
        setegid(getgid())
            .map_err(|e| map_nix_err(e, String::from("setegid")))?;
        seteuid(getuid())
            .map_err(|e| map_nix_err(e, String::from("seteuid")))?;

        if geteuid() != getuid() || getegid() != getgid() {
            return Err(HLError::PrivilegeDrop {
                detail: "temporary drop did not take effect"
            });
        }
        Ok(guard)
    }
}

impl Drop for TemporarilyUnprivileged {
    fn drop(&mut self) {
        seteuid(self.orig_euid).expect("failed to regain effective uid");
        setegid(self.orig_egid).expect("failed to regain effective gid");
    }
}

/// Irrevocably become the real user: real, effective and saved ids all
/// set to the real uid/gid.
pub fn drop_privileges() -> Result<(), HLError> {
    let real_gid = getgid();
    let real_uid = getuid();

    setresgid(real_gid, real_gid, real_gid)
        .map_err(|e| map_nix_err(e, String::from("setresgid")))?;
    setresuid(real_uid, real_uid, real_uid)
        .map_err(|e| map_nix_err(e, String::from("setresuid")))?;

    // If either of these succeeds, the drop is not permanent.
    if real_gid.as_raw() != 0 && setgid(Gid::from_raw(0)).is_ok() {
        return Err(HLError::PrivilegeDrop { detail: "gid 0 regained" });
    }
    if !real_uid.is_root() && setuid(Uid::from_raw(0)).is_ok() {
        return Err(HLError::PrivilegeDrop { detail: "uid 0 regained" });
    }
    if geteuid() != real_uid || getegid() != real_gid {
        return Err(HLError::PrivilegeDrop {
            detail: "effective ids differ from real ids"
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setuid_root_invoked_by_user_is_accepted() {
        assert!(requirement_error(Uid::from_raw(0), Uid::from_raw(1000),
                                  "tunnel-server").is_none());
    }

    #[test]
    fn plain_user_program_is_rejected() {
        let e = requirement_error(Uid::from_raw(1000), Uid::from_raw(1000),
                                  "tunnel-server").unwrap();
        assert_eq!(e.to_string(),
                   "tunnel-server: needs to be installed setuid root");
    }

    #[test]
    fn running_as_root_is_rejected() {
        let e = requirement_error(Uid::from_raw(0), Uid::from_raw(0),
                                  "tunnel-client").unwrap();
        assert_eq!(e.to_string(), "tunnel-client: please run as non-root");
    }
}

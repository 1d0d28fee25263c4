//! Error type and helper functions.

use std::io;
use std::fmt;

use std::error::Error;

use nix::sys::signal::Signal;

#[derive(Debug)]
pub enum HLError {
    IOError           { cause: io::Error, detail: String },
    NixError          { cause: nix::Error, detail: String },
    AddressError      { cause: io::Error, detail: String },
    ShortFrame        { len: usize },
    EnvNotCleared     { detail: &'static str },
    EnvReentered,
    PrivilegeDrop     { detail: &'static str },
    Requirement       { detail: String },
    Signal            { signal: Signal },
}

impl fmt::Display for HLError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HLError::IOError { cause, detail } => {
                write!(f, "{}: {}", detail, cause)
            },
            HLError::NixError { cause, detail } => {
                write!(f, "{}: {}", detail, cause)
            },
            HLError::AddressError { cause, detail } => {
                write!(f, "Invalid address {}: {}", detail, cause)
            },
            HLError::ShortFrame { len } => {
                write!(f, "Received datagram of {} bytes, shorter than the \
                           frame header", len)
            },
            HLError::EnvNotCleared { detail } => {
                write!(f, "{}: environment was not cleared", detail)
            },
            HLError::EnvReentered => {
                write!(f, "Temporary environment cannot be entered \
                           recursively")
            },
            HLError::PrivilegeDrop { detail } => {
                write!(f, "BUG: dropping privileges failed ({})", detail)
            },
            HLError::Requirement { detail } => {
                write!(f, "{}", detail)
            },
            HLError::Signal { signal } => {
                write!(f, "Terminated by {:?}", signal)
            },
        }
    }
}

impl Error for HLError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HLError::IOError      { cause, .. } => Some(cause),
            HLError::NixError     { cause, .. } => Some(cause),
            HLError::AddressError { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

pub fn map_io_err (cause: io::Error, detail: String) -> HLError {
    HLError::IOError { cause, detail }
}
pub fn map_nix_err (cause: nix::Error, detail: String) -> HLError {
    HLError::NixError { cause, detail }
}
pub fn map_addr_err (cause: io::Error, detail: String) -> HLError {
    HLError::AddressError { cause, detail }
}

/// Convert the final result of a program into its exit status,
/// printing the diagnostic for a failure.
pub fn exit_code (result: Result<i32, HLError>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            1
        }
    }
}

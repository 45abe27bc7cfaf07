use std::fmt::Display;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::instance::UserId;

pub type Result<T> = std::result::Result<T, Error>;

/// Why the helper app couldn't be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The package isn't installed for the target user
    NotInstalled,
    /// The target user (profile) isn't running
    UserNotRunning,
    /// The app is installed but the transport to it failed
    TransportDown(String),
}

impl Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInstalled => f.write_str("not installed"),
            Self::UserNotRunning => f.write_str("user not running"),
            Self::TransportDown(cause) => write!(f, "transport down: {}", cause),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{package} for user {user} is unavailable ({reason})")]
    Unavailable {
        package: String,
        user: UserId,
        reason: UnavailableReason,
    },

    #[error("remote {subsystem}.{method} failed for {package} (user {user}): {}", remote_message(.class, .message))]
    RemoteOperation {
        package: String,
        user: UserId,
        subsystem: String,
        method: String,
        class: Option<String>,
        message: String,
    },

    #[error("failed to kill {package} (pid {pid}, user {user}): {message}")]
    ProcessKill {
        package: String,
        user: UserId,
        pid: u32,
        message: String,
    },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("required binary `{0}` not available to context")]
    MissingBin(String),
    #[error("missing required env var: {0}")]
    MissingEnv(String),

    #[error("{0}")]
    IO(io::Error),

    #[error("command failed with status {0}: {1}")]
    CommandError(i32, String),

    #[error("no adb device connected")]
    NoAdbDevice,
    #[error("adb device {0} not found")]
    AdbDeviceNotFound(String),

    #[error("the remote app returned an invalid response")]
    InvalidResponse,

    #[error("generic error: {0}")]
    Generic(String),

    #[error("invalid config {0}: {1}")]
    InvalidConfig(String, String),
}

fn remote_message(class: &Option<String>, message: &str) -> String {
    match class {
        Some(c) => format!("{}: {}", c, message),
        None => message.to_string(),
    }
}

impl Error {
    pub fn new_generic<S: ToString + ?Sized>(s: &S) -> Self {
        Self::Generic(s.to_string())
    }

    pub fn new_cfg<S: ToString + ?Sized>(path: &Path, s: &S) -> Self {
        Self::InvalidConfig(path.to_string_lossy().into_owned(), s.to_string())
    }

    pub fn unavailable(package: &str, user: UserId, reason: UnavailableReason) -> Self {
        Self::Unavailable {
            package: package.into(),
            user,
            reason,
        }
    }

    /// True if this error means the helper app couldn't be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}

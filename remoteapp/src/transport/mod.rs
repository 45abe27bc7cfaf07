//! The request/response channel to the helper app running on the device.
//!
//! Every request is a 12 byte header (4 byte ASCII command followed by the
//! payload length as 8 hex digits) and a JSON payload. Responses use the
//! same layout with a `GOOD`/`FAIL` status in place of the command.

use std::io;

use serde::Deserialize;

use crate::instance::UserId;

pub mod tcp;
pub use tcp::{FramedTransport, TcpTransport};

pub mod adb;
pub use adb::AdbConnector;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote side reported a failure, usually an exception thrown while
    /// handling the request
    #[error("remote error: {message}")]
    Remote {
        class: Option<String>,
        message: String,
    },

    #[error("io error: {0}")]
    IO(io::Error),

    #[error("the remote app returned an invalid response")]
    InvalidResponse,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

pub const fn pack(a: char, b: char, c: char, d: char) -> u32 {
    (((a as u32) & 0xFF) << 24)
        | (((b as u32) & 0xFF) << 16)
        | (((c as u32) & 0xFF) << 8)
        | ((d as u32) & 0xFF)
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Liveness check, sent right after opening a transport
    Ping = pack('p', 'i', 'n', 'g'),
    /// Invoke a method on a remote subsystem
    Invoke = pack('c', 'a', 'l', 'l'),
    RegisterReceiver = pack('r', 'e', 'g', 'r'),
    UnregisterReceiver = pack('u', 'n', 'r', 'g'),
}

impl Command {
    pub fn from_u32(raw: u32) -> Option<Self> {
        [
            Self::Ping,
            Self::Invoke,
            Self::RegisterReceiver,
            Self::UnregisterReceiver,
        ]
        .into_iter()
        .find(|it| *it as u32 == raw)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = pack('G', 'O', 'O', 'D'),
    Fail = pack('F', 'A', 'I', 'L'),
}

impl Status {
    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self> {
        let as_u32 = u32::from_be_bytes(bytes);
        if as_u32 == (Status::Ok as u32) {
            return Ok(Status::Ok);
        } else if as_u32 == (Status::Fail as u32) {
            return Ok(Status::Fail);
        }
        Err(Error::InvalidResponse)
    }
}

/// The body of a `FAIL` response
#[cfg_attr(test, derive(Debug, serde::Serialize))]
#[derive(Deserialize)]
pub struct ServerError {
    pub err: String,
    #[serde(default)]
    pub class: Option<String>,
}

pub const HEADER_LEN: usize = 12;

const HEX_BYTES: &[u8; 16] = b"0123456789abcdef";

/// Encode a header for the given command (or status) and payload length
pub fn encode_header(into: &mut [u8; HEADER_LEN], tag: u32, payload_len: u32) {
    into[..4].copy_from_slice(&tag.to_be_bytes());
    let mut shift = 28;
    for b in into[4..].iter_mut() {
        let sel = (payload_len >> shift) & 0xF;
        *b = HEX_BYTES[sel as usize];
        shift -= 4;
    }
}

/// Decode a header into the raw tag and the payload length
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(u32, u32)> {
    let tag = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let len_str = std::str::from_utf8(&header[4..]).map_err(|e| {
        log::error!("getting len str {:?} {:?}", &header[4..], e);
        Error::InvalidResponse
    })?;
    let len = u32::from_str_radix(len_str, 16).map_err(|e| {
        log::error!("parsing len str {} {:?}", len_str, e);
        Error::InvalidResponse
    })?;
    Ok((tag, len))
}

/// A single open channel to the helper app
pub trait Transport: Send {
    /// Send a command with its JSON payload and wait for the JSON response
    fn send(&mut self, cmd: Command, payload: &str) -> Result<String>;
}

/// Opens transports to the helper app of a given package and user.
///
/// Failures must be reported as [crate::Error::Unavailable] so callers can
/// tell why the app couldn't be reached.
pub trait Connector: Send + Sync {
    fn open(&self, package: &str, user: UserId) -> crate::Result<Box<dyn Transport>>;
}

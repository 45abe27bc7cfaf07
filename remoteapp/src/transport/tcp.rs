use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use super::{
    decode_header, encode_header, Command, Error, Result, ServerError, Status, Transport,
    HEADER_LEN,
};

/// A transport speaking the framed protocol over any byte stream
pub struct FramedTransport<S> {
    stream: S,
}

pub type TcpTransport = FramedTransport<TcpStream>;

impl TcpTransport {
    pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> std::io::Result<Self> {
        let stream = match timeout {
            Some(t) => TcpStream::connect_timeout(&addr, t)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> FramedTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn send_raw(&mut self, cmd: u32, serialized: &str) -> Result<String> {
        let as_bytes = serialized.as_bytes();
        let len = u32::try_from(as_bytes.len())
            .map_err(|_| Error::InvalidInput(format!("payload of {} bytes", as_bytes.len())))?;
        let mut header = [0u8; HEADER_LEN];
        encode_header(&mut header, cmd, len);
        log::trace!("sending header {:?}", header);
        self.stream.write_all(header.as_slice())?;
        log::debug!("sending payload: {}", serialized);
        self.stream.write_all(as_bytes)?;
        self.stream.flush()?;
        self.read_response()
    }

    fn read_response(&mut self) -> Result<String> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(header.as_mut_slice())?;
        log::trace!("header: {:?}", header);
        let (tag, len) = decode_header(&header)?;
        let stat = Status::from_bytes(tag.to_be_bytes())?;

        log::trace!("reading {} bytes from the remote app", len);

        let mut raw = vec![0u8; len as usize];
        self.stream.read_exact(raw.as_mut_slice())?;
        let data = String::from_utf8(raw).map_err(|e| {
            log::error!("response wasn't utf8: {:?}", e);
            Error::InvalidResponse
        })?;

        if let Status::Fail = stat {
            let err: ServerError = serde_json::from_str(&data).map_err(|e| {
                log::error!("error response {} wasn't valid {:?}", data, e);
                Error::InvalidResponse
            })?;
            return Err(Error::Remote {
                class: err.class,
                message: err.err,
            });
        }
        log::debug!("json response: {}", data);
        Ok(data)
    }
}

impl<S: Read + Write + Send> Transport for FramedTransport<S> {
    fn send(&mut self, cmd: Command, payload: &str) -> Result<String> {
        self.send_raw(cmd as u32, payload)
    }
}

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use crate::errors::UnavailableReason;
use crate::instance::UserId;
use crate::transport::{
    decode_header, encode_header, Command, Connector, Status, TcpTransport, Transport, HEADER_LEN,
};
use crate::Error;

type Requests = Arc<Mutex<Vec<(Command, Value)>>>;

/// A helper app server on a local port speaking the framed protocol.
///
/// Invocations echo their `args` back as the result, except for the method
/// `explode` which fails with an `IllegalStateException`.
pub struct TcpHelperApp {
    addr: SocketAddr,
    requests: Requests,
    connections: Arc<AtomicUsize>,
}

impl TcpHelperApp {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let requests: Requests = Arc::default();
        let connections = Arc::new(AtomicUsize::new(0));

        let reqs = Arc::clone(&requests);
        let conns = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(v) => v,
                    Err(_) => break,
                };
                conns.fetch_add(1, Ordering::SeqCst);
                let reqs = Arc::clone(&reqs);
                thread::spawn(move || serve(stream, reqs));
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(TcpConnector { addr: self.addr })
    }

    pub fn requests(&self, cmd: Command) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == cmd)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Number of connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn serve(mut stream: TcpStream, requests: Requests) {
    loop {
        let mut header = [0u8; HEADER_LEN];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let (tag, len) = decode_header(&header).expect("valid header");
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).expect("full payload");

        let cmd = Command::from_u32(tag).expect("known command");
        let payload: Value = serde_json::from_slice(&body).expect("json payload");
        requests.lock().unwrap().push((cmd, payload.clone()));

        let (status, res) = match cmd {
            Command::Invoke if payload["method"] == "explode" => (
                Status::Fail,
                json!({"err": "boom", "class": "java.lang.IllegalStateException"}),
            ),
            Command::Invoke => (Status::Ok, json!({ "result": payload["args"] })),
            _ => (Status::Ok, json!({})),
        };
        let res = res.to_string();
        let mut header = [0u8; HEADER_LEN];
        encode_header(&mut header, status as u32, res.len() as u32);
        if stream.write_all(&header).is_err() || stream.write_all(res.as_bytes()).is_err() {
            return;
        }
    }
}

struct TcpConnector {
    addr: SocketAddr,
}

impl Connector for TcpConnector {
    fn open(&self, package: &str, user: UserId) -> crate::Result<Box<dyn Transport>> {
        let transport = TcpTransport::connect(self.addr, Some(Duration::from_secs(5)))
            .map_err(|e| {
                Error::unavailable(package, user, UnavailableReason::TransportDown(e.to_string()))
            })?;
        Ok(Box::new(transport))
    }
}

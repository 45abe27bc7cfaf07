use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use rstest::fixture;
use serde_json::{json, Value};

use crate::errors::UnavailableReason;
use crate::instance::UserId;
use crate::transport::{self, Command, Connector, Transport};
use crate::Error;

#[fixture]
pub fn fake_remote() -> FakeRemote {
    FakeRemote::default()
}

#[derive(Default)]
struct RemoteState {
    unavailable: bool,
    opened: usize,
    live: usize,
    generation: u64,
    requests: Vec<(Command, Value)>,
    fail_next: Option<(String, String)>,
    results: HashMap<String, Value>,
}

/// An in-memory helper app that records every request it receives
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            state: Arc::clone(&self.state),
        })
    }

    /// Make opening new transports fail as if the app wasn't installed
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Number of transports opened so far
    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    /// Number of transports currently open
    pub fn live_transports(&self) -> usize {
        self.lock().live
    }

    /// Every currently open transport fails with an IO error from now on
    pub fn break_transports(&self) {
        self.lock().generation += 1;
    }

    /// The next request is answered with a `FAIL` response
    pub fn fail_next(&self, class: &str, message: &str) {
        self.lock().fail_next = Some((class.into(), message.into()));
    }

    /// The result returned for every invocation of `method`
    pub fn set_result(&self, method: &str, result: Value) {
        self.lock().results.insert(method.into(), result);
    }

    /// The payloads received for `cmd`, in order
    pub fn requests(&self, cmd: Command) -> Vec<Value> {
        self.lock()
            .requests
            .iter()
            .filter(|(c, _)| *c == cmd)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn request_order(&self) -> Vec<Command> {
        self.lock().requests.iter().map(|(c, _)| *c).collect()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }
}

struct FakeConnector {
    state: Arc<Mutex<RemoteState>>,
}

impl Connector for FakeConnector {
    fn open(&self, package: &str, user: UserId) -> crate::Result<Box<dyn Transport>> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(Error::unavailable(
                package,
                user,
                UnavailableReason::NotInstalled,
            ));
        }
        state.opened += 1;
        state.live += 1;
        Ok(Box::new(FakeTransport {
            state: Arc::clone(&self.state),
            generation: state.generation,
        }))
    }
}

struct FakeTransport {
    state: Arc<Mutex<RemoteState>>,
    generation: u64,
}

impl Transport for FakeTransport {
    fn send(&mut self, cmd: Command, payload: &str) -> transport::Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.generation != self.generation {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        let payload: Value = serde_json::from_str(payload)?;
        let method = payload["method"].as_str().map(String::from);
        state.requests.push((cmd, payload));

        if let Some((class, message)) = state.fail_next.take() {
            return Err(transport::Error::Remote {
                class: Some(class),
                message,
            });
        }

        let res = match (cmd, method) {
            (Command::Invoke, Some(method)) => {
                let result = state.results.get(&method).cloned().unwrap_or(Value::Null);
                json!({ "result": result })
            }
            _ => json!({}),
        };
        Ok(res.to_string())
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.live -= 1;
        }
    }
}

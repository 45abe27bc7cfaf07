//! A shared, reference counted connection to a single helper app instance.

use std::fmt::Display;
use std::sync::{Arc, Mutex};

use crossbeam::atomic::AtomicCell;

use crate::errors::UnavailableReason;
use crate::instance::UserId;
use crate::transport::{self, Command, Connector, Transport};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

impl Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Called on every connect/disconnect transition, in subscription order.
///
/// The connection passes itself so listeners can talk to the remote app
/// without holding a reference back to it.
pub type Listener = dyn Fn(&Connection, ConnectionEvent) -> crate::Result<()> + Send + Sync;

struct State {
    transport: Option<Box<dyn Transport>>,
    holders: usize,
}

struct Shared {
    package: String,
    user: UserId,
    connector: Arc<dyn Connector>,
    state: Mutex<State>,
    connected: AtomicCell<bool>,
    listeners: Mutex<Vec<Arc<Listener>>>,
}

/// The channel to the helper app of one `(package, user)` pair.
///
/// Cloning is cheap and every clone refers to the same channel. The channel
/// is opened by [Connection::connect] and stays open while at least one
/// [ConnectionHolder] is alive.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Keeps the connection open until dropped
#[must_use = "the connection may close as soon as the holder is dropped"]
pub struct ConnectionHolder {
    shared: Arc<Shared>,
    released: bool,
}

impl ConnectionHolder {
    /// Close this holder, the connection is torn down if it was the last
    pub fn close(self) {
        drop(self)
    }
}

impl Drop for ConnectionHolder {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            Connection {
                shared: Arc::clone(&self.shared),
            }
            .release();
        }
    }
}

impl Connection {
    pub fn new(package: &str, user: UserId, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                package: package.into(),
                user,
                connector,
                state: Mutex::new(State {
                    transport: None,
                    holders: 0,
                }),
                connected: AtomicCell::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn package(&self) -> &str {
        &self.shared.package
    }

    pub fn user(&self) -> UserId {
        self.shared.user
    }

    /// Whether the channel is currently open, never blocks
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load()
    }

    /// The number of live [ConnectionHolder]s
    pub fn holder_count(&self) -> usize {
        self.lock_state().holders
    }

    /// Register a listener for connect/disconnect transitions
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Connection, ConnectionEvent) -> crate::Result<()> + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .lock()
            .expect("failed to lock")
            .push(Arc::new(listener));
    }

    /// Acquire a holder, opening the channel if needed.
    ///
    /// Listeners are told about the connection before this returns, so any
    /// work they do (replaying receivers for example) is finished before the
    /// caller uses the channel. A failing listener fails the connect.
    pub fn connect(&self) -> crate::Result<ConnectionHolder> {
        let opened = self.acquire(true)?;
        let holder = ConnectionHolder {
            shared: Arc::clone(&self.shared),
            released: false,
        };
        if opened {
            self.notify(ConnectionEvent::Connected)?;
        }
        Ok(holder)
    }

    /// Swap `old` for a fresh holder without the holder count ever exceeding
    /// what it was, `old` is closed at the moment the new one is acquired.
    ///
    /// Reopens the channel if it went away in the meantime.
    pub fn reacquire(&self, mut old: ConnectionHolder) -> crate::Result<ConnectionHolder> {
        if !Arc::ptr_eq(&old.shared, &self.shared) {
            return Err(Error::Precondition(String::from(
                "holder belongs to a different connection",
            )));
        }
        old.released = true;
        drop(old);

        let opened = match self.acquire(false) {
            Ok(v) => v,
            Err(e) => {
                // The transferred count has no holder anymore
                self.release();
                return Err(e);
            }
        };
        let holder = ConnectionHolder {
            shared: Arc::clone(&self.shared),
            released: false,
        };
        if opened {
            self.notify(ConnectionEvent::Connected)?;
        }
        Ok(holder)
    }

    /// Forcibly close the channel, for example because the remote process
    /// went away. Holders stay valid and the next call reconnects.
    pub fn disconnect(&self) {
        let transport = {
            let mut state = self.lock_state();
            let transport = state.transport.take();
            self.shared.connected.store(false);
            transport
        };
        if let Some(t) = transport {
            drop(t);
            self.notify_quietly(ConnectionEvent::Disconnected);
        }
    }

    /// Send a single request, connecting first if necessary.
    ///
    /// `subsystem` and `method` only describe the request for errors.
    pub fn call(
        &self,
        cmd: Command,
        subsystem: &str,
        method: &str,
        payload: &str,
    ) -> crate::Result<String> {
        let _holder = self.connect()?;

        let res = {
            let mut state = self.lock_state();
            match state.transport.as_mut() {
                Some(t) => t.send(cmd, payload),
                // Only possible if a listener disconnected us during connect
                None => Err(transport::Error::IO(
                    std::io::ErrorKind::NotConnected.into(),
                )),
            }
        };

        match res {
            Ok(v) => Ok(v),
            Err(transport::Error::IO(e)) => {
                log::warn!(
                    "transport to {} (user {}) failed: {}",
                    self.shared.package,
                    self.shared.user,
                    e
                );
                self.disconnect();
                Err(self.unavailable(UnavailableReason::TransportDown(e.to_string())))
            }
            Err(transport::Error::Remote { class, message }) => Err(Error::RemoteOperation {
                package: self.shared.package.clone(),
                user: self.shared.user,
                subsystem: subsystem.into(),
                method: method.into(),
                class,
                message,
            }),
            Err(transport::Error::InvalidResponse) => {
                // The rest of the frame is still in the stream, nothing after
                // it can be trusted
                log::warn!(
                    "invalid response from {} (user {}), disconnecting",
                    self.shared.package,
                    self.shared.user
                );
                self.disconnect();
                Err(Error::InvalidResponse)
            }
            Err(transport::Error::InvalidInput(msg)) => Err(Error::Generic(msg)),
        }
    }

    fn unavailable(&self, reason: UnavailableReason) -> Error {
        Error::unavailable(&self.shared.package, self.shared.user, reason)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().expect("failed to lock")
    }

    /// Returns whether the channel was opened by this call
    fn acquire(&self, count: bool) -> crate::Result<bool> {
        let mut state = self.lock_state();
        let opened = if state.transport.is_none() {
            let transport = self
                .shared
                .connector
                .open(&self.shared.package, self.shared.user)?;
            state.transport = Some(transport);
            self.shared.connected.store(true);
            log::debug!(
                "connected to {} (user {})",
                self.shared.package,
                self.shared.user
            );
            true
        } else {
            false
        };
        if count {
            state.holders += 1;
        }
        Ok(opened)
    }

    fn release(&self) {
        let transport = {
            let mut state = self.lock_state();
            state.holders = state.holders.saturating_sub(1);
            if state.holders == 0 {
                let transport = state.transport.take();
                self.shared.connected.store(false);
                transport
            } else {
                None
            }
        };
        if let Some(t) = transport {
            drop(t);
            log::debug!(
                "last holder released, disconnected from {} (user {})",
                self.shared.package,
                self.shared.user
            );
            self.notify_quietly(ConnectionEvent::Disconnected);
        }
    }

    fn listeners(&self) -> Vec<Arc<Listener>> {
        self.shared
            .listeners
            .lock()
            .expect("failed to lock")
            .clone()
    }

    fn notify(&self, event: ConnectionEvent) -> crate::Result<()> {
        for listener in self.listeners() {
            listener(self, event)?;
        }
        Ok(())
    }

    fn notify_quietly(&self, event: ConnectionEvent) {
        for listener in self.listeners() {
            if let Err(e) = listener(self, event) {
                log::warn!("{} listener failed: {}", event, e);
            }
        }
    }
}

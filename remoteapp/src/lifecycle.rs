//! Keep-alive and teardown of a helper app instance.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::adb::Adb;
use crate::connection::{Connection, ConnectionHolder};
use crate::device;

/// Whether, and why, the connection is being held open
#[derive(Default)]
pub struct KeepAlive {
    /// Set when a caller explicitly asked for keep-alive, as opposed to it
    /// being a side effect of registered receivers
    pub manual: bool,
    holder: Option<ConnectionHolder>,
}

impl KeepAlive {
    pub fn is_active(&self) -> bool {
        self.holder.is_some()
    }
}

pub struct LifecycleController {
    connection: Connection,
    adb: Arc<dyn Adb>,
    state: Mutex<KeepAlive>,
}

impl LifecycleController {
    pub fn new(connection: Connection, adb: Arc<dyn Adb>) -> Self {
        Self {
            connection,
            adb,
            state: Mutex::new(KeepAlive::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, KeepAlive> {
        self.state.lock().expect("failed to lock")
    }

    pub fn is_keeping_alive(&self) -> bool {
        self.lock().is_active()
    }

    pub fn is_manual_keep_alive(&self) -> bool {
        self.lock().manual
    }

    /// Keep the helper app connected until [Self::stop_keep_alive] is called.
    ///
    /// Calling this again replaces the held connection rather than adding a
    /// second one. Nothing is kept alive if connecting fails, including
    /// anything kept alive before the call.
    pub fn keep_alive(&self) -> crate::Result<()> {
        let mut state = self.lock();
        state.manual = true;
        let res = self.hold(&mut state);
        if res.is_err() {
            state.manual = false;
        }
        res
    }

    /// Keep the connection open on behalf of registered receivers. Does
    /// nothing if the connection is already being kept alive.
    pub fn keep_alive_for_receivers(&self) -> crate::Result<()> {
        let mut state = self.lock();
        if state.is_active() {
            return Ok(());
        }
        self.hold(&mut state)
    }

    /// Stop keep-alive unless it was explicitly requested
    pub fn release_for_receivers(&self) {
        let mut state = self.lock();
        if !state.manual {
            Self::release(&mut state);
        }
    }

    fn hold(&self, state: &mut KeepAlive) -> crate::Result<()> {
        let holder = match state.holder.take() {
            Some(old) => self.connection.reacquire(old)?,
            None => self.connection.connect()?,
        };
        state.holder = Some(holder);
        Ok(())
    }

    fn release(state: &mut KeepAlive) {
        state.manual = false;
        if let Some(holder) = state.holder.take() {
            holder.close();
        }
    }

    /// Stop holding the connection open. The helper app is not killed.
    pub fn stop_keep_alive(&self) {
        let mut state = self.lock();
        Self::release(&mut state);
    }

    /// Stop keep-alive and kill the helper app's process if it is running
    pub fn stop(&self) -> crate::Result<()> {
        self.stop_keep_alive();

        let package = self.connection.package();
        let user = self.connection.user();
        let proc = device::find_process(self.adb.as_ref(), package, user)?;
        if let Some(proc) = proc {
            device::kill_process(self.adb.as_ref(), package, &proc)?;
        } else {
            log::debug!("{} isn't running for user {}", package, user);
        }
        // Whatever was open is dead now
        self.connection.disconnect();
        Ok(())
    }

    /// Stop keep-alive and uninstall the helper app for the user
    pub fn close(&self) -> crate::Result<()> {
        self.stop_keep_alive();
        self.connection.disconnect();
        device::uninstall(
            self.adb.as_ref(),
            self.connection.package(),
            self.connection.user(),
        )
    }
}

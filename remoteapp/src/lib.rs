//! Connect to helper apps installed on an Android device and run system
//! service calls as them.
//!
//! A [TestAppInstance] is one helper package installed for one user. It
//! owns a reference counted [connection::Connection] to the app, the
//! broadcast receivers registered through it, and whether the connection is
//! kept alive. Instances are usually obtained from a [TestAppProvider].

pub mod context;
pub use context::{Context, DefaultContext};

pub mod config;

pub mod errors;
pub use errors::{Error, Result, UnavailableReason};

pub mod adb;

pub mod command;
pub use command::run_cmd;

pub mod device;

pub mod transport;

pub mod connection;
pub use connection::{Connection, ConnectionEvent, ConnectionHolder};

pub mod facade;
pub use facade::RemoteProxy;

pub mod receivers;
pub use receivers::{IntentFilter, ReceiverFilter};

pub mod lifecycle;

pub mod instance;
pub use instance::{InstanceKey, TestApp, TestAppInstance, UserId};

pub mod provider;
pub use provider::TestAppProvider;

#[cfg(test)]
pub mod testing;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use super::{Command, Connector, TcpTransport, Transport};
use crate::adb::{adb_error, Adb};
use crate::command::quote;
use crate::config::ConnectionConfig;
use crate::device;
use crate::errors::UnavailableReason;
use crate::instance::UserId;
use crate::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reaches the helper app through an `adb forward` to the abstract socket
/// its server listens on.
///
/// The helper listens on `localabstract:<prefix>.<package>.<user>` once its
/// service (`<package>/<service>`) has been started for the user.
pub struct AdbConnector {
    adb: Arc<dyn Adb>,
    config: ConnectionConfig,
}

impl AdbConnector {
    pub fn new(adb: Arc<dyn Adb>, config: ConnectionConfig) -> Self {
        Self { adb, config }
    }

    pub fn socket_name(&self, package: &str, user: UserId) -> String {
        format!("{}.{}.{}", self.config.socket_prefix, package, user)
    }

    fn component(&self, package: &str) -> String {
        format!("{}/{}", package, self.config.service)
    }

    fn start_service(&self, package: &str, user: UserId) -> crate::Result<()> {
        let cmd = format!(
            "am start-foreground-service --user {} -n {}",
            user,
            quote(&self.component(package))
        );
        let out = self.adb.checked_shell(&cmd)?;
        if out.contains("Error") {
            return Err(Error::Generic(out.trim().to_string()));
        }
        Ok(())
    }

    fn forward(&self, package: &str, user: UserId) -> crate::Result<u16> {
        let remote = format!("localabstract:{}", self.socket_name(package, user));
        let out = self.adb.forward_generic("tcp:0", &remote)?;
        if !out.ok() {
            if let Some(err) = adb_error(&out.stderr_utf8_lossy()) {
                return Err(err);
            }
        }
        let out = out.err_on_status()?;
        let stdout = out.stdout_utf8_lossy();
        stdout.trim().parse::<u16>().map_err(|_| {
            Error::Generic(format!("unexpected adb forward output: {}", stdout.trim()))
        })
    }

    fn try_open(&self, package: &str, user: UserId) -> crate::Result<ForwardedTransport> {
        self.start_service(package, user)?;
        let port = self.forward(package, user)?;
        let ip = self
            .config
            .host
            .parse::<IpAddr>()
            .map_err(|_| Error::Generic(format!("invalid host {}", self.config.host)))?;

        // Created before connecting so the forward is removed on failure
        let mut forwarded = ForwardedTransport {
            adb: Arc::clone(&self.adb),
            port,
            inner: None,
        };

        let mut inner = TcpTransport::connect(SocketAddr::new(ip, port), Some(CONNECT_TIMEOUT))?;
        // adb accepts the local connection even when nothing is listening on
        // the device, the first exchange is what really tells us
        inner
            .send(Command::Ping, "{}")
            .map_err(|e| Error::Generic(e.to_string()))?;
        forwarded.inner = Some(inner);
        Ok(forwarded)
    }

    /// Figure out why the app couldn't be reached
    fn classify(&self, package: &str, user: UserId, cause: &Error) -> UnavailableReason {
        match device::is_user_running(self.adb.as_ref(), user) {
            Ok(false) => return UnavailableReason::UserNotRunning,
            Ok(true) => {}
            Err(e) => log::warn!("failed to check state of user {}: {}", user, e),
        }
        match device::is_installed(self.adb.as_ref(), package, user) {
            Ok(false) => return UnavailableReason::NotInstalled,
            Ok(true) => {}
            Err(e) => log::warn!("failed to check if {} is installed: {}", package, e),
        }
        UnavailableReason::TransportDown(cause.to_string())
    }
}

impl Connector for AdbConnector {
    fn open(&self, package: &str, user: UserId) -> crate::Result<Box<dyn Transport>> {
        log::debug!("opening transport to {} for user {}", package, user);
        match self.try_open(package, user) {
            Ok(t) => Ok(Box::new(t)),
            // Nothing to classify if adb itself can't see the device
            Err(e @ (Error::NoAdbDevice | Error::AdbDeviceNotFound(_))) => Err(e),
            Err(e) => {
                log::debug!("failed to open transport: {}", e);
                let reason = self.classify(package, user, &e);
                Err(Error::unavailable(package, user, reason))
            }
        }
    }
}

/// A TCP transport that removes its `adb forward` when dropped
struct ForwardedTransport {
    adb: Arc<dyn Adb>,
    port: u16,
    inner: Option<TcpTransport>,
}

impl Transport for ForwardedTransport {
    fn send(&mut self, cmd: Command, payload: &str) -> super::Result<String> {
        match self.inner.as_mut() {
            Some(t) => t.send(cmd, payload),
            None => Err(super::Error::IO(std::io::ErrorKind::NotConnected.into())),
        }
    }
}

impl Drop for ForwardedTransport {
    fn drop(&mut self) {
        drop(self.inner.take());
        let local = format!("tcp:{}", self.port);
        match self.adb.remove_forward(&local) {
            Ok(out) if out.ok() => {}
            Ok(out) => log::warn!(
                "failed to remove forward {}: {}",
                local,
                out.stderr_utf8_lossy()
            ),
            Err(e) => log::warn!("failed to remove forward {}: {}", local, e),
        }
    }
}

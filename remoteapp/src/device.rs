//! Package and process operations on the device, scoped to an Android user.

use std::fmt::Display;
use std::path::Path;

use crate::adb::Adb;
use crate::command::quote;
use crate::instance::UserId;

/// A running process on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub user: UserId,
    /// The process's uid name as reported by `ps` (`u10_a123`)
    pub uid_name: String,
    pub name: String,
}

impl Display for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (pid {}, {})", self.name, self.pid, self.uid_name)
    }
}

/// Find the main process of `package` running as `user`
pub fn find_process(
    adb: &dyn Adb,
    package: &str,
    user: UserId,
) -> crate::Result<Option<ProcessHandle>> {
    let out = adb.checked_shell("ps -A -o USER,PID,NAME")?;
    Ok(parse_ps(&out, package, user))
}

fn parse_ps(out: &str, package: &str, user: UserId) -> Option<ProcessHandle> {
    let prefix = format!("u{}_", user);
    out.lines().skip(1).find_map(|line| {
        let mut parts = line.split_ascii_whitespace();
        let uid_name = parts.next()?;
        let pid = parts.next()?.parse::<u32>().ok()?;
        let name = parts.next()?;
        if name != package || !uid_name.starts_with(&prefix) {
            return None;
        }
        Some(ProcessHandle {
            pid,
            user,
            uid_name: uid_name.into(),
            name: name.into(),
        })
    })
}

/// Kill the given process.
///
/// A process that already exited is not an error.
pub fn kill_process(adb: &dyn Adb, package: &str, proc: &ProcessHandle) -> crate::Result<()> {
    log::debug!("killing {}", proc);
    let out = adb.shell(&format!("kill {}", proc.pid))?;
    if out.ok() {
        return Ok(());
    }
    let stderr = out.stderr_utf8_lossy();
    let stdout = out.stdout_utf8_lossy();
    if stderr.contains("No such process") || stdout.contains("No such process") {
        log::debug!("{} was already gone", proc);
        return Ok(());
    }
    let message = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    Err(crate::Error::ProcessKill {
        package: package.into(),
        user: proc.user,
        pid: proc.pid,
        message,
    })
}

/// Check whether `package` is installed for `user`
pub fn is_installed(adb: &dyn Adb, package: &str, user: UserId) -> crate::Result<bool> {
    let out = adb.checked_shell(&format!(
        "pm list packages --user {} {}",
        user,
        quote(package)
    ))?;
    // `pm list packages` filters by substring, so look for the exact name
    Ok(out
        .lines()
        .filter_map(|it| it.trim().strip_prefix("package:"))
        .any(|it| it == package))
}

/// Check whether the given user has been started
pub fn is_user_running(adb: &dyn Adb, user: UserId) -> crate::Result<bool> {
    let out = adb.shell(&format!("am get-started-user-state {}", user))?;
    let stdout = out.stdout_utf8_lossy();
    Ok(out.ok() && stdout.contains("RUNNING"))
}

/// Uninstall `package` for `user` only
pub fn uninstall(adb: &dyn Adb, package: &str, user: UserId) -> crate::Result<()> {
    log::info!("uninstalling {} for user {}", package, user);
    let out = adb.shell(&format!("pm uninstall --user {} {}", user, quote(package)))?;
    let stdout = out.stdout_utf8_lossy();
    if stdout.contains("Success") {
        return Ok(());
    }
    let code = out.status.code().unwrap_or(-1);
    let stderr = out.stderr_utf8_lossy();
    Err(crate::Error::CommandError(
        code,
        format!("{}{}", stdout.trim(), stderr.trim()),
    ))
}

/// Install the apk at `apk` for `user`
pub fn install(adb: &dyn Adb, apk: &Path, user: UserId) -> crate::Result<()> {
    if !apk.exists() {
        return Err(crate::Error::Precondition(format!(
            "apk {} doesn't exist",
            apk.to_string_lossy()
        )));
    }
    log::info!("installing {} for user {}", apk.to_string_lossy(), user);
    adb.install_for_user(&apk.to_string_lossy(), user)
}

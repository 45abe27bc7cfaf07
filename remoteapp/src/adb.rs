use std::io;

use lazy_static::lazy_static;
use regex::Regex;

use crate::command::{run_cmd, CmdOutput};
use crate::config::AdbConfig;
use crate::instance::UserId;
use crate::Context;

/// The Adb trait just abstracts the `adb` commands the harness needs
pub trait Adb: Send + Sync {
    /// Install (or reinstall) the APK at the given path for a single user
    fn install_for_user(&self, apk: &str, user: UserId) -> crate::Result<()>;

    /// Essentially the same as running `adb shell '...'`
    fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput>;

    /// Same as `adb forward LOCAL REMOTE`
    fn forward_generic(&self, local: &str, remote: &str) -> io::Result<CmdOutput>;

    /// Same as `adb forward --remove LOCAL`
    fn remove_forward(&self, local: &str) -> io::Result<CmdOutput>;

    /// Run the shell command and fail unless it exits successfully, returning
    /// stdout
    fn checked_shell(&self, shell_cmd: &str) -> crate::Result<String> {
        let out = self.shell(shell_cmd)?;
        if !out.ok() {
            if let Some(err) = adb_error(&out.stderr_utf8_lossy()) {
                return Err(err);
            }
        }
        let out = out.err_on_status()?;
        Ok(out.stdout_utf8_lossy().into_owned())
    }
}

lazy_static! {
    static ref DEVICE_NOT_FOUND: Regex =
        Regex::new(r"device\s+'([^']+)'\s+not\s+found").expect("valid regex");
}

/// Maps the `adb` binary's own complaints (as opposed to the device command's
/// output) to errors
pub fn adb_error(stderr: &str) -> Option<crate::Error> {
    if stderr.contains("no devices/emulators") {
        return Some(crate::Error::NoAdbDevice);
    }
    let caps = DEVICE_NOT_FOUND.captures(stderr)?;
    let serial = caps
        .get(1)
        .map(|m| String::from(m.as_str()))
        .unwrap_or_else(|| "?".into());
    Some(crate::Error::AdbDeviceNotFound(serial))
}

#[derive(Clone)]
/// An `Adb` implementation that just invokes the external `adb` command.
pub struct ExecAdb {
    bin: String,
    serial: Option<String>,
}

impl ExecAdb {
    /// Creates a new `ExecAdb` from the given context.
    ///
    /// The `[adb]` table of the project config is used when present, missing
    /// values come from the environment (`adb` on the path and
    /// `ANDROID_SERIAL`).
    pub fn new(ctx: &dyn Context) -> crate::Result<Self> {
        match ctx.get_project_config()? {
            Some(cfg) => Self::try_from_adb_config(ctx, &cfg.adb),
            None => Self::from_env(ctx),
        }
    }

    pub fn from_env(ctx: &dyn Context) -> crate::Result<Self> {
        let bin = ctx.get_bin("adb")?;
        let serial = ctx.maybe_get_env("ANDROID_SERIAL");

        Ok(Self { bin, serial })
    }

    pub fn try_from_adb_config(ctx: &dyn Context, cfg: &AdbConfig) -> crate::Result<Self> {
        let bin = cfg.get_executable(ctx)?.into_owned();
        let serial = cfg.get_serial(ctx).map(|it| it.into_owned()).ok();
        Ok(Self { bin, serial })
    }

}

impl Default for ExecAdb {
    fn default() -> Self {
        Self {
            bin: "adb".into(),
            serial: None,
        }
    }
}

macro_rules! adb_cmd {
    ($adb:ident, $cmd:literal, $($args:expr),*) => {
        if let Some(ref serial) = $adb.serial {
            run_cmd(&$adb.bin, &["-s", serial, $cmd, $($args),*])
        } else {
            run_cmd(&$adb.bin, &[$cmd, $($args),*])
        }
    }
}

fn empty_result(res: io::Result<CmdOutput>) -> crate::Result<()> {
    let out = res?;
    if !out.ok() {
        if let Some(err) = adb_error(&out.stderr_utf8_lossy()) {
            return Err(err);
        }
    }
    out.err_on_status().map(|_| ())
}

impl Adb for ExecAdb {
    fn install_for_user(&self, apk: &str, user: UserId) -> crate::Result<()> {
        let user = user.to_string();
        empty_result(adb_cmd!(self, "install", "-r", "--user", &user, apk))
    }

    fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput> {
        adb_cmd!(self, "shell", shell_cmd)
    }

    fn forward_generic(&self, local: &str, remote: &str) -> io::Result<CmdOutput> {
        adb_cmd!(self, "forward", local, remote)
    }

    fn remove_forward(&self, local: &str) -> io::Result<CmdOutput> {
        adb_cmd!(self, "forward", "--remove", local)
    }
}

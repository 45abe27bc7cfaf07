use std::borrow::Cow;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use toml::{Table, Value};

use crate::Context;

#[derive(Debug)]
pub enum Error {
    InvalidType,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::InvalidType => "InvalidType",
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_SOCKET_PREFIX: &str = "remoteapp";
pub const DEFAULT_SERVICE: &str = ".HarnessService";

/// The parsed `remoteapp.toml` project file
///
/// ```toml
/// [adb]
/// executable = "/opt/android/platform-tools/adb"
/// serial = "emulator-5554"
///
/// [connection]
/// host = "127.0.0.1"
/// socket-prefix = "remoteapp"
/// service = ".HarnessService"
/// ```
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub adb: AdbConfig,
    pub connection: ConnectionConfig,
}

#[derive(Clone, Debug, Default)]
pub struct AdbConfig {
    executable: Option<String>,
    serial: Option<String>,
}

impl AdbConfig {
    pub fn new(executable: Option<String>, serial: Option<String>) -> Self {
        Self { executable, serial }
    }

    /// The configured executable, falling back to `adb` on the context's path
    pub fn get_executable<'a>(&'a self, ctx: &dyn Context) -> crate::Result<Cow<'a, str>> {
        match &self.executable {
            Some(v) => Ok(Cow::Borrowed(v.as_str())),
            None => ctx.get_bin("adb").map(Cow::Owned),
        }
    }

    /// The configured serial, falling back to `ANDROID_SERIAL`
    pub fn get_serial<'a>(&'a self, ctx: &dyn Context) -> crate::Result<Cow<'a, str>> {
        match &self.serial {
            Some(v) => Ok(Cow::Borrowed(v.as_str())),
            None => ctx.get_env("ANDROID_SERIAL").map(Cow::Owned),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub host: String,
    pub socket_prefix: String,
    /// The helper's service class, relative to its package if it starts with `.`
    pub service: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            socket_prefix: DEFAULT_SOCKET_PREFIX.into(),
            service: DEFAULT_SERVICE.into(),
        }
    }
}

pub const SOCKET_PREFIX_ENV: &str = "REMOTEAPP_SOCKET_PREFIX";

impl ConnectionConfig {
    /// The connection config for the project: the `[connection]` table of the
    /// project file if there is one, with `REMOTEAPP_SOCKET_PREFIX` taking
    /// precedence over the file
    pub fn from_ctx(ctx: &dyn Context) -> crate::Result<Self> {
        let cfg = match ctx.get_project_config()? {
            Some(cfg) => cfg.connection.clone(),
            None => Self::default(),
        };
        Ok(cfg.with_env(ctx))
    }

    pub fn with_env(mut self, ctx: &dyn Context) -> Self {
        if let Some(prefix) = ctx.maybe_get_env(SOCKET_PREFIX_ENV) {
            self.socket_prefix = prefix;
        }
        self
    }
}

impl Config {
    pub fn parse(source: &Path) -> crate::Result<Self> {
        parse_config(source, Self::from_map)
    }

    pub fn parse_str(source: &Path, content: &str) -> crate::Result<Self> {
        let table: Table = match toml::from_str(content) {
            Ok(v) => v,
            Err(e) => return Err(crate::Error::new_cfg(source, &e)),
        };
        let base = ConfigMap {
            name: None,
            path: source,
            table: &table,
        };
        Self::from_map(&base)
    }

    fn from_map(map: &ConfigMap) -> crate::Result<Self> {
        let mut cfg = Self::default();

        if let Some(adb) = map.maybe_get_map_typecheck("adb")? {
            cfg.adb.executable = adb.maybe_get_str_typecheck("executable")?.map(String::from);
            cfg.adb.serial = adb.maybe_get_str_typecheck("serial")?.map(String::from);
        }

        if let Some(conn) = map.maybe_get_map_typecheck("connection")? {
            if let Some(host) = conn.maybe_get_str_typecheck("host")? {
                cfg.connection.host = host.into();
            }
            if let Some(prefix) = conn.maybe_get_str_typecheck("socket-prefix")? {
                if prefix.is_empty() {
                    return Err(conn.invalid_key("socket-prefix", "non-empty string"));
                }
                cfg.connection.socket_prefix = prefix.into();
            }
            if let Some(service) = conn.maybe_get_str_typecheck("service")? {
                cfg.connection.service = service.into();
            }
        }

        Ok(cfg)
    }
}

pub fn parse_config<R, F>(file: &Path, f: F) -> crate::Result<R>
where
    F: FnOnce(&ConfigMap) -> crate::Result<R>,
{
    let as_str = fs::read_to_string(file)?;

    let table: Table = match toml::from_str(&as_str) {
        Ok(v) => v,
        Err(e) => return Err(crate::Error::new_cfg(file, &e)),
    };

    let base = ConfigMap {
        name: None,
        path: file,
        table: &table,
    };

    f(&base)
}

pub struct ConfigMap<'c> {
    path: &'c Path,
    name: Option<Cow<'c, str>>,
    table: &'c Table,
}

impl<'c> ConfigMap<'c> {
    fn key_path<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.name {
            None => Cow::Borrowed(key),
            Some(v) => Cow::Owned(format!("{}.{}", v, key)),
        }
    }

    fn path_string(&self) -> String {
        PathBuf::from(self.path).to_string_lossy().into_owned()
    }

    /// Helper to create a crate::Error for an invalid key
    pub fn invalid_key(&self, key: &str, expected: &str) -> crate::Error {
        let path = self.key_path(key);
        crate::Error::InvalidConfig(
            self.path_string(),
            format!(
                "invalid value for key: {} (expected type: {})",
                path, expected
            ),
        )
    }

    fn get(&self, key: &str) -> Option<&'c Value> {
        self.table.get(key)
    }

    pub fn maybe_get_str(&self, key: &str) -> Result<Option<&'c str>> {
        match self.get(key) {
            Some(v) => match v.as_str() {
                Some(v) => Ok(Some(v)),
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_str_typecheck(&self, key: &str) -> crate::Result<Option<&'c str>> {
        self.maybe_get_str(key)
            .map_err(|_| self.invalid_key(key, "string"))
    }

    pub fn maybe_get_map(&self, key: &str) -> Result<Option<ConfigMap<'c>>> {
        match self.get(key) {
            Some(v) => match v.as_table() {
                Some(table) => {
                    let name = match &self.name {
                        Some(parents) => Cow::Owned(format!("{parents}.{key}")),
                        None => Cow::Owned(key.to_string()),
                    };
                    Ok(Some(Self {
                        name: Some(name),
                        path: self.path,
                        table,
                    }))
                }
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_map_typecheck(&self, key: &str) -> crate::Result<Option<ConfigMap<'c>>> {
        self.maybe_get_map(key)
            .map_err(|_| self.invalid_key(key, "table"))
    }
}

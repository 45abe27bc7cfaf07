use std::env;
use std::ops::DerefMut;
use std::path::PathBuf;
use std::sync::Mutex;

use blanket::blanket;
use once_cell::sync::OnceCell;
use which::{which, which_in};

use crate::config::Config;
use crate::Error;

pub const PROJECT_HOME_ENV: &str = "REMOTEAPP_PROJECT_HOME";
pub const CONFIG_FILE_NAME: &str = "remoteapp.toml";

#[derive(Clone)]
struct CachedBin {
    name: String,
    path: String,
}

fn find_program(bin: &str) -> Option<String> {
    let found = match env::var("REMOTEAPP_PATH") {
        Ok(search) => {
            let cwd = env::current_dir().ok()?;
            which_in(bin, Some(&search), &cwd).ok()
        }
        Err(_) => which(bin).ok(),
    };
    found.map(|it| it.to_string_lossy().into())
}

/// Context is a trait for an object that can find binaries, look up env vars
/// and locate the project configuration.
///
/// Most methods on this trait have a default implementation that is perfectly
/// safe to leave unchanged.
#[blanket(derive(Ref, Box))]
pub trait Context: Send + Sync {
    fn maybe_get_env(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn maybe_get_bin(&self, bin: &str) -> Option<String> {
        find_program(bin)
    }

    fn get_bin(&self, bin: &str) -> crate::Result<String> {
        self.maybe_get_bin(bin)
            .ok_or_else(|| Error::MissingBin(bin.into()))
    }

    fn get_env(&self, key: &str) -> crate::Result<String> {
        self.maybe_get_env(key)
            .ok_or_else(|| Error::MissingEnv(key.into()))
    }

    fn get_project_dir(&self) -> crate::Result<PathBuf> {
        let home = self.get_env(PROJECT_HOME_ENV).map(PathBuf::from)?;
        if !home.exists() {
            return Err(Error::Generic(format!(
                "{} set to {}, but that directory doesn't exist",
                PROJECT_HOME_ENV,
                home.to_string_lossy()
            )));
        }
        Ok(home)
    }

    fn get_project_config_file(&self) -> crate::Result<PathBuf> {
        self.get_project_dir().map(|it| it.join(CONFIG_FILE_NAME))
    }

    /// Get the project configuration, `None` if there is no project file
    fn get_project_config<'a>(&'a self) -> crate::Result<Option<&'a Config>>;
}

pub struct DefaultContext {
    bin_cache: Mutex<Vec<CachedBin>>,
    project_config: OnceCell<Option<Config>>,
}

impl Clone for DefaultContext {
    fn clone(&self) -> Self {
        let cache = self.bin_cache.lock().expect("failed to lock");
        Self {
            bin_cache: Mutex::new(cache.clone()),
            project_config: self.project_config.clone(),
        }
    }
}

impl DefaultContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for DefaultContext {
    fn default() -> Self {
        Self {
            bin_cache: Mutex::new(Vec::new()),
            project_config: OnceCell::new(),
        }
    }
}

impl Context for DefaultContext {
    fn get_project_config<'a>(&'a self) -> crate::Result<Option<&'a Config>> {
        let cfg = self
            .project_config
            .get_or_try_init(|| -> crate::Result<Option<Config>> {
                // No project at all is fine, everything has a default
                let path = match self.get_project_config_file() {
                    Ok(v) => v,
                    Err(Error::MissingEnv(_)) => return Ok(None),
                    Err(e) => return Err(e),
                };
                if !path.exists() {
                    Ok(None)
                } else {
                    log::debug!("loading project config {}", path.to_string_lossy());
                    Ok(Some(Config::parse(&path)?))
                }
            })?;
        Ok(cfg.as_ref())
    }

    fn maybe_get_bin(&self, prog: &str) -> Option<String> {
        let mut cache_guard = self.bin_cache.lock().expect("failed to lock");
        let cache = cache_guard.deref_mut();
        if let Some(hit) = cache.iter().find(|it| it.name == prog) {
            return Some(hit.path.clone());
        }

        let found = find_program(prog)?;

        cache.push(CachedBin {
            name: prog.into(),
            path: found.clone(),
        });

        Some(found)
    }
}

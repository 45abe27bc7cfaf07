use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::adb::{Adb, ExecAdb};
use crate::config::ConnectionConfig;
use crate::device;
use crate::instance::{InstanceKey, TestApp, TestAppInstance, UserId};
use crate::transport::{AdbConnector, Connector};
use crate::{Context, Error};

/// Hands out [TestAppInstance]s, at most one live instance per package and
/// user so receivers and keep-alive state aren't split between handles.
pub struct TestAppProvider {
    adb: Arc<dyn Adb>,
    connector: Arc<dyn Connector>,
    instances: Mutex<HashMap<InstanceKey, Arc<TestAppInstance>>>,
}

impl TestAppProvider {
    pub fn new(adb: Arc<dyn Adb>, connector: Arc<dyn Connector>) -> Self {
        Self {
            adb,
            connector,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Create a provider talking to the device configured for the project,
    /// see [ExecAdb::new]
    pub fn from_ctx(ctx: &dyn Context) -> crate::Result<Self> {
        let adb: Arc<dyn Adb> = Arc::new(ExecAdb::new(ctx)?);
        let config = ConnectionConfig::from_ctx(ctx)?;
        let connector = Arc::new(AdbConnector::new(Arc::clone(&adb), config));
        Ok(Self::new(adb, connector))
    }

    pub fn adb(&self) -> &dyn Adb {
        self.adb.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InstanceKey, Arc<TestAppInstance>>> {
        self.instances.lock().expect("failed to lock")
    }

    /// The instance of `package` for `user`, created if there isn't a live
    /// one yet. Nothing is sent to the device.
    pub fn instance(&self, package: &str, user: UserId) -> crate::Result<Arc<TestAppInstance>> {
        let key = InstanceKey::new(package, user)?;
        let mut instances = self.lock();
        if let Some(inst) = instances.get(&key) {
            if !inst.is_closed() {
                return Ok(Arc::clone(inst));
            }
        }
        let inst = Arc::new(TestAppInstance::new(
            package,
            user,
            Arc::clone(&self.adb),
            Arc::clone(&self.connector),
        )?);
        instances.insert(key, Arc::clone(&inst));
        Ok(inst)
    }

    /// Install `app` for `user` and return its instance.
    ///
    /// Without an apk the app must already be installed for the user.
    pub fn install(&self, app: &TestApp, user: UserId) -> crate::Result<Arc<TestAppInstance>> {
        let key = InstanceKey::new(&app.package, user)?;
        match &app.apk {
            Some(apk) => device::install(self.adb.as_ref(), apk, user)?,
            None => {
                if !device::is_installed(self.adb.as_ref(), &key.package, user)? {
                    return Err(Error::Precondition(format!(
                        "{} has no apk to install",
                        key
                    )));
                }
            }
        }
        self.instance(&key.package, user)
    }

    /// Drop the cached entry for `instance`, later calls to
    /// [Self::instance] create a fresh one
    pub fn forget(&self, instance: &TestAppInstance) -> bool {
        let mut instances = self.lock();
        match instances.get(instance.key()) {
            Some(cached) if std::ptr::eq(cached.as_ref(), instance) => {
                instances.remove(instance.key());
                true
            }
            _ => false,
        }
    }

    /// All live instances
    pub fn instances(&self) -> Vec<Arc<TestAppInstance>> {
        self.lock()
            .values()
            .filter(|it| !it.is_closed())
            .cloned()
            .collect()
    }
}

use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam::atomic::AtomicCell;
use rand::Rng;

use crate::adb::Adb;
use crate::connection::{Connection, ConnectionEvent};
use crate::device::{self, ProcessHandle};
use crate::facade::{
    self, AccountManager, ActivityManager, NotificationManager, PackageManager, RemoteProxy, Subsystem,
    UsageStatsManager, UserManager,
};
use crate::lifecycle::LifecycleController;
use crate::receivers::{self, ReceiverFilter, ReceiverRegistry, Registration};
use crate::transport::Connector;
use crate::Error;

/// An Android user id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(i32);

impl UserId {
    pub const SYSTEM: UserId = UserId(0);

    /// Create a user id for a real user. The negative pseudo users
    /// (`USER_ALL`, `USER_CURRENT`, ...) can't host an app instance.
    pub fn new(id: i32) -> crate::Result<Self> {
        if id < 0 {
            return Err(Error::Precondition(format!("invalid user id {}", id)));
        }
        Ok(Self(id))
    }

    pub const fn new_unchecked(id: i32) -> Self {
        Self(id)
    }

    pub fn as_raw(&self) -> i32 {
        self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A helper app that can be installed on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestApp {
    pub package: String,
    pub apk: Option<PathBuf>,
}

impl TestApp {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.into(),
            apk: None,
        }
    }

    pub fn with_apk(mut self, apk: PathBuf) -> Self {
        self.apk = Some(apk);
        self
    }
}

/// What identifies an instance: the package and the user it runs as
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub package: String,
    pub user: UserId,
}

impl InstanceKey {
    pub fn new(package: &str, user: UserId) -> crate::Result<Self> {
        validate_package(package)?;
        Ok(Self {
            package: package.into(),
            user,
        })
    }
}

impl Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (user {})", self.package, self.user)
    }
}

fn validate_package(package: &str) -> crate::Result<()> {
    let valid = !package.is_empty()
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
    if !valid {
        return Err(Error::Precondition(format!(
            "invalid package name {:?}",
            package
        )));
    }
    Ok(())
}

/// A handle to one helper app installed for one user.
///
/// Owns the connection to the app, the receivers registered in it, and its
/// keep-alive state. Equality and hashing only consider the package and user.
pub struct TestAppInstance {
    key: InstanceKey,
    connection: Connection,
    receivers: Arc<Mutex<ReceiverRegistry>>,
    lifecycle: LifecycleController,
    adb: Arc<dyn Adb>,
    closed: AtomicCell<bool>,
}

impl TestAppInstance {
    pub fn new(
        package: &str,
        user: UserId,
        adb: Arc<dyn Adb>,
        connector: Arc<dyn Connector>,
    ) -> crate::Result<Self> {
        let key = InstanceKey::new(package, user)?;
        let connection = Connection::new(package, user, connector);
        let receivers = Arc::new(Mutex::new(ReceiverRegistry::new()));

        let replay_from = Arc::clone(&receivers);
        connection.subscribe(move |conn, event| {
            if event != ConnectionEvent::Connected {
                return Ok(());
            }
            // Taken before sending so the registry isn't locked across calls
            let registrations = replay_from.lock().expect("failed to lock").snapshot();
            receivers::replay(conn, &registrations)
        });

        let lifecycle = LifecycleController::new(connection.clone(), Arc::clone(&adb));

        Ok(Self {
            key,
            connection,
            receivers,
            lifecycle,
            adb,
            closed: AtomicCell::new(false),
        })
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    pub fn package(&self) -> &str {
        &self.key.package
    }

    pub fn user(&self) -> UserId {
        self.key.user
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load()
    }

    fn check_open(&self) -> crate::Result<()> {
        if self.is_closed() {
            return Err(Error::Precondition(format!("{} was closed", self.key)));
        }
        Ok(())
    }

    fn registry(&self) -> MutexGuard<'_, ReceiverRegistry> {
        self.receivers.lock().expect("failed to lock")
    }

    /// A proxy for any subsystem, see the named helpers for the common ones
    pub fn proxy<S: Subsystem>(&self) -> RemoteProxy<S> {
        RemoteProxy::new(self.connection.clone(), self.key.user, &self.key.package)
    }

    pub fn package_manager(&self) -> RemoteProxy<PackageManager> {
        self.proxy()
    }

    pub fn account_manager(&self) -> RemoteProxy<AccountManager> {
        self.proxy()
    }

    pub fn notification_manager(&self) -> RemoteProxy<NotificationManager> {
        self.proxy()
    }

    pub fn user_manager(&self) -> RemoteProxy<UserManager> {
        self.proxy()
    }

    pub fn usage_stats_manager(&self) -> RemoteProxy<UsageStatsManager> {
        self.proxy()
    }

    pub fn activity_manager(&self) -> RemoteProxy<ActivityManager> {
        self.proxy()
    }

    /// Invoke a method on a subsystem only known by name
    pub fn invoke(
        &self,
        subsystem: &str,
        method: &str,
        args: &serde_json::Value,
    ) -> crate::Result<serde_json::Value> {
        self.check_open()?;
        facade::invoke(
            &self.connection,
            self.key.user,
            &self.key.package,
            subsystem,
            method,
            args,
        )
    }

    pub fn register_receiver(&self, filter: &ReceiverFilter) -> crate::Result<()> {
        self.register_receiver_with_flags(filter, 0)
    }

    /// Register a broadcast receiver for `filter` in the helper app.
    ///
    /// Registering a filter that is already registered does nothing. The
    /// connection is kept alive while any receiver is registered.
    pub fn register_receiver_with_flags(
        &self,
        filter: &ReceiverFilter,
        flags: i32,
    ) -> crate::Result<()> {
        self.check_open()?;
        if self.registry().contains(filter) {
            return Ok(());
        }

        let receiver_id: i64 = rand::thread_rng().gen();

        // May reconnect, in which case existing receivers are replayed first
        self.lifecycle.keep_alive_for_receivers()?;

        if let Err(e) = receivers::send_register(&self.connection, receiver_id, filter, flags) {
            if self.registry().is_empty() {
                self.lifecycle.release_for_receivers();
            }
            return Err(e);
        }

        log::debug!(
            "registered receiver {} for {:?} in {}",
            receiver_id,
            filter,
            self.key
        );
        self.registry().insert(Registration {
            filter: filter.clone(),
            receiver_id,
            flags,
        });
        Ok(())
    }

    /// Unregister the receiver for `filter`, doing nothing if there isn't one.
    ///
    /// Keep-alive stops with the last receiver unless [Self::keep_alive] was
    /// called.
    pub fn unregister_receiver(&self, filter: &ReceiverFilter) -> crate::Result<&Self> {
        self.check_open()?;
        let (removed, now_empty) = {
            let mut registry = self.registry();
            let removed = registry.remove(filter);
            (removed, registry.is_empty())
        };
        let removed = match removed {
            Some(v) => v,
            None => return Ok(self),
        };

        let res = receivers::send_unregister(&self.connection, removed.receiver_id);

        if now_empty {
            self.lifecycle.release_for_receivers();
        }
        res.map(|_| self)
    }

    /// The currently registered receivers and their remote ids
    pub fn registered_receivers(&self) -> Vec<(ReceiverFilter, i64)> {
        self.registry()
            .iter()
            .map(|it| (it.filter.clone(), it.receiver_id))
            .collect()
    }

    /// Keep the helper app connected until [Self::stop_keep_alive]
    pub fn keep_alive(&self) -> crate::Result<&Self> {
        self.check_open()?;
        self.lifecycle.keep_alive()?;
        Ok(self)
    }

    pub fn stop_keep_alive(&self) -> &Self {
        self.lifecycle.stop_keep_alive();
        self
    }

    pub fn is_keeping_alive(&self) -> bool {
        self.lifecycle.is_keeping_alive()
    }

    pub fn is_manual_keep_alive(&self) -> bool {
        self.lifecycle.is_manual_keep_alive()
    }

    /// The helper app's process, if it is running
    pub fn process(&self) -> crate::Result<Option<ProcessHandle>> {
        device::find_process(self.adb.as_ref(), &self.key.package, self.key.user)
    }

    pub fn is_running(&self) -> crate::Result<bool> {
        Ok(self.process()?.is_some())
    }

    /// Stop keep-alive and kill the helper app
    pub fn stop(&self) -> crate::Result<()> {
        self.check_open()?;
        self.lifecycle.stop()
    }

    /// Stop keep-alive and uninstall the helper app for this user.
    ///
    /// The instance can't be used afterwards.
    pub fn close(&self) -> crate::Result<()> {
        self.check_open()?;
        self.closed.store(true);
        log::info!("closing {}", self.key);
        // The app is going away along with everything registered in it
        self.registry().clear();
        self.lifecycle.close()
    }
}

impl PartialEq for TestAppInstance {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for TestAppInstance {}

impl Hash for TestAppInstance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl Display for TestAppInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never hold both locks, keep-alive locks the registry while replaying
        let receivers = self.registry().to_string();
        let manual = self.is_manual_keep_alive();
        write!(
            f,
            "TestAppInstance{{package={}, user={}, receivers={}, keepAliveManually={}}}",
            self.key.package, self.key.user, receivers, manual
        )
    }
}

impl Debug for TestAppInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::receivers::IntentFilter;
    use crate::testing::{cmd_output, fake_remote, mock_adb, FakeRemote, MockAdb, TcpHelperApp};
    use crate::transport::Command;
    use mockall::predicate::eq;
    use rstest::*;
    use serde_json::json;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    const PACKAGE: &str = "com.example.helper";

    fn instance(remote: &FakeRemote, adb: MockAdb) -> TestAppInstance {
        TestAppInstance::new(
            PACKAGE,
            UserId::new_unchecked(10),
            Arc::new(adb),
            remote.connector(),
        )
        .expect("valid instance")
    }

    fn filter(action: &str) -> ReceiverFilter {
        ReceiverFilter::new(IntentFilter::new(action))
    }

    fn receiver_ids(requests: &[serde_json::Value]) -> Vec<i64> {
        requests
            .iter()
            .filter_map(|it| it["receiverId"].as_i64())
            .collect()
    }

    fn hash_of<T: Hash>(t: &T) -> u64 {
        let mut h = DefaultHasher::new();
        t.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_preconditions() {
        assert!(matches!(UserId::new(-2), Err(Error::Precondition(_))));
        assert_eq!(UserId::new(10).expect("valid").as_raw(), 10);

        let remote = FakeRemote::default();
        let adb: Arc<dyn Adb> = Arc::new(MockAdb::new());
        for bad in ["", "com.example helper", "com/example"] {
            let res = TestAppInstance::new(bad, UserId::SYSTEM, Arc::clone(&adb), remote.connector());
            assert!(matches!(res, Err(Error::Precondition(_))), "{:?}", bad);
        }
    }

    #[rstest]
    fn test_idempotent_registration(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");

        inst.register_receiver(&a).expect("register");
        inst.register_receiver(&a).expect("register again");

        assert_eq!(fake_remote.requests(Command::RegisterReceiver).len(), 1);
        let registered = inst.registered_receivers();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].0, a);
        assert!(inst.is_keeping_alive());
        assert!(!inst.is_manual_keep_alive());
    }

    #[rstest]
    fn test_equal_filters_register_separately(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");
        let b = filter("android.intent.action.PACKAGE_ADDED");

        inst.register_receiver(&a).expect("register a");
        inst.register_receiver(&b).expect("register b");

        let ids = receiver_ids(&fake_remote.requests(Command::RegisterReceiver));
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[rstest]
    fn test_idempotent_unregistration(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");

        inst.unregister_receiver(&a).expect("nothing to do");
        assert!(fake_remote.requests(Command::UnregisterReceiver).is_empty());
        assert_eq!(fake_remote.opened(), 0);
    }

    #[rstest]
    fn test_replay_on_reconnect(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");
        let b = filter("android.intent.action.PACKAGE_REMOVED");
        inst.register_receiver(&a).expect("register a");
        inst.register_receiver(&b).expect("register b");

        let original = receiver_ids(&fake_remote.requests(Command::RegisterReceiver));
        fake_remote.clear_requests();

        fake_remote.set_result("areNotificationsEnabled", json!(true));
        inst.connection().disconnect();
        assert!(!inst.is_connected());
        // Any call reconnects and the replay happens before it is sent
        assert!(inst
            .notification_manager()
            .are_notifications_enabled()
            .expect("call"));

        let replayed = receiver_ids(&fake_remote.requests(Command::RegisterReceiver));
        assert_eq!(replayed, original);
        assert_eq!(fake_remote.request_order().first(), Some(&Command::RegisterReceiver));
        assert_eq!(fake_remote.request_order().last(), Some(&Command::Invoke));
    }

    #[rstest]
    fn test_replay_on_keep_alive(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");
        inst.register_receiver(&a).expect("register");
        let original = receiver_ids(&fake_remote.requests(Command::RegisterReceiver));

        fake_remote.break_transports();
        fake_remote.clear_requests();
        // The dead transport is noticed on the next call
        assert!(inst.package_manager().get_installed_packages(0).is_err());
        inst.keep_alive().expect("keep alive reconnects");

        assert_eq!(
            receiver_ids(&fake_remote.requests(Command::RegisterReceiver)),
            original
        );
    }

    #[rstest]
    fn test_keep_alive_auto_stop(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");

        inst.register_receiver(&a).expect("register");
        assert!(inst.is_keeping_alive());
        inst.unregister_receiver(&a).expect("unregister");
        assert!(!inst.is_keeping_alive());
        assert!(!inst.is_connected());
        assert_eq!(
            receiver_ids(&fake_remote.requests(Command::UnregisterReceiver)),
            receiver_ids(&fake_remote.requests(Command::RegisterReceiver))
        );
    }

    #[rstest]
    fn test_manual_keep_alive_survives_unregister(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");

        inst.keep_alive().expect("keep alive");
        inst.register_receiver(&a).expect("register");
        inst.unregister_receiver(&a).expect("unregister");

        assert!(inst.is_keeping_alive());
        assert!(inst.is_manual_keep_alive());
        assert!(inst.is_connected());
        assert_eq!(inst.connection().holder_count(), 1);
    }

    #[rstest]
    fn test_failed_registration_releases_keep_alive(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");

        fake_remote.fail_next("java.lang.SecurityException", "not exported");
        assert!(matches!(
            inst.register_receiver(&a),
            Err(Error::RemoteOperation { .. })
        ));
        assert!(inst.registered_receivers().is_empty());
        assert!(!inst.is_keeping_alive());
    }

    #[rstest]
    fn test_unavailable_registration(fake_remote: FakeRemote, mock_adb: MockAdb) {
        fake_remote.set_available(false);
        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");

        assert!(matches!(
            inst.register_receiver(&a),
            Err(Error::Unavailable { .. })
        ));
        assert!(inst.registered_receivers().is_empty());
    }

    #[rstest]
    fn test_equality(fake_remote: FakeRemote) {
        let first = instance(&fake_remote, MockAdb::new());
        let second = instance(&fake_remote, MockAdb::new());
        first
            .register_receiver(&filter("android.intent.action.PACKAGE_ADDED"))
            .expect("register");
        second.keep_alive().expect("keep alive");

        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));

        let other_user = TestAppInstance::new(
            PACKAGE,
            UserId::new_unchecked(11),
            Arc::new(MockAdb::new()),
            fake_remote.connector(),
        )
        .expect("valid");
        assert_ne!(first, other_user);

        let mut set = HashSet::new();
        set.insert(first.key().clone());
        assert!(!set.insert(second.key().clone()));
    }

    #[rstest]
    fn test_display(fake_remote: FakeRemote, mock_adb: MockAdb) {
        let inst = instance(&fake_remote, mock_adb);
        inst.keep_alive().expect("keep alive");
        let shown = inst.to_string();
        assert!(shown.contains("package=com.example.helper"));
        assert!(shown.contains("user=10"));
        assert!(shown.contains("receivers={}"));
        assert!(shown.contains("keepAliveManually=true"));
    }

    #[rstest]
    fn test_close_is_terminal(fake_remote: FakeRemote, mut mock_adb: MockAdb) {
        mock_adb
            .expect_shell()
            .with(eq("pm uninstall --user 10 'com.example.helper'"))
            .times(1)
            .returning(|_| Ok(cmd_output(0, "Success\n", "")));

        let inst = instance(&fake_remote, mock_adb);
        inst.keep_alive().expect("keep alive");
        inst.close().expect("close");

        assert!(inst.is_closed());
        assert!(!inst.is_keeping_alive());
        assert_eq!(inst.connection().holder_count(), 0);
        assert_eq!(fake_remote.live_transports(), 0);
        assert!(matches!(inst.keep_alive(), Err(Error::Precondition(_))));
        assert!(matches!(
            inst.register_receiver(&filter("android.intent.action.PACKAGE_ADDED")),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(inst.close(), Err(Error::Precondition(_))));
    }

    #[rstest]
    fn test_close_drops_receivers(fake_remote: FakeRemote, mut mock_adb: MockAdb) {
        mock_adb
            .expect_shell()
            .with(eq("pm uninstall --user 10 'com.example.helper'"))
            .times(1)
            .returning(|_| Ok(cmd_output(0, "Success\n", "")));

        let inst = instance(&fake_remote, mock_adb);
        let a = filter("android.intent.action.PACKAGE_ADDED");
        inst.register_receiver(&a).expect("register");
        inst.close().expect("close");
        let opened = fake_remote.opened();

        assert!(inst.registered_receivers().is_empty());
        assert!(inst.to_string().contains("receivers={}"));
        assert!(matches!(
            inst.unregister_receiver(&a),
            Err(Error::Precondition(_))
        ));
        // Nothing tried to reach the uninstalled app
        assert!(fake_remote.requests(Command::UnregisterReceiver).is_empty());
        assert_eq!(fake_remote.opened(), opened);
    }

    #[test]
    fn test_receivers_over_tcp() {
        let app = TcpHelperApp::start();
        let inst = TestAppInstance::new(
            PACKAGE,
            UserId::new_unchecked(10),
            Arc::new(MockAdb::new()),
            app.connector(),
        )
        .expect("valid instance");
        let a = filter("android.intent.action.PACKAGE_ADDED");

        inst.register_receiver(&a).expect("register");
        assert!(inst.is_keeping_alive());

        // Simulates the helper app restarting
        inst.connection().disconnect();
        let echoed = inst
            .invoke("package", "getPackageUid", &json!(["com.android.settings", 0]))
            .expect("call");
        assert_eq!(echoed, json!(["com.android.settings", 0]));

        let registered = app.requests(Command::RegisterReceiver);
        assert_eq!(registered.len(), 2);
        assert_eq!(registered[0]["receiverId"], registered[1]["receiverId"]);
        assert_eq!(
            registered[1]["filter"]["actions"][0],
            "android.intent.action.PACKAGE_ADDED"
        );

        match inst.invoke("package", "explode", &json!([])) {
            Err(Error::RemoteOperation { class, message, .. }) => {
                assert_eq!(class.as_deref(), Some("java.lang.IllegalStateException"));
                assert_eq!(message, "boom");
            }
            other => panic!("expected RemoteOperation, got {:?}", other),
        }

        inst.unregister_receiver(&a).expect("unregister");
        assert!(!inst.is_keeping_alive());
        assert!(!inst.is_connected());
        assert_eq!(app.connections(), 2);
    }
}

//! Proxies for system services, executed inside the helper app.
//!
//! A [RemoteProxy] forwards every call to the helper app over the instance's
//! [Connection], so the call runs as the helper's package in the helper's
//! user. Proxies hold no state of their own and creating one never touches
//! the device.

use std::fmt::Debug;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::Connection;
use crate::instance::UserId;
use crate::transport::Command;
use crate::Error;

/// Describes one remote subsystem, `NAME` is the service name the helper
/// app resolves it with
pub trait Subsystem {
    const NAME: &'static str;
}

macro_rules! subsystem {
    ($(#[$meta:meta])* $ty:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $ty;

        impl Subsystem for $ty {
            const NAME: &'static str = $name;
        }
    };
}

subsystem!(
    /// `android.content.pm.PackageManager`
    PackageManager,
    "package"
);
subsystem!(
    /// `android.accounts.AccountManager`
    AccountManager,
    "account"
);
subsystem!(
    /// `android.app.NotificationManager`
    NotificationManager,
    "notification"
);
subsystem!(
    /// `android.os.UserManager`
    UserManager,
    "user"
);
subsystem!(
    /// `android.app.usage.UsageStatsManager`
    UsageStatsManager,
    "usagestats"
);
subsystem!(
    /// `android.app.ActivityManager`
    ActivityManager,
    "activity"
);

#[cfg_attr(test, derive(Debug))]
#[derive(Serialize)]
struct Invocation<'a, A: ?Sized> {
    subsystem: &'a str,
    method: &'a str,
    user: i32,
    #[serde(rename = "callerPackage")]
    caller_package: &'a str,
    args: &'a A,
}

/// A remote subsystem of one helper app instance
pub struct RemoteProxy<S> {
    connection: Connection,
    user: UserId,
    package: String,
    _subsystem: PhantomData<fn() -> S>,
}

impl<S> Clone for RemoteProxy<S> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            user: self.user,
            package: self.package.clone(),
            _subsystem: PhantomData,
        }
    }
}

impl<S: Subsystem> Debug for RemoteProxy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RemoteProxy<{}>({} user {})",
            S::NAME,
            self.package,
            self.user
        )
    }
}

impl<S: Subsystem> RemoteProxy<S> {
    pub fn new(connection: Connection, user: UserId, package: &str) -> Self {
        Self {
            connection,
            user,
            package: package.into(),
            _subsystem: PhantomData,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Invoke `method` with `args` (serialized as a JSON array or object the
    /// helper app maps onto the method's parameters) and decode the result.
    pub fn invoke<A, R>(&self, method: &str, args: &A) -> crate::Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        invoke(
            &self.connection,
            self.user,
            &self.package,
            S::NAME,
            method,
            args,
        )
    }

    /// Invoke a method that returns nothing
    pub fn invoke_void<A>(&self, method: &str, args: &A) -> crate::Result<()>
    where
        A: Serialize + ?Sized,
    {
        let _: Value = self.invoke(method, args)?;
        Ok(())
    }
}

const NO_ARGS: [(); 0] = [];

/// Invoke `method` of the subsystem named `subsystem`, for callers that only
/// know the subsystem at runtime. Prefer [RemoteProxy] otherwise.
pub fn invoke<A, R>(
    connection: &Connection,
    user: UserId,
    package: &str,
    subsystem: &str,
    method: &str,
    args: &A,
) -> crate::Result<R>
where
    A: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let payload = Invocation {
        subsystem,
        method,
        user: user.as_raw(),
        caller_package: package,
        args,
    };
    let payload = serde_json::to_string(&payload).map_err(|e| Error::Generic(e.to_string()))?;
    let res = connection.call(Command::Invoke, subsystem, method, &payload)?;
    decode_result(&res)
}

fn decode_result<R: DeserializeOwned>(res: &str) -> crate::Result<R> {
    let mut value: Value = serde_json::from_str(res).map_err(|e| {
        log::error!("error decoding response {}: {:?}", res, e);
        Error::InvalidResponse
    })?;
    let result = value.get_mut("result").map(Value::take).unwrap_or(Value::Null);
    serde_json::from_value(result).map_err(|e| {
        log::error!("unexpected result type in {}: {:?}", res, e);
        Error::InvalidResponse
    })
}

impl RemoteProxy<PackageManager> {
    /// The package names visible to the helper app
    pub fn get_installed_packages(&self, flags: i64) -> crate::Result<Vec<String>> {
        self.invoke("getInstalledPackages", &[flags])
    }

    pub fn is_package_installed(&self, package: &str) -> crate::Result<bool> {
        Ok(self
            .get_installed_packages(0)?
            .iter()
            .any(|it| it == package))
    }

    pub fn get_package_uid(&self, package: &str, flags: i64) -> crate::Result<i32> {
        self.invoke("getPackageUid", &(package, flags))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: String,
}

impl RemoteProxy<AccountManager> {
    pub fn get_accounts(&self) -> crate::Result<Vec<Account>> {
        self.invoke("getAccounts", &NO_ARGS)
    }
}

impl RemoteProxy<NotificationManager> {
    pub fn are_notifications_enabled(&self) -> crate::Result<bool> {
        self.invoke("areNotificationsEnabled", &NO_ARGS)
    }

    pub fn cancel_all(&self) -> crate::Result<()> {
        self.invoke_void("cancelAll", &NO_ARGS)
    }
}

impl RemoteProxy<UserManager> {
    pub fn is_user_unlocked(&self) -> crate::Result<bool> {
        self.invoke("isUserUnlocked", &NO_ARGS)
    }
}

impl RemoteProxy<UsageStatsManager> {
    pub fn is_app_inactive(&self, package: &str) -> crate::Result<bool> {
        self.invoke("isAppInactive", &[package])
    }

    pub fn get_app_standby_bucket(&self) -> crate::Result<i32> {
        self.invoke("getAppStandbyBucket", &NO_ARGS)
    }
}

impl RemoteProxy<ActivityManager> {
    pub fn is_low_ram_device(&self) -> crate::Result<bool> {
        self.invoke("isLowRamDevice", &NO_ARGS)
    }
}

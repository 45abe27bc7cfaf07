//! Broadcast receivers registered in the helper app on behalf of a caller.

use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::connection::Connection;
use crate::transport::Command;

const SUBSYSTEM: &str = "receivers";

/// The content of a broadcast filter as sent to the helper app
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntentFilter {
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(rename = "dataSchemes")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_schemes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl IntentFilter {
    pub fn new(action: &str) -> Self {
        Self {
            actions: vec![action.into()],
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn with_data_scheme(mut self, scheme: &str) -> Self {
        self.data_schemes.push(scheme.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

static NEXT_FILTER_ID: AtomicU64 = AtomicU64::new(1);

/// A handle identifying one filter for registration purposes.
///
/// Registrations are keyed on the handle, not the filter content: clones of a
/// handle are the same registration, while two handles created from equal
/// filters are registered independently.
#[derive(Clone)]
pub struct ReceiverFilter {
    id: u64,
    filter: Arc<IntentFilter>,
}

impl ReceiverFilter {
    pub fn new(filter: IntentFilter) -> Self {
        Self {
            id: NEXT_FILTER_ID.fetch_add(1, Ordering::Relaxed),
            filter: Arc::new(filter),
        }
    }

    pub fn filter(&self) -> &IntentFilter {
        &self.filter
    }
}

impl From<IntentFilter> for ReceiverFilter {
    fn from(value: IntentFilter) -> Self {
        Self::new(value)
    }
}

impl Deref for ReceiverFilter {
    type Target = IntentFilter;

    fn deref(&self) -> &Self::Target {
        &self.filter
    }
}

impl PartialEq for ReceiverFilter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReceiverFilter {}

impl Hash for ReceiverFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl Debug for ReceiverFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}{:?}", self.id, self.filter.actions)
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub filter: ReceiverFilter,
    pub receiver_id: i64,
    pub flags: i32,
}

#[cfg_attr(test, derive(Debug))]
#[derive(Serialize)]
struct RegisterReceiver<'a> {
    #[serde(rename = "receiverId")]
    receiver_id: i64,
    filter: &'a IntentFilter,
    flags: i32,
}

#[cfg_attr(test, derive(Debug))]
#[derive(Serialize)]
struct UnregisterReceiver {
    #[serde(rename = "receiverId")]
    receiver_id: i64,
}

/// The receivers that should currently be registered in the helper app, in
/// registration order
#[derive(Default)]
pub struct ReceiverRegistry {
    entries: Vec<Registration>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, filter: &ReceiverFilter) -> bool {
        self.entries.iter().any(|it| &it.filter == filter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }

    /// Record a registration, an existing entry for the filter is kept
    pub fn insert(&mut self, registration: Registration) -> bool {
        if self.contains(&registration.filter) {
            return false;
        }
        self.entries.push(registration);
        true
    }

    pub fn remove(&mut self, filter: &ReceiverFilter) -> Option<Registration> {
        let idx = self.entries.iter().position(|it| &it.filter == filter)?;
        Some(self.entries.remove(idx))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn snapshot(&self) -> Vec<Registration> {
        self.entries.clone()
    }
}

impl Display for ReceiverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, reg) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:?}={}", reg.filter, reg.receiver_id)?;
        }
        f.write_str("}")
    }
}

/// Ask the helper app to register a receiver for `filter` under `receiver_id`
pub fn send_register(
    conn: &Connection,
    receiver_id: i64,
    filter: &IntentFilter,
    flags: i32,
) -> crate::Result<()> {
    let payload = RegisterReceiver {
        receiver_id,
        filter,
        flags,
    };
    let payload = serde_json::to_string(&payload).map_err(|e| crate::Error::Generic(e.to_string()))?;
    conn.call(Command::RegisterReceiver, SUBSYSTEM, "register", &payload)?;
    Ok(())
}

pub fn send_unregister(conn: &Connection, receiver_id: i64) -> crate::Result<()> {
    let payload = serde_json::to_string(&UnregisterReceiver { receiver_id })
        .map_err(|e| crate::Error::Generic(e.to_string()))?;
    conn.call(Command::UnregisterReceiver, SUBSYSTEM, "unregister", &payload)?;
    Ok(())
}

/// Re-register everything in `registrations` with their original ids
pub fn replay(conn: &Connection, registrations: &[Registration]) -> crate::Result<()> {
    if registrations.is_empty() {
        return Ok(());
    }
    log::debug!(
        "replaying {} receivers in {} (user {})",
        registrations.len(),
        conn.package(),
        conn.user()
    );
    for reg in registrations {
        send_register(conn, reg.receiver_id, reg.filter.filter(), reg.flags)?;
    }
    Ok(())
}

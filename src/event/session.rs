//! Per-session correlation state.
//!
//! A [`SessionContext`] lives as long as one client connection. It remembers
//! the record built at open time for each descriptor handle, so the matching
//! close or seek can be classified, and the last hierarchy-resolution
//! operation. Nothing here outlives the session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::EventRecord;

/// Description of the connected client, attached to every record as `comm`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    /// Client user name.
    pub user_name: String,
    /// Client user zone.
    pub zone: String,
    /// Client user type, e.g. `rodsadmin`.
    pub user_type: String,
    /// Proxy user name.
    pub proxy_user_name: String,
    /// Proxy user zone.
    pub proxy_zone: String,
    /// Client network address.
    pub client_address: String,
    /// Authentication scheme.
    pub auth_scheme: String,
}

impl ClientInfo {
    /// Client acting as itself.
    pub fn for_user(user_name: impl Into<String>, zone: impl Into<String>) -> Self {
        let user_name = user_name.into();
        let zone = zone.into();
        Self {
            proxy_user_name: user_name.clone(),
            proxy_zone: zone.clone(),
            user_name,
            zone,
            ..Self::default()
        }
    }

    /// The `comm` document attached to records.
    pub fn to_comm(&self) -> Value {
        json!({
            "user_name": self.user_name,
            "zone": self.zone,
            "user_type": self.user_type,
            "proxy_user_name": self.proxy_user_name,
            "proxy_zone": self.proxy_zone,
            "client_address": self.client_address,
            "auth_scheme": self.auth_scheme,
        })
    }
}

/// Correlation state for one client session.
#[derive(Debug)]
pub struct SessionContext {
    id: Uuid,
    client: ClientInfo,
    in_flight: HashMap<u32, EventRecord>,
    hierarchy_operation: Option<String>,
}

impl SessionContext {
    /// Start a session for a client.
    pub fn new(client: ClientInfo) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, user = %client.user_name, "session opened");
        Self {
            id,
            client,
            in_flight: HashMap::new(),
            hierarchy_operation: None,
        }
    }

    /// Session id used to correlate log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Connected client.
    pub fn client(&self) -> &ClientInfo {
        &self.client
    }

    /// Remember the record built when `handle` was opened.
    pub fn track(&mut self, handle: u32, record: EventRecord) {
        if self.in_flight.insert(handle, record).is_some() {
            warn!(session = %self.id, handle, "replacing record for handle already in flight");
        }
    }

    /// Record for `handle` without releasing it.
    pub fn peek(&self, handle: u32) -> Option<&EventRecord> {
        self.in_flight.get(&handle)
    }

    /// Remove and return the record for `handle`.
    pub fn release(&mut self, handle: u32) -> Option<EventRecord> {
        self.in_flight.remove(&handle)
    }

    /// Number of handles still open.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Store the operation chosen by the last hierarchy resolution.
    pub fn set_hierarchy_operation(&mut self, operation: impl Into<String>) {
        self.hierarchy_operation = Some(operation.into());
    }

    /// Operation chosen by the last hierarchy resolution, if any.
    pub fn hierarchy_operation(&self) -> Option<&str> {
        self.hierarchy_operation.as_deref()
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        if !self.in_flight.is_empty() {
            let handles: Vec<u32> = self.in_flight.keys().copied().collect();
            debug!(
                session = %self.id,
                ?handles,
                "releasing handles still in flight at session end"
            );
        }
        self.in_flight.clear();
    }
}

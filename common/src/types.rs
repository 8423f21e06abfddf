use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Boot,
    Provisioning,
    Connecting,
    Syncing,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boot => "BOOT",
            Self::Provisioning => "PROVISIONING",
            Self::Connecting => "CONNECTING",
            Self::Syncing => "SYNCING",
        }
    }
}

/// Lock state as last agreed with the remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub locked: bool,
    pub registered: bool,
    pub owner_id: Option<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            locked: true,
            registered: false,
            owner_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub current_ip: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Server answered with its `status` flag.
    Synced(bool),
    InvalidResponse,
    NotRegistered,
    ServerError(u16),
    TransientFailure,
}

impl PollOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synced(_) => "SYNCED",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::NotRegistered => "NOT_REGISTERED",
            Self::ServerError(_) => "SERVER_ERROR",
            Self::TransientFailure => "TRANSIENT_FAILURE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddDevicePayload {
    pub device_id: String,
    pub name: String,
    pub username: String,
    pub ip_address: Option<String>,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRequestPayload {
    pub device_id: String,
}

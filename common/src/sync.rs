use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    endpoints::{
        ENDPOINT_ADD_DEVICE, ENDPOINT_GET_STATUS, STATUS_CREATED, STATUS_OK,
        STATUS_UNKNOWN_DEVICE,
    },
    platform::{HttpResponse, HttpTransport},
    types::{AddDevicePayload, DeviceIdentity, PollOutcome, StatusRequestPayload},
};

/// Client for the lock management server. Every failure is folded into a
/// return value; nothing here propagates an error to the caller.
pub struct RemoteSyncClient<H> {
    http: H,
    base_url: String,
}

impl<H: HttpTransport> RemoteSyncClient<H> {
    pub fn new(http: H, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Announce this lock to the server. Only `201 Created` counts as registered.
    pub fn register(&mut self, identity: &DeviceIdentity, owner_id: &str, locked: bool) -> bool {
        let payload = AddDevicePayload {
            device_id: identity.device_id.clone(),
            name: format!("Lock: {}", identity.device_id),
            username: owner_id.to_string(),
            ip_address: identity.current_ip.map(|ip| ip.to_string()),
            locked,
        };

        match self.post(ENDPOINT_ADD_DEVICE, &payload) {
            Some(response) if response.status == STATUS_CREATED => {
                info!("registered {} for `{owner_id}`", identity.device_id);
                true
            }
            Some(response) => {
                warn!(
                    "registration rejected with HTTP {}: {}",
                    response.status,
                    String::from_utf8_lossy(&response.body)
                );
                false
            }
            None => false,
        }
    }

    pub fn poll_status(&mut self, identity: &DeviceIdentity) -> PollOutcome {
        let payload = StatusRequestPayload {
            device_id: identity.device_id.clone(),
        };

        let Some(response) = self.post(ENDPOINT_GET_STATUS, &payload) else {
            return PollOutcome::TransientFailure;
        };

        let outcome = match response.status {
            STATUS_OK => parse_status(&response.body),
            STATUS_UNKNOWN_DEVICE => PollOutcome::NotRegistered,
            code => PollOutcome::ServerError(code),
        };
        debug!("status poll -> {} (HTTP {})", outcome.as_str(), response.status);
        outcome
    }

    fn post<T: Serialize>(&mut self, endpoint: &str, payload: &T) -> Option<HttpResponse> {
        let url = format!("{}{endpoint}", self.base_url);
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                warn!("failed to encode request for {endpoint}: {err}");
                return None;
            }
        };

        match self.http.post_json(&url, &body) {
            Ok(response) => Some(response),
            Err(err) => {
                warn!("POST {url} failed: {err}");
                None
            }
        }
    }
}

fn parse_status(body: &[u8]) -> PollOutcome {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("status").and_then(serde_json::Value::as_bool))
        .map_or(PollOutcome::InvalidResponse, PollOutcome::Synced)
}

use serde::{Deserialize, Serialize};

pub const MIN_ANGLE: i32 = -60;
pub const MAX_ANGLE: i32 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServoConfig {
    pub pin: i32,
    pub min_duty: u32,
    pub max_duty: u32,
    pub frequency_hz: u32,
    pub speed: f32,
    pub open_angle: i32,
    pub closed_angle: i32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            pin: 12,
            min_duty: 23,
            max_duty: 130,
            frequency_hz: 50,
            speed: 1.0,
            open_angle: -60,
            closed_angle: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub server_url: String,
    pub poll_interval_ms: u64,
    pub unlock_period_ms: u64,
    pub reconnect_grace_ms: u64,
    pub provisioning_retry_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            poll_interval_ms: 5_000,
            unlock_period_ms: 10_000,
            reconnect_grace_ms: 60_000,
            provisioning_retry_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortalConfig {
    pub ap_ssid: String,
    pub ap_password: String,
    pub port: u16,
    /// Percent-decode every form field. When false only the password is decoded
    /// (legacy portal behaviour).
    pub decode_all_fields: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            ap_ssid: "ESP32-Setup".to_string(),
            ap_password: "12345678".to_string(),
            port: 80,
            decode_all_fields: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LockConfig {
    pub servo: ServoConfig,
    pub sync: SyncConfig,
    pub portal: PortalConfig,
}

impl LockConfig {
    pub fn sanitize(&mut self) {
        self.servo.sanitize();
        self.sync.sanitize();
        self.portal.sanitize();
    }
}

impl ServoConfig {
    pub fn sanitize(&mut self) {
        if self.max_duty < self.min_duty {
            std::mem::swap(&mut self.min_duty, &mut self.max_duty);
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            self.speed = 1.0;
        }
        self.frequency_hz = self.frequency_hz.clamp(40, 400);
        self.open_angle = self.open_angle.clamp(MIN_ANGLE, MAX_ANGLE);
        self.closed_angle = self.closed_angle.clamp(MIN_ANGLE, MAX_ANGLE);
    }
}

impl SyncConfig {
    pub fn sanitize(&mut self) {
        while self.server_url.ends_with('/') {
            self.server_url.pop();
        }
        self.poll_interval_ms = self.poll_interval_ms.max(500);
        self.provisioning_retry_ms = self.provisioning_retry_ms.max(1_000);
    }
}

impl PortalConfig {
    pub fn sanitize(&mut self) {
        if self.ap_ssid.trim().is_empty() {
            self.ap_ssid = PortalConfig::default().ap_ssid;
        }
        // WPA2 needs at least 8 characters.
        if self.ap_password.len() < 8 {
            self.ap_password = PortalConfig::default().ap_password;
        }
        if self.port == 0 {
            self.port = 80;
        }
    }
}

/// Network credentials and the owning account captured by the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub network_id: String,
    pub network_secret: String,
    pub owner_id: String,
}

impl Credentials {
    pub fn is_usable(&self) -> bool {
        !self.network_id.trim().is_empty() && !self.network_secret.is_empty()
    }
}

/// Persisted form of [`Credentials`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub username: String,
}

impl From<&Credentials> for CredentialRecord {
    fn from(credentials: &Credentials) -> Self {
        Self {
            ssid: credentials.network_id.clone(),
            password: credentials.network_secret.clone(),
            username: credentials.owner_id.clone(),
        }
    }
}

impl From<CredentialRecord> for Credentials {
    fn from(record: CredentialRecord) -> Self {
        Self {
            network_id: record.ssid,
            network_secret: record.password,
            owner_id: record.username,
        }
    }
}

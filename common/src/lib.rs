pub mod config;
pub mod controller;
pub mod credentials;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod network;
pub mod platform;
pub mod portal;
pub mod servo;
pub mod sync;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{Credentials, LockConfig, PortalConfig, ServoConfig, SyncConfig};
pub use controller::Controller;
pub use credentials::{CredentialStore, StoredCredentials};
pub use endpoints::*;
pub use error::{
    ActuatorError, ConnectError, PlatformError, PortalError, RequestError, StorageError,
    TransportError,
};
pub use network::{Connection, NetworkConnector};
pub use platform::{
    format_mac, retry_interrupted, Clock, HttpResponse, HttpTransport, KeyValueStore, Platform,
    PlatformServices, PortalListener, PortalSockets, PwmOutput, ShutdownFlag, SystemClock,
    WirelessRadio,
};
pub use portal::ProvisioningPortal;
pub use servo::ServoActuator;
pub use sync::RemoteSyncClient;
pub use types::{DeviceIdentity, Phase, PollOutcome, SyncState};

use std::{net::Ipv4Addr, time::Duration};

use log::{info, warn};

use crate::{
    credentials::{CredentialStore, StoredCredentials},
    error::ConnectError,
    platform::{Clock, KeyValueStore, WirelessRadio},
};

pub const CONNECT_ATTEMPTS: u32 = 20;
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a successful station association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub ip: Ipv4Addr,
    pub owner_id: String,
}

/// Joins the stored network in station mode with a bounded wait.
pub struct NetworkConnector<C> {
    clock: C,
}

impl<C: Clock> NetworkConnector<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    pub fn connect<R, K>(
        &self,
        radio: &mut R,
        credentials: &CredentialStore<K>,
    ) -> Result<Connection, ConnectError>
    where
        R: WirelessRadio,
        K: KeyValueStore,
    {
        let credentials = match credentials.load()? {
            StoredCredentials::Valid(credentials) => credentials,
            StoredCredentials::Missing => return Err(ConnectError::CredentialsMissing),
            StoredCredentials::Invalid => return Err(ConnectError::CredentialsInvalid),
        };

        radio
            .begin_station(&credentials.network_id, &credentials.network_secret)
            .map_err(ConnectError::Radio)?;

        for attempt in 1..=CONNECT_ATTEMPTS {
            if let Some(ip) = radio.station_ip() {
                info!(
                    "joined `{}` as {ip} (attempt {attempt}/{CONNECT_ATTEMPTS})",
                    credentials.network_id
                );
                return Ok(Connection {
                    ip,
                    owner_id: credentials.owner_id,
                });
            }
            info!("wifi connect attempt {attempt}/{CONNECT_ATTEMPTS}");
            if attempt < CONNECT_ATTEMPTS {
                self.clock.sleep(CONNECT_POLL_INTERVAL);
            }
        }

        warn!(
            "could not join `{}` after {CONNECT_ATTEMPTS} attempts",
            credentials.network_id
        );
        Err(ConnectError::Timeout {
            attempts: CONNECT_ATTEMPTS,
        })
    }
}

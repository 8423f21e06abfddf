use log::{info, warn};

use crate::{
    config::{CredentialRecord, Credentials},
    endpoints::CREDENTIALS_KEY,
    error::StorageError,
    platform::KeyValueStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredCredentials {
    /// No record has ever been written (first boot).
    Missing,
    /// A record exists but cannot be used to join a network.
    Invalid,
    Valid(Credentials),
}

/// Sole owner of the persisted credential record.
pub struct CredentialStore<S> {
    store: S,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<StoredCredentials, StorageError> {
        let Some(raw) = self.store.get(CREDENTIALS_KEY)? else {
            return Ok(StoredCredentials::Missing);
        };

        let record = match serde_json::from_str::<CredentialRecord>(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!("stored credential record is unreadable: {err}");
                return Ok(StoredCredentials::Invalid);
            }
        };

        let credentials = Credentials::from(record);
        if credentials.is_usable() {
            Ok(StoredCredentials::Valid(credentials))
        } else {
            Ok(StoredCredentials::Invalid)
        }
    }

    pub fn save(&mut self, credentials: &Credentials) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&CredentialRecord::from(credentials))?;
        self.store.set(CREDENTIALS_KEY, &payload)?;
        info!("saved credentials for network `{}`", credentials.network_id);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.store.remove(CREDENTIALS_KEY)?;
        info!("stored credentials removed");
        Ok(())
    }
}

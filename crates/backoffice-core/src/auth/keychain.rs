use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::credentials::{CredentialStore, StoredSession};

const SERVICE_NAME: &str = "backoffice";

/// Session kept in the OS keychain, one entry per account name.
pub struct KeyringCredentialStore {
    account: String,
    current: RwLock<Option<StoredSession>>,
}

impl KeyringCredentialStore {
    /// Open the keychain entry for `account`, loading a stored session if any.
    pub fn open(account: &str) -> Result<Self> {
        let entry = Self::entry(account)?;
        let current = match entry.get_password() {
            Ok(secret) => match serde_json::from_str::<StoredSession>(&secret) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable session in keychain");
                    None
                }
            },
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                return Err(e).context("Failed to retrieve session from keychain");
            }
        };
        debug!(account, found = current.is_some(), "Opened keychain session");

        Ok(Self {
            account: account.to_string(),
            current: RwLock::new(current),
        })
    }

    fn entry(account: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Option<StoredSession> {
        self.current.read().clone()
    }

    fn save(&self, session: StoredSession) -> Result<()> {
        let mut current = self.current.write();
        let secret = serde_json::to_string(&session)?;
        Self::entry(&self.account)?
            .set_password(&secret)
            .context("Failed to store session in keychain")?;
        *current = Some(session);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut current = self.current.write();
        *current = None;
        match Self::entry(&self.account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}

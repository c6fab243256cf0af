use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// Access/refresh token pair as issued by the back-office auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl UserProfile {
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// What a credential store persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub tokens: TokenPair,
    #[serde(default)]
    pub user: Option<UserProfile>,
    pub saved_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(tokens: TokenPair, user: Option<UserProfile>) -> Self {
        Self {
            tokens,
            user,
            saved_at: Utc::now(),
        }
    }
}

/// Holds the current token pair and user profile.
///
/// Reads never touch the backing medium and never fail; an empty token is
/// reported as absent.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<StoredSession>;

    fn save(&self, session: StoredSession) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn access_token(&self) -> Option<String> {
        self.load()
            .map(|s| s.tokens.access_token)
            .filter(|t| !t.is_empty())
    }

    fn refresh_token(&self) -> Option<String> {
        self.load()
            .map(|s| s.tokens.refresh_token)
            .filter(|t| !t.is_empty())
    }

    fn user(&self) -> Option<UserProfile> {
        self.load().and_then(|s| s.user)
    }

    /// Replace the token pair, keeping the stored user profile.
    fn set_tokens(&self, tokens: TokenPair) -> Result<()> {
        let user = self.user();
        self.save(StoredSession::new(tokens, user))
    }
}

/// Process-local store, nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    current: RwLock<Option<StoredSession>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: StoredSession) -> Self {
        Self {
            current: RwLock::new(Some(session)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<StoredSession> {
        self.current.read().clone()
    }

    fn save(&self, session: StoredSession) -> Result<()> {
        *self.current.write() = Some(session);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.current.write() = None;
        Ok(())
    }
}

/// Session persisted as JSON in the data directory, cached in memory.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    current: RwLock<Option<StoredSession>>,
}

impl FileCredentialStore {
    /// Open the store in `dir`, loading an existing session file if present.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(SESSION_FILE);
        let current = if path.exists() {
            let contents =
                std::fs::read_to_string(&path).context("Failed to read session file")?;
            match serde_json::from_str::<StoredSession>(&contents) {
                Ok(session) => {
                    debug!(path = %path.display(), "Loaded stored session");
                    Some(session)
                }
                Err(e) => {
                    // Treated as signed out; the next save replaces the file
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable session file");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write via a temp file and rename so a crash never leaves a torn file.
    fn write_file(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(session)?;
        let tmp_path = self.path.with_extension(format!("{}.tmp", std::process::id()));
        std::fs::write(&tmp_path, contents).context("Failed to write session file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp_path, &self.path).context("Failed to replace session file")?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Option<StoredSession> {
        self.current.read().clone()
    }

    /// The in-memory copy is updated even when the write fails, so the
    /// running process keeps using the newest tokens.
    fn save(&self, session: StoredSession) -> Result<()> {
        let mut current = self.current.write();
        let result = self.write_file(&session);
        *current = Some(session);
        result
    }

    fn clear(&self) -> Result<()> {
        let mut current = self.current.write();
        *current = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

//! Wiring of the core services and the command implementations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use backoffice_core::api::{ApiClient, HttpTransport, Transport};
use backoffice_core::auth::{
    CredentialStore, FileCredentialStore, HttpSessionService, KeyringCredentialStore,
    MemoryCredentialStore, SessionService, SessionState,
};
use backoffice_core::config::{Config, CredentialBackend};
use backoffice_core::gateway::{AuthGateway, Authenticated, Navigator};

/// Keychain account the session is stored under
const KEYRING_ACCOUNT: &str = "session";

/// There is no screen to switch to, so a redirect to the login route
/// becomes a hint on stderr.
struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn redirect(&self, path: &str) {
        debug!(route = path, "Redirect to sign-in");
        eprintln!("Your session has expired. Run `backoffice login` to sign in again.");
    }
}

pub struct App {
    config: Config,
    /// `None` means the default location
    config_path: Option<PathBuf>,
    store: Arc<dyn CredentialStore>,
    session: Arc<HttpSessionService>,
    api: ApiClient,
}

impl App {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = match Config::load(config_path.as_deref()) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                let mut config = Config::default();
                config.apply_env();
                config
            }
        };
        debug!(
            api = %config.api_base_url,
            backend = ?config.credential_backend,
            "Config loaded"
        );

        let store = open_store(&config)?;
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(config.request_timeout())?);

        // The session service talks to the auth endpoints directly; only API
        // calls go through the gateway.
        let session = Arc::new(HttpSessionService::new(
            transport.clone(),
            store.clone(),
            config.session_endpoints()?,
        ));
        let gateway = Arc::new(AuthGateway::new(
            store.clone(),
            session.clone(),
            Arc::new(ConsoleNavigator),
            config.gateway_config(),
        ));
        let api = ApiClient::new(
            Arc::new(Authenticated::new(gateway, transport)),
            config.base_url()?,
        )
        .with_retry_policy(config.retry_policy());

        Ok(Self {
            config,
            config_path,
            store,
            session,
            api,
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub async fn login(&mut self, username: Option<String>) -> Result<()> {
        let username = match username {
            Some(username) => username,
            None => prompt_username(self.config.last_username.as_deref())?,
        };
        if username.is_empty() {
            anyhow::bail!("Username required");
        }
        let password = rpassword::prompt_password("Password: ")?;

        println!("Authenticating...");
        let user = self.session.login(&username, &password).await?;

        if let Err(e) = self.remember_username(&username) {
            warn!(error = %e, "Failed to save config");
        }
        self.config.last_username = Some(username);

        println!("Signed in as {}", user.display());
        if self.config.credential_backend == CredentialBackend::Memory {
            println!("Note: the memory credential backend keeps the session for this run only.");
        }
        Ok(())
    }

    /// Update only `last_username` on disk so environment overrides are
    /// never persisted.
    fn remember_username(&self, username: &str) -> Result<()> {
        let mut stored = Config::load_from(&self.config_file()?)?;
        stored.last_username = Some(username.to_string());
        stored.save(self.config_path.as_deref())
    }

    fn config_file(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Config::config_path(),
        }
    }

    pub async fn logout(&self) -> Result<()> {
        if !self.session.is_signed_in() {
            println!("Not signed in");
            return Ok(());
        }
        self.session.logout().await;
        println!("Signed out");
        Ok(())
    }

    pub fn whoami(&self) -> Result<()> {
        match self.session.state() {
            SessionState::SignedOut => println!("Not signed in"),
            SessionState::SignedIn(None) => println!("Signed in (no profile stored)"),
            SessionState::SignedIn(Some(user)) => {
                println!("{} ({})", user.display(), user.username);
                if let Some(ref email) = user.email {
                    println!("Email:       {}", email);
                }
                if !user.permissions.is_empty() {
                    println!("Permissions: {}", user.permissions.join(", "));
                }
            }
        }
        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        println!("Config:      {}", self.config_file()?.display());
        println!("API:         {}", self.api.base_url());
        println!("Credentials: {:?}", self.config.credential_backend);
        if self.config.credential_backend == CredentialBackend::File {
            println!("Session:     {}", self.config.data_dir()?.join("session.json").display());
        }
        let state = if self.store.access_token().is_some() {
            "signed in"
        } else {
            "signed out"
        };
        println!("State:       {}", state);
        Ok(())
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match config.credential_backend {
        CredentialBackend::File => {
            let dir = config.data_dir()?;
            Arc::new(FileCredentialStore::open(&dir).context("Failed to open session file")?)
        }
        CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::open(KEYRING_ACCOUNT)?),
        CredentialBackend::Memory => Arc::new(MemoryCredentialStore::new()),
    };
    Ok(store)
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

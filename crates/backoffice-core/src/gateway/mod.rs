//! Authenticating request gateway.
//!
//! Every request passes through [`AuthGateway::intercept`]:
//!
//! 1. the stored access token is attached as a bearer header,
//! 2. the request is dispatched through the next transport,
//! 3. a 401 triggers a single-flight token refresh shared by every request
//!    that fails while it is in flight,
//! 4. failed requests are replayed once with the new token.
//!
//! When no refresh is possible the session is logged out and the user is
//! sent to the login route.

pub mod attach;
pub mod classify;
pub mod refresh;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::api::{ApiRequest, ApiResponse, HttpError, Transport};
use crate::auth::{CredentialStore, SessionService};

pub use attach::attach_bearer;
pub use classify::{classify, Disposition};
pub use refresh::{RefreshCoordinator, RefreshLease, RefreshOutcome, RefreshWaiter, Ticket};

/// Client-side navigation, used to send the user to the login screen.
pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Path of the token refresh endpoint; a 401 from it is never retried.
    pub refresh_path: String,
    /// Where to send the user after a forced logout.
    pub login_route: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            refresh_path: "/auth/refresh".to_string(),
            login_route: "/auth/login".to_string(),
        }
    }
}

pub struct AuthGateway {
    store: Arc<dyn CredentialStore>,
    session: Arc<dyn SessionService>,
    navigator: Arc<dyn Navigator>,
    config: GatewayConfig,
    refresh: RefreshCoordinator,
}

impl AuthGateway {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        session: Arc<dyn SessionService>,
        navigator: Arc<dyn Navigator>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            session,
            navigator,
            config,
            refresh: RefreshCoordinator::new(),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    /// Requests currently queued behind an in-flight refresh.
    pub fn waiting(&self) -> usize {
        self.refresh.waiting()
    }

    /// Send `request` through `next` with credentials attached, recovering
    /// from an expired access token where possible.
    pub async fn intercept(
        &self,
        request: ApiRequest,
        next: &dyn Transport,
    ) -> Result<ApiResponse, HttpError> {
        let token = self.store.access_token();
        let outgoing = attach_bearer(&request, token.as_deref());
        let result = next.send(outgoing).await;

        match classify(&request, result, &self.config.refresh_path) {
            Disposition::Done(result) => result,
            Disposition::Unreachable(err) => {
                warn!(url = %request.url, error = %err, "Backend unreachable");
                Err(err)
            }
            Disposition::RefreshRejected(err) => {
                warn!(url = %request.url, "Refresh endpoint rejected the session");
                self.force_logout().await;
                Err(err)
            }
            Disposition::Expired(err) => self.recover(request, err, next).await,
        }
    }

    async fn recover(
        &self,
        request: ApiRequest,
        err: HttpError,
        next: &dyn Transport,
    ) -> Result<ApiResponse, HttpError> {
        let lease = match self.refresh.begin() {
            Ticket::Leader(lease) => lease,
            Ticket::Waiter(waiter) => {
                debug!(url = %request.url, "Queued behind token refresh in flight");
                let token = waiter.outcome().await?;
                return self.replay(&request, &token, next).await;
            }
        };

        if self.store.refresh_token().is_none() {
            warn!(url = %request.url, "Access token expired and no refresh token is stored");
            lease.complete(Err(err.clone()));
            self.force_logout().await;
            return Err(err);
        }

        info!(url = %request.url, "Access token expired, refreshing");
        match self.session.refresh_access_token().await {
            Ok(tokens) => {
                lease.complete(Ok(tokens.access_token.clone()));
                self.replay(&request, &tokens.access_token, next).await
            }
            Err(refresh_err) => {
                warn!(error = %refresh_err, "Token refresh failed");
                self.force_logout().await;
                lease.complete(Err(refresh_err.clone()));
                Err(refresh_err)
            }
        }
    }

    /// Re-send once with `token`. The outcome is returned as-is.
    async fn replay(
        &self,
        request: &ApiRequest,
        token: &str,
        next: &dyn Transport,
    ) -> Result<ApiResponse, HttpError> {
        debug!(url = %request.url, "Replaying request with refreshed token");
        next.send(attach_bearer(request, Some(token))).await
    }

    async fn force_logout(&self) {
        warn!(route = %self.config.login_route, "Session ended, sign-in required");
        self.session.logout().await;
        self.navigator.redirect(&self.config.login_route);
    }
}

/// A transport that authenticates through `gateway` before handing off to
/// `inner`.
pub struct Authenticated<T> {
    gateway: Arc<AuthGateway>,
    inner: T,
}

impl<T: Transport> Authenticated<T> {
    pub fn new(gateway: Arc<AuthGateway>, inner: T) -> Self {
        Self { gateway, inner }
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }
}

#[async_trait]
impl<T: Transport> Transport for Authenticated<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        self.gateway.intercept(request, &self.inner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;
    use parking_lot::Mutex;
    use reqwest::{StatusCode, Url};
    use tokio::sync::Notify;

    use crate::auth::{
        HttpSessionService, MemoryCredentialStore, SessionEndpoints, SessionState, StoredSession,
        TokenPair,
    };

    /// Accepts exactly one bearer token; everything else gets a 401.
    struct Backend {
        valid: Mutex<String>,
        sent: Mutex<Vec<ApiRequest>>,
    }

    impl Backend {
        fn new(valid: &str) -> Self {
            Self {
                valid: Mutex::new(valid.to_string()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn tokens_seen(&self) -> Vec<Option<String>> {
            self.sent
                .lock()
                .iter()
                .map(|r| r.bearer_token().map(str::to_string))
                .collect()
        }

        fn dispatches_with(&self, token: &str) -> usize {
            self.tokens_seen()
                .iter()
                .filter(|t| t.as_deref() == Some(token))
                .count()
        }
    }

    #[async_trait]
    impl Transport for Backend {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
            self.sent.lock().push(request.clone());
            let path = request.url.path().to_string();

            if path.starts_with("/api/public") {
                return Ok(ApiResponse::new(StatusCode::OK, "{}"));
            }
            if path == "/api/down" {
                return Err(HttpError::Unreachable("connection refused".to_string()));
            }
            if path == "/api/missing" {
                return Err(HttpError::NotFound(String::new()));
            }
            if request.bearer_token() == Some(self.valid.lock().as_str()) {
                Ok(ApiResponse::new(StatusCode::OK, path))
            } else {
                Err(HttpError::Unauthorized {
                    url: request.url.to_string(),
                })
            }
        }
    }

    struct StubSession {
        store: Arc<MemoryCredentialStore>,
        outcome: Result<TokenPair, HttpError>,
        gate: Option<Arc<Notify>>,
        refreshes: AtomicUsize,
        logouts: AtomicUsize,
    }

    #[async_trait]
    impl SessionService for StubSession {
        async fn logout(&self) {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            let _ = self.store.clear();
        }

        async fn refresh_access_token(&self) -> Result<TokenPair, HttpError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Ok(tokens) = &self.outcome {
                let _ = self.store.set_tokens(tokens.clone());
            }
            self.outcome.clone()
        }
    }

    #[derive(Default)]
    struct StubNavigator {
        redirects: Mutex<Vec<String>>,
    }

    impl Navigator for StubNavigator {
        fn redirect(&self, path: &str) {
            self.redirects.lock().push(path.to_string());
        }
    }

    struct Harness {
        store: Arc<MemoryCredentialStore>,
        session: Arc<StubSession>,
        navigator: Arc<StubNavigator>,
        backend: Backend,
        gateway: AuthGateway,
    }

    impl Harness {
        fn new(
            access: &str,
            refresh: &str,
            valid: &str,
            outcome: Result<TokenPair, HttpError>,
            gate: Option<Arc<Notify>>,
        ) -> Self {
            let store = Arc::new(MemoryCredentialStore::with_session(StoredSession::new(
                pair(access, refresh),
                None,
            )));
            let session = Arc::new(StubSession {
                store: store.clone(),
                outcome,
                gate,
                refreshes: AtomicUsize::new(0),
                logouts: AtomicUsize::new(0),
            });
            let navigator = Arc::new(StubNavigator::default());
            let gateway = AuthGateway::new(
                store.clone(),
                session.clone(),
                navigator.clone(),
                GatewayConfig::default(),
            );

            Self {
                store,
                session,
                navigator,
                backend: Backend::new(valid),
                gateway,
            }
        }

        async fn call(&self, path: &str) -> Result<ApiResponse, HttpError> {
            self.gateway.intercept(get(path), &self.backend).await
        }

        fn refreshes(&self) -> usize {
            self.session.refreshes.load(Ordering::SeqCst)
        }

        fn logouts(&self) -> usize {
            self.session.logouts.load(Ordering::SeqCst)
        }

        fn redirects(&self) -> Vec<String> {
            self.navigator.redirects.lock().clone()
        }

        /// Drive `paths` concurrently, releasing the gated refresh once all
        /// but the leader are queued.
        async fn call_concurrently(
            &self,
            paths: &[&str],
            gate: &Notify,
        ) -> Vec<Result<ApiResponse, HttpError>> {
            let calls = join_all(paths.iter().map(|p| self.call(p)));
            let release = async {
                while self.gateway.waiting() < paths.len() - 1 {
                    tokio::task::yield_now().await;
                }
                gate.notify_one();
            };
            let (results, ()) = tokio::join!(calls, release);
            results
        }
    }

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    fn get(path: &str) -> ApiRequest {
        ApiRequest::get(Url::parse(&format!("http://localhost{}", path)).expect("valid url"))
    }

    fn refresh_rejected() -> HttpError {
        HttpError::Unauthorized {
            url: "http://localhost/api/auth/refresh".to_string(),
        }
    }

    #[tokio::test]
    async fn test_valid_token_is_attached() {
        let h = Harness::new("abc123", "r1", "abc123", Ok(pair("unused", "r")), None);

        let response = h.call("/api/invoices").await.expect("authorized");

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(h.backend.tokens_seen(), vec![Some("abc123".to_string())]);
        assert_eq!(h.refreshes(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_sends_request_unchanged() {
        let h = Harness::new("", "", "abc123", Ok(pair("unused", "r")), None);

        h.call("/api/public/menu").await.expect("public endpoint");

        let sent = h.backend.sent.lock();
        assert_eq!(sent[0], get("/api/public/menu"));
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_replayed() {
        let h = Harness::new("expired", "r1", "new456", Ok(pair("new456", "r2")), None);

        let response = h.call("/api/invoices").await.expect("replayed");

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(h.refreshes(), 1);
        assert_eq!(
            h.backend.tokens_seen(),
            vec![Some("expired".to_string()), Some("new456".to_string())]
        );
        assert_eq!(h.store.access_token().as_deref(), Some("new456"));
        assert_eq!(h.logouts(), 0);
        assert!(!h.gateway.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_expiry_refreshes_once() {
        let gate = Arc::new(Notify::new());
        let h = Harness::new(
            "expired",
            "r1",
            "new789",
            Ok(pair("new789", "r2")),
            Some(gate.clone()),
        );

        let results = h
            .call_concurrently(&["/api/invoices", "/api/suppliers", "/api/products"], &gate)
            .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(h.refreshes(), 1);
        assert_eq!(h.backend.dispatches_with("new789"), 3);
        assert_eq!(h.backend.dispatches_with("expired"), 3);
        assert_eq!(h.logouts(), 0);
        assert!(!h.gateway.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_expiry_with_failed_refresh_logs_out_once() {
        let gate = Arc::new(Notify::new());
        let h = Harness::new(
            "expired",
            "r1",
            "never",
            Err(refresh_rejected()),
            Some(gate.clone()),
        );

        let results = h
            .call_concurrently(&["/api/invoices", "/api/suppliers", "/api/products"], &gate)
            .await;

        for result in &results {
            assert_eq!(result.as_ref().err(), Some(&refresh_rejected()));
        }
        assert_eq!(h.refreshes(), 1);
        assert_eq!(h.logouts(), 1);
        assert_eq!(h.redirects(), vec!["/auth/login".to_string()]);
        assert!(!h.gateway.is_refreshing());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_forces_logout() {
        let h = Harness::new("expired", "", "new456", Ok(pair("new456", "r2")), None);

        let err = h.call("/api/invoices").await.expect_err("cannot refresh");

        assert_eq!(
            err,
            HttpError::Unauthorized {
                url: "http://localhost/api/invoices".to_string()
            }
        );
        assert_eq!(h.refreshes(), 0);
        assert_eq!(h.logouts(), 1);
        assert_eq!(h.redirects(), vec!["/auth/login".to_string()]);
        assert!(!h.gateway.is_refreshing());
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_refresh_error() {
        let h = Harness::new("expired", "r1", "new456", Err(refresh_rejected()), None);

        let err = h.call("/api/invoices").await.expect_err("refresh failed");

        assert_eq!(err, refresh_rejected());
        assert_eq!(h.refreshes(), 1);
        assert_eq!(h.logouts(), 1);
        assert_eq!(h.redirects(), vec!["/auth/login".to_string()]);
        // Only the original attempt went out, nothing was replayed
        assert_eq!(h.backend.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_refresh_endpoint_never_refreshes() {
        let h = Harness::new("expired", "r1", "new456", Ok(pair("new456", "r2")), None);

        let err = h.call("/api/auth/refresh").await.expect_err("rejected");

        assert!(err.is_unauthorized());
        assert_eq!(h.refreshes(), 0);
        assert_eq!(h.logouts(), 1);
        assert_eq!(h.redirects(), vec!["/auth/login".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_and_other_errors_pass_through() {
        let h = Harness::new("abc123", "r1", "abc123", Ok(pair("unused", "r")), None);

        let err = h.call("/api/down").await.expect_err("unreachable");
        assert!(matches!(err, HttpError::Unreachable(_)));

        let err = h.call("/api/missing").await.expect_err("not found");
        assert!(matches!(err, HttpError::NotFound(_)));

        assert_eq!(h.refreshes(), 0);
        assert_eq!(h.logouts(), 0);
        assert_eq!(h.backend.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_each_expiry_event_gets_its_own_refresh() {
        let h = Harness::new("expired", "r1", "new456", Ok(pair("new456", "r2")), None);
        h.call("/api/invoices").await.expect("first cycle");
        assert!(!h.gateway.is_refreshing());

        // The server rotates keys; the refreshed token is rejected too
        *h.backend.valid.lock() = "rotated".to_string();
        let err = h.call("/api/invoices").await.expect_err("replay rejected");

        assert!(err.is_unauthorized());
        assert_eq!(h.refreshes(), 2);
        // The rejected replay is returned, not refreshed again
        assert_eq!(h.backend.dispatches_with("new456"), 3);
        assert_eq!(h.logouts(), 0);
        assert!(!h.gateway.is_refreshing());
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_waiters() {
        let gate = Arc::new(Notify::new());
        let h = Harness::new(
            "expired",
            "r1",
            "new789",
            Ok(pair("new789", "r2")),
            Some(gate),
        );

        let mut waiter = pin!(h.call("/api/suppliers"));
        {
            let mut leader = pin!(h.call("/api/invoices"));
            assert!(futures::poll!(&mut leader).is_pending());
            assert!(h.gateway.is_refreshing());
            assert!(futures::poll!(&mut waiter).is_pending());
            assert_eq!(h.gateway.waiting(), 1);
        }

        assert_eq!(waiter.await.err(), Some(HttpError::RefreshAborted));
        assert!(!h.gateway.is_refreshing());
        assert_eq!(h.logouts(), 0);
    }

    #[tokio::test]
    async fn test_authenticated_transport_composes() {
        let h = Harness::new("abc123", "r1", "abc123", Ok(pair("unused", "r")), None);
        let gateway = Arc::new(AuthGateway::new(
            h.store.clone(),
            h.session.clone(),
            h.navigator.clone(),
            GatewayConfig::default(),
        ));
        let transport = Authenticated::new(gateway, Backend::new("abc123"));

        let response = transport.send(get("/api/products")).await.expect("ok");

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            transport.inner.tokens_seen(),
            vec![Some("abc123".to_string())]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_expiry_refreshes_once_across_threads() {
        let gate = Arc::new(Notify::new());
        let h = Arc::new(Harness::new(
            "expired",
            "r1",
            "new789",
            Ok(pair("new789", "r2")),
            Some(gate.clone()),
        ));
        let paths = ["/api/invoices", "/api/suppliers", "/api/products", "/api/orders"];

        let handles: Vec<_> = paths
            .iter()
            .map(|path| {
                let h = h.clone();
                let path = path.to_string();
                tokio::spawn(async move { h.call(&path).await })
            })
            .collect();

        while h.gateway.waiting() < paths.len() - 1 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            let response = handle.await.expect("request task").expect("replayed");
            assert_eq!(response.status, StatusCode::OK);
        }
        assert_eq!(h.refreshes(), 1);
        assert_eq!(h.backend.dispatches_with("expired"), paths.len());
        assert_eq!(h.backend.dispatches_with("new789"), paths.len());
        assert_eq!(h.logouts(), 0);
        assert!(!h.gateway.is_refreshing());
    }

    #[tokio::test]
    async fn test_rejected_refresh_through_session_service() {
        let backend = Arc::new(Backend::new("never"));
        let store = Arc::new(MemoryCredentialStore::with_session(StoredSession::new(
            pair("expired", "r1"),
            None,
        )));
        let base = Url::parse("http://localhost/api/").expect("valid base");
        let endpoints = SessionEndpoints {
            login: base.join("auth/login").expect("login url"),
            refresh: base.join("auth/refresh").expect("refresh url"),
            logout: base.join("auth/logout").expect("logout url"),
        };
        let session = Arc::new(HttpSessionService::new(
            backend.clone(),
            store.clone(),
            endpoints,
        ));
        let navigator = Arc::new(StubNavigator::default());
        let gateway = AuthGateway::new(
            store.clone(),
            session.clone(),
            navigator.clone(),
            GatewayConfig::default(),
        );

        let err = gateway
            .intercept(get("/api/invoices"), &*backend)
            .await
            .expect_err("refresh rejected");

        assert_eq!(err, refresh_rejected());
        let sent = backend.sent.lock().clone();
        let paths: Vec<&str> = sent.iter().map(|r| r.url.path()).collect();
        assert_eq!(paths, vec!["/api/invoices", "/api/auth/refresh", "/api/auth/logout"]);
        // The revoke carries the refresh token that was just rejected
        assert_eq!(
            sent[2].body.as_deref(),
            Some(&br#"{"refreshToken":"r1"}"#[..])
        );
        assert!(store.load().is_none());
        assert_eq!(session.state(), SessionState::SignedOut);
        assert_eq!(*navigator.redirects.lock(), vec!["/auth/login".to_string()]);
    }
}

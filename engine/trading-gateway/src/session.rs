//! Server-held trading sessions
//!
//! A browser only ever holds a signed, opaque cookie naming its session. The
//! record behind it carries the linked wallet, the venue-issued L2 snapshot
//! and an expiry. Expiry is detected lazily on read: nothing sweeps sessions
//! in the background, so every credential-bearing path goes through
//! [`SessionManager::require_linked`].

use crate::error::{GatewayError, GatewayResult};
use crate::l2::L2Credentials;
use crate::redact::redact;
use crate::signing::{sign_token, verify_token};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Minimum accepted length of the cookie signing secret
pub const MIN_COOKIE_SECRET_LEN: usize = 32;

/// Opaque session identifier carried inside the cookie
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", redact(&self.0))
    }
}

/// One browser's trading capability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Lower-case hex account, set once a wallet is linked
    pub wallet_address: Option<String>,
    /// Venue credential snapshot, never sent to the browser
    pub l2: Option<L2Credentials>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Where a session sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Linked,
    Expired,
    Destroyed,
}

/// Whether `session` is past its expiry at `now`
pub fn is_session_expired(session: &Session, now: DateTime<Utc>) -> bool {
    session.expires_at.map(|at| at <= now).unwrap_or(false)
}

impl Session {
    pub fn linked(wallet_address: &str, l2: L2Credentials, expires_at: DateTime<Utc>) -> Self {
        Self {
            wallet_address: Some(wallet_address.to_ascii_lowercase()),
            l2: Some(l2),
            expires_at: Some(expires_at),
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if is_session_expired(self, now) {
            SessionState::Expired
        } else if self.l2.is_some() {
            SessionState::Linked
        } else {
            SessionState::Unauthenticated
        }
    }
}

/// Backing storage for session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> GatewayResult<Option<Session>>;

    async fn save(&self, id: &SessionId, session: &Session) -> GatewayResult<()>;

    /// Remove a record. Removing a missing record succeeds.
    async fn destroy(&self, id: &SessionId) -> GatewayResult<()>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &SessionId) -> GatewayResult<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn save(&self, id: &SessionId, session: &Session) -> GatewayResult<()> {
        self.sessions.write().await.insert(id.clone(), session.clone());
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> GatewayResult<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}

/// Redis-backed store; records are kept a grace period past session expiry
pub struct RedisSessionStore {
    connection_manager: ConnectionManager,
    default_ttl: Duration,
}

impl RedisSessionStore {
    pub async fn new(redis_url: &str, default_ttl: Duration) -> Result<Self, redis::RedisError> {
        let client = Client::open(redis_url)?;
        let connection_manager = ConnectionManager::new(client).await?;

        Ok(Self { connection_manager, default_ttl })
    }

    fn key(id: &SessionId) -> String {
        format!("gateway:session:{}", id.as_str())
    }

    fn ttl_for(&self, session: &Session) -> u64 {
        record_ttl(session, Utc::now(), self.default_ttl)
    }
}

/// Seconds a record stays in Redis. Linked records outlive `expires_at` by
/// `grace` so a read still finds them `Expired` and destroys them itself.
pub fn record_ttl(session: &Session, now: DateTime<Utc>, grace: Duration) -> u64 {
    let grace = grace.as_secs().max(1);
    match session.expires_at {
        Some(at) => (at - now).num_seconds().max(0) as u64 + grace,
        None => grace,
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &SessionId) -> GatewayResult<Option<Session>> {
        let mut conn = self.connection_manager.clone();
        let raw: Option<String> = conn.get(Self::key(id)).await?;

        match raw {
            Some(data) => {
                let session = serde_json::from_str(&data)
                    .map_err(|e| GatewayError::Session(format!("corrupt session record: {}", e)))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, id: &SessionId, session: &Session) -> GatewayResult<()> {
        let mut conn = self.connection_manager.clone();
        let serialized =
            serde_json::to_string(session).map_err(|e| GatewayError::Session(e.to_string()))?;
        let ttl = self.ttl_for(session);

        let _: () = conn.set_ex(Self::key(id), serialized, ttl).await?;
        debug!("Stored session {:?} with TTL {}s", id, ttl);
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> GatewayResult<()> {
        let mut conn = self.connection_manager.clone();
        let _: () = conn.del(Self::key(id)).await?;
        Ok(())
    }
}

/// Signs and verifies `<id>.<tag>` cookie values
#[derive(Clone)]
pub struct CookieCodec {
    key: Vec<u8>,
}

impl CookieCodec {
    pub fn new(secret: &[u8]) -> GatewayResult<Self> {
        if secret.len() < MIN_COOKIE_SECRET_LEN {
            return Err(GatewayError::Config(format!(
                "session secret must be at least {} bytes",
                MIN_COOKIE_SECRET_LEN
            )));
        }
        Ok(Self { key: secret.to_vec() })
    }

    pub fn encode(&self, id: &SessionId) -> String {
        format!("{}.{}", id.as_str(), sign_token(&self.key, id.as_str()))
    }

    /// The session id in a cookie value, if the value is well formed and ours
    pub fn decode(&self, value: &str) -> Option<SessionId> {
        let (id, tag) = value.rsplit_once('.')?;
        Uuid::parse_str(id).ok()?;
        if verify_token(&self.key, id, tag) {
            Some(SessionId(id.to_string()))
        } else {
            None
        }
    }
}

/// Session cookie and lifetime settings
#[derive(Clone)]
pub struct SessionSettings {
    pub cookie_name: String,
    pub ttl: Duration,
    pub secure_cookie: bool,
}

/// A cookie resolved to a record
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub id: SessionId,
    pub session: Session,
    /// No stored record backed the cookie; nothing has been persisted yet
    pub fresh: bool,
}

/// Credentials of a session that passed the linked/not-expired gate
#[derive(Debug, Clone)]
pub struct LinkedSession {
    pub id: SessionId,
    pub wallet_address: String,
    pub l2: L2Credentials,
}

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub ok: bool,
    pub expired: bool,
    pub address_matches: bool,
    pub wallet_address: Option<String>,
}

/// Resolves cookies to sessions and drives the session state machine
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    codec: CookieCodec,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, codec: CookieCodec, settings: SessionSettings) -> Self {
        Self { store, codec, settings }
    }

    pub fn cookie_name(&self) -> &str {
        &self.settings.cookie_name
    }

    /// Resolve a cookie value, synthesizing an empty session when there is no
    /// valid cookie or no record behind it
    pub async fn resolve(&self, cookie: Option<&str>) -> GatewayResult<ResolvedSession> {
        if let Some(id) = cookie.and_then(|value| self.codec.decode(value)) {
            if let Some(session) = self.store.load(&id).await? {
                return Ok(ResolvedSession { id, session, fresh: false });
            }
            return Ok(ResolvedSession { id, session: Session::default(), fresh: true });
        }

        Ok(ResolvedSession { id: SessionId::generate(), session: Session::default(), fresh: true })
    }

    /// Lifecycle state of whatever the cookie names.
    ///
    /// Cookies are only issued for stored sessions, so a correctly signed
    /// cookie with no record behind it belongs to a destroyed session.
    pub async fn state(&self, cookie: Option<&str>) -> GatewayResult<SessionState> {
        let Some(id) = cookie.and_then(|value| self.codec.decode(value)) else {
            return Ok(SessionState::Unauthenticated);
        };
        match self.store.load(&id).await? {
            Some(session) => Ok(session.state(Utc::now())),
            None => Ok(SessionState::Destroyed),
        }
    }

    /// Gate for every credential-bearing request.
    ///
    /// Sessions without L2 credentials or a wallet are `Unauthorized`. Expired
    /// sessions are destroyed before failing so the next request starts clean.
    pub async fn require_linked(&self, cookie: Option<&str>) -> GatewayResult<LinkedSession> {
        let resolved = self.resolve(cookie).await?;

        match resolved.session.state(Utc::now()) {
            SessionState::Expired => {
                info!("Session {:?} expired, destroying", resolved.id);
                self.store.destroy(&resolved.id).await?;
                Err(GatewayError::unauthorized("session expired"))
            }
            SessionState::Linked => {
                let Session { wallet_address, l2, .. } = resolved.session;
                match (wallet_address, l2) {
                    (Some(wallet_address), Some(l2)) => {
                        Ok(LinkedSession { id: resolved.id, wallet_address, l2 })
                    }
                    _ => Err(GatewayError::unauthorized("no trading session")),
                }
            }
            SessionState::Unauthenticated | SessionState::Destroyed => {
                Err(GatewayError::unauthorized("no trading session"))
            }
        }
    }

    /// Store freshly issued credentials under a new session id.
    ///
    /// The previous id, if any, is destroyed so a cookie issued before linking
    /// can never reach the linked record.
    pub async fn link(
        &self,
        previous: Option<&SessionId>,
        wallet_address: &str,
        l2: L2Credentials,
    ) -> GatewayResult<(SessionId, Session)> {
        if let Some(previous) = previous {
            self.store.destroy(previous).await?;
        }

        let ttl = chrono::Duration::from_std(self.settings.ttl)
            .map_err(|e| GatewayError::Config(format!("session ttl out of range: {}", e)))?;
        let id = SessionId::generate();
        let session = Session::linked(wallet_address, l2, Utc::now() + ttl);
        self.store.save(&id, &session).await?;

        info!("Linked session {:?} to wallet {}", id, session.wallet_address.as_deref().unwrap_or(""));
        Ok((id, session))
    }

    /// Destroy whatever the cookie points at. Always succeeds for unknown or
    /// already-destroyed sessions.
    pub async fn destroy(&self, cookie: Option<&str>) -> GatewayResult<()> {
        if let Some(id) = cookie.and_then(|value| self.codec.decode(value)) {
            self.store.destroy(&id).await?;
            debug!("Destroyed session {:?}", id);
        }
        Ok(())
    }

    /// Status query; an expired session is destroyed during the read
    pub async fn status(
        &self,
        cookie: Option<&str>,
        address: Option<&str>,
    ) -> GatewayResult<SessionStatus> {
        let resolved = self.resolve(cookie).await?;
        let expired = resolved.session.state(Utc::now()) == SessionState::Expired;

        let wallet_address = if expired {
            self.store.destroy(&resolved.id).await?;
            None
        } else {
            resolved.session.wallet_address
        };

        let address_matches = match address.map(str::trim).filter(|a| !a.is_empty()) {
            None => true,
            Some(requested) => wallet_address
                .as_deref()
                .map(|stored| stored.eq_ignore_ascii_case(requested))
                .unwrap_or(false),
        };

        Ok(SessionStatus { ok: true, expired, address_matches, wallet_address })
    }

    /// `Set-Cookie` value for a session
    pub fn session_cookie(&self, id: &SessionId) -> String {
        self.cookie_with(&self.codec.encode(id), self.settings.ttl.as_secs())
    }

    /// `Set-Cookie` value that removes the cookie
    pub fn clear_cookie(&self) -> String {
        self.cookie_with("", 0)
    }

    fn cookie_with(&self, value: &str, max_age: u64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.settings.cookie_name, value, max_age
        );
        if self.settings.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Cookie value a browser would send for `id` (used by tests and tooling)
    pub fn cookie_value(&self, id: &SessionId) -> String {
        self.codec.encode(id)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::l2::testing::test_l2;
    use tokio_test::{assert_err, assert_ok};

    const WALLET: &str = "0xAbCdEf0000000000000000000000000000000001";

    #[test]
    fn test_state_machine() {
        let now = Utc::now();
        assert_eq!(Session::default().state(now), SessionState::Unauthenticated);

        let linked = Session::linked(WALLET, test_l2(), now + chrono::Duration::minutes(5));
        assert_eq!(linked.state(now), SessionState::Linked);
        assert_eq!(linked.wallet_address.as_deref(), Some(&WALLET.to_ascii_lowercase()[..]));

        let expired = Session::linked(WALLET, test_l2(), now - chrono::Duration::seconds(1));
        assert_eq!(expired.state(now), SessionState::Expired);
        assert!(is_session_expired(&expired, now));
        assert!(!is_session_expired(&Session::default(), now));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let session = Session { expires_at: Some(now), ..Default::default() };
        assert!(is_session_expired(&session, now));
    }

    #[test]
    fn test_cookie_codec() {
        let codec = CookieCodec::new(TEST_COOKIE_SECRET).unwrap();
        let id = SessionId::generate();
        let value = codec.encode(&id);
        assert_eq!(codec.decode(&value), Some(id.clone()));

        let forged = format!("{}.AAAA", id.as_str());
        assert_eq!(codec.decode(&forged), None);
        assert_eq!(codec.decode("not-a-cookie"), None);
        assert_eq!(codec.decode("x.y"), None);

        let other = CookieCodec::new(b"another-secret-another-secret-another").unwrap();
        assert_eq!(other.decode(&value), None);
    }

    #[test]
    fn test_short_cookie_secret_rejected() {
        assert!(matches!(CookieCodec::new(b"short"), Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn test_resolve_synthesizes_empty_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = test_manager(store.clone());

        let resolved = manager.resolve(None).await.unwrap();
        assert!(resolved.fresh);
        assert_eq!(resolved.session, Session::default());

        let resolved = manager.resolve(Some("garbage")).await.unwrap();
        assert!(resolved.fresh);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_require_linked_rejects_unlinked() {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = test_manager(store.clone());

        assert!(matches!(
            manager.require_linked(None).await,
            Err(GatewayError::Unauthorized(_))
        ));

        let (_, cookie) = seed(&manager, &store, Session::default()).await;
        assert_err!(manager.require_linked(Some(&cookie)).await);
    }

    #[tokio::test]
    async fn test_require_linked_destroys_expired() {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = test_manager(store.clone());
        let past = Utc::now() - chrono::Duration::minutes(1);
        let (id, cookie) = seed(&manager, &store, Session::linked(WALLET, test_l2(), past)).await;

        let err = manager.require_linked(Some(&cookie)).await.unwrap_err();
        assert_eq!(err, GatewayError::unauthorized("session expired"));
        assert_eq!(store.load(&id).await.unwrap(), None);
        assert_eq!(manager.state(Some(&cookie)).await.unwrap(), SessionState::Destroyed);

        let resolved = manager.resolve(Some(&cookie)).await.unwrap();
        assert!(resolved.session.l2.is_none());
    }

    #[tokio::test]
    async fn test_require_linked_returns_credentials() {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = test_manager(store.clone());
        let future = Utc::now() + chrono::Duration::minutes(10);
        let (id, cookie) = seed(&manager, &store, Session::linked(WALLET, test_l2(), future)).await;

        let linked = assert_ok!(manager.require_linked(Some(&cookie)).await);
        assert_eq!(linked.id, id);
        assert_eq!(linked.wallet_address, WALLET.to_ascii_lowercase());
        assert_eq!(linked.l2, test_l2());
    }

    #[tokio::test]
    async fn test_link_issues_new_id_and_drops_old() {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = test_manager(store.clone());
        let (old_id, _) = seed(&manager, &store, Session::default()).await;

        let (id, session) = manager.link(Some(&old_id), WALLET, test_l2()).await.unwrap();
        assert_ne!(id, old_id);
        assert_eq!(store.load(&old_id).await.unwrap(), None);
        assert_eq!(store.load(&id).await.unwrap(), Some(session.clone()));
        assert!(session.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = test_manager(store.clone());
        let future = Utc::now() + chrono::Duration::minutes(10);
        let (id, cookie) = seed(&manager, &store, Session::linked(WALLET, test_l2(), future)).await;

        assert_eq!(manager.state(Some(&cookie)).await.unwrap(), SessionState::Linked);
        assert_ok!(manager.destroy(Some(&cookie)).await);
        assert_ok!(manager.destroy(Some(&cookie)).await);
        assert_ok!(manager.destroy(None).await);
        assert_eq!(store.load(&id).await.unwrap(), None);
        assert_eq!(manager.state(Some(&cookie)).await.unwrap(), SessionState::Destroyed);
        assert_eq!(manager.state(None).await.unwrap(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_status_address_matching() {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = test_manager(store.clone());
        let future = Utc::now() + chrono::Duration::minutes(10);
        let (_, cookie) = seed(&manager, &store, Session::linked(WALLET, test_l2(), future)).await;

        let status = manager.status(Some(&cookie), Some(&WALLET.to_ascii_uppercase())).await;
        let status = status.unwrap();
        assert!(status.ok);
        assert!(!status.expired);
        assert!(status.address_matches);
        assert_eq!(status.wallet_address, Some(WALLET.to_ascii_lowercase()));

        let status = manager
            .status(Some(&cookie), Some("0x0000000000000000000000000000000000000002"))
            .await
            .unwrap();
        assert!(!status.address_matches);

        let status = manager.status(Some(&cookie), None).await.unwrap();
        assert!(status.address_matches);

        let status = manager.status(None, Some(WALLET)).await.unwrap();
        assert!(!status.address_matches);
        assert_eq!(status.wallet_address, None);
    }

    #[tokio::test]
    async fn test_status_reports_and_destroys_expired() {
        let store = Arc::new(InMemorySessionStore::new());
        let manager = test_manager(store.clone());
        let past = Utc::now() - chrono::Duration::minutes(1);
        let (id, cookie) = seed(&manager, &store, Session::linked(WALLET, test_l2(), past)).await;

        let status = manager.status(Some(&cookie), Some(WALLET)).await.unwrap();
        assert!(status.expired);
        assert!(!status.address_matches);
        assert_eq!(status.wallet_address, None);
        assert_eq!(store.load(&id).await.unwrap(), None);
    }

    #[test]
    fn test_record_ttl_outlives_expiry() {
        let now = Utc::now();
        let grace = Duration::from_secs(3600);

        let live = Session::linked(WALLET, test_l2(), now + chrono::Duration::seconds(600));
        assert_eq!(record_ttl(&live, now, grace), 4200);

        // Already past expiry: the record still survives for the grace period
        let expired = Session::linked(WALLET, test_l2(), now - chrono::Duration::seconds(30));
        assert_eq!(record_ttl(&expired, now, grace), 3600);
        assert_eq!(expired.state(now), SessionState::Expired);

        assert_eq!(record_ttl(&Session::default(), now, grace), 3600);
        assert_eq!(record_ttl(&live, now, Duration::ZERO), 601);
    }

    #[test]
    fn test_cookie_attributes() {
        let manager = test_manager(Arc::new(InMemorySessionStore::new()));
        let id = SessionId::generate();
        let cookie = manager.session_cookie(&id);
        assert!(cookie.starts_with("gw_session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.ends_with("; Secure"));
        assert!(manager.clear_cookie().contains("Max-Age=0"));
    }
}

//! Per-connection session state: auth gating, in-flight cancellation
//! tokens, and the revocation signal that lets API-key deletion (spec.md
//! §4.12) terminate every live session authenticated with that key.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use vigil_protocol::jsonrpc::RequestId;
use vigil_security::apikey::{ApiKey, ApiKeyId};

/// One connected client: STDIO has exactly one for the process lifetime;
/// TCP has one per accepted socket.
pub struct Session {
    pub connection_id: String,
    authenticated: AtomicBool,
    key: RwLock<Option<Arc<ApiKey>>>,
    /// Tripped on explicit key revocation, idle timeout, or server
    /// shutdown — every in-flight and future request on this connection
    /// observes it.
    pub closing: CancellationToken,
    in_flight: DashMap<RequestId, CancellationToken>,
}

impl Session {
    pub fn new(connection_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            connection_id: connection_id.into(),
            authenticated: AtomicBool::new(false),
            key: RwLock::new(None),
            closing: CancellationToken::new(),
            in_flight: DashMap::new(),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn authenticate(&self, key: ApiKey) {
        *self.key.write().unwrap() = Some(Arc::new(key));
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn api_key(&self) -> Option<Arc<ApiKey>> {
        self.key.read().unwrap().clone()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.api_key().map(|k| k.has_permission(permission)).unwrap_or(false)
    }

    pub fn key_id(&self) -> Option<ApiKeyId> {
        self.api_key().map(|k| k.key_id)
    }

    /// Registers a cancellation token for an in-flight request, derived
    /// from this connection's `closing` token so a connection-level trip
    /// cancels every request on it.
    pub fn begin_request(&self, id: RequestId) -> CancellationToken {
        let token = self.closing.child_token();
        self.in_flight.insert(id, token.clone());
        token
    }

    pub fn end_request(&self, id: &RequestId) {
        self.in_flight.remove(id);
    }

    pub fn cancel_request(&self, id: &RequestId) {
        if let Some((_, token)) = self.in_flight.remove(id) {
            token.cancel();
        }
    }
}

/// All live sessions, keyed by connection id, so an API-key revocation can
/// find and trip every session authenticated with that key.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<Session>) {
        self.sessions.insert(session.connection_id.clone(), session);
    }

    pub fn remove(&self, connection_id: &str) {
        self.sessions.remove(connection_id);
    }

    /// Trips the cancellation token on every session authenticated with
    /// `key_id` (spec.md §4.12: deletion terminates all live sessions).
    pub fn revoke_key(&self, key_id: ApiKeyId) {
        for entry in self.sessions.iter() {
            if entry.value().key_id() == Some(key_id) {
                entry.value().closing.cancel();
            }
        }
    }

    pub fn shutdown_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().closing.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_session_has_no_permissions() {
        let session = Session::new("conn-1");
        assert!(!session.is_authenticated());
        assert!(!session.has_permission("query_events"));
    }

    #[test]
    fn cancel_request_trips_only_that_requests_token() {
        let session = Session::new("conn-1");
        let a = session.begin_request(RequestId::Number(1));
        let b = session.begin_request(RequestId::Number(2));
        session.cancel_request(&RequestId::Number(1));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }

    #[test]
    fn revoking_key_trips_every_session_on_it() {
        let registry = SessionRegistry::new();
        let session = Session::new("conn-1");
        let key_id = ApiKeyId::new();
        session.authenticate(ApiKey {
            key_id,
            key_value: "vgsk_test".to_string(),
            display_name: "test".to_string(),
            created_at: chrono::Utc::now(),
            expires_at: None,
            permissions: Default::default(),
            rate_limit_per_minute: 600,
            usage: Default::default(),
            revoked: false,
        });
        registry.register(session.clone());
        registry.revoke_key(key_id);
        assert!(session.closing.is_cancelled());
    }
}

//! Bearer-token sessions.
//!
//! Tokens are HS256 JWTs minted by the external identity provider (`sub` = user id).
//! [`AuthContext`] verifies them, remembers sign-outs and publishes auth-state changes;
//! a [`SessionGuard`] is one subscriber to those changes, alive for as long as the
//! request (or multi-step operation) it protects.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::{FromRef, FromRequestParts};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::http::request::Parts;
use axum::TypedHeader;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;

pub const LOGIN_ROUTE: &str = "/login";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
    token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedOut { user_id: Uuid },
}

pub struct AuthContext {
    decoding_key: DecodingKey,
    validation: Validation,
    // revoked token -> when it would have expired anyway
    revoked: RwLock<HashMap<String, DateTime<Utc>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthContext {
    pub fn new(jwt_secret: &str, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let (events, _) = broadcast::channel(64);
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            revoked: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// The live session for `token`, or `None` when it is malformed, expired or signed out.
    pub fn session(&self, token: &str) -> Option<Session> {
        let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!("Rejected bearer token: {}", e);
                return None;
            }
        };

        if self.is_revoked(token) {
            return None;
        }

        let exp = i64::try_from(claims.exp).ok()?;
        let expires_at = Utc.timestamp_opt(exp, 0).single()?;
        Some(Session {
            user_id: claims.sub,
            email: claims.email,
            expires_at,
            token: token.to_string(),
        })
    }

    fn is_revoked(&self, token: &str) -> bool {
        match self.revoked.read() {
            Ok(revoked) => revoked.contains_key(token),
            // a poisoned lock fails closed
            Err(_) => true,
        }
    }

    /// Ends `session`: its token stops resolving and subscribers are told.
    pub fn sign_out(&self, session: &Session) {
        let now = Utc::now();
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.retain(|_, expires_at| *expires_at > now);
            revoked.insert(session.token.clone(), session.expires_at);
        }

        info!(user_id = %session.user_id, "Signed out");
        // no subscribers is fine
        let _ = self.events.send(AuthEvent::SignedOut { user_id: session.user_id });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardState {
    /// No answer yet; nothing protected may be produced.
    Pending,
    Authenticated(Session),
    RedirectToLogin,
}

/// Subscribes on creation, unsubscribes on [`SessionGuard::stop`] or drop.
pub struct SessionGuard {
    context: Arc<AuthContext>,
    token: Option<String>,
    events: Option<broadcast::Receiver<AuthEvent>>,
    state: GuardState,
}

impl SessionGuard {
    /// Attaches to `context` before anything is checked, so a change that lands
    /// between subscribing and the first [`resolve`](Self::resolve) is not missed.
    pub fn subscribe(context: Arc<AuthContext>, token: Option<String>) -> Self {
        let events = context.subscribe();
        Self {
            context,
            token,
            events: Some(events),
            state: GuardState::Pending,
        }
    }

    /// Asks the context for the current session once.
    pub fn resolve(&mut self) -> &GuardState {
        let session = self.token.as_deref().and_then(|t| self.context.session(t));
        self.state = match session {
            Some(session) => GuardState::Authenticated(session),
            None => GuardState::RedirectToLogin,
        };
        &self.state
    }

    /// Takes in any auth-state changes published since the last look.
    /// Expiry is caught too because the session is resolved again.
    pub fn refresh(&mut self) -> &GuardState {
        if let Some(events) = self.events.as_mut() {
            loop {
                match events.try_recv() {
                    Ok(event) => debug!(?event, "Auth state changed"),
                    Err(TryRecvError::Lagged(skipped)) => debug!(skipped, "Auth events skipped"),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        self.resolve()
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            GuardState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn stop(&mut self) {
        self.events = None;
    }
}

/// The signed-in caller. Rejects with 401 and a login redirect otherwise.
pub struct CurrentUser {
    pub session: Session,
    guard: SessionGuard,
}

impl CurrentUser {
    pub fn id(&self) -> Uuid {
        self.session.user_id
    }

    /// Whether the session survived everything published since the request started.
    pub fn still_signed_in(&mut self) -> bool {
        matches!(self.guard.refresh(), GuardState::Authenticated(_))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<AuthContext>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = Arc::<AuthContext>::from_ref(state);
        let token = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string());

        let mut guard = SessionGuard::subscribe(context, token);
        let session = match guard.resolve() {
            GuardState::Authenticated(session) => session.clone(),
            _ => return Err(AppError::Unauthenticated),
        };

        Ok(CurrentUser { session, guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token_for(user: Uuid, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: user,
            email: Some("student@example.com".into()),
            exp: (Utc::now().timestamp() + exp_offset_secs) as u64,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn valid_token_resolves_to_session() {
        let context = AuthContext::new(SECRET, None);
        let user = Uuid::new_v4();
        let session = context.session(&token_for(user, 3600)).unwrap();
        assert_eq!(session.user_id, user);
        assert_eq!(session.email.as_deref(), Some("student@example.com"));
    }

    #[test]
    fn expired_or_foreign_tokens_are_rejected() {
        let context = AuthContext::new(SECRET, None);
        assert!(context.session(&token_for(Uuid::new_v4(), -3600)).is_none());

        let other = AuthContext::new("another-secret", None);
        assert!(other.session(&token_for(Uuid::new_v4(), 3600)).is_none());
        assert!(context.session("not-a-jwt").is_none());
    }

    #[test]
    fn guard_is_pending_until_resolved() {
        let context = Arc::new(AuthContext::new(SECRET, None));
        let guard = SessionGuard::subscribe(context, Some(token_for(Uuid::new_v4(), 3600)));
        assert_eq!(guard.state(), &GuardState::Pending);
        assert!(guard.session().is_none());
    }

    #[test]
    fn missing_token_redirects_to_login() {
        let context = Arc::new(AuthContext::new(SECRET, None));
        let mut guard = SessionGuard::subscribe(context, None);
        assert_eq!(guard.resolve(), &GuardState::RedirectToLogin);
    }

    #[test]
    fn sign_out_flips_live_guard_to_redirect() {
        let context = Arc::new(AuthContext::new(SECRET, None));
        let token = token_for(Uuid::new_v4(), 3600);
        let mut guard = SessionGuard::subscribe(context.clone(), Some(token.clone()));
        let session = match guard.resolve() {
            GuardState::Authenticated(session) => session.clone(),
            other => panic!("expected a session, got {:?}", other),
        };

        context.sign_out(&session);
        assert_eq!(guard.refresh(), &GuardState::RedirectToLogin);
        assert!(context.session(&token).is_none());
    }

    #[test]
    fn dropping_or_stopping_guard_unsubscribes() {
        let context = Arc::new(AuthContext::new(SECRET, None));
        assert_eq!(context.subscriber_count(), 0);

        let mut first = SessionGuard::subscribe(context.clone(), None);
        let second = SessionGuard::subscribe(context.clone(), None);
        assert_eq!(context.subscriber_count(), 2);

        first.stop();
        assert_eq!(context.subscriber_count(), 1);
        drop(second);
        assert_eq!(context.subscriber_count(), 0);
    }

    #[test]
    fn expiry_beyond_the_clock_range_is_rejected() {
        let context = AuthContext::new(SECRET, None);
        let claims = Claims { sub: Uuid::new_v4(), email: None, exp: u64::MAX };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        assert!(context.session(&token).is_none());
    }

    #[test]
    fn audience_is_enforced_when_configured() {
        let context = AuthContext::new(SECRET, Some("authenticated"));
        // token_for carries no aud claim
        assert!(context.session(&token_for(Uuid::new_v4(), 3600)).is_none());
    }
}

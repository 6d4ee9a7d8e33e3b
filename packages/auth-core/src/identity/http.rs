//! HTTP identity store adapter.
//!
//! Talks to a GoTrue-compatible auth API: password and refresh-token
//! grants against `/token`, `/logout`, and `/user` for password changes.
//! Holds the active session and broadcasts auth events for the auth
//! context to consume.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use url::Url;

use crate::config::AuthConfig;
use crate::error::IdentityError;
use crate::traits::BaseIdentityStore;
use crate::types::{AuthEvent, Identity, Session};

pub struct HttpIdentityStore {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct PasswordUpdate<'a> {
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Seconds until the access token expires.
    expires_in: i64,
    user: UserResponse,
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

impl HttpIdentityStore {
    pub fn new(config: &AuthConfig) -> Result<Self, IdentityError> {
        let mut base_url = Url::parse(&config.identity_url)
            .map_err(|e| IdentityError::Transport(format!("invalid identity URL: {}", e)))?;
        // `Url::join` treats a base path without a trailing slash as a
        // file and drops its last segment, which breaks deployments
        // mounted under a sub-path like `/auth/v1`.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: config.identity_api_key.clone(),
            session: Mutex::new(None),
            events,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IdentityError> {
        self.base_url
            .join(path)
            .map_err(|e| IdentityError::Transport(e.to_string()))
    }

    fn session_from_response(token: TokenResponse) -> Session {
        Session {
            identity: Identity {
                id: token.user.id,
                email: token.user.email.unwrap_or_default(),
                issued_at: token.user.created_at.unwrap_or_else(Utc::now),
                metadata: token.user.user_metadata,
            },
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        }
    }

    async fn token_request<B: Serialize>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Session, IdentityError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let token: TokenResponse = response
                .json()
                .await
                .map_err(|e| IdentityError::Transport(e.to_string()))?;
            return Ok(Self::session_from_response(token));
        }

        // GoTrue answers 400/401 for rejected grants.
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(match grant_type {
                "refresh_token" => IdentityError::InvalidRefreshToken,
                _ => IdentityError::InvalidCredentials,
            });
        }
        Err(IdentityError::Transport(format!(
            "identity store returned {}",
            status
        )))
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl BaseIdentityStore for HttpIdentityStore {
    async fn current_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(self.session.lock().await.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        let session = self
            .token_request("password", &PasswordGrant { email, password })
            .await?;
        debug!(email = %session.identity.email, "password sign-in succeeded");
        *self.session.lock().await = Some(session.clone());
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            let url = self.endpoint("logout")?;
            let result = self
                .client
                .post(url)
                .header("apikey", &self.api_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            // The local session is gone either way; the server-side one
            // ages out if the call failed.
            if let Err(e) = result {
                debug!("logout request failed: {}", e);
            }
        }
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session, IdentityError> {
        let refresh_token = {
            let guard = self.session.lock().await;
            guard
                .as_ref()
                .map(|s| s.refresh_token.clone())
                .ok_or(IdentityError::NoSession)?
        };

        let session = self
            .token_request(
                "refresh_token",
                &RefreshGrant {
                    refresh_token: &refresh_token,
                },
            )
            .await?;
        *self.session.lock().await = Some(session.clone());
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn update_password(&self, new_password: &str) -> Result<(), IdentityError> {
        let access_token = {
            let guard = self.session.lock().await;
            guard
                .as_ref()
                .map(|s| s.access_token.clone())
                .ok_or(IdentityError::NoSession)?
        };

        let url = self.endpoint("user")?;
        let response = self
            .client
            .put(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&access_token)
            .json(&PasswordUpdate {
                password: new_password,
            })
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 401 {
            return Err(IdentityError::InvalidCredentials);
        }
        Err(IdentityError::Transport(format!(
            "password update returned {}",
            status
        )))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_parsing() {
        let body = r#"{
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "user": {
                "id": "user-1",
                "email": "a@x.com",
                "created_at": "2024-01-01T00:00:00Z"
            }
        }"#;
        let token: TokenResponse = serde_json::from_str(body).unwrap();
        let session = HttpIdentityStore::session_from_response(token);
        assert_eq!(session.identity.email, "a@x.com");
        assert_eq!(session.access_token, "at");
        assert!(session.expires_at > Utc::now());
    }

    #[test]
    fn test_endpoint_preserves_sub_path_base() {
        let config = AuthConfig {
            identity_url: "https://auth.example.test/auth/v1".to_string(),
            ..AuthConfig::default()
        };
        let store = HttpIdentityStore::new(&config).unwrap();
        assert_eq!(
            store.endpoint("token").unwrap().as_str(),
            "https://auth.example.test/auth/v1/token"
        );

        // A base already ending in a slash is left alone.
        let config = AuthConfig {
            identity_url: "https://auth.example.test/auth/v1/".to_string(),
            ..AuthConfig::default()
        };
        let store = HttpIdentityStore::new(&config).unwrap();
        assert_eq!(
            store.endpoint("logout").unwrap().as_str(),
            "https://auth.example.test/auth/v1/logout"
        );
    }

    #[tokio::test]
    async fn test_refresh_without_session_errors() {
        let store = HttpIdentityStore::new(&AuthConfig::default()).unwrap();
        let result = store.refresh_session().await;
        assert!(matches!(result, Err(IdentityError::NoSession)));
    }
}

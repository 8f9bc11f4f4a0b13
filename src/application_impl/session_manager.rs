use crate::application_impl::{AntiCsrfGuard, KeyStore};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use chrono::{DateTime, Utc};
use nanoid::nanoid;
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

struct MintedTokens {
    access_token: IssuedToken,
    refresh_token: IssuedToken,
    id_refresh_token: IssuedToken,
}

/// Orchestrates the session lifecycle on top of a [`SessionStore`].
///
/// Verification is purely cryptographic. The only store-side critical
/// section is the generation compare-and-increment during refresh; theft is
/// reported to the caller and, under [`TheftResponse::Revoke`], followed by a
/// separate revoke after that section completes.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    codec: Arc<dyn TokenCodec>,
    key_store: Arc<KeyStore>,
    anti_csrf: AntiCsrfGuard,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        codec: Arc<dyn TokenCodec>,
        key_store: Arc<KeyStore>,
        anti_csrf: AntiCsrfGuard,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            codec,
            key_store,
            anti_csrf,
            config,
        }
    }

    fn expiry_at(timestamp: i64) -> Result<DateTime<Utc>, SessionError> {
        DateTime::<Utc>::from_timestamp(timestamp, 0)
            .ok_or_else(|| SessionError::Internal(format!("timestamp out of range: {timestamp}")))
    }

    fn mint_tokens(
        &self,
        session: &Session,
        anti_csrf_token: Option<String>,
    ) -> Result<MintedTokens, SessionError> {
        let now = Utc::now();
        let access_exp = (now + self.config.access_ttl).timestamp();
        let refresh_exp = session.expires_at.timestamp();

        let access_claims = AccessTokenClaims {
            sub: session.user_id.clone(),
            sid: session.handle.clone(),
            rtg: session.refresh_generation,
            pld: session.jwt_payload.clone(),
            acsrf: anti_csrf_token,
            iat: now.timestamp(),
            exp: access_exp,
            iss: self.config.issuer.clone(),
        };
        let refresh_claims = RefreshTokenClaims {
            sid: session.handle.clone(),
            rtg: session.refresh_generation,
            exp: refresh_exp,
            nonce: nanoid!(),
        };

        Ok(MintedTokens {
            access_token: IssuedToken {
                token: self.codec.encode_access(&access_claims)?,
                expiry: Self::expiry_at(access_exp)?,
            },
            refresh_token: IssuedToken {
                token: self.codec.encode_refresh(&refresh_claims)?,
                expiry: Self::expiry_at(refresh_exp)?,
            },
            id_refresh_token: IssuedToken {
                token: Uuid::new_v4().to_string(),
                expiry: Self::expiry_at(refresh_exp)?,
            },
        })
    }

    async fn report_theft(&self, session: Session) -> SessionError {
        warn!(
            handle = %session.handle,
            user_id = %session.user_id,
            generation = %session.refresh_generation,
            "refresh token replay detected"
        );
        if self.config.theft_response == TheftResponse::Revoke {
            match self.store.delete(&session.handle).await {
                Ok(_) => info!(handle = %session.handle, "session revoked after token theft"),
                Err(e) => error!(handle = %session.handle, "revoke after token theft failed: {}", e),
            }
        }
        SessionError::TokenTheftDetected {
            session_handle: session.handle,
            user_id: session.user_id,
        }
    }

    async fn load(&self, handle: &SessionHandle) -> Result<Session, SessionError> {
        self.store
            .get(handle)
            .await?
            .ok_or_else(|| SessionError::unauthorized("session does not exist"))
    }
}

fn session_info(session: &Session) -> SessionInfo {
    SessionInfo {
        handle: session.handle.clone(),
        user_id: session.user_id.clone(),
        user_data_in_jwt: session.jwt_payload.clone(),
    }
}

#[async_trait::async_trait]
impl SessionService for SessionManager {
    async fn create_session(&self, input: CreateSessionInput) -> Result<NewSession, SessionError> {
        let CreateSessionInput {
            user_id,
            jwt_payload,
            session_data,
        } = input;
        let expires_at = Utc::now() + self.config.refresh_ttl;
        let session = Session::new(user_id, jwt_payload, session_data, expires_at);

        let anti_csrf_token = self.anti_csrf.issue();
        let tokens = self.mint_tokens(&session, anti_csrf_token.clone())?;
        self.store.insert(&session).await?;

        info!(handle = %session.handle, user_id = %session.user_id, "session created");

        Ok(NewSession {
            session: session_info(&session),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_refresh_token: tokens.id_refresh_token,
            anti_csrf_token,
            current_public_key: self.key_store.snapshot().current().public_info(),
        })
    }

    async fn verify_session(&self, input: VerifyInput) -> Result<VerifiedSession, SessionError> {
        let decoded = self.codec.decode_access(&input.access_token)?;
        let claims = decoded.claims;

        self.anti_csrf.check(
            claims.acsrf.as_deref(),
            input.anti_csrf_token.as_deref(),
            input.do_anti_csrf_check,
        )?;

        // Tokens from a retired key get the same claims re-signed with the current one.
        let access_token = if decoded.signed_with_current_key {
            None
        } else {
            Some(IssuedToken {
                token: self.codec.encode_access(&claims)?,
                expiry: Self::expiry_at(claims.exp)?,
            })
        };

        Ok(VerifiedSession {
            session: SessionInfo {
                handle: claims.sid,
                user_id: claims.sub,
                user_data_in_jwt: claims.pld,
            },
            access_token,
            current_public_key: self.key_store.snapshot().current().public_info(),
        })
    }

    async fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedSession, SessionError> {
        let claims = self.codec.decode_refresh(refresh_token)?;
        let session = self.load(&claims.sid).await?;

        match claims.rtg.cmp(&session.refresh_generation) {
            Ordering::Less => return Err(self.report_theft(session).await),
            Ordering::Greater => {
                return Err(SessionError::unauthorized(
                    "refresh token generation is ahead of the session",
                ));
            }
            Ordering::Equal => {}
        }

        let expires_at = Utc::now() + self.config.refresh_ttl;
        let session = match self
            .store
            .advance_generation(&claims.sid, claims.rtg, expires_at)
            .await?
        {
            GenerationAdvance::Advanced(session) => session,
            GenerationAdvance::Stale { current } => {
                debug!(handle = %claims.sid, %current, "lost concurrent refresh");
                return Err(SessionError::unauthorized("refresh token already used"));
            }
            GenerationAdvance::NotFound => {
                return Err(SessionError::unauthorized("session does not exist"));
            }
        };

        let anti_csrf_token = self.anti_csrf.issue();
        let tokens = self.mint_tokens(&session, anti_csrf_token.clone())?;

        info!(
            handle = %session.handle,
            generation = %session.refresh_generation,
            "refresh token rotated"
        );

        Ok(RefreshedSession {
            session: session_info(&session),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_refresh_token: tokens.id_refresh_token,
            anti_csrf_token,
        })
    }

    async fn revoke_all_sessions_for_user(&self, user_id: &UserId) -> Result<u64, SessionError> {
        let count = self.store.delete_for_user(user_id).await?;
        info!(%user_id, count, "sessions revoked for user");
        Ok(count)
    }

    async fn revoke_session(&self, handle: &SessionHandle) -> Result<bool, SessionError> {
        let existed = self.store.delete(handle).await?;
        info!(%handle, existed, "session revoked");
        Ok(existed)
    }

    async fn list_session_handles(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, SessionError> {
        Ok(self.store.list_handles(user_id).await?)
    }

    async fn get_session_data(
        &self,
        handle: &SessionHandle,
    ) -> Result<serde_json::Value, SessionError> {
        Ok(self.load(handle).await?.session_data)
    }

    async fn update_session_data(
        &self,
        handle: &SessionHandle,
        data: serde_json::Value,
    ) -> Result<(), SessionError> {
        if self.store.update_session_data(handle, &data).await? {
            Ok(())
        } else {
            Err(SessionError::unauthorized("session does not exist"))
        }
    }

    async fn get_jwt_payload(
        &self,
        handle: &SessionHandle,
    ) -> Result<serde_json::Value, SessionError> {
        Ok(self.load(handle).await?.jwt_payload)
    }

    async fn update_jwt_payload(
        &self,
        handle: &SessionHandle,
        payload: serde_json::Value,
    ) -> Result<(), SessionError> {
        if self.store.update_jwt_payload(handle, &payload).await? {
            Ok(())
        } else {
            Err(SessionError::unauthorized("session does not exist"))
        }
    }
}

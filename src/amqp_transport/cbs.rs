use chrono::{DateTime, Duration, Utc};

use super::TickError;
use crate::amqp::{AmqpEngine, OperationResult};
use crate::clock::elapsed_ms;
use crate::config::{TransportSettings, CBS_TOKEN_TYPE};
use crate::token::{TokenProvider, TokenSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthState {
    NotStarted,
    /// A put-token is waiting for its answer
    PutTokenSent {
        created_at: DateTime<Utc>,
        refreshing: bool,
    },
    Authenticated {
        put_at: DateTime<Utc>,
    },
}

/// Puts SAS tokens on the CBS node and keeps them fresh
#[derive(Debug)]
pub(crate) struct CbsAuthenticator {
    state: AuthState,
}

impl CbsAuthenticator {
    pub(crate) fn new() -> Self {
        CbsAuthenticator {
            state: AuthState::NotStarted,
        }
    }

    pub(crate) fn state(&self) -> AuthState {
        self.state
    }

    pub(crate) fn reset(&mut self) {
        self.state = AuthState::NotStarted;
    }

    /// The hub has accepted a token, a refresh may be under way
    pub(crate) fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            AuthState::Authenticated { .. } | AuthState::PutTokenSent { refreshing: true, .. }
        )
    }

    /// New batches only start while no refresh is pending
    pub(crate) fn can_send(&self) -> bool {
        matches!(self.state, AuthState::Authenticated { .. })
    }

    /// Put a first or refreshed token, or fail a put-token that took too long
    pub(crate) fn step<E: AmqpEngine>(
        &mut self,
        engine: &mut E,
        cbs: &mut E::Cbs,
        tokens: &TokenProvider,
        audience: &str,
        settings: &TransportSettings,
        now: DateTime<Utc>,
    ) -> Result<(), TickError> {
        match self.state {
            AuthState::NotStarted => {
                self.put_token(engine, cbs, tokens, audience, settings, now, false)
            }
            AuthState::PutTokenSent { created_at, .. } => {
                if elapsed_ms(created_at, now) >= settings.cbs_request_timeout {
                    return Err(TickError::PutTokenTimeout(settings.cbs_request_timeout));
                }
                Ok(())
            }
            AuthState::Authenticated { put_at } => {
                if tokens.is_refreshable()
                    && elapsed_ms(put_at, now) >= settings.sas_token_refresh_time
                {
                    debug!("SAS token due for refresh");
                    return self.put_token(engine, cbs, tokens, audience, settings, now, true);
                }
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn put_token<E: AmqpEngine>(
        &mut self,
        engine: &mut E,
        cbs: &mut E::Cbs,
        tokens: &TokenProvider,
        audience: &str,
        settings: &TransportSettings,
        now: DateTime<Utc>,
        refreshing: bool,
    ) -> Result<(), TickError> {
        let lifetime = i64::try_from(settings.sas_token_lifetime).unwrap_or(i64::MAX);
        let expiry = now
            .checked_add_signed(Duration::milliseconds(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let token = tokens.token(&expiry)?;

        let put = engine.put_token(cbs, CBS_TOKEN_TYPE, audience, &token);
        drop(token);
        put?;

        trace!("Put token for {} expiring at {}", audience, expiry);
        self.state = AuthState::PutTokenSent {
            created_at: now,
            refreshing,
        };
        Ok(())
    }

    /// Handle the answer to the pending put-token
    pub(crate) fn on_put_token_complete(&mut self, result: OperationResult) -> Result<(), TickError> {
        let AuthState::PutTokenSent { created_at, refreshing } = self.state else {
            debug!("Ignoring put-token completion with no request pending");
            return Ok(());
        };

        match result {
            OperationResult::Ok => {
                if refreshing {
                    debug!("SAS token refreshed");
                } else {
                    info!("Authenticated with CBS");
                }
                self.state = AuthState::Authenticated { put_at: created_at };
                Ok(())
            }
            failure => Err(TickError::PutTokenFailed(failure)),
        }
    }
}

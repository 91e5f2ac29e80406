//! Usage: Owns the access/refresh credentials and the single-flight refresh protocol.
//!
//! At most one refresh call is in flight. Callers that hit a 401 while it runs
//! queue behind it (FIFO) and are all settled together: on success each gets
//! the new access credential plus a `ReplayTurn` fixing its replay order; on
//! failure each gets the same `RefreshFailed` error, credentials are cleared
//! and `SessionEvent::Invalidated` is emitted.

use crate::http::refresh::{RefreshEndpoint, TokenSet};
use crate::http::replay::{ReplayGate, ReplayTurn};
use crate::http::session::{SessionEvent, SessionEvents};
use crate::infra::credential_store::{CredentialStore, StoredCredentials};
use crate::shared::error::{ClientError, ClientResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::{mask_optional_token, mask_token};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type RefreshOutcome = ClientResult<RefreshGrant>;

/// Result of waiting on a refresh: the credential to retry with, and the
/// caller's place in the replay order when it was queued.
#[derive(Debug)]
pub struct RefreshGrant {
    pub access_token: String,
    pub turn: Option<ReplayTurn>,
}

#[derive(Debug)]
enum RefreshPhase {
    Idle,
    InFlight {
        waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
    },
}

#[derive(Debug)]
struct CredentialState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Bumped by login and logout; a refresh started under an older
    /// generation must not install its result.
    generation: u64,
    phase: RefreshPhase,
}

impl CredentialState {
    fn snapshot(&self) -> StoredCredentials {
        StoredCredentials {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

struct Inner {
    state: Mutex<CredentialState>,
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn RefreshEndpoint>,
    events: SessionEvents,
}

#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

impl CredentialManager {
    /// Loads the persisted credentials; an unreadable store starts the
    /// session logged out.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn RefreshEndpoint>,
        events: SessionEvents,
    ) -> Self {
        let loaded = match store.load() {
            Ok(credentials) => credentials,
            Err(err) => {
                tracing::warn!("credential store read failed; starting without credentials: {err}");
                StoredCredentials::default()
            }
        };
        tracing::debug!(
            access_token = %mask_optional_token(loaded.access_token.as_deref()),
            has_refresh_token = loaded.refresh_token.is_some(),
            "credentials loaded"
        );

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CredentialState {
                    access_token: loaded.access_token,
                    refresh_token: loaded.refresh_token,
                    generation: 0,
                    phase: RefreshPhase::Idle,
                }),
                store,
                endpoint,
                events,
            }),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.lock_or_recover().access_token.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(
            self.inner.state.lock_or_recover().phase,
            RefreshPhase::InFlight { .. }
        )
    }

    /// Callers currently suspended on the in-flight refresh.
    pub fn pending_len(&self) -> usize {
        match &self.inner.state.lock_or_recover().phase {
            RefreshPhase::InFlight { waiters } => waiters.len(),
            RefreshPhase::Idle => 0,
        }
    }

    /// Initial login. Persist failures are returned and leave memory unchanged.
    pub fn set_credentials(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> ClientResult<()> {
        let mut state = self.inner.state.lock_or_recover();
        let next = StoredCredentials {
            access_token: Some(access_token.into()),
            refresh_token,
        };
        self.inner.store.save(&next)?;
        state.access_token = next.access_token;
        state.refresh_token = next.refresh_token;
        state.generation += 1;
        tracing::info!(
            access_token = %mask_optional_token(state.access_token.as_deref()),
            "credentials set"
        );
        Ok(())
    }

    /// Logout. A refresh already in flight still settles its waiters but its
    /// result is discarded.
    pub fn clear(&self) -> ClientResult<()> {
        {
            let mut state = self.inner.state.lock_or_recover();
            self.inner.store.clear()?;
            state.access_token = None;
            state.refresh_token = None;
            state.generation += 1;
        }
        tracing::info!("credentials cleared by logout");
        self.inner.events.emit(SessionEvent::LoggedOut);
        Ok(())
    }

    /// Called after a 401 for a request that carried `rejected_token`.
    ///
    /// Joins the in-flight refresh if there is one, starts it otherwise. If a
    /// refresh already replaced `rejected_token`, returns the current token
    /// right away without a new refresh.
    pub async fn refresh_after_unauthorized(
        &self,
        rejected_token: Option<&str>,
    ) -> ClientResult<RefreshGrant> {
        let rx = {
            let mut state = self.inner.state.lock_or_recover();

            if matches!(state.phase, RefreshPhase::Idle) {
                if let Some(current) = state.access_token.as_deref() {
                    if Some(current) != rejected_token {
                        tracing::debug!(
                            rejected = %mask_optional_token(rejected_token),
                            current = %mask_token(current),
                            "credential already refreshed; retrying with current token"
                        );
                        return Ok(RefreshGrant {
                            access_token: current.to_string(),
                            turn: None,
                        });
                    }
                }

                let Some(refresh_token) = state.refresh_token.clone() else {
                    let err = ClientError::RefreshFailed(
                        "no refresh credential available".to_string(),
                    );
                    self.invalidate_locked(&mut state);
                    drop(state);
                    self.announce_invalidated(&err);
                    return Err(err);
                };

                state.phase = RefreshPhase::InFlight {
                    waiters: VecDeque::new(),
                };
                tracing::info!(
                    rejected = %mask_optional_token(rejected_token),
                    "access credential rejected; starting refresh"
                );
                let manager = self.clone();
                let generation = state.generation;
                tokio::spawn(async move { manager.run_refresh(refresh_token, generation).await });
            }

            let (tx, rx) = oneshot::channel();
            if let RefreshPhase::InFlight { waiters } = &mut state.phase {
                waiters.push_back(tx);
                tracing::debug!(position = waiters.len() - 1, "queued behind refresh");
            }
            rx
        };

        rx.await.unwrap_or_else(|_| {
            Err(ClientError::RefreshFailed(
                "refresh task ended without settling".to_string(),
            ))
        })
    }

    async fn run_refresh(self, refresh_token: String, generation: u64) {
        let endpoint = Arc::clone(&self.inner.endpoint);
        let result = endpoint.refresh(refresh_token).await;
        self.settle(result, generation);
    }

    fn settle(&self, result: ClientResult<TokenSet>, started_generation: u64) {
        let (waiters, outcome) = {
            let mut state = self.inner.state.lock_or_recover();
            let waiters = match std::mem::replace(&mut state.phase, RefreshPhase::Idle) {
                RefreshPhase::InFlight { waiters } => waiters,
                RefreshPhase::Idle => VecDeque::new(),
            };

            if state.generation != started_generation {
                drop(state);
                tracing::info!(
                    waiters = waiters.len(),
                    refresh_ok = result.is_ok(),
                    "session changed during refresh; discarding refresh result"
                );
                let err = ClientError::RefreshFailed("session ended during refresh".to_string());
                for tx in waiters {
                    let _ = tx.send(Err(err.clone()));
                }
                return;
            }

            let outcome = match result {
                Ok(tokens) => {
                    state.access_token = Some(tokens.access_token.clone());
                    if tokens.refresh_token.is_some() {
                        state.refresh_token = tokens.refresh_token;
                    }
                    if let Err(err) = self.inner.store.save(&state.snapshot()) {
                        tracing::error!("failed to persist refreshed credentials: {err}");
                    }
                    Ok(tokens.access_token)
                }
                Err(err) => {
                    let err = match err {
                        ClientError::RefreshFailed(_) => err,
                        other => ClientError::RefreshFailed(other.to_string()),
                    };
                    self.invalidate_locked(&mut state);
                    Err(err)
                }
            };
            (waiters, outcome)
        };

        match outcome {
            Ok(access_token) => {
                tracing::info!(
                    waiters = waiters.len(),
                    access_token = %mask_token(&access_token),
                    "credential refresh succeeded"
                );
                self.inner.events.emit(SessionEvent::Refreshed);
                let gate = ReplayGate::new(waiters.len());
                for (position, tx) in waiters.into_iter().enumerate() {
                    // A dropped receiver drops the grant, which releases its turn.
                    let _ = tx.send(Ok(RefreshGrant {
                        access_token: access_token.clone(),
                        turn: Some(gate.turn(position)),
                    }));
                }
            }
            Err(err) => {
                tracing::warn!(waiters = waiters.len(), "credential refresh failed: {err}");
                self.announce_invalidated(&err);
                for tx in waiters {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }

    fn invalidate_locked(&self, state: &mut CredentialState) {
        state.access_token = None;
        state.refresh_token = None;
        if let Err(err) = self.inner.store.clear() {
            tracing::error!("failed to clear persisted credentials: {err}");
        }
    }

    fn announce_invalidated(&self, err: &ClientError) {
        self.inner.events.emit(SessionEvent::Invalidated {
            reason: err.to_string(),
        });
    }
}

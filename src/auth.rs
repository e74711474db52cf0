//! Current-user handle injected into the cloud store and coordinator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Launch-time state until the identity provider reports back.
    Resolving,
    SignedIn(String),
    SignedOut,
}

/// Cheaply cloneable view of the signed-in user.
#[derive(Debug, Clone)]
pub struct Session {
    tx: Arc<watch::Sender<AuthState>>,
}

impl Session {
    pub fn new(state: AuthState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx: Arc::new(tx) }
    }

    pub fn resolving() -> Self {
        Self::new(AuthState::Resolving)
    }

    pub fn signed_in(uid: impl Into<String>) -> Self {
        Self::new(AuthState::SignedIn(uid.into()))
    }

    pub fn signed_out() -> Self {
        Self::new(AuthState::SignedOut)
    }

    pub fn state(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        match &*self.tx.borrow() {
            AuthState::SignedIn(uid) => Some(uid.clone()),
            _ => None,
        }
    }

    pub fn sign_in(&self, uid: impl Into<String>) {
        let uid = uid.into();
        tracing::info!("Signed in as {}", uid);
        self.tx.send_replace(AuthState::SignedIn(uid));
    }

    pub fn sign_out(&self) {
        tracing::info!("Signed out");
        self.tx.send_replace(AuthState::SignedOut);
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    /// Waits for the launch-time auth check. A check that has not resolved
    /// within `timeout` is treated as signed out instead of blocking startup.
    pub async fn wait_until_resolved(&self, timeout: Duration) -> Option<String> {
        let mut rx = self.subscribe();
        let resolved = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != AuthState::Resolving),
        )
        .await;

        match resolved {
            Ok(Ok(state)) => match &*state {
                AuthState::SignedIn(uid) => Some(uid.clone()),
                _ => None,
            },
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::warn!("Auth status unresolved after {:?}, continuing signed out", timeout);
                None
            }
        }
    }
}

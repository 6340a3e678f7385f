//! Identity state shared with the engine's callers.
//!
//! The identity provider itself lives outside this crate; it reports sign-in
//! and sign-out here, and anything that needs the current owner reads it or
//! subscribes to changes.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::models::OwnerId;

/// Cloneable handle to the signed-in owner, if any.
#[derive(Debug, Clone)]
pub struct Session {
    owner: Arc<watch::Sender<Option<OwnerId>>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A signed-out session.
    pub fn new() -> Self {
        let (owner, _) = watch::channel(None);
        Self {
            owner: Arc::new(owner),
        }
    }

    pub fn signed_in(owner: OwnerId) -> Self {
        let session = Self::new();
        session.sign_in(owner);
        session
    }

    pub fn sign_in(&self, owner: OwnerId) {
        tracing::info!("Signed in as {owner}");
        self.owner.send_replace(Some(owner));
    }

    pub fn sign_out(&self) {
        if self.owner.send_replace(None).is_some() {
            tracing::info!("Signed out");
        }
    }

    pub fn current_owner_id(&self) -> Option<OwnerId> {
        self.owner.borrow().clone()
    }

    /// The signed-in owner, or `NotAuthenticated`.
    pub fn require_owner(&self) -> Result<OwnerId> {
        self.current_owner_id().ok_or(Error::NotAuthenticated)
    }

    pub fn is_authenticated(&self) -> bool {
        self.owner.borrow().is_some()
    }

    /// Receive every subsequent sign-in and sign-out.
    pub fn subscribe(&self) -> watch::Receiver<Option<OwnerId>> {
        self.owner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_session_is_signed_out() {
        let session = Session::new();
        assert!(!session.is_authenticated());
        assert!(matches!(session.require_owner(), Err(Error::NotAuthenticated)));
    }

    #[test]
    fn clones_share_state() {
        let session = Session::new();
        let other = session.clone();
        session.sign_in(OwnerId::new("user-1").unwrap());

        assert_eq!(other.current_owner_id(), Some(OwnerId::new("user-1").unwrap()));
        other.sign_out();
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let session = Session::new();
        let mut changes = session.subscribe();

        session.sign_in(OwnerId::new("user-2").unwrap());
        changes.changed().await.unwrap();
        assert_eq!(
            changes.borrow_and_update().clone(),
            Some(OwnerId::new("user-2").unwrap())
        );

        session.sign_out();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), None);
    }
}

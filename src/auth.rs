//! Authentication seam
//!
//! Sign-in itself happens elsewhere; the engine only needs to know who the
//! learner is and when the auth state has settled, so that a fresh load on a
//! new device is not mistaken for a learner with no progress.

use async_trait::async_trait;
use tokio::sync::watch;

/// Learner identity details copied onto the remote document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// What the engine consumes from the auth collaborator
#[async_trait]
pub trait AuthSession: Send + Sync {
    /// Signed-in learner, if any
    fn current_user_id(&self) -> Option<String>;

    /// Resolves once the auth state is known
    async fn settled(&self);

    /// Profile of the signed-in learner
    fn profile(&self) -> Option<UserProfile> {
        None
    }
}

/// Auth state known up front (CLI, tests)
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user_id: Option<String>,
    profile: Option<UserProfile>,
}

impl StaticAuth {
    /// Signed in as `user_id`
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), profile: None }
    }

    /// Nobody signed in
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }
}

#[async_trait]
impl AuthSession for StaticAuth {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    async fn settled(&self) {}

    fn profile(&self) -> Option<UserProfile> {
        self.profile.clone()
    }
}

/// Auth state that settles later, driven by an [`AuthSettler`]
pub struct DeferredAuth {
    rx: watch::Receiver<Option<Option<String>>>,
}

/// Settles a [`DeferredAuth`]
pub struct AuthSettler {
    tx: watch::Sender<Option<Option<String>>>,
}

impl DeferredAuth {
    pub fn new() -> (Self, AuthSettler) {
        let (tx, rx) = watch::channel(None);
        (Self { rx }, AuthSettler { tx })
    }
}

impl AuthSettler {
    /// Publish the settled state: `Some(id)` when signed in, `None` when not
    pub fn settle(&self, user_id: Option<String>) {
        self.tx.send_replace(Some(user_id));
    }
}

#[async_trait]
impl AuthSession for DeferredAuth {
    fn current_user_id(&self) -> Option<String> {
        self.rx.borrow().clone().flatten()
    }

    async fn settled(&self) {
        let mut rx = self.rx.clone();
        // A dropped settler means auth will never resolve further
        let _ = rx.wait_for(|state| state.is_some()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn static_auth_is_settled_immediately() {
        let auth = StaticAuth::signed_in("u1");
        auth.settled().await;
        assert_eq!(auth.current_user_id().as_deref(), Some("u1"));
        assert!(StaticAuth::anonymous().current_user_id().is_none());
    }

    #[tokio::test]
    async fn deferred_auth_waits_for_settler() {
        let (auth, settler) = DeferredAuth::new();
        assert!(auth.current_user_id().is_none());

        let pending = tokio::time::timeout(Duration::from_millis(10), auth.settled()).await;
        assert!(pending.is_err());

        settler.settle(Some("u7".into()));
        auth.settled().await;
        assert_eq!(auth.current_user_id().as_deref(), Some("u7"));
    }
}

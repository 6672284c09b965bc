//! The credential policy is deliberately opaque: this crate only defines
//! the trait boundary, never an implementation. A deployment supplies its
//! own [`PolicyStore`] (a database lookup, an LDAP bind, a static table for
//! tests).

use async_trait::async_trait;

use crate::AuthCode;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Validate `username`/`password`. Returns the code to report, and a
    /// fresh session token when (and only when) the code is `Ok`.
    async fn authenticate(&self, username: &str, password: &str) -> (AuthCode, Option<String>);
}

/// An in-memory policy store over a fixed username/password table. Useful
/// for tests and small deployments; issues a token by formatting
/// `"session-{username}-{counter}"` rather than anything cryptographically
/// meaningful, since the hub treats the token as opaque regardless.
pub struct StaticPolicyStore {
    credentials: std::collections::HashMap<String, String>,
    counter: std::sync::atomic::AtomicU64,
}

impl StaticPolicyStore {
    pub fn new(credentials: std::collections::HashMap<String, String>) -> Self {
        Self {
            credentials,
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PolicyStore for StaticPolicyStore {
    async fn authenticate(&self, username: &str, password: &str) -> (AuthCode, Option<String>) {
        let Some(expected) = self.credentials.get(username) else {
            return (AuthCode::InvalidUsername, None);
        };
        if expected != password {
            return (AuthCode::InvalidPassword, None);
        }
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        (AuthCode::Ok, Some(format!("session-{username}-{n}")))
    }
}

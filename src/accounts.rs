// src/accounts.rs
//! Account linking for third-party sign-ins.
//!
//! The identity provider hands us an [`ExternalIdentity`] on every login;
//! [`link_account`] turns it into a local [`AccountId`] or `None`. Failures are
//! logged, never surfaced to the login flow.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// e.g. "google"
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("identity from {0} carries no e-mail")]
    MissingEmail(String),
    #[error("account backend unavailable: {0}")]
    Unavailable(String),
}

pub trait AccountLinker: Send + Sync {
    fn find_or_create_account(&self, identity: &ExternalIdentity) -> Result<AccountId, AccountError>;
}

/// Called once per login event.
pub fn link_account(linker: &dyn AccountLinker, identity: &ExternalIdentity) -> Option<AccountId> {
    match linker.find_or_create_account(identity) {
        Ok(id) => {
            tracing::debug!(provider = %identity.provider, account = %id, "account linked");
            Some(id)
        }
        Err(e) => {
            tracing::warn!(provider = %identity.provider, error = %e, "account linking failed");
            None
        }
    }
}

/// Accounts keyed by lower-cased e-mail, so the same person signing in through
/// two providers lands on one account.
#[derive(Debug, Default)]
pub struct MemoryAccountLinker {
    by_email: Mutex<HashMap<String, AccountId>>,
}

impl MemoryAccountLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_email.lock().expect("accounts mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccountLinker for MemoryAccountLinker {
    fn find_or_create_account(&self, identity: &ExternalIdentity) -> Result<AccountId, AccountError> {
        let email = identity
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AccountError::MissingEmail(identity.provider.clone()))?;

        let mut accounts = self.by_email.lock().expect("accounts mutex poisoned");
        let next = accounts.len() + 1;
        let id = accounts
            .entry(email)
            .or_insert_with(|| AccountId(format!("acct-{next}")));
        Ok(id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(provider: &str, email: Option<&str>) -> ExternalIdentity {
        ExternalIdentity {
            provider: provider.into(),
            subject: "sub-1".into(),
            email: email.map(String::from),
            display_name: None,
        }
    }

    #[test]
    fn same_email_links_to_same_account() {
        let linker = MemoryAccountLinker::new();
        let a = link_account(&linker, &identity("google", Some("Fan@Example.com")));
        let b = link_account(&linker, &identity("github", Some("fan@example.com ")));
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(linker.len(), 1);
    }

    #[test]
    fn failures_become_none() {
        let linker = MemoryAccountLinker::new();
        assert_eq!(link_account(&linker, &identity("google", None)), None);
        assert!(linker.is_empty());
    }

    struct Down;
    impl AccountLinker for Down {
        fn find_or_create_account(&self, _: &ExternalIdentity) -> Result<AccountId, AccountError> {
            Err(AccountError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn backend_outage_does_not_propagate() {
        assert!(link_account(&Down, &identity("google", Some("a@b.c"))).is_none());
    }
}

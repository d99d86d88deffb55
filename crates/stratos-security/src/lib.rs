//! Authentication collaborator stub.
//!
//! SASL/PLAIN/SCRAM credential storage, mTLS identity extraction, and TLS
//! termination itself are out of the core's scope -- the dispatcher only
//! needs to know *that* a mechanism was accepted and *who* the resulting
//! principal is. This crate supplies that seam (the [`stratos_common::traits::AuthProvider`]
//! trait) plus a default implementation the broker can run with when no real
//! auth collaborator is wired up.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use async_trait::async_trait;
use dashmap::DashMap;
use stratos_common::config::SecurityConfig;
use stratos_common::error::{Error, Result};
use stratos_common::traits::{AuthProvider, Principal};

/// Accepts every handshake unconditionally, naming the principal after the
/// mechanism it was offered. Used when `SecurityConfig::auth_required` is
/// `false` (the default) so the dispatcher's `SaslHandshake`/`SaslAuthenticate`
/// path has something to call without the core ever touching credential
/// storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllAuthProvider;

#[async_trait]
impl AuthProvider for AllowAllAuthProvider {
    async fn authenticate(&self, mechanism: &str, _payload: &[u8]) -> Result<Principal> {
        Ok(Principal {
            name: "anonymous".to_string(),
            mechanism: mechanism.to_string(),
        })
    }
}

/// A minimal static-table `AuthProvider` for the `PLAIN` mechanism, enough to
/// exercise `auth_required = true` in tests without pulling in a real SASL
/// stack. `payload` is `\0username\0password` per the PLAIN mechanism's wire
/// format; credentials are matched verbatim, no hashing.
#[derive(Debug, Default)]
pub struct PlainTableAuthProvider {
    users: DashMap<String, String>,
}

impl PlainTableAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }
}

#[async_trait]
impl AuthProvider for PlainTableAuthProvider {
    async fn authenticate(&self, mechanism: &str, payload: &[u8]) -> Result<Principal> {
        if mechanism != "PLAIN" {
            return Err(Error::Config(format!("unsupported SASL mechanism: {mechanism}")));
        }
        let parts: Vec<&[u8]> = payload.split(|b| *b == 0).collect();
        let (username, password) = match parts.as_slice() {
            [_authzid, username, password] => (*username, *password),
            _ => return Err(Error::Config("malformed PLAIN payload".to_string())),
        };
        let username = String::from_utf8_lossy(username).to_string();
        let password = String::from_utf8_lossy(password).to_string();

        match self.users.get(&username) {
            Some(expected) if *expected == password => Ok(Principal {
                name: username,
                mechanism: mechanism.to_string(),
            }),
            _ => Err(Error::Config("authentication failed".to_string())),
        }
    }
}

/// Builds the `AuthProvider` the dispatcher should use given [`SecurityConfig`]
///: `auth_required = false` gets the allow-all default,
/// `true` gets an empty `PlainTableAuthProvider` the caller is expected to
/// populate (user storage itself is the out-of-scope SASL/SCRAM collaborator).
#[must_use]
pub fn default_auth_provider(config: &SecurityConfig) -> std::sync::Arc<dyn AuthProvider> {
    if config.auth_required {
        std::sync::Arc::new(PlainTableAuthProvider::new())
    } else {
        std::sync::Arc::new(AllowAllAuthProvider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_accepts_anything() {
        let provider = AllowAllAuthProvider;
        let principal = provider.authenticate("PLAIN", b"whatever").await.unwrap();
        assert_eq!(principal.mechanism, "PLAIN");
    }

    #[tokio::test]
    async fn plain_table_checks_credentials() {
        let provider = PlainTableAuthProvider::new();
        provider.add_user("alice", "hunter2");
        let payload = [b"\0alice\0hunter2".as_slice()].concat();
        let principal = provider.authenticate("PLAIN", &payload).await.unwrap();
        assert_eq!(principal.name, "alice");

        let bad_payload = [b"\0alice\0wrong".as_slice()].concat();
        assert!(provider.authenticate("PLAIN", &bad_payload).await.is_err());
    }
}

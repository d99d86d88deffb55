//! Collaborator interfaces the core depends on as trait objects, never as
//! concrete implementations.
//!
//! These traits document the *shape* the core calls through. Their real
//! implementations -- SASL/SCRAM hashing, the REST/Swagger admin surface,
//! tiered-storage archival, audit shipping -- live outside this
//! repository's scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity produced by a successful SASL/mTLS handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub mechanism: String,
}

/// Authenticates `SaslHandshake`/`SaslAuthenticate` requests. The
/// dispatcher calls this and otherwise ignores authentication entirely.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, mechanism: &str, payload: &[u8]) -> Result<Principal>;
}

/// Marker trait for the REST/Swagger administration surface. The core
/// never implements it, only documents the contracts it calls.
pub trait AdminSurface: Send + Sync {}

/// Hook a tiered-storage collaborator implements to archive a sealed segment
/// to object storage. The in-core `Cleaner` calls this (if configured)
/// immediately before unlinking a retention-expired segment.
#[async_trait]
pub trait TieredArchiver: Send + Sync {
    async fn archive_segment(&self, path: &std::path::Path) -> Result<()>;
}

/// One administrative mutation worth auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditEvent {
    TopicCreated { name: String, n_partitions: u32 },
    TopicDeleted { name: String },
    GroupForceDeleted { group_id: String },
}

/// Sink for administrative audit events, called by the coordinator
/// and topic manager. A no-op implementation is the default.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Discards every audit event. The default when no audit collaborator is
/// wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Discards every archive request. The default when no tiered-storage
/// collaborator is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTieredArchiver;

#[async_trait]
impl TieredArchiver for NoopTieredArchiver {
    async fn archive_segment(&self, _path: &std::path::Path) -> Result<()> {
        Ok(())
    }
}

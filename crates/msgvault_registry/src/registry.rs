//! The namespace registry: a process-wide singleton tracking every tenant's
//! id, token hash, physical location, and metadata.
//!
//! Structured the same way `thalo_runtime::command::command_gateway`
//! structures its gateway: a cheaply-cloneable [`RegistryHandle`] wrapping an
//! `mpsc::Sender`, backing a single actor task that owns all mutable state.
//! Serializing every registry operation through one task gives `create`'s
//! atomicity for free — no two creates can race past the uniqueness check.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Db;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::error::{Error, Result};

/// A namespace row as tracked by the registry (spec §3 "Namespace").
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NamespaceRow {
    pub id: String,
    pub token_hash: String,
    pub location: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryMsg>,
}

impl RegistryHandle {
    /// Opens (or creates) the registry's metadata store at `path` and spawns
    /// its actor task. `admin_token_hash` is loaded once here, per spec §9
    /// ("The default admin token is loaded once at init").
    pub fn open(path: impl AsRef<Path>, admin_token_hash: Option<String>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::new(db, admin_token_hash)
    }

    pub fn new(db: Db, admin_token_hash: Option<String>) -> Result<Self> {
        let namespaces = db.open_tree("msgvault:registry:namespaces")?;
        let (sender, receiver) = mpsc::channel(64);

        let actor = Registry {
            db,
            namespaces,
            admin_token_hash,
        };
        tokio::spawn(run_registry(receiver, actor));

        Ok(RegistryHandle { sender })
    }

    pub async fn create(
        &self,
        id: String,
        token_hash: String,
        location: String,
        description: String,
        metadata: serde_json::Value,
    ) -> Result<NamespaceRow> {
        self.call(|reply| RegistryMsg::Create {
            id,
            token_hash,
            location,
            description,
            metadata,
            reply,
        })
        .await
    }

    pub async fn delete(&self, id: String) -> Result<NamespaceRow> {
        self.call(|reply| RegistryMsg::Delete { id, reply }).await
    }

    pub async fn get(&self, id: String) -> Result<Option<NamespaceRow>> {
        self.call(|reply| RegistryMsg::Get { id, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<NamespaceRow>> {
        self.call(|reply| RegistryMsg::List { reply }).await
    }

    /// Resolves a bearer token's hash to a namespace id, the authorization
    /// hook used by the HTTP surface (spec §4.3).
    pub async fn resolve(&self, token_hash: String) -> Result<String> {
        self.call(|reply| RegistryMsg::Resolve { token_hash, reply })
            .await
    }

    /// Verifies `token_hash` against the admin token loaded at init. Always
    /// succeeds when the registry was opened without an admin token
    /// (test mode, spec §4.3).
    pub async fn check_admin(&self, token_hash: Option<String>) -> Result<()> {
        self.call(|reply| RegistryMsg::CheckAdmin { token_hash, reply })
            .await
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> RegistryMsg,
    ) -> Result<T> {
        let (reply, recv) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| Error::ActorStopped)?;
        recv.await.map_err(|_| Error::ActorStopped)?
    }
}

enum RegistryMsg {
    Create {
        id: String,
        token_hash: String,
        location: String,
        description: String,
        metadata: serde_json::Value,
        reply: oneshot::Sender<Result<NamespaceRow>>,
    },
    Delete {
        id: String,
        reply: oneshot::Sender<Result<NamespaceRow>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Result<Option<NamespaceRow>>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<NamespaceRow>>>,
    },
    Resolve {
        token_hash: String,
        reply: oneshot::Sender<Result<String>>,
    },
    CheckAdmin {
        token_hash: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct Registry {
    db: Db,
    namespaces: sled::Tree,
    admin_token_hash: Option<String>,
}

async fn run_registry(mut receiver: mpsc::Receiver<RegistryMsg>, mut registry: Registry) {
    while let Some(msg) = receiver.recv().await {
        match msg {
            RegistryMsg::Create {
                id,
                token_hash,
                location,
                description,
                metadata,
                reply,
            } => {
                let res = registry.create(id, token_hash, location, description, metadata);
                let _ = reply.send(res);
            }
            RegistryMsg::Delete { id, reply } => {
                let res = registry.delete(&id);
                let _ = reply.send(res);
            }
            RegistryMsg::Get { id, reply } => {
                let res = registry.get(&id);
                let _ = reply.send(res);
            }
            RegistryMsg::List { reply } => {
                let res = registry.list();
                let _ = reply.send(res);
            }
            RegistryMsg::Resolve { token_hash, reply } => {
                let res = registry.resolve(&token_hash);
                let _ = reply.send(res);
            }
            RegistryMsg::CheckAdmin { token_hash, reply } => {
                let res = registry.check_admin(token_hash.as_deref());
                let _ = reply.send(res);
            }
        }
    }

    error!("namespace registry actor stopping");
}

impl Registry {
    fn create(
        &mut self,
        id: String,
        token_hash: String,
        location: String,
        description: String,
        metadata: serde_json::Value,
    ) -> Result<NamespaceRow> {
        if self.namespaces.contains_key(id.as_bytes())? {
            return Err(Error::NamespaceExists(id));
        }
        if self.find_by_token_hash(&token_hash)?.is_some() {
            return Err(Error::NamespaceExists(id));
        }

        let row = NamespaceRow {
            id: id.clone(),
            token_hash,
            location,
            description,
            created_at: Utc::now(),
            metadata,
        };
        let encoded = serde_json::to_vec(&row)?;

        // Compare-and-swap guards against a race between the contains_key
        // check above and this insert landing twice for the same id.
        self.namespaces
            .compare_and_swap(id.as_bytes(), None as Option<&[u8]>, Some(encoded))??;
        self.namespaces.flush()?;

        info!(namespace = %row.id, location = %row.location, "namespace created");

        Ok(row)
    }

    fn delete(&mut self, id: &str) -> Result<NamespaceRow> {
        let existing = self
            .namespaces
            .remove(id.as_bytes())?
            .ok_or_else(|| Error::NamespaceNotFound(id.to_string()))?;
        self.namespaces.flush()?;
        let row: NamespaceRow = serde_json::from_slice(&existing)?;

        info!(namespace = %row.id, "namespace deleted");

        Ok(row)
    }

    fn get(&self, id: &str) -> Result<Option<NamespaceRow>> {
        match self.namespaces.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<NamespaceRow>> {
        let mut rows = BTreeMap::new();
        for entry in self.namespaces.iter() {
            let (key, value) = entry?;
            let row: NamespaceRow = serde_json::from_slice(&value)?;
            rows.insert(String::from_utf8_lossy(&key).into_owned(), row);
        }
        Ok(rows.into_values().collect())
    }

    fn resolve(&self, token_hash: &str) -> Result<String> {
        self.find_by_token_hash(token_hash)?
            .map(|row| row.id)
            .ok_or(Error::UnknownToken)
    }

    fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<NamespaceRow>> {
        for entry in self.namespaces.iter() {
            let (_, value) = entry?;
            let row: NamespaceRow = serde_json::from_slice(&value)?;
            if row.token_hash == token_hash {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn check_admin(&self, token_hash: Option<&str>) -> Result<()> {
        match (&self.admin_token_hash, token_hash) {
            (None, _) => Ok(()), // test mode: admin requirement disabled
            (Some(expected), Some(actual)) if expected == actual => Ok(()),
            _ => Err(Error::AdminTokenRequired),
        }
    }

    #[allow(dead_code)]
    fn metadata_db_path(&self) -> Option<PathBuf> {
        self.db.was_recovered().then(|| PathBuf::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_registry() -> RegistryHandle {
        let db = sled::Config::new().temporary(true).open().unwrap();
        RegistryHandle::new(db, None).unwrap()
    }

    #[tokio::test]
    async fn create_then_resolve() {
        let registry = test_registry().await;
        registry
            .create(
                "acme".into(),
                "hash1".into(),
                "ns_acme".into(),
                "Acme Corp".into(),
                json!({}),
            )
            .await
            .unwrap();

        let id = registry.resolve("hash1".into()).await.unwrap();
        assert_eq!(id, "acme");
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = test_registry().await;
        registry
            .create("acme".into(), "h1".into(), "loc".into(), "".into(), json!({}))
            .await
            .unwrap();

        let err = registry
            .create("acme".into(), "h2".into(), "loc2".into(), "".into(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NamespaceExists(_)));
    }

    #[tokio::test]
    async fn duplicate_token_hash_is_rejected() {
        let registry = test_registry().await;
        registry
            .create("acme".into(), "h1".into(), "loc".into(), "".into(), json!({}))
            .await
            .unwrap();

        let err = registry
            .create("other".into(), "h1".into(), "loc2".into(), "".into(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NamespaceExists(_)));
    }

    #[tokio::test]
    async fn delete_then_resolve_fails() {
        let registry = test_registry().await;
        registry
            .create("acme".into(), "h1".into(), "loc".into(), "".into(), json!({}))
            .await
            .unwrap();
        registry.delete("acme".into()).await.unwrap();

        let err = registry.resolve("h1".into()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownToken));
    }

    #[tokio::test]
    async fn delete_missing_namespace_fails() {
        let registry = test_registry().await;
        let err = registry.delete("missing".into()).await.unwrap_err();
        assert!(matches!(err, Error::NamespaceNotFound(_)));
    }

    #[tokio::test]
    async fn admin_check_disabled_in_test_mode() {
        let registry = test_registry().await;
        registry.check_admin(None).await.unwrap();
        registry.check_admin(Some("anything".into())).await.unwrap();
    }

    #[tokio::test]
    async fn admin_check_enforced_when_configured() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let registry = RegistryHandle::new(db, Some("adminhash".into())).unwrap();

        registry.check_admin(Some("adminhash".into())).await.unwrap();
        assert!(registry.check_admin(Some("wrong".into())).await.is_err());
        assert!(registry.check_admin(None).await.is_err());
    }
}

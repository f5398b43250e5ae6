//! Snapshot sources
//!
//! A [`SnapshotSource`] hands the reconciler every raw resource of one kind
//! in one scope. Provider-backed sources go through a caller-supplied
//! [`ClientProvider`]: a client is acquired for the fetch and released after
//! it, so nothing is cached process-wide.

use async_trait::async_trait;
use invhist_core::errors::{ExError, ExErrorKind, Result};
use invhist_core::model::RawResource;
use invhist_core_types::Sensitive;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Every raw resource currently visible in `scope`.
    ///
    /// # Errors
    ///
    /// Any error here fails the whole cycle.
    async fn list(&self, scope: &str) -> Result<Vec<RawResource>>;
}

/// A provider API client, valid for one cycle
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// # Errors
    ///
    /// `ExternalService`, `Timeout` or `Io` on provider failure.
    async fn list(&self, scope: &str) -> Result<Vec<RawResource>>;
}

/// Scoped acquisition of provider clients
#[async_trait]
pub trait ClientProvider: Send + Sync {
    type Client: InventoryClient;

    /// # Errors
    ///
    /// `ExternalService` when no client can be built for `session`.
    async fn acquire(&self, session: &Sensitive<String>) -> Result<Self::Client>;

    async fn release(&self, client: Self::Client);
}

/// Source that acquires a client per fetch and always releases it
pub struct ProviderSource<P: ClientProvider> {
    provider: P,
    session: Sensitive<String>,
}

impl<P: ClientProvider> ProviderSource<P> {
    pub fn new(provider: P, session: Sensitive<String>) -> Self {
        Self { provider, session }
    }
}

#[async_trait]
impl<P: ClientProvider> SnapshotSource for ProviderSource<P> {
    async fn list(&self, scope: &str) -> Result<Vec<RawResource>> {
        let client = self.provider.acquire(&self.session).await?;
        let listed = client.list(scope).await;
        self.provider.release(client).await;
        listed
    }
}

/// Source backed by a JSON file.
///
/// The file holds either an array of raw resources, served for every scope,
/// or an object mapping scope names to arrays.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSource for JsonFileSource {
    async fn list(&self, scope: &str) -> Result<Vec<RawResource>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("read_snapshot_file")
                .with_scope(scope)
                .with_message(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        parse_snapshot(&contents, scope)
    }
}

/// Parse a snapshot document for `scope`.
///
/// # Errors
///
/// `Serialization` when the document is not JSON or has the wrong shape.
pub fn parse_snapshot(contents: &str, scope: &str) -> Result<Vec<RawResource>> {
    let shape_error = |message: String| {
        ExError::new(ExErrorKind::Serialization)
            .with_op("parse_snapshot")
            .with_scope(scope)
            .with_message(message)
    };

    let doc: Value = serde_json::from_str(contents).map_err(|e| shape_error(e.to_string()))?;
    match doc {
        Value::Array(items) => Ok(items.into_iter().map(RawResource::new).collect()),
        Value::Object(mut scopes) => match scopes.remove(scope) {
            Some(Value::Array(items)) => Ok(items.into_iter().map(RawResource::new).collect()),
            Some(_) => Err(shape_error(format!("scope '{}' is not an array", scope))),
            None => Ok(Vec::new()),
        },
        _ => Err(shape_error(
            "snapshot must be an array or an object keyed by scope".to_string(),
        )),
    }
}

/// In-memory source whose contents can be swapped between cycles
#[derive(Default)]
pub struct StaticSource {
    scopes: Mutex<BTreeMap<String, Vec<RawResource>>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace what `scope` will return on the next fetch
    pub fn set(&self, scope: &str, resources: Vec<RawResource>) {
        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.insert(scope.to_string(), resources);
        }
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn list(&self, scope: &str) -> Result<Vec<RawResource>> {
        let scopes = self.scopes.lock().map_err(|_| {
            ExError::new(ExErrorKind::Internal)
                .with_op("static_source_list")
                .with_message("source mutex poisoned")
        })?;
        Ok(scopes.get(scope).cloned().unwrap_or_default())
    }
}

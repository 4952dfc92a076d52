//! Registration store for placed widgets
//!
//! Registrations are keyed by the OS-assigned widget id. The store is
//! read-mostly: composition reads it concurrently while only the init and
//! remove jobs write to it. Two implementations are provided:
//!
//! - [`MemoryRegistry`] for tests and embedding
//! - [`FileRegistry`] persisting every registration as JSON on disk

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::migration;
use super::WidgetRegistration;
use crate::error::{StoreError, StoreResult};

/// Persistent registry of widget instances
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// All registrations, ordered by id
    async fn get_all(&self) -> StoreResult<Vec<WidgetRegistration>>;

    /// Fetch a registration, enrolling a default one if it does not exist yet
    async fn get_or_create(&self, id: i32) -> StoreResult<WidgetRegistration>;

    /// Replace an enrolled registration, rejecting invalid styles
    async fn put(&self, registration: WidgetRegistration) -> StoreResult<()>;

    /// Purge registrations by id; unknown ids are ignored
    async fn remove(&self, ids: &[i32]) -> StoreResult<()>;
}

/// In-memory registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: RwLock<BTreeMap<i32, WidgetRegistration>>,
}

impl MemoryRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with registrations
    pub fn with_registrations(registrations: impl IntoIterator<Item = WidgetRegistration>) -> Self {
        let entries = registrations.into_iter().map(|r| (r.id, r)).collect();
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl RegistrationStore for MemoryRegistry {
    async fn get_all(&self) -> StoreResult<Vec<WidgetRegistration>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn get_or_create(&self, id: i32) -> StoreResult<WidgetRegistration> {
        if let Some(existing) = self.entries.read().await.get(&id) {
            return Ok(existing.clone());
        }
        let mut entries = self.entries.write().await;
        let registration = entries
            .entry(id)
            .or_insert_with(|| {
                debug!(widget_id = id, "Enrolling widget");
                WidgetRegistration::new(id)
            })
            .clone();
        Ok(registration)
    }

    async fn put(&self, registration: WidgetRegistration) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        check_replaceable(&entries, &registration)?;
        entries.insert(registration.id, registration);
        Ok(())
    }

    async fn remove(&self, ids: &[i32]) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }
}

fn check_replaceable(
    entries: &BTreeMap<i32, WidgetRegistration>,
    registration: &WidgetRegistration,
) -> StoreResult<()> {
    if !entries.contains_key(&registration.id) {
        return Err(StoreError::UnknownWidget(registration.id));
    }
    registration
        .style
        .validate()
        .map_err(|reason| StoreError::InvalidStyle {
            widget_id: registration.id,
            reason,
        })
}

/// Registry persisted as a JSON object keyed by widget id
///
/// The whole file is rewritten under the write lock on every mutation, which
/// keeps writes serialized without any multi-key transactions.
pub struct FileRegistry {
    path: PathBuf,
    entries: RwLock<BTreeMap<i32, WidgetRegistration>>,
}

impl FileRegistry {
    /// Open the registry at `path`, migrating legacy content if needed
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => migration::load_registrations(&content)?,
            Ok(_) => BTreeMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            widgets = entries.len(),
            "Widget registry loaded"
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<i32, WidgetRegistration>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let keyed: BTreeMap<String, &WidgetRegistration> =
            entries.iter().map(|(id, r)| (id.to_string(), r)).collect();
        let content = serde_json::to_string_pretty(&keyed)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for FileRegistry {
    async fn get_all(&self) -> StoreResult<Vec<WidgetRegistration>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn get_or_create(&self, id: i32) -> StoreResult<WidgetRegistration> {
        if let Some(existing) = self.entries.read().await.get(&id) {
            return Ok(existing.clone());
        }
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&id) {
            return Ok(existing.clone());
        }
        let registration = WidgetRegistration::new(id);
        entries.insert(id, registration.clone());
        self.persist(&entries).await?;
        debug!(widget_id = id, "Enrolled widget");
        Ok(registration)
    }

    async fn put(&self, registration: WidgetRegistration) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        check_replaceable(&entries, &registration)?;
        entries.insert(registration.id, registration);
        self.persist(&entries).await
    }

    async fn remove(&self, ids: &[i32]) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        for id in ids {
            entries.remove(id);
        }
        if entries.len() != before {
            self.persist(&entries).await?;
        }
        Ok(())
    }
}

//! Client-side storage of access grants, one per show.
//!
//! A grant survives a restart of the flow (the equivalent of a page refresh)
//! so a caller who was admitted is not sent back to the end of the queue.
//! Saving a grant replaces any earlier one for the same show, and expired
//! grants are dropped as soon as they are read.

use crate::error::GrantStoreError;
use crate::types::{AccessGrant, ShowId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Persisted grants keyed by show.
pub trait GrantStore: Send + Sync {
    /// The grant for `show_id`, if one exists and is still valid at `now`.
    ///
    /// An expired grant is removed from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read or rewritten.
    fn load(
        &self,
        show_id: &ShowId,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessGrant>, GrantStoreError>;

    /// Store `grant`, replacing any grant for the same show.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn save(&self, grant: &AccessGrant) -> Result<(), GrantStoreError>;

    /// Forget the grant for `show_id`. Clearing a missing grant is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn clear(&self, show_id: &ShowId) -> Result<(), GrantStoreError>;
}

/// Grants kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    grants: Mutex<HashMap<ShowId, AccessGrant>>,
}

impl InMemoryGrantStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grants, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no grants
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GrantStore for InMemoryGrantStore {
    fn load(
        &self,
        show_id: &ShowId,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessGrant>, GrantStoreError> {
        let mut grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
        match grants.get(show_id) {
            Some(grant) if grant.is_valid_at(now) => Ok(Some(grant.clone())),
            Some(_) => {
                grants.remove(show_id);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    fn save(&self, grant: &AccessGrant) -> Result<(), GrantStoreError> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(grant.show_id.clone(), grant.clone());
        Ok(())
    }

    fn clear(&self, show_id: &ShowId) -> Result<(), GrantStoreError> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(show_id);
        Ok(())
    }
}

/// Grants kept in a JSON file (`{ "<showId>": { accessToken, expiresAt, .. } }`)
///
/// Writes go to a sibling temporary file which is then renamed over the
/// original, so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileGrantStore {
    path: PathBuf,
    lock: Mutex<()>,
}

type GrantFile = BTreeMap<ShowId, AccessGrant>;

impl FileGrantStore {
    /// Use the file at `path`; it is created on first write
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<GrantFile, GrantStoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(GrantFile::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(GrantFile::new()),
            Err(error) => Err(error.into()),
        }
    }

    fn write(&self, grants: &GrantFile) -> Result<(), GrantStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(grants)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut GrantFile) -> (T, bool),
    ) -> Result<T, GrantStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut grants = self.read()?;
        let (value, dirty) = f(&mut grants);
        if dirty {
            self.write(&grants)?;
        }
        Ok(value)
    }
}

impl GrantStore for FileGrantStore {
    fn load(
        &self,
        show_id: &ShowId,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessGrant>, GrantStoreError> {
        self.update(|grants| {
            let before = grants.len();
            grants.retain(|_, grant| grant.is_valid_at(now));
            (grants.get(show_id).cloned(), grants.len() != before)
        })
    }

    fn save(&self, grant: &AccessGrant) -> Result<(), GrantStoreError> {
        self.update(|grants| {
            grants.insert(grant.show_id.clone(), grant.clone());
            ((), true)
        })
    }

    fn clear(&self, show_id: &ShowId) -> Result<(), GrantStoreError> {
        self.update(|grants| ((), grants.remove(show_id).is_some()))
    }
}

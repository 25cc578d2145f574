//! Simple file-backed [`RefreshTokenStore`] for single-instance deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{CacheKey, RefreshTokenPayload},
	store::{self, RefreshTokenStore, SaveOutcome, StoreError, StoreFuture},
};

type Snapshot = HashMap<CacheKey, RefreshTokenPayload>;

/// Persists refresh-token payloads to a JSON file after each mutation.
///
/// Every write replaces the file atomically (temp file, fsync, rename), so a crash leaves either
/// the previous or the new snapshot on disk.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the JSON snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(HashMap::new());
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(HashMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;
		let entries: Vec<(CacheKey, RefreshTokenPayload)> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(entries.into_iter().collect())
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Snapshot) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let mut snapshot: Vec<_> = contents.iter().collect();

		snapshot.sort_by(|a, b| a.0.cmp(b.0));

		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl RefreshTokenStore for FileStore {
	fn load<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<RefreshTokenPayload>> {
		Box::pin(async move { Ok(self.inner.read().get(key).cloned()) })
	}

	fn save<'a>(
		&'a self,
		key: &'a CacheKey,
		expected_refresh: &'a str,
		replacement: RefreshTokenPayload,
	) -> StoreFuture<'a, SaveOutcome> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let previous = guard.get(key).cloned();
			let outcome = store::compare_and_swap(&mut guard, key, expected_refresh, replacement);

			if matches!(outcome, SaveOutcome::Updated)
				&& let Err(e) = self.persist_locked(&guard)
			{
				// Keep memory and disk in agreement when the write fails.
				if let Some(previous) = previous {
					guard.insert(key.clone(), previous);
				}

				return Err(e);
			}

			Ok(outcome)
		})
	}

	fn put<'a>(&'a self, key: &'a CacheKey, payload: RefreshTokenPayload) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.insert(key.clone(), payload);
			self.persist_locked(&guard)
		})
	}

	fn remove<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<RefreshTokenPayload>> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let removed = guard.remove(key);

			if removed.is_some() {
				self.persist_locked(&guard)?;
			}

			Ok(removed)
		})
	}
}

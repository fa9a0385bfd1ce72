use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::address::{Address, parse_address};
use crate::errors::PersistenceError;

/// Component tag → deployed address.
pub type AddressTable = BTreeMap<String, Address>;

/// Step tag → completed.
pub type ProgressTable = BTreeMap<String, bool>;

pub const ADDRESS_FILE: &str = "address.json";
pub const PROGRESS_FILE: &str = "progress.json";

/// In-memory view of both checkpoint documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub addresses: AddressTable,
    pub progress: ProgressTable,
}

impl Checkpoint {
    pub fn is_complete(&self, tag: &str) -> bool {
        self.progress.get(tag).copied().unwrap_or(false)
    }

    pub fn address_of(&self, tag: &str) -> Option<Address> {
        self.addresses.get(tag).copied()
    }

    pub fn mark_complete(&mut self, tag: &str) {
        self.progress.insert(tag.to_string(), true);
    }

    /// Record a freshly deployed address. An existing entry is never
    /// replaced; the existing address is returned instead.
    pub fn record_address(&mut self, tag: &str, address: Address) -> Address {
        *self.addresses.entry(tag.to_string()).or_insert(address)
    }

    /// Tags marked complete, in tag order.
    pub fn completed_tags(&self) -> Vec<&str> {
        self.progress
            .iter()
            .filter(|(_, done)| **done)
            .map(|(tag, _)| tag.as_str())
            .collect()
    }
}

/// Durable storage for a network's checkpoint: `address.json` and
/// `progress.json` in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    address_file: PathBuf,
    progress_file: PathBuf,
}

impl CheckpointStore {
    pub fn new(address_file: PathBuf, progress_file: PathBuf) -> Self {
        Self {
            address_file,
            progress_file,
        }
    }

    /// Store rooted at `<state_dir>/<network>/`.
    pub fn for_network(state_dir: &Path, network: &str) -> Self {
        let dir = state_dir.join(network);
        Self::new(dir.join(ADDRESS_FILE), dir.join(PROGRESS_FILE))
    }

    pub fn address_file(&self) -> &Path {
        &self.address_file
    }

    pub fn progress_file(&self) -> &Path {
        &self.progress_file
    }

    fn read_document<T: serde::de::DeserializeOwned + Default>(
        path: &Path,
    ) -> Result<T, PersistenceError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&content).map_err(|source| PersistenceError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load both tables. Missing documents yield empty tables.
    pub fn load(&self) -> Result<Checkpoint, PersistenceError> {
        let raw_addresses: BTreeMap<String, String> = Self::read_document(&self.address_file)?;
        let progress: ProgressTable = Self::read_document(&self.progress_file)?;

        let mut addresses = AddressTable::new();
        for (tag, raw) in raw_addresses {
            let address =
                parse_address(&raw).map_err(|source| PersistenceError::InvalidAddress {
                    path: self.address_file.clone(),
                    tag: tag.clone(),
                    source,
                })?;
            addresses.insert(tag, address);
        }

        Ok(Checkpoint {
            addresses,
            progress,
        })
    }

    /// Replace a document with `value`, via a temp file in the same
    /// directory so readers never see a partial write.
    fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
        let write_err = |source: std::io::Error| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(write_err)?;

        let mut content = serde_json::to_vec_pretty(value)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        content.push(b'\n');

        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
        temp.write_all(&content).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    /// Persist both tables, fully overwriting previous content. Addresses
    /// are written in checksum form.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        let addresses: BTreeMap<&str, String> = checkpoint
            .addresses
            .iter()
            .map(|(tag, address)| (tag.as_str(), address.to_checksum(None)))
            .collect();
        Self::write_document(&self.address_file, &addresses)?;
        Self::write_document(&self.progress_file, &checkpoint.progress)?;
        Ok(())
    }

    /// Forget step progress but keep recorded addresses, so already-deployed
    /// contracts are adopted instead of redeployed on the next run.
    pub fn reset_progress(&self) -> Result<bool, PersistenceError> {
        Self::remove(&self.progress_file)
    }

    /// Delete both documents.
    pub fn reset_all(&self) -> Result<bool, PersistenceError> {
        let progress = Self::remove(&self.progress_file)?;
        let addresses = Self::remove(&self.address_file)?;
        Ok(progress || addresses)
    }

    fn remove(path: &Path) -> Result<bool, PersistenceError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(PersistenceError::Write {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

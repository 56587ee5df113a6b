use anyhow::Result;
use err_derive::Error;
use log::*;
use serde::{de::DeserializeOwned, Serialize};

use crate::documents::{HasMeta, Version};
use crate::ids::{Entity, Id};

#[derive(Debug, Error, PartialEq, Eq)]
#[error(display = "stale version")]
pub struct ConcurrencyError;

/// What the domain sees of the store: create/overwrite guarded by the
/// document's version, point loads by id, and whole-collection scans by
/// entity prefix. Anything fancier is the caller's problem, client-side.
pub trait Storage {
    fn save<D: Serialize + HasMeta>(&self, document: &mut D) -> Result<()>;
    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>>;
    fn load_all<D: DeserializeOwned + Entity>(&self) -> Result<Vec<D>>;
}

/// A handle onto the underlying store; one per pooled connection.
#[derive(Debug, Clone)]
pub struct Documents {
    db: sled::Db,
}

#[derive(Debug, Clone)]
pub struct DocumentConnectionManager {
    db: sled::Db,
}

/// True when the error is (or wraps) a stale-version failure, ie the caller
/// should reload and retry rather than give up.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    err.root_cause().downcast_ref::<ConcurrencyError>().is_some()
}

impl DocumentConnectionManager {
    pub fn new(db: sled::Db) -> Self {
        DocumentConnectionManager { db }
    }
}

impl r2d2::ManageConnection for DocumentConnectionManager {
    type Connection = Documents;
    type Error = sled::Error;

    fn connect(&self) -> Result<Documents, Self::Error> {
        Ok(Documents::wrap(self.db.clone()))
    }

    fn is_valid(&self, _conn: &mut Documents) -> Result<(), Self::Error> {
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Documents) -> bool {
        false
    }
}

impl Documents {
    pub fn wrap(db: sled::Db) -> Self {
        Documents { db }
    }

    pub fn get_ref(&self) -> &sled::Db {
        &self.db
    }

    pub fn setup(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Storage for Documents {
    fn save<D: Serialize + HasMeta>(&self, document: &mut D) -> Result<()> {
        let key = document.meta().id.to_string();
        let expected = document.meta().version.clone();
        let prev = self.db.get(key.as_bytes())?;

        match &prev {
            Some(bytes) => {
                let stored: serde_json::Value = serde_json::from_slice(bytes)?;
                let stored_version = stored
                    .get("_version")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if expected.as_str() != stored_version {
                    debug!(
                        "Version mismatch on {}: ours:{:?}; stored:{:?}",
                        key, expected, stored_version
                    );
                    return Err(ConcurrencyError.into());
                }
            }
            None => {
                if !expected.is_initial() {
                    debug!("New document {} claims version {:?}", key, expected);
                    return Err(ConcurrencyError.into());
                }
            }
        }

        document.meta_mut().version = Version::from_sequence(self.db.generate_id()?);
        let body = serde_json::to_vec(&*document)?;

        let swapped = self
            .db
            .compare_and_swap(key.as_bytes(), prev.as_deref(), Some(body))?;
        if swapped.is_err() {
            // Someone else got in between our read and the swap.
            document.meta_mut().version = expected;
            return Err(ConcurrencyError.into());
        }
        self.db.flush()?;
        trace!("Saved {} at {:?}", key, document.meta().version);
        Ok(())
    }

    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>> {
        let key = id.to_string();
        match self.db.get(key.as_bytes())? {
            Some(bytes) => {
                let doc = serde_json::from_slice(&bytes)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn load_all<D: DeserializeOwned + Entity>(&self) -> Result<Vec<D>> {
        let prefix = format!("{}-", D::PREFIX);
        let mut result = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_key, bytes) = entry?;
            result.push(serde_json::from_slice(&bytes)?);
        }
        Ok(result)
    }
}

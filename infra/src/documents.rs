use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::ids::{Entity, Id};

/// Opaque optimistic-concurrency token. Empty means "never saved"; the store
/// assigns a fresh value on every successful save.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash)]
pub struct Version(String);

impl Version {
    pub(crate) fn from_sequence(seq: u64) -> Self {
        Version(format!("{:x}", seq))
    }

    pub fn is_initial(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity and version of a document, flattened into its body as `_id` and
/// `_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(bound = "T: Entity")]
pub struct DocMeta<T> {
    #[serde(rename = "_id")]
    pub id: Id<T>,
    #[serde(rename = "_version")]
    pub version: Version,
    #[serde(skip)]
    _phantom: PhantomData<T>,
}

impl<T> Default for DocMeta<T> {
    fn default() -> Self {
        DocMeta {
            id: Default::default(),
            version: Default::default(),
            _phantom: PhantomData,
        }
    }
}

impl<T> DocMeta<T> {
    pub fn new_with_id(id: Id<T>) -> Self {
        DocMeta {
            id,
            version: Version::default(),
            _phantom: PhantomData,
        }
    }
}

pub trait HasMeta: Entity + Sized {
    fn meta(&self) -> &DocMeta<Self>;
    fn meta_mut(&mut self) -> &mut DocMeta<Self>;
}

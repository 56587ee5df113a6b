use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use anyhow::bail;
use err_derive::Error;
use rand::distributions::{Distribution, Standard};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::untyped_ids::UntypedId;

/// Implemented by every document type; the prefix namespaces its ids, so
/// `to_string` yields `prefix-<base64url>` and a prefix scan over the store
/// walks one collection.
pub trait Entity {
    const PREFIX: &'static str;
}

pub struct Id<T> {
    pub(crate) val: UntypedId,
    pub(crate) phantom: PhantomData<T>,
}

#[derive(Debug, Clone, Error)]
pub enum IdParseError {
    #[error(display = "invalid prefix")]
    InvalidPrefix,
    #[error(display = "unparseable id")]
    Unparseable,
}

/// Mints fresh identifiers. Stateless; the timestamp half comes from the
/// clock and the rest from `rand`.
#[derive(Debug, Clone, Default)]
pub struct IdGen;

const DIVIDER: &str = "-";

impl IdGen {
    pub fn new() -> Self {
        IdGen
    }

    pub fn generate<T>(&self) -> Id<T> {
        self.untyped().typed()
    }

    pub fn untyped(&self) -> UntypedId {
        UntypedId::generate()
    }
}

impl<T> Id<T> {
    pub fn hashed<H: Hash>(entity: &H) -> Self {
        UntypedId::hashed(entity).typed()
    }

    pub fn untyped(&self) -> UntypedId {
        self.val
    }
}

impl<T> Distribution<Id<T>> for Standard {
    fn sample<R: ?Sized + rand::Rng>(&self, rng: &mut R) -> Id<T> {
        rng.gen::<UntypedId>().typed()
    }
}

impl<T: Entity> fmt::Display for Id<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}{}", T::PREFIX, DIVIDER, self.val)
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Id").field("val", &self.val).finish()
    }
}

impl<T: Entity> std::str::FromStr for Id<T> {
    type Err = anyhow::Error;
    fn from_str(src: &str) -> Result<Self, Self::Err> {
        if T::PREFIX.len() > src.len() {
            bail!(IdParseError::InvalidPrefix);
        }
        let (start, remainder) = src.split_at(T::PREFIX.len());
        if start != T::PREFIX {
            bail!(IdParseError::InvalidPrefix);
        }
        if remainder.len() < DIVIDER.len() {
            bail!(IdParseError::Unparseable);
        }
        let (divider, encoded) = remainder.split_at(DIVIDER.len());
        if divider != DIVIDER {
            bail!(IdParseError::Unparseable);
        }

        let val = encoded
            .parse::<UntypedId>()
            .map_err(|_| IdParseError::Unparseable)?;
        Ok(val.typed())
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        UntypedId::default().typed()
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.val == other.val
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.val.cmp(&other.val)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.val.hash(state)
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Id {
            val: self.val,
            phantom: self.phantom,
        }
    }
}

impl<T> Copy for Id<T> {}

impl<T: Entity> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de, T: Entity> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdStrVisitor<T>(PhantomData<T>);
        impl<'vi, T: Entity> de::Visitor<'vi> for IdStrVisitor<T> {
            type Value = Id<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an Id string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Id<T>, E> {
                value.parse::<Id<T>>().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(IdStrVisitor(PhantomData))
    }
}

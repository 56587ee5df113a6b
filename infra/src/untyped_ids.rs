use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::marker::PhantomData;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::bail;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use data_encoding::BASE64URL_NOPAD;
use err_derive::Error;
use rand::distributions::{Distribution, Standard};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::Id;

/// The raw 128-bit identifier underneath `Id<T>`: a big-endian nanosecond
/// timestamp in the top half and 64 random bits in the bottom. Byte order is
/// therefore creation order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UntypedId {
    pub(crate) val: [u8; 16],
}

#[derive(Debug, Error)]
#[error(display = "unparseable identifier")]
pub struct UnparseableId;

const ENCODED_LEN: usize = 22;

impl UntypedId {
    pub(crate) fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let mut val = [0u8; 16];
        BigEndian::write_u64(&mut val[0..8], nanos);
        BigEndian::write_u64(&mut val[8..16], rand::random::<u64>());
        UntypedId { val }
    }

    pub fn hashed<H: Hash>(entity: &H) -> Self {
        let mut val = [0u8; 16];
        {
            let mut cursor = io::Cursor::new(&mut val as &mut [u8]);
            for i in 0..2 {
                let mut h = siphasher::sip::SipHasher24::new_with_keys(0, i as u64);
                entity.hash(&mut h);
                cursor
                    .write_u64::<BigEndian>(h.finish())
                    .expect("write_u64 to fixed size buffer should never fail");
            }
        }
        UntypedId { val }
    }

    pub fn timestamp(&self) -> SystemTime {
        let nanos = BigEndian::read_u64(&self.val[0..8]);
        UNIX_EPOCH + Duration::from_nanos(nanos)
    }

    pub fn random(&self) -> u64 {
        BigEndian::read_u64(&self.val[8..16])
    }

    pub fn typed<T>(self) -> Id<T> {
        Id {
            val: self,
            phantom: PhantomData,
        }
    }
}

impl Distribution<UntypedId> for Standard {
    fn sample<R: ?Sized + rand::Rng>(&self, rng: &mut R) -> UntypedId {
        UntypedId { val: rng.gen() }
    }
}

impl fmt::Display for UntypedId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", BASE64URL_NOPAD.encode(&self.val))
    }
}

impl fmt::Debug for UntypedId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_tuple("UntypedId").field(&self.to_string()).finish()
    }
}

impl std::str::FromStr for UntypedId {
    type Err = anyhow::Error;
    fn from_str(src: &str) -> Result<Self, Self::Err> {
        if src.len() != ENCODED_LEN {
            bail!(UnparseableId);
        }
        let bytes = BASE64URL_NOPAD
            .decode(src.as_bytes())
            .map_err(|_| UnparseableId)?;
        let mut val = [0u8; 16];
        if bytes.len() != val.len() {
            bail!(UnparseableId);
        }
        val.copy_from_slice(&bytes);
        Ok(UntypedId { val })
    }
}

impl Serialize for UntypedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UntypedId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdStrVisitor;
        impl<'vi> de::Visitor<'vi> for IdStrVisitor {
            type Value = UntypedId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an identifier string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<UntypedId, E> {
                value.parse::<UntypedId>().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(IdStrVisitor)
    }
}

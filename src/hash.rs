// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical BLAKE3 Hashing
//!
//! BLAKE3 is the only hash used by the cage. Entry chains, Merkle trees,
//! policy digests, cage identifiers and the execution hash all go through
//! this module so that two machines always agree on every digest.
//!
//! Every digest is domain separated: the domain tag is length-prefixed and
//! absorbed before any data, so a payload hash can never be confused with
//! an entry hash or a Merkle node.
//!
//! # Encoding rules
//! ```text
//! integers     little endian, fixed width
//! byte slices  u64 LE length, then the bytes
//! hashes       32 raw bytes, no prefix
//! ```

use serde::{Deserialize, Deserializer, Serializer};

/// 32-byte BLAKE3 digest.
pub type Hash = [u8; 32];

/// Hash of an arbitrary byte slice with no domain tag.
pub fn hash_bytes(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Hash of `data` under a domain tag.
pub fn domain_hash(domain: &str, data: &[u8]) -> Hash {
    let mut hasher = CanonicalHasher::new(domain);
    hasher.update_raw(data);
    hasher.finalize()
}

/// Incremental hasher enforcing the canonical field encoding.
pub struct CanonicalHasher {
    inner: blake3::Hasher,
}

impl CanonicalHasher {
    pub fn new(domain: &str) -> Self {
        let mut inner = blake3::Hasher::new();
        inner.update(&(domain.len() as u32).to_le_bytes());
        inner.update(domain.as_bytes());
        Self { inner }
    }

    pub fn update_u8(&mut self, v: u8) -> &mut Self {
        self.inner.update(&[v]);
        self
    }

    pub fn update_u32(&mut self, v: u32) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    pub fn update_i32(&mut self, v: i32) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    pub fn update_u64(&mut self, v: u64) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    /// Length-prefixed bytes.
    pub fn update_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn update_hash(&mut self, hash: &Hash) -> &mut Self {
        self.inner.update(hash);
        self
    }

    /// Optional hash: presence marker, then the hash if present.
    pub fn update_opt_hash(&mut self, hash: Option<&Hash>) -> &mut Self {
        match hash {
            Some(h) => {
                self.inner.update(&[1]);
                self.inner.update(h);
            }
            None => {
                self.inner.update(&[0]);
            }
        }
        self
    }

    fn update_raw(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(&self) -> Hash {
        *self.inner.finalize().as_bytes()
    }
}

pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Short form for logs and tables.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}

pub fn from_hex(s: &str) -> Result<Hash, hex::FromHexError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s.trim().trim_start_matches("0x"), &mut out)?;
    Ok(out)
}

/// Serde adapter writing a `Hash` as a hex string.
pub mod serde_hex {
    use super::*;

    pub fn serialize<S: Serializer>(hash: &Hash, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&to_hex(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(d)?;
        from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter writing an `Option<Hash>` as a hex string or null.
pub mod serde_hex_opt {
    use super::*;

    pub fn serialize<S: Serializer>(hash: &Option<Hash>, s: S) -> Result<S::Ok, S::Error> {
        match hash {
            Some(h) => s.serialize_some(&to_hex(h)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Hash>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        s.map(|s| from_hex(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_separation() {
        let a = domain_hash("cage/a", b"payload");
        let b = domain_hash("cage/b", b"payload");
        assert_ne!(a, b);
        assert_ne!(a, hash_bytes(b"payload"));
    }

    #[test]
    fn test_length_prefix_prevents_concatenation_collisions() {
        let mut h1 = CanonicalHasher::new("t");
        h1.update_bytes(b"ab").update_bytes(b"c");
        let mut h2 = CanonicalHasher::new("t");
        h2.update_bytes(b"a").update_bytes(b"bc");
        assert_ne!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = hash_bytes(b"test data");
        assert_eq!(from_hex(&to_hex(&h)).unwrap(), h);
        assert_eq!(from_hex(&format!("0x{}", to_hex(&h))).unwrap(), h);
        assert!(from_hex("abcd").is_err());
    }
}

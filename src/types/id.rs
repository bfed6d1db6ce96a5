// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity types.

use crate::config::DOMAIN_CAGE_ID;
use crate::hash::domain_hash;
use std::fmt;
use std::str::FromStr;

/// Content address of a cage: the first 16 bytes of the domain hash of its
/// canonical configuration document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CageId(pub [u8; 16]);

impl CageId {
    pub fn from_canonical_config(bytes: &[u8]) -> Self {
        let digest = domain_hash(DOMAIN_CAGE_ID, bytes);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        CageId(id)
    }
}

impl fmt::Display for CageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for CageId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = [0u8; 16];
        hex::decode_to_slice(s.trim(), &mut id)?;
        Ok(CageId(id))
    }
}

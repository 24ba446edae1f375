//! The textual session key format.
//!
//! SOP exchanges session keys as `<decimal-cipher-octet> ":"
//! <hex-session-key>`, e.g. `9:FCA4BEAF687F48059CACC14FB019125CD57392BAB7037C707835925CBF9F7BCD`.

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use anyhow::Context;

use sequoia_openpgp as openpgp;
use openpgp::crypto;
use openpgp::fmt::hex;
use openpgp::types::SymmetricAlgorithm;

use crate::{Error, Result};

/// The symmetric algorithms we accept in session keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKeyAlgorithm {
    TripleDES,
    CAST5,
    AES128,
    AES192,
    AES256,
}

impl SessionKeyAlgorithm {
    /// All supported algorithms, in ascending order of their ids.
    pub const ALL: [SessionKeyAlgorithm; 5] = [
        SessionKeyAlgorithm::TripleDES,
        SessionKeyAlgorithm::CAST5,
        SessionKeyAlgorithm::AES128,
        SessionKeyAlgorithm::AES192,
        SessionKeyAlgorithm::AES256,
    ];

    /// Returns the OpenPGP algorithm id.
    pub fn id(self) -> u8 {
        u8::from(SymmetricAlgorithm::from(self))
    }
}

impl From<SessionKeyAlgorithm> for SymmetricAlgorithm {
    fn from(a: SessionKeyAlgorithm) -> Self {
        match a {
            SessionKeyAlgorithm::TripleDES => SymmetricAlgorithm::TripleDES,
            SessionKeyAlgorithm::CAST5 => SymmetricAlgorithm::CAST5,
            SessionKeyAlgorithm::AES128 => SymmetricAlgorithm::AES128,
            SessionKeyAlgorithm::AES192 => SymmetricAlgorithm::AES192,
            SessionKeyAlgorithm::AES256 => SymmetricAlgorithm::AES256,
        }
    }
}

impl TryFrom<SymmetricAlgorithm> for SessionKeyAlgorithm {
    type Error = anyhow::Error;

    fn try_from(a: SymmetricAlgorithm) -> Result<Self> {
        match a {
            SymmetricAlgorithm::TripleDES => Ok(SessionKeyAlgorithm::TripleDES),
            SymmetricAlgorithm::CAST5 => Ok(SessionKeyAlgorithm::CAST5),
            SymmetricAlgorithm::AES128 => Ok(SessionKeyAlgorithm::AES128),
            SymmetricAlgorithm::AES192 => Ok(SessionKeyAlgorithm::AES192),
            SymmetricAlgorithm::AES256 => Ok(SessionKeyAlgorithm::AES256),
            a => Err(anyhow::Error::from(Error::InvalidAlgorithm))
                .context(format!("{} cannot be used in session keys", a)),
        }
    }
}

impl TryFrom<u64> for SessionKeyAlgorithm {
    type Error = anyhow::Error;

    fn try_from(id: u64) -> Result<Self> {
        SessionKeyAlgorithm::ALL.iter()
            .find(|a| u64::from(a.id()) == id)
            .cloned()
            .ok_or_else(|| anyhow::Error::from(Error::InvalidAlgorithm))
            .context(format!("Unsupported session key algorithm {}", id))
    }
}

/// A session key together with its symmetric algorithm.
///
/// The key material is held in a [`crypto::SessionKey`], which is
/// cleared when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    algo: SessionKeyAlgorithm,
    key: crypto::SessionKey,
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("algo", &self.algo)
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .finish()
    }
}

impl SessionKey {
    /// Creates a session key.
    pub fn new<K>(algo: SessionKeyAlgorithm, key: K) -> Self
        where K: Into<crypto::SessionKey>
    {
        SessionKey {
            algo,
            key: key.into(),
        }
    }

    /// Returns the symmetric algorithm.
    pub fn algo(&self) -> SessionKeyAlgorithm {
        self.algo
    }

    /// Returns the key material.
    pub fn key(&self) -> &crypto::SessionKey {
        &self.key
    }
}

impl FromStr for SessionKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algo, key) = s.trim().split_once(':')
            .ok_or_else(|| anyhow::Error::from(Error::InvalidSessionKeyFormat))
            .context("Expected <algorithm>:<hex key>")?;

        let id: u64 = algo.parse().map_err(|_| Error::InvalidSessionKeyFormat)
            .context(format!("Algorithm {:?} is not a decimal number", algo))?;
        let algo = SessionKeyAlgorithm::try_from(id)?;

        if key.len() % 2 != 0 {
            return Err(anyhow::Error::from(Error::InvalidHex))
                .context("Session key has an odd number of hex digits");
        }
        let key = hex::decode(key).map_err(|_| Error::InvalidHex)
            .context("Failed to parse session key")?;

        Ok(SessionKey::new(algo, key))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.algo.id(), hex::encode(&self.key))
    }
}

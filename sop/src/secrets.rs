//! Selects the secret that drives decryption.
//!
//! Exactly one of a session key, a password, or a set of secret keys
//! is used.  They are considered in that order.

use std::fmt;

use anyhow::Context;

use sequoia_openpgp as openpgp;
use openpgp::{
    Cert,
    Fingerprint,
    KeyID,
};
use openpgp::crypto::Password;
use openpgp::packet::{key, Key};
use openpgp::policy::Policy;

use crate::{
    Error,
    Result,
    cli::{DecryptConfig, load_indirect, load_keys},
    session_key::SessionKey,
};

/// Where the secret comes from.
///
/// This is the unresolved form: nothing has been read yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource<'a> {
    /// A session key token.
    SessionKey(&'a str),
    /// A password for the SKESKs.
    Password(&'a str),
    /// Secret keys, optionally locked with a password.
    KeyRing {
        keys: &'a [String],
        password: Option<&'a str>,
    },
}

impl<'a> SecretSource<'a> {
    /// Selects the secret source from the configuration.
    ///
    /// Fails with [`Error::MissingSecret`] if there is none.
    pub fn select(config: &'a DecryptConfig) -> Result<Self> {
        if let Some(sk) = config.with_session_key.as_deref() {
            Ok(SecretSource::SessionKey(sk))
        } else if let Some(p) = config.with_password.as_deref() {
            Ok(SecretSource::Password(p))
        } else if ! config.key.is_empty() {
            Ok(SecretSource::KeyRing {
                keys: &config.key,
                password: config.with_key_password.as_deref(),
            })
        } else {
            Err(anyhow::Error::from(Error::MissingSecret))
                .context("Please provide decryption keys, session key, \
                          or password")
        }
    }

    /// Reads and, if necessary, unlocks the secret.
    pub fn resolve(self, policy: &dyn Policy) -> Result<Secret> {
        match self {
            SecretSource::SessionKey(r) => {
                let token = load_indirect(r)?;
                let token = String::from_utf8(token)
                    .map_err(|_| Error::InvalidSessionKeyFormat)
                    .context("Session key is not UTF-8")?;
                Ok(Secret::SessionKey(token.parse()?))
            },
            SecretSource::Password(r) => Ok(Secret::Password(read_password(r)?)),
            SecretSource::KeyRing { keys, password } => {
                let password = password.map(read_password).transpose()?;
                let certs = load_keys(keys)?;
                Ok(Secret::KeyRing(KeyRing::unlock(policy, certs,
                                                   password.as_ref())?))
            },
        }
    }
}

/// Reads a password, stripping surrounding whitespace.
fn read_password(r: &str) -> Result<Password> {
    let p = load_indirect(r)?;
    let p = String::from_utf8(p).map_err(|_| Error::BadData)
        .context(format!("Password in {:?} is not UTF-8", r))?;
    Ok(p.trim().into())
}

/// The resolved secret.
pub enum Secret {
    SessionKey(SessionKey),
    Password(Password),
    KeyRing(KeyRing),
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Secret::SessionKey(sk) =>
                f.debug_tuple("SessionKey").field(sk).finish(),
            Secret::Password(_) =>
                f.debug_tuple("Password").field(&"<redacted>").finish(),
            Secret::KeyRing(ring) =>
                f.debug_tuple("KeyRing").field(ring).finish(),
        }
    }
}

/// An unlocked secret (sub)key.
pub struct UnlockedKey {
    key: Key<key::SecretParts, key::UnspecifiedRole>,
    cert: Fingerprint,
}

impl UnlockedKey {
    /// Returns the key.
    pub fn key(&self) -> &Key<key::SecretParts, key::UnspecifiedRole> {
        &self.key
    }

    /// Returns the fingerprint of the certificate the key belongs to.
    pub fn cert(&self) -> &Fingerprint {
        &self.cert
    }
}

/// Unlocked decryption keys.
///
/// The secret key material is scrubbed when the key ring is dropped.
pub struct KeyRing {
    keys: Vec<UnlockedKey>,
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| k.key.fingerprint()))
            .finish()
    }
}

impl KeyRing {
    /// Collects and unlocks the decryption-capable secret keys.
    ///
    /// Every locked key must be unlocked using `password`, otherwise
    /// this fails with [`Error::KeyUnlockFailure`].
    pub fn unlock(policy: &dyn Policy, certs: Vec<Cert>,
                  password: Option<&Password>)
                  -> Result<Self>
    {
        let mut ring = KeyRing { keys: Vec::new() };
        for tsk in certs {
            for ka in tsk.keys().secret()
                .with_policy(policy, None)
                .supported()
                .for_transport_encryption().for_storage_encryption()
            {
                let key: Key<key::SecretParts, key::UnspecifiedRole> =
                    ka.key().clone().into();
                let key = if key.secret().is_encrypted() {
                    let fp = key.fingerprint();
                    let password = password
                        .ok_or_else(|| anyhow::Error::from(Error::KeyUnlockFailure))
                        .context(format!("Key {} is locked, but no key \
                                          password was given", fp))?;
                    key.decrypt_secret(password)
                        .map_err(|_| Error::KeyUnlockFailure)
                        .context(format!("Bad password for key {}", fp))?
                } else {
                    key
                };

                log::debug!("Using key {} of {}",
                            key.fingerprint(), tsk.fingerprint());
                ring.keys.push(UnlockedKey {
                    key,
                    cert: tsk.fingerprint(),
                });
            }
        }
        if ring.is_empty() {
            log::debug!("No decryption-capable secret keys given");
        }
        Ok(ring)
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the keys that are candidates for a PKESK addressed to
    /// `recipient`.
    ///
    /// A wildcard recipient matches every key.
    pub fn candidates<'a>(&'a self, recipient: &'a KeyID)
                          -> impl Iterator<Item = &'a UnlockedKey> + 'a
    {
        self.keys.iter().filter(move |k| {
            recipient.is_wildcard() || k.key.keyid() == *recipient
        })
    }

    /// Scrubs the secret key material.
    fn scrub(&mut self) {
        if self.is_empty() {
            return;
        }

        let n = self.len();
        for k in self.keys.drain(..) {
            // The secret key material is zeroed when dropped.
            let (_, secret) = k.key.take_secret();
            drop(secret);
        }
        log::debug!("Scrubbed {} secret keys", n);

        #[cfg(test)]
        SCRUBBED.with(|c| c.set(c.get() + n));
    }
}

#[cfg(test)]
thread_local! {
    /// Number of keys scrubbed on this thread.
    static SCRUBBED: std::cell::Cell<usize> = std::cell::Cell::new(0);
}

/// Returns the number of keys scrubbed on this thread so far.
#[cfg(test)]
pub fn scrubbed_keys() -> usize {
    SCRUBBED.with(|c| c.get())
}

impl Drop for KeyRing {
    fn drop(&mut self) {
        self.scrub();
    }
}

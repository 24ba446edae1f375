//! Decrypts a message, and optionally verifies its signatures.

use std::convert::TryFrom;
use std::io::{self, Write};

use anyhow::Context;

use sequoia_openpgp as openpgp;
use openpgp::{
    Cert,
    Fingerprint,
    KeyHandle,
};
use openpgp::crypto;
use openpgp::packet::{PKESK, SKESK};
use openpgp::parse::{Parse, stream::*};
use openpgp::policy::Policy;
use openpgp::types::SymmetricAlgorithm;

use crate::{
    Error,
    Result,
    cli::{DecryptConfig, create_file},
    secrets::{Secret, SecretSource},
    session_key::{SessionKey, SessionKeyAlgorithm},
    verify::{VHelper, VerificationRequest},
};

/// Size of the chunks plaintext is copied in.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Decrypts the message read from `input`, writing the plaintext to
/// `output`.
///
/// The secret is picked from `config` (see [`SecretSource`]).  If
/// requested, the session key and the verification result are
/// written to the files named in `config` once the whole message has
/// been processed.
///
/// Nothing is read from `input` until the secret has been resolved.
/// If decryption fails midway, plaintext that has already been
/// written is not retracted.
pub fn decrypt<R, W>(policy: &dyn Policy, config: &DecryptConfig,
                     input: R, output: &mut W)
                     -> Result<()>
    where R: io::Read + Send + Sync,
          W: io::Write + ?Sized,
{
    let source = SecretSource::select(config)?;
    let verification = VerificationRequest::from_config(config)?;

    log::debug!("Decrypting using {:?}", source);
    let secret = source.resolve(policy)?;

    let certs = match verification.as_ref() {
        Some(v) => v.load_certs()?,
        None => Vec::new(),
    };

    let mut session_key_out =
        config.session_key_out.as_deref().map(create_file).transpose()?;
    let mut verifications_out =
        verification.as_ref().map(|v| create_file(v.out())).transpose()?;

    let helper = Helper::new(secret, VHelper::new(certs));
    let mut decryptor = DecryptorBuilder::from_reader(input)
        .and_then(|b| b.with_policy(policy, None, helper))
        .context(Error::DecryptionFailed)?;

    if decryptor.helper_ref().session_key.is_none() {
        return Err(anyhow::Error::from(Error::DecryptionFailed))
            .context("Message is not encrypted");
    }

    let n = copy(&mut decryptor, output)?;
    log::debug!("Wrote {} bytes of plaintext", n);

    let Helper { vhelper, session_key, .. } = decryptor.into_helper();

    if let Some(sink) = session_key_out.as_mut() {
        let (algo, key) = session_key
            .ok_or_else(|| anyhow::Error::from(Error::DecryptionFailed))
            .context("Session key is not available")?;
        let sk = SessionKey::new(SessionKeyAlgorithm::try_from(algo)?, key);
        write!(sink, "{}", sk).and_then(|_| sink.flush())
            .context(Error::IoFailure)
            .context("Failed to write the session key")?;
    }

    if let (Some(v), Some(sink)) = (verification, verifications_out.as_mut()) {
        let mut result = vhelper.into_result()
            .ok_or_else(|| anyhow::Error::from(Error::VerificationFailed))
            .context("Message structure has not been verified")?;
        result.constrain_to(v.window());
        log::debug!("{} good signatures, {} rejected",
                    result.good().len(), result.rejected().len());
        result.write_to(sink)?;
    }

    Ok(())
}

/// Copies the plaintext to `output`.
///
/// Failing to read from the decryptor means that the message is
/// corrupt or has been tampered with, unless the underlying stream
/// failed.
fn copy<R, W>(plaintext: &mut R, output: &mut W) -> Result<u64>
    where R: io::Read,
          W: io::Write + ?Sized,
{
    let mut buf = vec![0; COPY_BUFFER_SIZE];
    let mut total = 0;
    loop {
        let n = match plaintext.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error().is_some() =>
                return Err(e).context(Error::IoFailure),
            Err(e) => return Err(e).context(Error::DecryptionFailed),
        };
        output.write_all(&buf[..n]).context(Error::IoFailure)?;
        total += n as u64;
    }
    output.flush().context(Error::IoFailure)?;
    Ok(total)
}

struct Helper {
    vhelper: VHelper,
    secret: Secret,
    session_key: Option<(SymmetricAlgorithm, crypto::SessionKey)>,
}

impl Helper {
    fn new(secret: Secret, vhelper: VHelper) -> Self {
        Helper {
            vhelper,
            secret,
            session_key: None,
        }
    }
}

impl VerificationHelper for Helper {
    fn get_certs(&mut self, ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        self.vhelper.get_certs(ids)
    }
    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        self.vhelper.check(structure)
    }
}

impl DecryptionHelper for Helper {
    fn decrypt<D>(&mut self, pkesks: &[PKESK], skesks: &[SKESK],
                  sym_algo: Option<SymmetricAlgorithm>,
                  mut decrypt: D) -> openpgp::Result<Option<Fingerprint>>
        where D: FnMut(SymmetricAlgorithm, &crypto::SessionKey) -> bool
    {
        let used = match &self.secret {
            Secret::SessionKey(sk) => {
                let algo = sk.algo().into();
                if decrypt(algo, sk.key()) {
                    Some((algo, sk.key().clone(), None))
                } else {
                    None
                }
            },

            Secret::Password(password) => skesks.iter().find_map(|skesk| {
                skesk.decrypt(password).ok()
                    .filter(|(algo, sk)| decrypt(*algo, sk))
                    .map(|(algo, sk)| (algo, sk, None))
            }),

            Secret::KeyRing(ring) => {
                // First those PKESKs addressed to one of our keys,
                // then the wildcard ones.
                let (wildcards, addressed): (Vec<&PKESK>, Vec<&PKESK>) =
                    pkesks.iter().partition(|p| p.recipient().is_wildcard());

                let mut used = None;
                'pkesks: for pkesk in addressed.into_iter().chain(wildcards) {
                    for k in ring.candidates(pkesk.recipient()) {
                        let mut keypair = match k.key().clone().into_keypair() {
                            Ok(keypair) => keypair,
                            Err(e) => {
                                log::debug!("Skipping key {}: {}",
                                            k.key().fingerprint(), e);
                                continue;
                            },
                        };

                        if let Some((algo, sk)) =
                            pkesk.decrypt(&mut keypair, sym_algo)
                        {
                            if decrypt(algo, &sk) {
                                used = Some((algo, sk, Some(k.cert().clone())));
                                break 'pkesks;
                            }
                        }
                    }
                }
                used
            },
        };

        match used {
            Some((algo, sk, fp)) => {
                log::debug!("Decrypted the message using {}", algo);
                self.session_key = Some((algo, sk));
                Ok(fp)
            },
            None => Err(anyhow::Error::from(Error::DecryptionFailed))
                .context("No secret decrypts the message"),
        }
    }
}

//! Verification of signatures over decrypted messages.

use std::io;
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, offset::Utc};

use sequoia_openpgp as openpgp;
use openpgp::{
    Cert,
    Fingerprint,
    KeyHandle,
};
use openpgp::cert::prelude::*;
use openpgp::parse::stream::{
    GoodChecksum,
    MessageLayer,
    MessageStructure,
    VerificationError,
    VerificationHelper,
};

use crate::{
    Error,
    Result,
    cli::{DecryptConfig, load_certs},
    dates::TimeWindow,
};

/// What to verify, and where to put the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest<'a> {
    certs: &'a [String],
    out: &'a str,
    window: TimeWindow,
}

impl<'a> VerificationRequest<'a> {
    /// Checks the verification arguments.
    ///
    /// Returns `None` if no verification was requested.  Fails with
    /// [`Error::ConfigMismatch`] if only one of "--verify-with" and
    /// "--verifications-out" is given.
    pub fn from_config(config: &'a DecryptConfig) -> Result<Option<Self>> {
        let window = TimeWindow::from_bounds(config.not_before.as_deref(),
                                             config.not_after.as_deref())
            .map_err(|e| anyhow::Error::from(Error::BadData).context(e))?;

        match (config.verify_with.is_empty(), config.verifications_out.as_deref()) {
            (true, None) => Ok(None),
            (false, Some(out)) => Ok(Some(VerificationRequest {
                certs: &config.verify_with,
                out,
                window,
            })),
            _ => Err(anyhow::Error::from(Error::ConfigMismatch))
                .context("--verifications-out and --verify-with \
                          must both be given"),
        }
    }

    /// Loads the certificates to verify with.
    pub fn load_certs(&self) -> Result<Vec<Cert>> {
        load_certs(self.certs)
    }

    /// Returns where to write the verification result.
    pub fn out(&self) -> &'a str {
        self.out
    }

    /// Returns the window signatures must have been created in.
    pub fn window(&self) -> &TimeWindow {
        &self.window
    }
}

/// A good signature.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Verification {
    /// Signature creation time.
    pub creation_time: SystemTime,
    /// The signing (sub)key.
    pub key: Fingerprint,
    /// The certificate the signing key belongs to.
    pub cert: Fingerprint,
}

/// The outcome of verifying the signatures of a message.
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    good: Vec<Verification>,
    rejected: Vec<String>,
}

impl VerificationResult {
    /// Records a good signature.
    pub fn accept(&mut self, v: Verification) {
        self.good.push(v);
    }

    /// Records a signature that cannot be relied upon.
    pub fn reject<S: Into<String>>(&mut self, reason: S) {
        let reason = reason.into();
        log::warn!("{}", reason);
        self.rejected.push(reason);
    }

    /// Returns the good signatures.
    pub fn good(&self) -> &[Verification] {
        &self.good
    }

    /// Returns why signatures were rejected.
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    /// Rejects all good signatures created outside of `window`.
    pub fn constrain_to(&mut self, window: &TimeWindow) {
        let (good, outside): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.good).into_iter()
            .partition(|v| window.contains(v.creation_time));
        self.good = good;

        for v in outside {
            let which = match (window.not_before(), window.not_after()) {
                (Some(t), _) if v.creation_time < t => "before the --not-before",
                (_, Some(t)) if v.creation_time > t => "after the --not-after",
                _ => "outside the --not-before/--not-after",
            };
            self.reject(format!("Signature by {:X} was created {} date.",
                                v.key, which));
        }
    }

    /// Writes the good signatures in the SOP VERIFICATIONS format.
    ///
    /// Every signing key is listed at most once.
    pub fn write_to(&self, sink: &mut dyn io::Write) -> Result<()> {
        let mut good = self.good.clone();
        good.sort_by(|a, b| a.key.cmp(&b.key)
                     .then(a.creation_time.cmp(&b.creation_time)));
        good.dedup_by(|a, b| a.key == b.key);
        good.sort();

        for v in good {
            writeln!(sink, "{} {:X} {:X}",
                     DateTime::<Utc>::from(v.creation_time)
                         .format("%Y-%m-%dT%H:%M:%SZ"),
                     v.key, v.cert)
                .map_err(|_| Error::IoFailure)
                .context("Failed to write verification result")?;
        }
        Ok(())
    }
}

/// Collects the verification result while decrypting.
#[derive(Debug, Default)]
pub struct VHelper {
    certs: Vec<Cert>,
    result: Option<VerificationResult>,
}

impl VHelper {
    pub fn new(certs: Vec<Cert>) -> Self {
        VHelper {
            certs,
            result: None,
        }
    }

    /// Returns the verification result, if the message structure
    /// has been checked.
    pub fn into_result(self) -> Option<VerificationResult> {
        self.result
    }
}

impl VerificationHelper for VHelper {
    fn get_certs(&mut self, _: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(std::mem::take(&mut self.certs))
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        use self::VerificationError::*;

        let mut result = VerificationResult::default();
        for layer in structure.into_iter() {
            match layer {
                MessageLayer::SignatureGroup { results } =>
                    for r in results {
                        match r {
                            Ok(GoodChecksum { sig, ka, .. }) => {
                                match sig.signature_creation_time() {
                                    Some(t) => result.accept(Verification {
                                        creation_time: t,
                                        key: ka.fingerprint(),
                                        cert: ka.cert().fingerprint(),
                                    }),
                                    None => result.reject(format!(
                                        "Signature by {:X} has no creation \
                                         time", ka.fingerprint())),
                                }
                            },
                            Err(MalformedSignature { error, .. }) =>
                                result.reject(format!(
                                    "Signature is malformed: {}", error)),
                            Err(MissingKey { sig, .. }) =>
                                result.reject(format!(
                                    "Missing key {}, which is needed to \
                                     verify signature.",
                                    sig.get_issuers().first()
                                        .map(|i| format!("{:X}", i))
                                        .unwrap_or_else(|| "(unknown)".into()))),
                            Err(UnboundKey { cert, error, .. }) =>
                                result.reject(format!(
                                    "Signing key on {:X} is not bound: {}",
                                    cert.fingerprint(), error)),
                            Err(BadKey { ka, error, .. }) =>
                                result.reject(format!(
                                    "Signing key on {:X} is bad: {}",
                                    ka.cert().fingerprint(), error)),
                            Err(BadSignature { error, .. }) =>
                                result.reject(format!(
                                    "Verifying signature: {}", error)),
                            #[allow(unreachable_patterns)]
                            Err(_) =>
                                result.reject("Unverifiable signature"),
                        }
                    },
                _ => (),
            }
        }

        self.result = Some(result);
        Ok(())
    }
}

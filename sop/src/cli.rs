use std::io::Read;
use std::path::Path;

use anyhow::Context;
use structopt::StructOpt;

use sequoia_openpgp as openpgp;
use openpgp::{
    cert::{
        Cert,
        CertParser,
    },
    parse::Parse,
};

use super::{
    Error,
    Result,
};

/// Prefix of the special designator naming an environment variable.
const ENV_DESIGNATOR: &str = "@ENV:";

#[derive(StructOpt)]
#[structopt(about = "An implementation of the \
                     Stateless OpenPGP Command Line Interface \
                     using Sequoia")]
pub enum SOP {
    /// Prints version information.
    Version {
    },
    /// Decrypts a Message.
    Decrypt(DecryptConfig),
    /// Unsupported subcommand.
    #[structopt(external_subcommand)]
    Unsupported(Vec<String>),
}

/// Everything "sop decrypt" needs to know.
///
/// Passwords and session keys are indirect: they name a file, or an
/// environment variable using `@ENV:NAME`.
#[derive(StructOpt, Debug, Clone, Default)]
pub struct DecryptConfig {
    /// Write the session key here.
    #[structopt(long)]
    pub session_key_out: Option<String>,
    /// Decrypt with this session key.
    #[structopt(long)]
    pub with_session_key: Option<String>,
    /// Decrypt with this password.
    #[structopt(long)]
    pub with_password: Option<String>,
    /// Unlock the keys with this password.
    #[structopt(long)]
    pub with_key_password: Option<String>,
    /// Write verification result here.
    #[structopt(long, alias = "verify-out")]
    pub verifications_out: Option<String>,
    /// Certs for verification.
    #[structopt(long, number_of_values = 1)]
    pub verify_with: Vec<String>,
    /// Consider signatures before this date invalid.
    #[structopt(long, alias = "verify-not-before")]
    pub not_before: Option<String>,
    /// Consider signatures after this date invalid.
    #[structopt(long, alias = "verify-not-after")]
    pub not_after: Option<String>,
    /// Try to decrypt with this key.
    pub key: Vec<String>,
}

fn is_special_designator<S: AsRef<str>>(file: S) -> bool {
    file.as_ref().starts_with("@")
}

/// Loads the given (special) file.
pub fn load_file<S: AsRef<str>>(file: S) -> Result<std::fs::File> {
    let f = file.as_ref();

    if is_special_designator(f) {
        if Path::new(f).exists() {
            return Err(anyhow::Error::from(Error::AmbiguousInput))
                .context(format!("File {:?} exists", f));
        }

        return Err(anyhow::Error::from(Error::UnsupportedSpecialPrefix));
    }

    std::fs::File::open(f).map_err(|_| Error::MissingInput)
            .context(format!("Failed to open file {:?}", f))
}

/// Reads the given indirect parameter.
///
/// `@ENV:NAME` reads the environment variable `NAME`, anything else
/// is read from the (special) file.
pub fn load_indirect<S: AsRef<str>>(file: S) -> Result<Vec<u8>> {
    let f = file.as_ref();

    if let Some(name) = f.strip_prefix(ENV_DESIGNATOR) {
        if Path::new(f).exists() {
            return Err(anyhow::Error::from(Error::AmbiguousInput))
                .context(format!("File {:?} exists", f));
        }

        return std::env::var(name).map(String::into_bytes)
            .map_err(|_| Error::MissingInput)
            .context(format!("Environment variable {:?} is not set", name));
    }

    let mut buf = Vec::new();
    load_file(f)?.read_to_end(&mut buf).map_err(|_| Error::IoFailure)
        .context(format!("Failed to read file {:?}", f))?;
    Ok(buf)
}

/// Creates the given (special) file.
pub fn create_file<S: AsRef<str>>(file: S) -> Result<std::fs::File> {
    let f = file.as_ref();

    if is_special_designator(f) {
        if Path::new(f).exists() {
            return Err(anyhow::Error::from(Error::AmbiguousInput))
                .context(format!("File {:?} exists", f));
        }

        return Err(anyhow::Error::from(Error::UnsupportedSpecialPrefix));
    }

    if Path::new(f).exists() {
        return Err(anyhow::Error::from(Error::OutputExists))
            .context(format!("File {:?} exists", f));
    }

    std::fs::File::create(f).map_err(|_| Error::IoFailure)
            .context(format!("Failed to create file {:?}", f))
}

/// Loads the certs given by the (special) files.
pub fn load_certs<S: AsRef<str>>(files: &[S]) -> Result<Vec<Cert>> {
    let mut certs = vec![];
    for f in files {
        let f = f.as_ref();
        let r = load_file(f)?;
        for cert in CertParser::from_reader(r).map_err(|_| Error::BadData)
            .context(format!("Failed to load CERTS from file {:?}", f))?
        {
            certs.push(
                cert.map_err(|_| Error::BadData)
                    .context(format!("Malformed certificate in file {:?}", f))?
            );
        }
    }
    Ok(certs)
}

/// Loads the KEYs given by the (special) files.
pub fn load_keys<S: AsRef<str>>(files: &[S]) -> Result<Vec<Cert>> {
    let mut keys = vec![];
    for f in files {
        let f = f.as_ref();
        let r = load_file(f)?;
        let key = Cert::from_reader(r).map_err(|_| Error::BadData)
            .context(format!("Failed to load KEY from file {:?}", f))?;
        if ! key.is_tsk() {
            return Err(anyhow::Error::from(Error::BadData))
                .context(format!("No secret key material in file {:?}", f));
        }
        keys.push(key);
    }
    Ok(keys)
}

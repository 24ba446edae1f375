/// Errors raised by "sop decrypt".
///
/// The variants map to the exit codes defined by the Stateless OpenPGP
/// Protocol, see the `From<Error> for i32` implementation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Neither a session key, a password, nor a key was given.
    #[error("No session key, password, or key given")]
    MissingSecret,

    /// Only one of "--verify-with" and "--verifications-out" was given.
    #[error("Incomplete verification instructions")]
    ConfigMismatch,

    /// A key is protected with a password, and we cannot unlock it.
    #[error("Unable to unlock a KEY input")]
    KeyUnlockFailure,

    /// The session key is not of the form "<algo>:<hex key>".
    #[error("Malformed session key")]
    InvalidSessionKeyFormat,

    /// The session key names an unsupported symmetric algorithm.
    #[error("Unsupported session key algorithm")]
    InvalidAlgorithm,

    /// The key part of the session key is not hexadecimal.
    #[error("Session key is not hexadecimal")]
    InvalidHex,

    /// Unable to decrypt.
    #[error("Unable to decrypt")]
    DecryptionFailed,

    /// Unable to produce the verification result.
    #[error("Verification failed")]
    VerificationFailed,

    /// Reading or writing a stream or output file failed.
    #[error("Input/output error")]
    IoFailure,

    /// Invalid data type (no secret key where "KEY" expected, etc).
    #[error("Invalid data type")]
    BadData,

    /// Output file already exists.
    #[error("Output file already exists")]
    OutputExists,

    /// Input file does not exist.
    #[error("Input file does not exist")]
    MissingInput,

    /// Unsupported subcommand.
    #[error("Unsupported subcommand")]
    UnsupportedSubcommand,

    /// An indirect parameter is a special designator (it starts with "@") but
    /// "sop" does not know how to handle the prefix.
    #[error("An indirect parameter is a special designator with unknown prefix")]
    UnsupportedSpecialPrefix,

    /// A indirect input parameter is a special designator (it starts with
    /// "@"), and a filename matching the designator is actually present.
    #[error("A indirect input parameter is a special designator matches file")]
    AmbiguousInput,
}

impl From<Error> for i32 {
    fn from(e: Error) -> Self {
        use Error::*;
        match e {
            MissingSecret => 19,
            ConfigMismatch => 23,
            DecryptionFailed => 29,
            InvalidSessionKeyFormat | InvalidAlgorithm | InvalidHex
                | BadData => 41,
            OutputExists => 59,
            MissingInput => 61,
            KeyUnlockFailure => 67,
            UnsupportedSubcommand => 69,
            UnsupportedSpecialPrefix => 71,
            AmbiguousInput => 73,
            VerificationFailed | IoFailure => 99,
        }
    }
}

/// Returns the taxonomy error behind `err`, if any.
pub fn classify(err: &anyhow::Error) -> Option<Error> {
    err.downcast_ref::<Error>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<Error>()))
        .cloned()
}

/// Prints the error and causes, if any.
pub fn print_error_chain(err: &anyhow::Error) {
    eprintln!("           {}", err);
    err.chain().skip(1).for_each(|cause| eprintln!("  because: {}", cause));
}

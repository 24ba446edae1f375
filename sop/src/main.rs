//! The "decrypt" subcommand of the [Stateless OpenPGP Command Line
//! Interface], using Sequoia.
//!
//! Decrypts a message read from stdin using a session key, a
//! password, or secret keys, and writes the plaintext to stdout.
//! Optionally, the session key is exported, and the signatures over
//! the message are verified.
//!
//!   [Stateless OpenPGP Command Line Interface]: https://datatracker.ietf.org/doc/draft-dkg-openpgp-stateless-cli/

use std::io;

use anyhow::Context;
use structopt::StructOpt;

use sequoia_openpgp as openpgp;
use openpgp::policy::StandardPolicy;

mod errors;
use errors::{Error, classify, print_error_chain};
type Result<T> = anyhow::Result<T>;

mod cli;
use cli::SOP;
mod dates;
mod decrypt;
mod secrets;
mod session_key;
mod verify;

fn main() {
    use std::process::exit;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn")).init();

    match real_main() {
        Ok(()) => (),
        Err(e) => {
            print_error_chain(&e);
            exit(classify(&e).map(i32::from).unwrap_or(1));
        },
    }
}

fn real_main() -> Result<()> {
    let p = &StandardPolicy::new();

    match SOP::from_args() {
        SOP::Version {} => {
            println!("sop-decrypt {} (Sequoia-OpenPGP {})",
                     env!("CARGO_PKG_VERSION"), openpgp::VERSION);
        },

        SOP::Decrypt(config) => {
            let stdout = io::stdout();
            decrypt::decrypt(p, &config, io::stdin(), &mut stdout.lock())
                .context("decrypt")?;
        },

        SOP::Unsupported(args) => {
            return Err(anyhow::Error::from(Error::UnsupportedSubcommand))
                .context(format!("Subcommand {} is not supported",
                                args.first().map(String::as_str)
                                    .unwrap_or_default()));
        },
    }

    Ok(())
}

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use chrono::{DateTime, offset::Utc};

use sequoia_openpgp as openpgp;
use crate::openpgp::Cert;
use crate::openpgp::cert::prelude::*;
use crate::openpgp::crypto::Password;
use crate::openpgp::policy::StandardPolicy;
use crate::openpgp::serialize::Serialize;
use crate::openpgp::serialize::stream::{
    Encryptor2, LiteralWriter, Message, Signer,
};

const PLAINTEXT: &str = "A Cypherpunk's Manifesto\n";

fn sop() -> Command {
    Command::cargo_bin("sop").unwrap()
}

fn path(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn write(tmp_dir: &TempDir, name: &str, content: &[u8]) -> String {
    let p = tmp_dir.path().join(name);
    fs::write(&p, content).unwrap();
    path(&p)
}

fn generate(userid: &str, password: Option<&str>, created: SystemTime) -> Cert {
    CertBuilder::general_purpose(None, Some(userid))
        .set_creation_time(created)
        .set_password(password.map(Into::into))
        .generate().unwrap().0
}

fn save(tmp_dir: &TempDir, name: &str, cert: &Cert, secret: bool) -> String {
    let p = tmp_dir.path().join(name);
    let mut f = File::create(&p).unwrap();
    if secret {
        cert.as_tsk().serialize(&mut f).unwrap();
    } else {
        cert.serialize(&mut f).unwrap();
    }
    path(&p)
}

fn encrypt_with_password(password: &str) -> Vec<u8> {
    let mut sink = Vec::new();
    let message = Message::new(&mut sink);
    let message = Encryptor2::with_passwords(message, Some(password))
        .build().unwrap();
    let mut message = LiteralWriter::new(message).build().unwrap();
    message.write_all(PLAINTEXT.as_bytes()).unwrap();
    message.finalize().unwrap();
    sink
}

/// Encrypts to `recipient`, and signs using `recipient`'s signing key
/// at time `signed_at`.
///
/// `password` unlocks the signing key, if it is locked.
fn encrypt_and_sign(recipient: &Cert, password: Option<&str>,
                    signed_at: SystemTime) -> Vec<u8> {
    let p = StandardPolicy::new();
    let recipients = recipient.keys().with_policy(&p, None)
        .supported().alive().revoked(false)
        .for_transport_encryption();
    let mut key = recipient.keys().secret()
        .with_policy(&p, signed_at)
        .supported().alive().revoked(false).for_signing()
        .next().unwrap()
        .key().clone();
    if let Some(password) = password {
        key = key.decrypt_secret(&Password::from(password)).unwrap();
    }
    let signer = key.into_keypair().unwrap();

    let mut sink = Vec::new();
    let message = Message::new(&mut sink);
    let message = Encryptor2::for_recipients(message, recipients)
        .build().unwrap();
    let message = Signer::new(message, signer)
        .creation_time(signed_at)
        .build().unwrap();
    let mut message = LiteralWriter::new(message).build().unwrap();
    message.write_all(PLAINTEXT.as_bytes()).unwrap();
    message.finalize().unwrap();
    sink
}

#[test]
fn sop_decrypt_with_password() {
    let tmp_dir = TempDir::new().unwrap();
    let password = write(&tmp_dir, "password", b"streng geheim\n");

    sop()
        .args(&["decrypt", "--with-password", &password])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .success()
        .stdout(PLAINTEXT);
}

#[test]
fn sop_decrypt_with_password_from_environment() {
    sop()
        .env("SOP_DECRYPT_PASSWORD", "streng geheim")
        .args(&["decrypt", "--with-password", "@ENV:SOP_DECRYPT_PASSWORD"])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .success()
        .stdout(PLAINTEXT);
}

#[test]
fn sop_decrypt_missing_secret() {
    sop()
        .args(&["decrypt"])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .code(19)
        .stdout(predicate::str::is_empty());
}

#[test]
fn sop_decrypt_incomplete_verification() {
    let tmp_dir = TempDir::new().unwrap();
    let password = write(&tmp_dir, "password", b"streng geheim");
    let out = path(&tmp_dir.path().join("verifications"));

    sop()
        .args(&["decrypt", "--with-password", &password,
                "--verifications-out", &out])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .code(23)
        .stdout(predicate::str::is_empty());
    assert!(! Path::new(&out).exists());
}

#[test]
fn sop_decrypt_wrong_password() {
    let tmp_dir = TempDir::new().unwrap();
    let password = write(&tmp_dir, "password", b"sehr geheim");

    sop()
        .args(&["decrypt", "--with-password", &password])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .code(29);
}

#[test]
fn sop_decrypt_wrong_key_password() {
    let tmp_dir = TempDir::new().unwrap();
    let alice = generate("alice@example.org", Some("correct horse"),
                         SystemTime::now() - Duration::from_secs(7200));
    let key = save(&tmp_dir, "alice.key", &alice, true);
    let password = write(&tmp_dir, "password", b"battery staple");

    sop()
        .args(&["decrypt", "--with-key-password", &password, &key])
        .write_stdin(encrypt_and_sign(
            &alice, Some("correct horse"),
            SystemTime::now() - Duration::from_secs(3600)))
        .assert()
        .code(67)
        .stdout(predicate::str::is_empty());
}

#[test]
fn sop_decrypt_session_key_round_trip() {
    let tmp_dir = TempDir::new().unwrap();
    let alice = generate("alice@example.org", Some("correct horse"),
                         SystemTime::now() - Duration::from_secs(7200));
    let key = save(&tmp_dir, "alice.key", &alice, true);
    let password = write(&tmp_dir, "password", b"correct horse\n");
    let session_key = path(&tmp_dir.path().join("session-key"));
    let ciphertext = encrypt_and_sign(
        &alice, Some("correct horse"),
        SystemTime::now() - Duration::from_secs(3600));

    sop()
        .args(&["decrypt", "--with-key-password", &password,
                "--session-key-out", &session_key, &key])
        .write_stdin(ciphertext.clone())
        .assert()
        .success()
        .stdout(PLAINTEXT);

    let token = fs::read_to_string(&session_key).unwrap();
    assert!(predicate::str::is_match("^(2|3|7|8|9):[0-9A-F]+$").unwrap()
            .eval(&token));

    // Reuse the session key, no key needed.
    sop()
        .args(&["decrypt", "--with-session-key", &session_key])
        .write_stdin(ciphertext)
        .assert()
        .success()
        .stdout(PLAINTEXT);
}

#[test]
fn sop_decrypt_refuses_to_overwrite() {
    let tmp_dir = TempDir::new().unwrap();
    let password = write(&tmp_dir, "password", b"streng geheim");
    let session_key = write(&tmp_dir, "session-key", b"keep me");

    sop()
        .args(&["decrypt", "--with-password", &password,
                "--session-key-out", &session_key])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .code(59);
    assert_eq!(fs::read(&session_key).unwrap(), b"keep me");
}

#[test]
fn sop_decrypt_verify() {
    let tmp_dir = TempDir::new().unwrap();
    let now = SystemTime::now();
    let alice = generate("alice@example.org", None,
                         now - Duration::from_secs(7200));
    let key = save(&tmp_dir, "alice.key", &alice, true);
    let cert = save(&tmp_dir, "alice.cert", &alice, false);
    let ciphertext =
        encrypt_and_sign(&alice, None, now - Duration::from_secs(3600));

    // Without bounds, the signature is good.
    let out = path(&tmp_dir.path().join("verifications"));
    sop()
        .args(&["decrypt", "--verify-with", &cert,
                "--verifications-out", &out, &key])
        .write_stdin(ciphertext.clone())
        .assert()
        .success()
        .stdout(PLAINTEXT);
    let verifications = fs::read_to_string(&out).unwrap();
    assert_eq!(verifications.lines().count(), 1);
    assert!(verifications.contains(&format!("{:X}", alice.fingerprint())));

    // The signature was made an hour ago.
    let out = path(&tmp_dir.path().join("verifications-now"));
    sop()
        .args(&["decrypt", "--verify-with", &cert,
                "--verifications-out", &out,
                "--not-before", "now", &key])
        .write_stdin(ciphertext.clone())
        .assert()
        .success()
        .stdout(PLAINTEXT);
    assert_eq!(fs::read_to_string(&out).unwrap(), "");

    // Using the legacy flags.
    let out = path(&tmp_dir.path().join("verifications-legacy"));
    let not_after = DateTime::<Utc>::from(now - Duration::from_secs(5400))
        .format("%Y-%m-%dT%H:%M:%SZ").to_string();
    sop()
        .args(&["decrypt", "--verify-with", &cert,
                "--verify-out", &out,
                "--verify-not-after", &not_after, &key])
        .write_stdin(ciphertext)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&out).unwrap(), "");
}

#[test]
fn sop_decrypt_invalid_session_key() {
    let tmp_dir = TempDir::new().unwrap();
    let session_key = write(&tmp_dir, "session-key", b"4:DEADBEEF");

    sop()
        .args(&["decrypt", "--with-session-key", &session_key])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .code(41);

    let session_key = write(&tmp_dir, "session-key-hex", b"9:NOT HEX");
    sop()
        .args(&["decrypt", "--with-session-key", &session_key])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .code(41);

    // An odd number of hex digits is not padded.
    let session_key = write(&tmp_dir, "session-key-odd", b"9:ABC");
    sop()
        .args(&["decrypt", "--with-session-key", &session_key])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .code(41);
}

#[test]
fn sop_decrypt_missing_input() {
    let tmp_dir = TempDir::new().unwrap();

    sop()
        .args(&["decrypt", "--with-password",
                &path(&tmp_dir.path().join("does-not-exist"))])
        .write_stdin(encrypt_with_password("streng geheim"))
        .assert()
        .code(61);
}

#[test]
fn sop_unsupported_subcommand() {
    sop()
        .args(&["sign"])
        .assert()
        .code(69);
}

#[test]
fn sop_version() {
    sop()
        .args(&["version"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("sop-decrypt "));
}

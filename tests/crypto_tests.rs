//! Crypto primitive tests
//!
//! Exercises the primitives the way the rest of the gate uses them:
//! - sealed signing keys unsealed into a key store
//! - password hashing and verification
//! - constant-time comparison
//! - random token ids and keys

use std::collections::{HashMap, HashSet};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pretty_assertions::assert_eq;

use api_gate::crypto::{
    CryptoError, CryptoService, KEY_LEN, NONCE_LEN, crypto_cmp_bytes, crypto_cmp_str,
    generate_key, hash_password, random_bytes, random_string, verify_password,
};
use api_gate::token::{KeyStore, KeyStoreError};

const KEK_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

// ── Sealed keys ─────────────────────────────────────────────────────────────

#[test]
fn sealed_signing_key_unseals_into_key_store() {
    // GIVEN: a signing key sealed under the key-encryption key
    let kek = CryptoService::from_hex(KEK_HEX).unwrap();
    let secret = vec![0xAB; 64];
    let sealed = format!("enc:{}", kek.encrypt_base64(&secret).unwrap());

    // WHEN: the key store is built from configuration
    let encoded = HashMap::from([
        ("k1".to_string(), String::new()),
        ("k2".to_string(), sealed),
    ]);
    let store = KeyStore::from_config("k2", &encoded, Some(&kek)).unwrap();

    // THEN: the plaintext secret is available and k1 is deprecated
    assert_eq!(store.lookup("k2"), Some(secret.as_slice()));
    assert!(store.is_deprecated("k1"));
    assert_eq!(store.lookup("k1"), None);
}

#[test]
fn sealed_key_without_kek_fails() {
    let kek = CryptoService::from_hex(KEK_HEX).unwrap();
    let sealed = format!("enc:{}", kek.encrypt_base64(&[1u8; 64]).unwrap());
    let encoded = HashMap::from([("k1".to_string(), sealed)]);

    let err = KeyStore::from_config("k1", &encoded, None).unwrap_err();
    assert!(matches!(err, KeyStoreError::Decode { .. }));
}

#[test]
fn sealed_key_under_other_kek_fails() {
    let kek = CryptoService::from_hex(KEK_HEX).unwrap();
    let other = CryptoService::new(&[0x55; KEY_LEN]).unwrap();
    let sealed = format!("enc:{}", kek.encrypt_base64(&[1u8; 64]).unwrap());
    let encoded = HashMap::from([("k1".to_string(), sealed)]);

    let err = KeyStore::from_config("k1", &encoded, Some(&other)).unwrap_err();
    assert!(matches!(err, KeyStoreError::Unseal { .. }));
}

#[test]
fn ciphertext_layout_and_tamper_detection() {
    let svc = CryptoService::new(&[7u8; KEY_LEN]).unwrap();
    let mut sealed = svc.encrypt(b"payload").unwrap();
    assert_eq!(sealed.len(), NONCE_LEN + b"payload".len() + 16);

    let last = sealed.len() - 1;
    sealed[last] ^= 0x80;
    assert!(matches!(svc.decrypt(&sealed), Err(CryptoError::Open)));
}

#[test]
fn bad_kek_length_is_rejected() {
    assert!(matches!(
        CryptoService::new(&[0u8; 16]),
        Err(CryptoError::InvalidKeyLength(16))
    ));
    assert!(CryptoService::from_hex("zz").is_err());
}

// ── Passwords ───────────────────────────────────────────────────────────────

#[test]
fn password_hash_verifies_only_the_right_password() {
    let cred = hash_password("correct horse").unwrap();
    assert_eq!(cred.hash.len(), 64);
    assert_eq!(cred.salt.len(), 64);

    assert!(verify_password(&cred.hash, &cred.salt, "correct horse").unwrap());
    assert!(!verify_password(&cred.hash, &cred.salt, "correct horsf").unwrap());
}

#[test]
fn same_password_gets_distinct_salts() {
    let a = hash_password("pw").unwrap();
    let b = hash_password("pw").unwrap();
    assert_ne!(a.salt, b.salt);
    assert_ne!(a.hash, b.hash);
}

// ── Comparison ──────────────────────────────────────────────────────────────

#[test]
fn comparison_handles_equal_and_unequal_lengths() {
    assert!(crypto_cmp_bytes(b"secret", b"secret"));
    assert!(!crypto_cmp_bytes(b"secret", b"secreT"));
    assert!(!crypto_cmp_bytes(b"secret", b"secret-but-longer"));
    assert!(crypto_cmp_str("", ""));
    assert!(!crypto_cmp_str("", "x"));
}

// ── Randomness ──────────────────────────────────────────────────────────────

#[test]
fn random_strings_are_alphanumeric_and_unique() {
    let ids: HashSet<String> = (0..200).map(|_| random_string(32).unwrap()).collect();
    assert_eq!(ids.len(), 200);
    assert!(ids
        .iter()
        .all(|id| id.len() == 32 && id.chars().all(|c| c.is_ascii_alphanumeric())));
}

#[test]
fn generated_key_is_32_bytes_of_base64() {
    let key = generate_key().unwrap();
    assert_eq!(STANDARD.decode(key).unwrap().len(), 32);
    assert_eq!(random_bytes(0).unwrap().len(), 0);
}

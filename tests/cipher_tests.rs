use iomt_overlay::middleware::cipher::{self, NONCE_LEN, TAG_LEN};
use iomt_overlay::CipherError;

const PASSPHRASE: &str = "correct horse battery staple";

#[test]
fn encrypt_then_decrypt_returns_the_plaintext() {
    let key = cipher::derive_key(PASSPHRASE).unwrap();
    let sealed = cipher::encrypt(&key, b"{\"spo2\":97}").unwrap();

    assert_eq!(sealed.len(), NONCE_LEN + 11 + TAG_LEN);
    assert_eq!(cipher::decrypt(&key, &sealed).unwrap(), b"{\"spo2\":97}");
}

#[test]
fn every_message_gets_a_fresh_nonce() {
    let key = cipher::derive_key(PASSPHRASE).unwrap();
    let a = cipher::encrypt(&key, b"same").unwrap();
    let b = cipher::encrypt(&key, b"same").unwrap();

    assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    assert_ne!(a, b);
}

#[test]
fn every_flipped_bit_is_detected() {
    let key = cipher::derive_key(PASSPHRASE).unwrap();
    let sealed = cipher::encrypt(&key, b"payload").unwrap();
    assert_eq!(sealed.len(), NONCE_LEN + 7 + TAG_LEN);

    // Nonce, ciphertext and tag
    for index in 0..sealed.len() {
        for bit in 0..8 {
            let mut tampered = sealed.clone();
            tampered[index] ^= 1 << bit;
            assert_eq!(
                cipher::decrypt(&key, &tampered),
                Err(CipherError::AuthenticationFailed),
                "flip of bit {} in byte {} went unnoticed",
                bit,
                index
            );
        }
    }
    assert_eq!(cipher::decrypt(&key, &sealed).unwrap(), b"payload");
}

#[test]
fn wrong_key_fails_authentication() {
    let key = cipher::derive_key(PASSPHRASE).unwrap();
    let other = cipher::derive_key("a different passphrase").unwrap();
    let sealed = cipher::encrypt(&key, b"payload").unwrap();

    assert_eq!(cipher::decrypt(&other, &sealed), Err(CipherError::AuthenticationFailed));
}

#[test]
fn truncated_blobs_are_rejected() {
    let key = cipher::derive_key(PASSPHRASE).unwrap();
    assert_eq!(cipher::decrypt(&key, &[0u8; NONCE_LEN + TAG_LEN - 1]), Err(CipherError::AuthenticationFailed));
    assert_eq!(cipher::decrypt(&key, &[]), Err(CipherError::AuthenticationFailed));
}

#[test]
fn empty_plaintext_is_allowed() {
    let key = cipher::derive_key(PASSPHRASE).unwrap();
    let sealed = cipher::encrypt(&key, b"").unwrap();
    assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN);
    assert!(cipher::decrypt(&key, &sealed).unwrap().is_empty());
}

#[test]
fn short_passphrases_are_rejected() {
    assert_eq!(cipher::derive_key("short").unwrap_err(), CipherError::InvalidKeyMaterial);
    assert!(cipher::derive_key("exactly16bytes!!").is_ok());
}

#[test]
fn same_passphrase_derives_the_same_key() {
    assert_eq!(cipher::derive_key(PASSPHRASE).unwrap(), cipher::derive_key(PASSPHRASE).unwrap());
}

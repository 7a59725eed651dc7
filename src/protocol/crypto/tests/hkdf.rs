use super::super::*;

#[test]
fn test_hkdf_derive() {
    let ikm = b"input key material";
    let salt = b"salt";
    let info = b"info";

    let key = derive_key(Some(salt), ikm, info, 32).unwrap();

    assert_eq!(key.len(), 32);
}

#[test]
fn test_hkdf_deterministic() {
    let ikm = b"test";

    let key1 = derive_key(None, ikm, b"info", 32).unwrap();
    let key2 = derive_key(None, ikm, b"info", 32).unwrap();

    assert_eq!(key1, key2);
}

#[test]
fn test_hkdf_different_info() {
    let ikm = b"test";

    let key1 = derive_key(None, ikm, b"info1", 32).unwrap();
    let key2 = derive_key(None, ikm, b"info2", 32).unwrap();

    assert_ne!(key1, key2);
}

#[test]
fn test_hkdf_rfc5869_style_vector() {
    // RFC 5869 test case 1 inputs, expanded with SHA-512 instead of SHA-256
    let ikm = [0x0bu8; 22];
    let salt: Vec<u8> = (0x00..=0x0c).collect();
    let info: Vec<u8> = (0xf0..=0xf9).collect();

    let okm = derive_key(Some(&salt), &ikm, &info, 42).unwrap();

    assert_eq!(
        &okm[..8],
        &[0x83, 0x23, 0x90, 0x08, 0x6c, 0xda, 0x71, 0xfb]
    );
}

#[test]
fn test_hkdf_output_too_long() {
    // HKDF-SHA512 can produce at most 255 * 64 bytes
    let result = derive_key(None, b"ikm", b"info", 255 * 64 + 1);
    assert!(matches!(result, Err(CryptoError::KeyDerivationFailed(_))));
}

#[test]
fn test_kdf_label_strings() {
    assert_eq!(KdfLabel::PairSetupEncrypt.salt(), b"Pair-Setup-Encrypt-Salt");
    assert_eq!(KdfLabel::PairSetupEncrypt.info(), b"Pair-Setup-Encrypt-Info");
    assert_eq!(
        KdfLabel::PairSetupControllerSign.salt(),
        b"Pair-Setup-Controller-Sign-Salt"
    );
    assert_eq!(
        KdfLabel::PairSetupAccessorySign.info(),
        b"Pair-Setup-Accessory-Sign-Info"
    );
    assert_eq!(KdfLabel::PairVerifyEncrypt.salt(), b"Pair-Verify-Encrypt-Salt");
    assert_eq!(KdfLabel::ControlWrite.salt(), b"Control-Salt");
    assert_eq!(KdfLabel::ControlRead.salt(), b"Control-Salt");
    assert_eq!(KdfLabel::ControlWrite.info(), b"Control-Write-Encryption-Key");
    assert_eq!(KdfLabel::ControlRead.info(), b"Control-Read-Encryption-Key");
}

#[test]
fn test_kdf_label_matches_derive_key() {
    let secret = [0x42u8; 32];

    let via_label = KdfLabel::PairVerifyEncrypt.derive(&secret).unwrap();
    let via_fn = derive_key(
        Some(b"Pair-Verify-Encrypt-Salt"),
        &secret,
        b"Pair-Verify-Encrypt-Info",
        32,
    )
    .unwrap();

    assert_eq!(via_label.to_vec(), via_fn);
}

#[test]
fn test_session_keys_distinct() {
    let shared_secret = [0x42u8; 32];

    let keys = SessionKeys::derive(&shared_secret).unwrap();

    assert_ne!(keys.control_write, keys.control_read);
}

#[test]
fn test_session_keys_debug_redacted() {
    let keys = SessionKeys::derive(&[0x11u8; 32]).unwrap();
    let debug = format!("{keys:?}");

    assert!(debug.contains("redacted"));
}

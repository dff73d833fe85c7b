use snipbin::config::AppConfig;
use snipbin::server::crypto::{digests_match, secure_hash, IdCodec, IdRepr};

fn codec_with(key: &str, iv: &str) -> IdCodec {
    IdCodec::new(&AppConfig {
        use_encrypted_ids: true,
        id_encryption_key: key.to_string(),
        id_encryption_iv: iv.to_string(),
        ..AppConfig::default()
    })
}

#[test]
fn ids_round_trip_across_magnitudes() {
    let codec = codec_with("integration-key", "integration-iv");
    for id in [1, 2, 9, 10, 15, 99, 1_000, 123_456, i64::MAX / 2, i64::MAX] {
        let token = codec.encode(id).expect("positive ids encode");
        assert_eq!(codec.decode(&token, false), Ok(id), "id {id}");
    }
}

#[test]
fn tokens_are_url_safe_and_unpadded() {
    let codec = codec_with("integration-key", "integration-iv");
    for id in 1..200 {
        let token = codec.encode(id).unwrap();
        assert!(!token.contains('/'), "token {token} contains '/'");
        assert!(!token.contains('+'), "token {token} contains '+'");
        assert!(!token.contains('='), "token {token} contains padding");
    }
}

#[test]
fn tokens_hide_id_adjacency() {
    let codec = codec_with("integration-key", "integration-iv");
    let a = codec.encode(100).unwrap();
    let b = codec.encode(101).unwrap();
    assert_ne!(a, b);
    // Same-length plaintext blocks still produce unrelated prefixes.
    assert_ne!(&a[..8], &b[..8]);
}

#[test]
fn different_keys_produce_incompatible_tokens() {
    let first = codec_with("key-one", "shared-iv");
    let second = codec_with("key-two", "shared-iv");
    let token = first.encode(77).unwrap();
    assert_ne!(second.decode(&token, false), Ok(77));
}

#[test]
fn tampered_tokens_are_rejected() {
    let codec = codec_with("integration-key", "integration-iv");
    let token = codec.encode(42).unwrap();
    let truncated = &token[..token.len() - 2];
    assert!(codec.decode(truncated, false).is_err());
    let mut flipped: Vec<char> = token.chars().collect();
    flipped[0] = if flipped[0] == 'A' { 'B' } else { 'A' };
    let flipped: String = flipped.into_iter().collect();
    // A flipped token must never silently map to the original id.
    assert_ne!(codec.decode(&flipped, false), Ok(42));
}

#[test]
fn plain_configuration_skips_the_cipher() {
    let plain = IdCodec::new(&AppConfig {
        use_encrypted_ids: false,
        ..AppConfig::default()
    });
    assert_eq!(plain.represent(123), IdRepr::Plain("123".to_string()));
    assert_eq!(plain.decode("123", false), Ok(123));
    assert!(plain.decode("-5", false).is_err());
    assert!(plain.decode("not-an-id", false).is_err());
}

#[test]
fn forced_decode_accepts_encrypted_tokens_in_plain_mode() {
    let encrypting = codec_with("migration-key", "migration-iv");
    let plain = IdCodec::new(&AppConfig {
        use_encrypted_ids: false,
        id_encryption_key: "migration-key".to_string(),
        id_encryption_iv: "migration-iv".to_string(),
        ..AppConfig::default()
    });
    let token = encrypting.encode(8).unwrap();
    assert!(plain.decode(&token, false).is_err());
    assert_eq!(plain.decode(&token, true), Ok(8));
}

#[test]
fn secure_hash_shape_and_stability() {
    let digest = secure_hash("correct horse battery staple");
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, secure_hash("correct horse battery staple"));
    assert!(digests_match(&digest, &secure_hash("correct horse battery staple")));
    assert!(!digests_match(&digest, &secure_hash("incorrect horse")));
}

use reposync_types::ContentHash;
use std::str::FromStr;

// ── Blob ids ──────────────────────────────────────────────────────

#[test]
fn empty_blob_matches_git() {
    assert_eq!(
        ContentHash::of(b"").as_str(),
        "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
    );
}

#[test]
fn hello_blob_matches_git() {
    // `printf 'hello\n' | git hash-object --stdin`
    assert_eq!(
        ContentHash::of(b"hello\n").as_str(),
        "ce013625030ba8dba906f756967f9e9ca394464a"
    );
}

#[test]
fn different_content_different_hash() {
    assert_ne!(ContentHash::of(b"a"), ContentHash::of(b"b"));
}

#[test]
fn same_content_same_hash() {
    assert_eq!(ContentHash::of(b"payload"), ContentHash::of(b"payload"));
}

// ── Parsing ───────────────────────────────────────────────────────

#[test]
fn parse_accepts_sha1_and_sha256() {
    assert!(ContentHash::parse(&"a".repeat(40)).is_ok());
    assert!(ContentHash::parse(&"b".repeat(64)).is_ok());
}

#[test]
fn parse_normalizes_case() {
    let hash = ContentHash::parse("CE013625030BA8DBA906F756967F9E9CA394464A").unwrap();
    assert_eq!(hash, ContentHash::of(b"hello\n"));
}

#[test]
fn parse_rejects_garbage() {
    assert!(ContentHash::parse("").is_err());
    assert!(ContentHash::parse("xyz").is_err());
    assert!(ContentHash::parse(&"g".repeat(40)).is_err());
    assert!(ContentHash::from_str(&"a".repeat(41)).is_err());
}

#[test]
fn serde_roundtrip_validates() {
    let hash = ContentHash::of(b"x");
    let json = serde_json::to_string(&hash).unwrap();
    assert_eq!(json, format!("\"{}\"", hash));
    let back: ContentHash = serde_json::from_str(&json).unwrap();
    assert_eq!(back, hash);

    assert!(serde_json::from_str::<ContentHash>("\"nope\"").is_err());
}

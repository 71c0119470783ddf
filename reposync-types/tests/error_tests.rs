use reposync_types::{ContentHash, EntityKey, Error, RepoPath};

fn kind(err: &Error) -> &'static str {
    match err {
        Error::InvalidPath(_) => "path",
        Error::InvalidKey(_) => "key",
        Error::InvalidHash(_) => "hash",
    }
}

// ── Variants come from validation ─────────────────────────────────

#[test]
fn every_variant_is_produced_by_a_constructor() {
    let path = RepoPath::new("/etc/passwd").unwrap_err();
    let key = EntityKey::new("post", "").unwrap_err();
    let hash = ContentHash::parse("xyz").unwrap_err();

    assert_eq!(kind(&path), "path");
    assert_eq!(kind(&key), "key");
    assert_eq!(kind(&hash), "hash");
}

#[test]
fn messages_name_the_rejected_input() {
    let err = ContentHash::parse("xyz").unwrap_err();
    assert!(err.to_string().starts_with("invalid content hash"));
    assert!(err.to_string().contains("xyz"));
}

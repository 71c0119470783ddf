use pretty_assertions::assert_eq;
use reposync_provider::{ProviderConfig, ProviderError, ProviderKind, create_provider};

// ── ProviderKind ────────────────────────────────────────────────

#[test]
fn kind_parses_case_insensitively() {
    assert_eq!("github".parse::<ProviderKind>().unwrap(), ProviderKind::GitHub);
    assert_eq!("GitLab".parse::<ProviderKind>().unwrap(), ProviderKind::GitLab);
    assert_eq!("BITBUCKET".parse::<ProviderKind>().unwrap(), ProviderKind::Bitbucket);
}

#[test]
fn unknown_kind_is_unsupported() {
    let err = "gitea".parse::<ProviderKind>().unwrap_err();
    assert!(matches!(err, ProviderError::UnsupportedProvider(ref k) if k == "gitea"));
}

#[test]
fn kind_serde_uses_lowercase() {
    let json = serde_json::to_string(&ProviderKind::GitLab).unwrap();
    assert_eq!(json, "\"gitlab\"");
    let kind: ProviderKind = serde_json::from_str("\"bitbucket\"").unwrap();
    assert_eq!(kind, ProviderKind::Bitbucket);
}

// ── ProviderConfig ──────────────────────────────────────────────

#[test]
fn config_defaults() {
    let cfg = ProviderConfig::default();
    assert_eq!(cfg.branch, "main");
    assert_eq!(cfg.timeout_secs, 30);
    assert_eq!(cfg.archive_timeout_secs, 60);
    assert!(cfg.allow_private_repos);
    assert_eq!(cfg.api_base_url(), "https://api.github.com");
    assert_eq!(cfg.archive_base_url(), "https://bitbucket.org");
}

#[test]
fn api_base_url_follows_kind_and_override() {
    let gitlab = ProviderConfig::new(ProviderKind::GitLab, "g/p", "t", "main");
    assert_eq!(gitlab.api_base_url(), "https://gitlab.com/api/v4");

    let bitbucket = ProviderConfig::new(ProviderKind::Bitbucket, "w/r", "t", "main");
    assert_eq!(bitbucket.api_base_url(), "https://api.bitbucket.org/2.0");

    let custom = gitlab.with_api_base_url("https://git.example.com/api/v4/");
    assert_eq!(custom.api_base_url(), "https://git.example.com/api/v4");
}

#[test]
fn config_serde_fills_defaults() {
    let cfg: ProviderConfig =
        serde_json::from_str(r#"{"kind":"gitlab","repository":"g/p","token":"t"}"#).unwrap();
    assert_eq!(cfg.kind, ProviderKind::GitLab);
    assert_eq!(cfg.branch, "main");
    assert_eq!(cfg.timeout_secs, 30);
}

#[test]
fn validate_accepts_complete_config() {
    let cfg = ProviderConfig::new(ProviderKind::GitHub, "acme/site", "token", "main");
    assert!(cfg.validate().is_ok());
}

#[test]
fn validate_rejects_missing_fields() {
    let no_token = ProviderConfig::new(ProviderKind::GitHub, "acme/site", "", "main");
    assert!(matches!(no_token.validate(), Err(ProviderError::Configuration(_))));

    let no_branch = ProviderConfig::new(ProviderKind::GitHub, "acme/site", "t", " ");
    assert!(matches!(no_branch.validate(), Err(ProviderError::Configuration(_))));

    let no_repo = ProviderConfig::new(ProviderKind::GitLab, "", "t", "main");
    assert!(matches!(no_repo.validate(), Err(ProviderError::Configuration(_))));
}

#[test]
fn validate_requires_owner_for_github_and_bitbucket() {
    for kind in [ProviderKind::GitHub, ProviderKind::Bitbucket] {
        let cfg = ProviderConfig::new(kind, "site", "t", "main");
        assert!(matches!(cfg.validate(), Err(ProviderError::Configuration(_))));
        let cfg = ProviderConfig::new(kind, "a/b/c", "t", "main");
        assert!(matches!(cfg.validate(), Err(ProviderError::Configuration(_))));
    }
    // GitLab allows nested groups.
    let nested = ProviderConfig::new(ProviderKind::GitLab, "group/sub/project", "t", "main");
    assert!(nested.validate().is_ok());
}

// ── Factory ─────────────────────────────────────────────────────

#[test]
fn create_provider_builds_each_kind() {
    for kind in [ProviderKind::GitHub, ProviderKind::GitLab, ProviderKind::Bitbucket] {
        let provider = create_provider(ProviderConfig::new(kind, "acme/site", "t", "dev")).unwrap();
        assert_eq!(provider.kind(), kind);
        assert_eq!(provider.branch(), "dev");
    }
}

#[test]
fn create_provider_validates() {
    let result = create_provider(ProviderConfig::new(ProviderKind::GitHub, "acme/site", "", "main"));
    assert!(matches!(result, Err(ProviderError::Configuration(_))));
}

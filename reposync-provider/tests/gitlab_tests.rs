use pretty_assertions::assert_eq;
use reposync_provider::{
    CommitBatch, GitLabProvider, ProviderConfig, ProviderError, ProviderKind, RepositoryProvider,
};
use reposync_types::{CommitAuthor, CommitId, ContentHash, RepoPath};
use serde_json::{Value, json};
use std::io::{Cursor, Write};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const PROJECT: &str = "/projects/acme%2Fsite";

fn sha(c: char) -> String {
    c.to_string().repeat(40)
}

fn mock_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::GitLab, "acme/site", "glpat-test", "main")
        .with_api_base_url(server.uri())
}

fn provider(server: &MockServer) -> GitLabProvider {
    GitLabProvider::new(mock_config(server)).unwrap()
}

fn p(s: &str) -> RepoPath {
    RepoPath::new(s).unwrap()
}

async fn mount_exists(server: &MockServer, file: &str, exists: bool) {
    Mock::given(method("HEAD"))
        .and(path(format!("{PROJECT}/repository/files/{file}")))
        .respond_with(ResponseTemplate::new(if exists { 200 } else { 404 }))
        .mount(server)
        .await;
}

// ── Remote hashes ───────────────────────────────────────────────

#[tokio::test]
async fn remote_hashes_follow_next_page_header() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(PROJECT))
        .and(header("private-token", "glpat-test"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(format!("{PROJECT}/repository/branches/main")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/tree")))
        .and(query_param("page", "1"))
        .and(query_param("recursive", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "2")
                .set_body_json(json!([
                    { "id": sha('a'), "path": "_post/hello", "type": "blob" },
                    { "id": sha('f'), "path": "_post", "type": "tree" },
                ])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/tree")))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-next-page", "")
                .set_body_json(json!([{ "id": sha('b'), "path": "_page/about", "type": "blob" }])),
        )
        .mount(&server)
        .await;

    let hashes = provider(&server).get_remote_hashes().await.unwrap();
    assert_eq!(hashes.len(), 2);
    assert_eq!(hashes[&p("_page/about")], ContentHash::parse(&sha('b')).unwrap());
}

#[tokio::test]
async fn remote_hashes_missing_project_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(PROJECT))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = provider(&server).get_remote_hashes().await.unwrap_err();
    assert!(err.is_not_found());
}

// ── Commit ──────────────────────────────────────────────────────

#[tokio::test]
async fn commit_classifies_actions_with_head_checks() {
    let server = MockServer::start().await;
    mount_exists(&server, "_post%2Fexisting", true).await;
    mount_exists(&server, "_post%2Fnew", false).await;
    mount_exists(&server, "_post%2Fold", true).await;
    mount_exists(&server, "_post%2Fmissing", false).await;
    Mock::given(method("POST"))
        .and(path(format!("{PROJECT}/repository/commits")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": sha('e') })))
        .expect(1)
        .mount(&server)
        .await;

    let batch = CommitBatch::new("Sync", CommitAuthor::new("Ada", "ada@example.com"))
        .write(p("_post/existing"), b"v2".to_vec())
        .write(p("_post/new"), b"v1".to_vec())
        .delete(p("_post/old"))
        .delete(p("_post/missing"));
    let result = provider(&server).commit(&batch).await.unwrap();

    assert_eq!(result.commit_id, CommitId::new(sha('e')));
    assert_eq!(result.created, vec![p("_post/new")]);
    assert_eq!(result.updated, vec![p("_post/existing")]);
    assert_eq!(result.deleted, vec![p("_post/old")]);

    let requests = server.received_requests().await.unwrap();
    let post = requests.iter().find(|r| r.method.as_str() == "POST").unwrap();
    let body: Value = serde_json::from_slice(&post.body).unwrap();
    assert_eq!(body["branch"], "main");
    assert_eq!(body["author_email"], "ada@example.com");
    let actions: Vec<(&str, &str)> = body["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| (a["action"].as_str().unwrap(), a["file_path"].as_str().unwrap()))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("update", "_post/existing"),
            ("create", "_post/new"),
            ("delete", "_post/old"),
        ]
    );
    assert_eq!(body["actions"][0]["encoding"], "base64");
}

#[tokio::test]
async fn commit_without_actions_on_empty_branch_fails() {
    let server = MockServer::start().await;
    mount_exists(&server, "_post%2Fmissing", false).await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/branches/main")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let batch = CommitBatch::new("noop", CommitAuthor::default()).delete(p("_post/missing"));
    let err = provider(&server).commit(&batch).await.unwrap_err();
    assert!(matches!(err, ProviderError::EmptyCommit));
}

#[tokio::test]
async fn delete_checks_existence_first() {
    let server = MockServer::start().await;
    mount_exists(&server, "_post%2Fgone", false).await;

    let deleted = provider(&server)
        .delete_file(&p("_post/gone"), "Delete gone", &CommitAuthor::default())
        .await
        .unwrap();
    assert!(!deleted);
}

// ── Reads ───────────────────────────────────────────────────────

#[tokio::test]
async fn get_file_reads_raw_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/files/_post%2Fhello/raw")))
        .and(query_param("ref", "main"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}\n".to_vec()))
        .mount(&server)
        .await;

    let content = provider(&server).get_file(&p("_post/hello")).await.unwrap();
    assert_eq!(content, Some(b"{}\n".to_vec()));
}

#[tokio::test]
async fn latest_commit_of_missing_branch_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/branches/main")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert_eq!(provider(&server).get_latest_commit_hash().await.unwrap(), None);
}

#[tokio::test]
async fn latest_commit_reads_branch_head() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/branches/main")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "main", "commit": { "id": sha('c') }
        })))
        .mount(&server)
        .await;

    assert_eq!(
        provider(&server).get_latest_commit_hash().await.unwrap(),
        Some(CommitId::new(sha('c')))
    );
}

#[tokio::test]
async fn repository_commits_are_oldest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/commits")))
        .and(query_param("ref_name", "main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": sha('b'), "message": "second", "author_name": "Ada",
                "author_email": "ada@example.com",
                "authored_date": "2024-03-02T10:00:00.000+02:00", "parent_ids": [sha('a')]
            },
            {
                "id": sha('a'), "message": "first", "author_name": "Ada",
                "author_email": "ada@example.com",
                "authored_date": "2024-03-01T10:00:00.000+02:00", "parent_ids": []
            }
        ])))
        .mount(&server)
        .await;

    let commits = provider(&server).get_repository_commits().await.unwrap();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].id, CommitId::new(sha('a')));
    assert_eq!(commits[1].parents, vec![CommitId::new(sha('a'))]);
    assert_eq!(commits[0].timestamp.to_rfc3339(), "2024-03-01T08:00:00+00:00");
}

#[tokio::test]
async fn commit_files_from_diff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/commits/{}/diff", sha('c'))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "old_path": "_post/a", "new_path": "_post/a", "deleted_file": false, "renamed_file": false },
            { "old_path": "_post/b", "new_path": "_post/b", "deleted_file": true, "renamed_file": false },
            { "old_path": "_post/c", "new_path": "_post/d", "deleted_file": false, "renamed_file": true },
        ])))
        .mount(&server)
        .await;

    let files = provider(&server)
        .get_commit_files(&CommitId::new(sha('c')))
        .await
        .unwrap();
    let summary: Vec<(&str, bool)> = files.iter().map(|f| (f.path.as_str(), f.deleted)).collect();
    assert_eq!(
        summary,
        vec![("_post/a", false), ("_post/b", true), ("_post/c", true), ("_post/d", false)]
    );
}

#[tokio::test]
async fn initialize_downloads_archive() {
    let server = MockServer::start().await;
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("site-main-abc/_post/hello", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"{}\n").unwrap();
    let bytes = zip.finish().unwrap().into_inner();

    Mock::given(method("GET"))
        .and(path(format!("{PROJECT}/repository/archive.zip")))
        .and(query_param("sha", "main"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .mount(&server)
        .await;

    let files = provider(&server).initialize_repository().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[&p("_post/hello")].hash, ContentHash::of(b"{}\n"));
}

#[tokio::test]
async fn internal_visibility_is_not_public() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PROJECT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "visibility": "internal" })))
        .mount(&server)
        .await;

    assert!(!provider(&server).is_public_repo().await.unwrap());
}

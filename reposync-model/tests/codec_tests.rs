use pretty_assertions::assert_eq;
use reposync_model::{
    Attachment, Entity, EntityCodec, EntityPayload, FnTransform, TransformOutcome,
    TransformRegistry,
};
use reposync_types::{ContentHash, RepoPath};
use serde_json::json;
use std::sync::Arc;

fn page(name: &str) -> Entity {
    Entity::new(
        "page",
        name,
        EntityPayload::default()
            .with_field("title", "About us")
            .with_field("status", "publish")
            .with_meta("layout", "wide"),
    )
    .unwrap()
}

// ── Export ───────────────────────────────────────────────────────

#[test]
fn export_uses_canonical_path() {
    let codec = EntityCodec::default();
    let file = codec.export_entity(&page("about")).unwrap();
    assert_eq!(file.path.as_str(), "_page/about");
}

#[test]
fn export_hash_is_blob_hash_of_content() {
    let codec = EntityCodec::default();
    let file = codec.export_entity(&page("about")).unwrap();
    assert_eq!(file.hash, ContentHash::of(&file.content));
    assert!(file.content.ends_with(b"\n"));
}

#[test]
fn export_is_deterministic_regardless_of_insert_order() {
    let codec = EntityCodec::default();
    let a = Entity::new(
        "page",
        "x",
        EntityPayload::default().with_field("b", 2).with_field("a", 1),
    )
    .unwrap();
    let b = Entity::new(
        "page",
        "x",
        EntityPayload::default().with_field("a", 1).with_field("b", 2),
    )
    .unwrap();
    assert_eq!(codec.hash_entity(&a).unwrap(), codec.hash_entity(&b).unwrap());
}

#[test]
fn empty_sections_are_omitted() {
    let codec = EntityCodec::default();
    let entity = Entity::new("page", "x", EntityPayload::default().with_field("t", "v")).unwrap();
    let file = codec.export_entity(&entity).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&file.content).unwrap();
    assert!(value.get("meta").is_none());
    assert!(value.get("attachment").is_none());
}

// ── Import ───────────────────────────────────────────────────────

#[test]
fn import_recovers_entity() {
    let codec = EntityCodec::default();
    let original = page("docs/intro");
    let file = codec.export_entity(&original).unwrap();

    let imported = codec.import_file(&file.path, &file.content).unwrap();
    assert_eq!(imported, original);
}

#[test]
fn import_rejects_unknown_sections() {
    let codec = EntityCodec::default();
    let path = RepoPath::new("_page/x").unwrap();
    let err = codec
        .import_file(&path, br#"{"fields":{},"surprise":1}"#)
        .unwrap_err();
    assert!(err.to_string().contains("_page/x"));
}

#[test]
fn import_rejects_non_entity_path() {
    let codec = EntityCodec::default();
    let path = RepoPath::new("README.md").unwrap();
    assert!(codec.import_file(&path, b"{}").is_err());
}

#[test]
fn attachment_bytes_roundtrip() {
    let codec = EntityCodec::default();
    let entity = Entity::new(
        "attachment",
        "logo.png",
        EntityPayload::default().with_attachment(Attachment {
            file_name: "logo.png".into(),
            mime_type: "image/png".into(),
            data: vec![0x89, 0x50, 0x4e, 0x47, 0x00, 0xff],
        }),
    )
    .unwrap();

    let file = codec.export_entity(&entity).unwrap();
    let text = String::from_utf8(file.content.clone()).unwrap();
    assert!(text.contains("iVBORwD/"));

    let back = codec.import_file(&file.path, &file.content).unwrap();
    assert_eq!(back, entity);
}

// ── Round trip with transforms ───────────────────────────────────

fn url_rewriting_codec() -> EntityCodec {
    let mut registry = TransformRegistry::new();
    registry.register(
        "page",
        "thumbnail",
        Arc::new(FnTransform::new(
            |_, value| {
                let id = value.as_i64().ok_or("thumbnail must be an id")?;
                Ok(TransformOutcome::Replace(json!(format!("media:{id}"))))
            },
            |_, value| {
                let s = value.as_str().ok_or("thumbnail must be a reference")?;
                let id: i64 = s
                    .strip_prefix("media:")
                    .and_then(|n| n.parse().ok())
                    .ok_or("bad media reference")?;
                Ok(TransformOutcome::Replace(json!(id)))
            },
        )),
    );
    EntityCodec::new(registry)
}

#[test]
fn roundtrip_is_stable_with_inverse_transforms() {
    let codec = url_rewriting_codec();
    let entity = Entity::new(
        "page",
        "home",
        EntityPayload::default()
            .with_field("title", "Home")
            .with_meta("thumbnail", 42),
    )
    .unwrap();

    let first = codec.export_entity(&entity).unwrap();
    let imported = codec.import_file(&first.path, &first.content).unwrap();
    let second = codec.export_entity(&imported).unwrap();

    assert_eq!(first.path, second.path);
    assert_eq!(first.hash, second.hash);
    assert_eq!(imported.payload.meta["thumbnail"], json!(42));
}

#[test]
fn transform_error_names_entity_and_field() {
    let codec = url_rewriting_codec();
    let entity = Entity::new(
        "page",
        "broken",
        EntityPayload::default().with_meta("thumbnail", "not-an-id"),
    )
    .unwrap();

    let err = codec.export_entity(&entity).unwrap_err().to_string();
    assert!(err.contains("page:broken"));
    assert!(err.contains("thumbnail"));
}

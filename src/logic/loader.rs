use flate2::read::GzDecoder;
use itertools::Itertools;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::error::SeedError;
use crate::model::{
    CollectionFixture, CollectionName, FixtureDocument, FixtureSet, IndexSpec, Release, User,
    FIXTURE_FORMAT,
};

/// Parses fixture files into a validated [`FixtureSet`]. Never touches a store.
pub struct FixtureLoader;

impl FixtureLoader {
    pub fn load_path(path: impl AsRef<Path>) -> Result<FixtureSet, SeedError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_bytes(&path.display().to_string(), &bytes)
    }

    pub fn load_str(source: &str, text: &str) -> Result<FixtureSet, SeedError> {
        Self::load_bytes(source, text.as_bytes())
    }

    /// Load raw fixture bytes, gzip-compressed or plain JSON
    pub fn load_bytes(source: &str, data: &[u8]) -> Result<FixtureSet, SeedError> {
        let data = decompress_data(data)
            .map_err(|e| SeedError::malformed(source, format!("invalid gzip data: {}", e)))?;
        let value: Value = serde_json::from_slice(&data)
            .map_err(|e| SeedError::malformed(source, format!("invalid JSON: {}", e)))?;
        Self::load_value(source, value)
    }

    pub fn load_value(source: &str, value: Value) -> Result<FixtureSet, SeedError> {
        let Value::Object(mut root) = value else {
            return Err(SeedError::malformed(source, "fixture root must be an object"));
        };

        match root.remove("format") {
            Some(Value::Number(n)) if n.as_u64() == Some(FIXTURE_FORMAT as u64) => {}
            Some(other) => {
                return Err(SeedError::malformed(
                    "format",
                    format!("unsupported fixture format {}, expected {}", other, FIXTURE_FORMAT),
                ))
            }
            None => return Err(SeedError::malformed("format", "missing fixture format")),
        }

        let version = match root.remove("version") {
            Some(Value::String(v)) if !v.trim().is_empty() => v,
            _ => return Err(SeedError::malformed("version", "must be a non-empty string")),
        };

        // Free-form note for humans
        root.remove("description");

        let collections = match root.remove("collections") {
            Some(Value::Object(map)) => Self::load_collections(map)?,
            Some(_) => return Err(SeedError::malformed("collections", "must be an object")),
            None => return Err(SeedError::malformed("collections", "missing")),
        };

        let indexes = match root.remove("indexes") {
            Some(Value::Array(items)) => Self::load_indexes(items)?,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(SeedError::malformed("indexes", "must be an array")),
        };

        if !root.is_empty() {
            return Err(SeedError::malformed(
                source,
                format!("unknown top-level keys: {}", root.keys().join(", ")),
            ));
        }

        let fingerprint = fingerprint(&version, &collections, &indexes)?;
        let fixtures = FixtureSet {
            source: source.to_string(),
            version,
            fingerprint,
            collections,
            indexes,
        };

        warn_on_shared_credentials(&fixtures);
        log::debug!(
            "Loaded fixture {} version {} ({} documents, {} indexes)",
            fixtures.source,
            fixtures.version,
            fixtures.document_count(),
            fixtures.indexes.len()
        );

        Ok(fixtures)
    }

    fn load_collections(map: Map<String, Value>) -> Result<Vec<CollectionFixture>, SeedError> {
        let mut collections: BTreeMap<CollectionName, CollectionFixture> = BTreeMap::new();

        for (name, documents) in map {
            let collection_name: CollectionName = name
                .parse()
                .map_err(|reason: String| SeedError::malformed(format!("collections.{}", name), reason))?;
            let Value::Array(documents) = documents else {
                return Err(SeedError::malformed(
                    format!("collections.{}", name),
                    "must be an array of documents",
                ));
            };

            let mut collection = CollectionFixture::new(collection_name);
            for (position, raw) in documents.into_iter().enumerate() {
                let location = format!("{}[{}]", collection_name, position);
                let id = document_id(&raw, &location)?;
                if collection.documents.contains_key(&id) {
                    return Err(SeedError::malformed(
                        location,
                        format!("duplicate _id '{}' in collection '{}'", id, collection_name),
                    ));
                }

                let document = parse_document(collection_name, &id, raw)?;
                collection.documents.insert(id, document);
            }

            collections.insert(collection_name, collection);
        }

        Ok(collections.into_values().collect())
    }

    fn load_indexes(items: Vec<Value>) -> Result<Vec<IndexSpec>, SeedError> {
        let mut indexes: Vec<IndexSpec> = Vec::with_capacity(items.len());

        for (position, item) in items.into_iter().enumerate() {
            let location = format!("indexes[{}]", position);
            let spec: IndexSpec = serde_json::from_value(item)
                .map_err(|e| SeedError::malformed(&location, e.to_string()))?;

            if spec.keys.is_empty() {
                return Err(SeedError::malformed(location, "index needs at least one key"));
            }
            if let Some(key) = spec.keys.iter().find(|key| !valid_field_path(&key.field)) {
                return Err(SeedError::malformed(
                    location,
                    format!("invalid field path '{}'", key.field),
                ));
            }
            if indexes.iter().any(|existing| existing.same_keys(&spec)) {
                return Err(SeedError::malformed(
                    location,
                    format!("index {} declared twice", spec.name()),
                ));
            }

            indexes.push(spec);
        }

        Ok(indexes)
    }
}

fn document_id(raw: &Value, location: &str) -> Result<String, SeedError> {
    let Value::Object(fields) = raw else {
        return Err(SeedError::malformed(location, "document must be an object"));
    };
    match fields.get("_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        Some(_) => Err(SeedError::malformed(location, "_id must be a non-empty string")),
        None => Err(SeedError::malformed(location, "missing required _id")),
    }
}

fn parse_document(
    collection: CollectionName,
    id: &str,
    raw: Value,
) -> Result<FixtureDocument, SeedError> {
    let location = format!("{}/{}", collection, id);
    match collection {
        CollectionName::Users => {
            let user: User = serde_json::from_value(raw)
                .map_err(|e| SeedError::malformed(&location, e.to_string()))?;
            Ok(FixtureDocument::User(user))
        }
        CollectionName::Releases => {
            let mut release: Release = serde_json::from_value(raw)
                .map_err(|e| SeedError::malformed(&location, e.to_string()))?;
            validate_release(&mut release, &location)?;
            Ok(FixtureDocument::Release(release))
        }
    }
}

fn validate_release(release: &mut Release, location: &str) -> Result<(), SeedError> {
    if let Some(task) = release.tasks.iter().find(|task| task.id.trim().is_empty()) {
        return Err(SeedError::malformed(
            format!("{}/tasks[{}]", location, task.order_index),
            "task _id must be a non-empty string",
        ));
    }
    if let Some(id) = release.tasks.iter().map(|task| &task.id).duplicates().next() {
        return Err(SeedError::malformed(
            location,
            format!("duplicate task _id '{}'", id),
        ));
    }
    if let Some(order) = release.tasks.iter().map(|task| task.order_index).duplicates().next() {
        return Err(SeedError::malformed(
            location,
            format!("duplicate task orderIndex {}", order),
        ));
    }
    for task in &release.tasks {
        task.check_timeline()
            .map_err(|reason| SeedError::malformed(format!("{}/tasks/{}", location, task.id), reason))?;
    }

    release.normalize_task_order();

    if release.is_completed && release.unfinished_tasks() > 0 {
        log::warn!(
            "Release {} is marked completed but has {} unfinished task(s)",
            release.id,
            release.unfinished_tasks()
        );
    }

    Ok(())
}

fn valid_field_path(field: &str) -> bool {
    field.split('.').all(|segment| {
        !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Several users sharing one credential hash is kept as-is, but flagged.
fn warn_on_shared_credentials(fixtures: &FixtureSet) {
    let shared = fixtures
        .users()
        .map(|user| user.password.as_str())
        .counts()
        .into_values()
        .filter(|count| *count > 1)
        .sum::<usize>();
    if shared > 0 {
        log::warn!(
            "{} users in fixture {} share a credential hash with another user",
            shared,
            fixtures.source
        );
    }
}

fn fingerprint(
    version: &str,
    collections: &[CollectionFixture],
    indexes: &[IndexSpec],
) -> Result<String, SeedError> {
    let mut bodies = Map::new();
    for collection in collections {
        let documents = collection
            .documents
            .values()
            .map(FixtureDocument::to_body)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SeedError::malformed(collection.name.as_str(), e.to_string()))?;
        bodies.insert(collection.name.to_string(), Value::Array(documents));
    }

    let canonical = json!({
        "format": FIXTURE_FORMAT,
        "version": version,
        "collections": bodies,
        "indexes": indexes,
    });
    let bytes = serde_json::to_vec(&canonical)
        .map_err(|e| SeedError::malformed("fixture", e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(b"opsflow-fixture\n");
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Decompress gzip data, passing plain input through
fn decompress_data(data: &[u8]) -> std::io::Result<Cow<'_, [u8]>> {
    // gzip magic bytes (1f 8b)
    if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(Cow::Owned(decompressed))
    } else {
        Ok(Cow::Borrowed(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn user(id: &str, email: &str) -> Value {
        json!({
            "_id": id,
            "email": email,
            "username": id,
            "fullName": "Test User",
            "password": format!("hash-{}", id),
            "roles": ["DEVELOPER"]
        })
    }

    fn task(id: &str, order: u32, status: &str, started: Value, completed: Value) -> Value {
        json!({
            "_id": id,
            "title": "Task",
            "description": "Does a thing",
            "status": status,
            "developerId": "u1",
            "orderIndex": order,
            "startedAt": started,
            "completedAt": completed
        })
    }

    fn fixture(users: Vec<Value>, releases: Vec<Value>) -> Value {
        json!({
            "format": 1,
            "version": "test-1",
            "collections": { "users": users, "releases": releases },
            "indexes": [
                { "collection": "users", "keys": [{ "field": "email" }], "unique": true }
            ]
        })
    }

    fn release(id: &str, tasks: Vec<Value>) -> Value {
        json!({ "_id": id, "title": "Release", "isCompleted": false, "tasks": tasks })
    }

    fn expect_malformed(value: Value) -> (String, String) {
        match FixtureLoader::load_value("test", value) {
            Err(SeedError::MalformedFixture { location, reason }) => (location, reason),
            other => panic!("expected MalformedFixture, got {:?}", other),
        }
    }

    #[test]
    fn test_loads_collections_in_apply_order() {
        let fixtures = FixtureLoader::load_value(
            "test",
            fixture(
                vec![user("u2", "b@x.io"), user("u1", "a@x.io")],
                vec![release("r1", vec![task("t1", 1, "TODO", json!(null), json!(null))])],
            ),
        )
        .unwrap();

        let names: Vec<CollectionName> = fixtures.collections.iter().map(|c| c.name).collect();
        assert_eq!(names, vec![CollectionName::Users, CollectionName::Releases]);

        let users = fixtures.collection(CollectionName::Users).unwrap();
        assert_eq!(users.documents.keys().collect::<Vec<_>>(), vec!["u1", "u2"]);
        assert_eq!(fixtures.document_count(), 3);
        assert_eq!(fixtures.indexes.len(), 1);
        assert_eq!(fixtures.fingerprint.len(), 64);
    }

    #[test]
    fn test_missing_id_is_malformed() {
        let mut bad = user("u1", "a@x.io");
        bad.as_object_mut().unwrap().remove("_id");
        let (location, reason) = expect_malformed(fixture(vec![bad], vec![]));
        assert_eq!(location, "users[0]");
        assert!(reason.contains("_id"));
    }

    #[test]
    fn test_duplicate_id_is_malformed() {
        let (location, reason) = expect_malformed(fixture(
            vec![user("u1", "a@x.io"), user("u1", "b@x.io")],
            vec![],
        ));
        assert_eq!(location, "users[1]");
        assert!(reason.contains("duplicate _id 'u1'"));
    }

    #[test]
    fn test_completed_task_without_completion_time_is_rejected() {
        let (location, reason) = expect_malformed(fixture(
            vec![user("u1", "a@x.io")],
            vec![release(
                "r1",
                vec![task("t1", 1, "COMPLETED", json!("2026-01-05T09:00:00Z"), json!(null))],
            )],
        ));
        assert_eq!(location, "releases/r1/tasks/t1");
        assert!(reason.contains("completedAt"));
    }

    #[test]
    fn test_duplicate_order_index_is_rejected() {
        let (_, reason) = expect_malformed(fixture(
            vec![user("u1", "a@x.io")],
            vec![release(
                "r1",
                vec![
                    task("t1", 1, "TODO", json!(null), json!(null)),
                    task("t2", 1, "TODO", json!(null), json!(null)),
                ],
            )],
        ));
        assert!(reason.contains("orderIndex 1"));
    }

    #[test]
    fn test_duplicate_task_id_is_rejected() {
        let (_, reason) = expect_malformed(fixture(
            vec![user("u1", "a@x.io")],
            vec![release(
                "r1",
                vec![
                    task("t1", 1, "TODO", json!(null), json!(null)),
                    task("t1", 2, "TODO", json!(null), json!(null)),
                ],
            )],
        ));
        assert!(reason.contains("duplicate task _id 't1'"));
    }

    #[test]
    fn test_unknown_collection_and_fields_are_rejected() {
        let mut value = fixture(vec![user("u1", "a@x.io")], vec![]);
        value["collections"]["comments"] = json!([]);
        let (location, _) = expect_malformed(value);
        assert_eq!(location, "collections.comments");

        let mut extra = user("u1", "a@x.io");
        extra["nickname"] = json!("uu");
        let (location, reason) = expect_malformed(fixture(vec![extra], vec![]));
        assert_eq!(location, "users/u1");
        assert!(reason.contains("nickname"));
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let mut value = fixture(vec![], vec![]);
        value["format"] = json!(2);
        let (location, _) = expect_malformed(value);
        assert_eq!(location, "format");
    }

    #[test]
    fn test_invalid_index_declarations() {
        let mut value = fixture(vec![], vec![]);
        value["indexes"] = json!([{ "collection": "users", "keys": [] }]);
        let (location, _) = expect_malformed(value);
        assert_eq!(location, "indexes[0]");

        let mut value = fixture(vec![], vec![]);
        value["indexes"] = json!([{ "collection": "users", "keys": [{ "field": "email'); DROP" }] }]);
        let (_, reason) = expect_malformed(value);
        assert!(reason.contains("invalid field path"));

        let mut value = fixture(vec![], vec![]);
        value["indexes"] = json!([
            { "collection": "users", "keys": [{ "field": "email" }], "unique": true },
            { "collection": "users", "keys": [{ "field": "email" }] }
        ]);
        let (location, reason) = expect_malformed(value);
        assert_eq!(location, "indexes[1]");
        assert!(reason.contains("declared twice"));
    }

    #[test]
    fn test_tasks_are_normalized_into_order_index_order() {
        let fixtures = FixtureLoader::load_value(
            "test",
            fixture(
                vec![user("u1", "a@x.io")],
                vec![release(
                    "r1",
                    vec![
                        task("t3", 3, "TODO", json!(null), json!(null)),
                        task("t1", 1, "IN_PROCESS", json!("2026-01-28T09:00:00Z"), json!(null)),
                        task("t2", 2, "TODO", json!(null), json!(null)),
                    ],
                )],
            ),
        )
        .unwrap();

        let release = fixtures.releases().next().unwrap();
        let ids: Vec<&str> = release.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        assert_eq!(release.tasks[0].status, TaskStatus::InProcess);
    }

    #[test]
    fn test_fingerprint_ignores_key_and_array_order() {
        let a = FixtureLoader::load_value(
            "a",
            fixture(
                vec![user("u1", "a@x.io"), user("u2", "b@x.io")],
                vec![release(
                    "r1",
                    vec![
                        task("t1", 1, "TODO", json!(null), json!(null)),
                        task("t2", 2, "TODO", json!(null), json!(null)),
                    ],
                )],
            ),
        )
        .unwrap();
        let b = FixtureLoader::load_value(
            "b",
            fixture(
                vec![user("u2", "b@x.io"), user("u1", "a@x.io")],
                vec![release(
                    "r1",
                    vec![
                        task("t2", 2, "TODO", json!(null), json!(null)),
                        task("t1", 1, "TODO", json!(null), json!(null)),
                    ],
                )],
            ),
        )
        .unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);

        let changed = FixtureLoader::load_value(
            "c",
            fixture(vec![user("u1", "changed@x.io"), user("u2", "b@x.io")], vec![]),
        )
        .unwrap();
        assert_ne!(a.fingerprint, changed.fingerprint);
    }

    #[test]
    fn test_gzip_fixtures_are_decompressed() {
        let plain = serde_json::to_vec(&fixture(vec![user("u1", "a@x.io")], vec![])).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let from_plain = FixtureLoader::load_bytes("plain", &plain).unwrap();
        let from_gzip = FixtureLoader::load_bytes("gzip", &compressed).unwrap();
        assert_eq!(from_plain.fingerprint, from_gzip.fingerprint);
    }

    #[test]
    fn test_invalid_json_and_missing_file() {
        let err = FixtureLoader::load_str("broken.json", "{ not json").unwrap_err();
        assert!(matches!(err, SeedError::MalformedFixture { ref location, .. } if location == "broken.json"));

        let err = FixtureLoader::load_path("/nonexistent/fixture.json").unwrap_err();
        assert!(matches!(err, SeedError::Io { .. }));
    }
}

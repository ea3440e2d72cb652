use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde_json::{Number, Value};

use crate::error::{StoreError, StoreResult};
use crate::model::{ExistingIndex, IndexSpec};
use crate::store::traits::{DocumentStore, IndexStore, Store};

/// Server error code for a unique index violation
const DUPLICATE_KEY: i32 = 11000;
/// Server error code for an operation on a collection that does not exist
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Fields stored as BSON dates when they hold a millisecond-precision RFC 3339 timestamp
const DATE_FIELDS: [&str; 3] = ["startedAt", "completedAt", "appliedAt"];

/// Document store over a MongoDB database, one collection per fixture collection.
///
/// Ids that are 24-digit hex strings are stored as `ObjectId`s and timestamps as
/// BSON dates; both read back as the strings they were written from.
#[derive(Clone, Debug)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Connect to `uri` and select `database_name`
    pub async fn connect(uri: &str, database_name: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to MongoDB: {}", e)))?;

        // The driver connects lazily; ping so a bad host fails here, not mid-run
        let database = client.database(database_name);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connection(format!("MongoDB ping failed: {}", e)))?;

        Ok(Self { database })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

fn to_document(value: &Value) -> StoreResult<Document> {
    match to_bson(None, value)? {
        Bson::Document(document) => Ok(document),
        other => Err(StoreError::InvalidDocument(format!(
            "expected an object, got {:?}",
            other.element_type()
        ))),
    }
}

fn to_bson(field: Option<&str>, value: &Value) -> StoreResult<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => number_to_bson(n)?,
        Value::String(s) => string_to_bson(field, s),
        Value::Array(items) => Bson::Array(
            items
                .iter()
                .map(|item| to_bson(None, item))
                .collect::<StoreResult<Vec<_>>>()?,
        ),
        Value::Object(fields) => {
            let mut document = Document::new();
            for (key, inner) in fields {
                document.insert(key.clone(), to_bson(Some(key.as_str()), inner)?);
            }
            Bson::Document(document)
        }
    })
}

fn number_to_bson(n: &Number) -> StoreResult<Bson> {
    if let Some(i) = n.as_i64() {
        return Ok(match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        });
    }
    if n.is_u64() {
        return Err(StoreError::InvalidDocument(format!("integer {} out of range", n)));
    }
    n.as_f64()
        .map(Bson::Double)
        .ok_or_else(|| StoreError::InvalidDocument(format!("unsupported number {}", n)))
}

/// Typed BSON for `_id` and date fields, but only when reading it back
/// yields the same string; anything else stays a string.
fn string_to_bson(field: Option<&str>, s: &str) -> Bson {
    match field {
        Some("_id") => ObjectId::parse_str(s)
            .ok()
            .filter(|oid| oid.to_hex() == s)
            .map(Bson::ObjectId)
            .unwrap_or_else(|| Bson::String(s.to_string())),
        Some(name) if DATE_FIELDS.contains(&name) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
            .filter(|ts| ts.timestamp_subsec_nanos() % 1_000_000 == 0 && format_timestamp(ts) == s)
            .map(|ts| Bson::DateTime(mongodb::bson::DateTime::from_millis(ts.timestamp_millis())))
            .unwrap_or_else(|| Bson::String(s.to_string())),
        _ => Bson::String(s.to_string()),
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn date_to_string(value: &Bson) -> Option<String> {
    match value {
        Bson::DateTime(date) => {
            DateTime::<Utc>::from_timestamp_millis(date.timestamp_millis()).map(|ts| format_timestamp(&ts))
        }
        _ => None,
    }
}

fn id_filter(id: &str) -> Document {
    doc! { "_id": string_to_bson(Some("_id"), id) }
}

fn to_value(document: Document) -> Value {
    from_bson(Bson::Document(document))
}

fn from_bson(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(_) => match date_to_string(&value) {
            Some(s) => Value::String(s),
            None => value.into_relaxed_extjson(),
        },
        Bson::Document(document) => Value::Object(
            document
                .into_iter()
                .map(|(key, inner)| (key, from_bson(inner)))
                .collect(),
        ),
        Bson::Array(items) => Value::Array(items.into_iter().map(from_bson).collect()),
        other => other.into_relaxed_extjson(),
    }
}

fn index_keys(spec: &IndexSpec) -> Document {
    let mut keys = Document::new();
    for key in &spec.keys {
        keys.insert(key.field.clone(), key.direction.as_i32());
    }
    keys
}

fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => Some(write_error.code),
        ErrorKind::Command(command_error) => Some(command_error.code),
        _ => None,
    }
}

fn write_error(collection: &str, err: mongodb::error::Error) -> StoreError {
    if server_code(&err) == Some(DUPLICATE_KEY) {
        return StoreError::DuplicateKey {
            collection: collection.to_string(),
            detail: err.to_string(),
        };
    }
    StoreError::Backend(err.to_string())
}

fn backend_error(err: mongodb::error::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    async fn find_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let found = self
            .collection(collection)
            .find_one(id_filter(id))
            .await
            .map_err(backend_error)?;
        Ok(found.map(to_value))
    }

    async fn insert_document(&self, collection: &str, _id: &str, document: &Value) -> StoreResult<()> {
        let document = to_document(document)?;
        self.collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| write_error(collection, e))?;
        Ok(())
    }

    async fn replace_document(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()> {
        let document = to_document(document)?;
        let result = self
            .collection(collection)
            .replace_one(id_filter(id), document)
            .await
            .map_err(|e| write_error(collection, e))?;

        if result.matched_count == 0 {
            return Err(StoreError::Backend(format!(
                "no document {}/{} to replace",
                collection, id
            )));
        }
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> StoreResult<Vec<Value>> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .await
            .map_err(backend_error)?;
        let documents: Vec<Document> = cursor.try_collect().await.map_err(backend_error)?;
        Ok(documents.into_iter().map(to_value).collect())
    }

    async fn count_documents(&self, collection: &str) -> StoreResult<u64> {
        self.collection(collection)
            .count_documents(doc! {})
            .await
            .map_err(backend_error)
    }
}

#[async_trait::async_trait]
impl IndexStore for MongoStore {
    async fn find_index(&self, spec: &IndexSpec) -> StoreResult<Option<ExistingIndex>> {
        let collection = self.collection(spec.collection.as_str());
        let cursor = match collection.list_indexes().await {
            Ok(cursor) => cursor,
            Err(e) if server_code(&e) == Some(NAMESPACE_NOT_FOUND) => return Ok(None),
            Err(e) => return Err(backend_error(e)),
        };
        let models: Vec<IndexModel> = cursor.try_collect().await.map_err(backend_error)?;

        let keys = index_keys(spec);
        Ok(models
            .into_iter()
            .find(|model| model.keys == keys)
            .map(|model| {
                let options = model.options.unwrap_or_default();
                ExistingIndex {
                    name: options.name.unwrap_or_else(|| spec.name()),
                    unique: options.unique.unwrap_or(false),
                }
            }))
    }

    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        let options = IndexOptions::builder()
            .name(spec.name())
            .unique(spec.unique)
            .build();
        let model = IndexModel::builder()
            .keys(index_keys(spec))
            .options(options)
            .build();

        self.collection(spec.collection.as_str())
            .create_index(model)
            .await
            .map_err(|e| write_error(spec.collection.as_str(), e))?;
        Ok(())
    }
}

impl Store for MongoStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }
}

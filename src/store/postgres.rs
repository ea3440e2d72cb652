use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Row};
use std::collections::HashSet;

use crate::error::{StoreError, StoreResult};
use crate::model::{ExistingIndex, IndexSpec, SortDirection};
use crate::store::traits::{DocumentStore, IndexStore, Store};

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";
/// PostgreSQL truncates longer identifiers
const MAX_IDENTIFIER_LEN: usize = 63;

/// Document store over PostgreSQL: one `(id TEXT, body JSONB)` table per collection.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
    known_tables: Mutex<HashSet<String>>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to create PostgreSQL connection pool: {}", e)))?;

        Ok(Self {
            pool,
            known_tables: Mutex::new(HashSet::new()),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_exists(&self, collection: &str) -> StoreResult<bool> {
        if self.known_tables.lock().contains(collection) {
            return Ok(true);
        }

        let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
            .bind(quote_ident(collection))
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)?;
        let present: bool = row.try_get("present").map_err(backend_error)?;

        if present {
            self.known_tables.lock().insert(collection.to_string());
        }
        Ok(present)
    }

    async fn ensure_table(&self, collection: &str) -> StoreResult<()> {
        if self.table_exists(collection).await? {
            return Ok(());
        }

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, body JSONB NOT NULL)",
            quote_ident(collection)
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;

        log::debug!("Created table {}", collection);
        self.known_tables.lock().insert(collection.to_string());
        Ok(())
    }
}

/// Quote an identifier for interpolation into DDL
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn backend_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn write_error(collection: &str, err: sqlx::Error) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::DuplicateKey {
                collection: collection.to_string(),
                detail: db_err
                    .constraint()
                    .map(|c| format!("constraint {}", c))
                    .unwrap_or_else(|| db_err.message().to_string()),
            };
        }
    }
    backend_error(err)
}

/// Table-qualified index name, e.g. `users_email_asc`.
///
/// Names past the identifier limit are cut and suffixed with a hash of the full name.
fn postgres_index_name(spec: &IndexSpec) -> String {
    let keys: Vec<String> = spec
        .keys
        .iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            format!("{}_{}", key.field.replace('.', "_"), direction)
        })
        .collect();
    let name = format!("{}_{}", spec.collection, keys.join("_"));
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }

    // Field paths are ASCII, so any byte offset is a char boundary
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let suffix = &digest[..12];
    format!("{}_{}", &name[..MAX_IDENTIFIER_LEN - suffix.len() - 1], suffix)
}

/// Index method and key list as `pg_get_indexdef` renders them, reduced by
/// [`normalize_index_def`], e.g. `btree` and `body->>'email'`.
fn index_signature(spec: &IndexSpec) -> (&'static str, String) {
    if spec.keys.iter().any(|key| key.is_nested()) {
        let segments = spec.keys[0].segments();
        return (
            "gin",
            normalize_index_def(&format!("(body -> {}) jsonb_path_ops", quote_literal(segments[0]))),
        );
    }

    let columns: Vec<String> = spec
        .keys
        .iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => "",
                SortDirection::Desc => " DESC",
            };
            format!("(body ->> {}){}", quote_literal(&key.field), direction)
        })
        .collect();
    ("btree", normalize_index_def(&columns.join(", ")))
}

/// Strip the parentheses, whitespace and `::text` casts `pg_get_indexdef` adds
fn normalize_index_def(def: &str) -> String {
    def.replace("::text", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect()
}

/// Split `CREATE [UNIQUE] INDEX name ON table USING method (keys)` into method
/// and normalized keys. Partial indexes never match.
fn parse_index_def(def: &str) -> Option<(String, String)> {
    let (_, using) = def.split_once(" USING ")?;
    if using.contains(" WHERE ") {
        return None;
    }
    let (method, keys) = using.split_once(' ')?;
    Some((method.to_lowercase(), normalize_index_def(keys)))
}

/// `CREATE INDEX` statement for a spec.
///
/// Top-level keys become B-tree expression indexes on `body ->> 'field'`. A
/// single nested key becomes a GIN index over its top-level array, which
/// serves containment queries such as `body -> 'tasks' @> '[{"developerId": "x"}]'`.
fn create_index_sql(spec: &IndexSpec) -> StoreResult<String> {
    let name = quote_ident(&postgres_index_name(spec));
    let table = quote_ident(spec.collection.as_str());

    if spec.keys.iter().any(|key| key.is_nested()) {
        if spec.unique || spec.keys.len() > 1 {
            return Err(StoreError::UnsupportedIndex {
                index: spec.name(),
                reason: "nested keys are only supported as single, non-unique keys".to_string(),
            });
        }
        let segments = spec.keys[0].segments();
        return Ok(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN ((body -> {}) jsonb_path_ops)",
            name,
            table,
            quote_literal(segments[0])
        ));
    }

    let columns: Vec<String> = spec
        .keys
        .iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("(body ->> {}) {}", quote_literal(&key.field), direction)
        })
        .collect();

    Ok(format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if spec.unique { "UNIQUE " } else { "" },
        name,
        table,
        columns.join(", ")
    ))
}

#[async_trait::async_trait]
impl DocumentStore for PostgresStore {
    async fn find_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        if !self.table_exists(collection).await? {
            return Ok(None);
        }

        let sql = format!("SELECT body FROM {} WHERE id = $1", quote_ident(collection));
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Json(body): Json<Value> = row.try_get("body").map_err(backend_error)?;
        Ok(Some(body))
    }

    async fn insert_document(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()> {
        self.ensure_table(collection).await?;

        let sql = format!("INSERT INTO {} (id, body) VALUES ($1, $2)", quote_ident(collection));
        sqlx::query(&sql)
            .bind(id)
            .bind(Json(document))
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(collection, e))?;

        Ok(())
    }

    async fn replace_document(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()> {
        self.ensure_table(collection).await?;

        let sql = format!("UPDATE {} SET body = $2 WHERE id = $1", quote_ident(collection));
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(Json(document))
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(collection, e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!(
                "no document {}/{} to replace",
                collection, id
            )));
        }
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> StoreResult<Vec<Value>> {
        if !self.table_exists(collection).await? {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT body FROM {}", quote_ident(collection));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<Json<Value>, _>("body")
                    .map(|Json(body)| body)
                    .map_err(backend_error)
            })
            .collect()
    }

    async fn count_documents(&self, collection: &str) -> StoreResult<u64> {
        if !self.table_exists(collection).await? {
            return Ok(0);
        }

        let sql = format!("SELECT COUNT(*) AS total FROM {}", quote_ident(collection));
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)?;
        let total: i64 = row.try_get("total").map_err(backend_error)?;
        Ok(total.max(0) as u64)
    }
}

#[async_trait::async_trait]
impl IndexStore for PostgresStore {
    async fn find_index(&self, spec: &IndexSpec) -> StoreResult<Option<ExistingIndex>> {
        if !self.table_exists(spec.collection.as_str()).await? {
            return Ok(None);
        }

        let rows = sqlx::query(
            r#"
            SELECT ic.relname::text AS name,
                   i.indisunique AS is_unique,
                   pg_get_indexdef(i.indexrelid) AS definition
            FROM pg_index i
            JOIN pg_class ic ON ic.oid = i.indexrelid
            WHERE i.indrelid = to_regclass($1)::oid
              AND NOT i.indisprimary
            ORDER BY ic.relname
            "#,
        )
        .bind(quote_ident(spec.collection.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        let (method, keys) = index_signature(spec);
        for row in rows {
            let definition: String = row.try_get("definition").map_err(backend_error)?;
            let matches = parse_index_def(&definition)
                .map(|(m, k)| m == method && k == keys)
                .unwrap_or(false);
            if matches {
                return Ok(Some(ExistingIndex {
                    name: row.try_get("name").map_err(backend_error)?,
                    unique: row.try_get("is_unique").map_err(backend_error)?,
                }));
            }
        }
        Ok(None)
    }

    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        let sql = create_index_sql(spec)?;
        self.ensure_table(spec.collection.as_str()).await?;

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(spec.collection.as_str(), e))?;

        Ok(())
    }
}

impl Store for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

use std::collections::HashSet;

use pgembed_core::PgEmbedError;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceStrategy;
use crate::index::QueryOptions;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LEN: usize = 63;

// ---------------------------------------------------------------------------
// Identifier helpers
// ---------------------------------------------------------------------------

/// Reject identifiers PostgreSQL cannot represent or would silently truncate.
pub(crate) fn validate_identifier(what: &str, name: &str) -> Result<(), PgEmbedError> {
    if name.is_empty() {
        return Err(PgEmbedError::Config(format!("{what} must not be empty")));
    }
    if name.contains('\0') {
        return Err(PgEmbedError::Config(format!(
            "{what} '{}' must not contain NUL characters",
            name.escape_debug()
        )));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(PgEmbedError::Config(format!(
            "{what} '{name}' is longer than {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    Ok(())
}

/// Render a quoted identifier, doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render `"schema"."name"`.
pub(crate) fn qualified_name(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(name))
}

fn check_distinct<'a>(
    reserved: &[(&str, &'a str)],
    extra: impl IntoIterator<Item = &'a str>,
) -> Result<(), PgEmbedError> {
    let mut seen: HashSet<&'a str> = HashSet::new();
    for &(role, name) in reserved {
        if !seen.insert(name) {
            return Err(PgEmbedError::Config(format!(
                "{role} column '{name}' is used for more than one role"
            )));
        }
    }
    for name in extra {
        if !seen.insert(name) {
            return Err(PgEmbedError::Config(format!(
                "metadata column '{name}' is listed twice or collides with a reserved column"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`PgEmbeddingStore`](crate::PgEmbeddingStore) over an
/// existing table.
///
/// Validated once when the store is constructed; the store never changes it
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub table_name: String,
    pub schema_name: String,
    pub id_column: String,
    pub content_column: String,
    pub embedding_column: String,
    /// Columns that hold individual metadata keys, in insertion order.
    /// Mutually exclusive with `ignore_metadata_columns`.
    pub metadata_columns: Vec<String>,
    /// JSON column receiving metadata keys without a dedicated column.
    /// `None`, or a name the table does not have, disables it.
    pub overflow_column: Option<String>,
    /// When non-empty, every column except these (and the id, content,
    /// embedding and overflow columns) is treated as a metadata column.
    pub ignore_metadata_columns: Vec<String>,
    pub distance_strategy: DistanceStrategy,
    /// Session settings applied with `SET LOCAL` before each search.
    pub query_options: Option<QueryOptions>,
    /// Default number of results when a request does not set one.
    pub k: usize,
    /// Candidates fetched before maximal marginal relevance re-ranking.
    pub fetch_k: usize,
    /// Relevance/diversity trade-off for maximal marginal relevance
    /// (1.0 = pure relevance, 0.0 = maximum diversity).
    pub lambda_mult: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            schema_name: "public".to_string(),
            id_column: "id".to_string(),
            content_column: "content".to_string(),
            embedding_column: "embedding".to_string(),
            metadata_columns: Vec::new(),
            overflow_column: Some("metadata_json".to_string()),
            ignore_metadata_columns: Vec::new(),
            distance_strategy: DistanceStrategy::Cosine,
            query_options: None,
            k: 4,
            fetch_k: 20,
            lambda_mult: 0.5,
        }
    }
}

impl StoreConfig {
    /// Create a configuration for `table_name` with all other options at
    /// their defaults.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_content_column(mut self, column: impl Into<String>) -> Self {
        self.content_column = column.into();
        self
    }

    pub fn with_embedding_column(mut self, column: impl Into<String>) -> Self {
        self.embedding_column = column.into();
        self
    }

    pub fn with_metadata_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.metadata_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_overflow_column(mut self, column: impl Into<String>) -> Self {
        self.overflow_column = Some(column.into());
        self
    }

    pub fn without_overflow_column(mut self) -> Self {
        self.overflow_column = None;
        self
    }

    pub fn with_ignore_metadata_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.ignore_metadata_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_distance_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.distance_strategy = strategy;
        self
    }

    pub fn with_query_options(mut self, options: QueryOptions) -> Self {
        self.query_options = Some(options);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_fetch_k(mut self, fetch_k: usize) -> Self {
        self.fetch_k = fetch_k;
        self
    }

    pub fn with_lambda_mult(mut self, lambda_mult: f64) -> Self {
        self.lambda_mult = lambda_mult;
        self
    }

    /// Check everything that can be checked without looking at the table.
    pub fn validate(&self) -> Result<(), PgEmbedError> {
        if !self.metadata_columns.is_empty() && !self.ignore_metadata_columns.is_empty() {
            return Err(PgEmbedError::ConfigurationConflict(
                "metadata_columns and ignore_metadata_columns cannot be used together".to_string(),
            ));
        }

        validate_identifier("table_name", &self.table_name)?;
        validate_identifier("schema_name", &self.schema_name)?;
        validate_identifier("id_column", &self.id_column)?;
        validate_identifier("content_column", &self.content_column)?;
        validate_identifier("embedding_column", &self.embedding_column)?;
        if let Some(overflow) = &self.overflow_column {
            validate_identifier("overflow_column", overflow)?;
        }
        for column in &self.metadata_columns {
            validate_identifier("metadata column", column)?;
        }
        for column in &self.ignore_metadata_columns {
            validate_identifier("ignored metadata column", column)?;
        }

        let mut reserved = vec![
            ("id", self.id_column.as_str()),
            ("content", self.content_column.as_str()),
            ("embedding", self.embedding_column.as_str()),
        ];
        if let Some(overflow) = &self.overflow_column {
            reserved.push(("overflow", overflow.as_str()));
        }
        check_distinct(&reserved, self.metadata_columns.iter().map(String::as_str))?;

        if self.k == 0 {
            return Err(PgEmbedError::Config("k must be > 0".to_string()));
        }
        if self.fetch_k < self.k {
            return Err(PgEmbedError::Config(format!(
                "fetch_k ({}) must be >= k ({})",
                self.fetch_k, self.k
            )));
        }
        if !(0.0..=1.0).contains(&self.lambda_mult) {
            return Err(PgEmbedError::Config(format!(
                "lambda_mult ({}) must be within [0, 1]",
                self.lambda_mult
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TableConfig
// ---------------------------------------------------------------------------

/// A metadata column to create alongside the required columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataColumn {
    pub name: String,
    /// SQL type, rendered verbatim (e.g. `text`, `bigint`, `uuid`).
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl MetadataColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }

    pub(crate) fn column_definition(&self) -> String {
        let mut definition = format!("{} {}", quote_identifier(&self.name), self.data_type);
        if !self.nullable {
            definition.push_str(" NOT NULL");
        }
        definition
    }
}

/// Layout of a table created by
/// [`PgEngine::init_vector_store_table`](crate::PgEngine::init_vector_store_table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub table_name: String,
    pub vector_size: u32,
    pub schema_name: String,
    pub id_column: String,
    pub content_column: String,
    pub embedding_column: String,
    pub metadata_columns: Vec<MetadataColumn>,
    pub overflow_column: String,
    /// Drop an existing table of the same name first.
    pub overwrite_existing: bool,
    /// Create the JSON overflow column.
    pub store_metadata: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            vector_size: 0,
            schema_name: "public".to_string(),
            id_column: "id".to_string(),
            content_column: "content".to_string(),
            embedding_column: "embedding".to_string(),
            metadata_columns: Vec::new(),
            overflow_column: "metadata_json".to_string(),
            overwrite_existing: false,
            store_metadata: false,
        }
    }
}

impl TableConfig {
    pub fn new(table_name: impl Into<String>, vector_size: u32) -> Self {
        Self {
            table_name: table_name.into(),
            vector_size,
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_content_column(mut self, column: impl Into<String>) -> Self {
        self.content_column = column.into();
        self
    }

    pub fn with_embedding_column(mut self, column: impl Into<String>) -> Self {
        self.embedding_column = column.into();
        self
    }

    pub fn with_metadata_columns(mut self, columns: Vec<MetadataColumn>) -> Self {
        self.metadata_columns = columns;
        self
    }

    pub fn with_overflow_column(mut self, column: impl Into<String>) -> Self {
        self.overflow_column = column.into();
        self
    }

    pub fn with_overwrite_existing(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    pub fn with_store_metadata(mut self, store_metadata: bool) -> Self {
        self.store_metadata = store_metadata;
        self
    }

    pub fn validate(&self) -> Result<(), PgEmbedError> {
        validate_identifier("table_name", &self.table_name)?;
        validate_identifier("schema_name", &self.schema_name)?;
        validate_identifier("id_column", &self.id_column)?;
        validate_identifier("content_column", &self.content_column)?;
        validate_identifier("embedding_column", &self.embedding_column)?;
        validate_identifier("overflow_column", &self.overflow_column)?;
        if self.vector_size == 0 {
            return Err(PgEmbedError::Config("vector_size must be > 0".to_string()));
        }
        for column in &self.metadata_columns {
            validate_identifier("metadata column", &column.name)?;
            if column.data_type.trim().is_empty() {
                return Err(PgEmbedError::Config(format!(
                    "metadata column '{}' has no data type",
                    column.name
                )));
            }
        }

        let mut reserved = vec![
            ("id", self.id_column.as_str()),
            ("content", self.content_column.as_str()),
            ("embedding", self.embedding_column.as_str()),
        ];
        if self.store_metadata {
            reserved.push(("overflow", self.overflow_column.as_str()));
        }
        check_distinct(
            &reserved,
            self.metadata_columns.iter().map(|c| c.name.as_str()),
        )
    }

    /// Statements that create the table, in execution order.
    pub(crate) fn create_statements(&self) -> Vec<String> {
        let table = qualified_name(&self.schema_name, &self.table_name);
        let mut statements = vec!["CREATE EXTENSION IF NOT EXISTS vector".to_string()];
        if self.overwrite_existing {
            statements.push(format!("DROP TABLE IF EXISTS {table}"));
        }

        let mut columns = vec![
            format!("{} UUID PRIMARY KEY", quote_identifier(&self.id_column)),
            format!("{} TEXT NULL", quote_identifier(&self.content_column)),
            format!(
                "{} vector({}) NOT NULL",
                quote_identifier(&self.embedding_column),
                self.vector_size
            ),
        ];
        columns.extend(self.metadata_columns.iter().map(MetadataColumn::column_definition));
        if self.store_metadata {
            let overflow = MetadataColumn::new(&self.overflow_column, "JSON", true);
            columns.push(overflow.column_definition());
        }
        statements.push(format!("CREATE TABLE {table} ({})", columns.join(", ")));
        statements
    }
}

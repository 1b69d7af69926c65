use std::collections::HashMap;

use pgembed_core::PgEmbedError;
use sqlx::{FromRow, PgPool};

use crate::config::{qualified_name, StoreConfig};

/// One query, ordinal order, dropped columns excluded. `atttypmod` carries the
/// declared dimension of `vector(n)` columns (-1 when undeclared).
const INTROSPECT_COLUMNS: &str = r#"
    SELECT a.attname::text                         AS column_name,
           format_type(a.atttypid, a.atttypmod)    AS data_type,
           t.typname::text                         AS type_name,
           a.atttypmod                             AS type_modifier
      FROM pg_catalog.pg_attribute a
      JOIN pg_catalog.pg_class c     ON c.oid = a.attrelid
      JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
      JOIN pg_catalog.pg_type t      ON t.oid = a.atttypid
     WHERE c.relname = $1
       AND n.nspname = $2
       AND a.attnum > 0
       AND NOT a.attisdropped
     ORDER BY a.attnum
"#;

// ---------------------------------------------------------------------------
// ColumnInfo
// ---------------------------------------------------------------------------

/// How values of a column are bound and decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Text,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// Arbitrary-precision `numeric`; written and read through its text form.
    Numeric,
    Uuid,
    Vector,
    /// json, jsonb and every type without a native mapping; read as text.
    Other,
}

/// A discovered table column.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ColumnInfo {
    #[sqlx(rename = "column_name")]
    pub name: String,
    /// Display type, e.g. `character varying(20)` or `vector(768)`.
    pub data_type: String,
    /// Underlying type name, e.g. `varchar`, `int4`, `vector`.
    pub type_name: String,
    #[sqlx(rename = "type_modifier")]
    type_modifier: i32,
}

impl ColumnInfo {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            type_name: type_name.into(),
            type_modifier: -1,
        }
    }

    /// A `vector(dimension)` column.
    pub fn vector(name: impl Into<String>, dimension: u32) -> Self {
        Self {
            name: name.into(),
            data_type: format!("vector({dimension})"),
            type_name: "vector".to_string(),
            type_modifier: i32::try_from(dimension).unwrap_or(-1),
        }
    }

    /// Declared dimension of a vector column.
    pub fn dimension(&self) -> Option<u32> {
        if self.kind() == ColumnKind::Vector {
            u32::try_from(self.type_modifier).ok().filter(|d| *d > 0)
        } else {
            None
        }
    }

    pub fn is_character_string(&self) -> bool {
        self.kind() == ColumnKind::Text
    }

    pub(crate) fn kind(&self) -> ColumnKind {
        match self.type_name.as_str() {
            "text" | "varchar" | "bpchar" | "name" | "citext" => ColumnKind::Text,
            "int2" => ColumnKind::SmallInt,
            "int4" => ColumnKind::Integer,
            "int8" => ColumnKind::BigInt,
            "float4" => ColumnKind::Real,
            "float8" => ColumnKind::Double,
            "numeric" => ColumnKind::Numeric,
            "uuid" => ColumnKind::Uuid,
            "vector" => ColumnKind::Vector,
            _ => ColumnKind::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// ColumnCatalog
// ---------------------------------------------------------------------------

/// The verified column layout of a store's table.
///
/// Built once when the store is constructed and read-only afterwards.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    schema_name: String,
    table_name: String,
    columns: Vec<ColumnInfo>,
    by_name: HashMap<String, usize>,
    id: usize,
    content: usize,
    embedding: usize,
    metadata: Vec<usize>,
    overflow: Option<usize>,
}

impl ColumnCatalog {
    /// Discover the table's columns and verify them against `config`.
    pub async fn introspect(pool: &PgPool, config: &StoreConfig) -> Result<Self, PgEmbedError> {
        config.validate()?;
        let columns: Vec<ColumnInfo> = sqlx::query_as(INTROSPECT_COLUMNS)
            .bind(&config.table_name)
            .bind(&config.schema_name)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                PgEmbedError::storage(
                    format!(
                        "failed to read columns of {}",
                        qualified_name(&config.schema_name, &config.table_name)
                    ),
                    e,
                )
            })?;
        tracing::debug!(
            "PgEmbeddingStore: discovered {} columns in {}",
            columns.len(),
            qualified_name(&config.schema_name, &config.table_name)
        );
        Self::verify(config, columns)
    }

    /// Verify discovered `columns` (in ordinal order) against `config`.
    pub fn verify(config: &StoreConfig, columns: Vec<ColumnInfo>) -> Result<Self, PgEmbedError> {
        if !config.metadata_columns.is_empty() && !config.ignore_metadata_columns.is_empty() {
            return Err(PgEmbedError::ConfigurationConflict(
                "metadata_columns and ignore_metadata_columns cannot be used together".to_string(),
            ));
        }

        let schema = &config.schema_name;
        let table = &config.table_name;
        if columns.is_empty() {
            return Err(PgEmbedError::TableNotFound {
                schema: schema.clone(),
                table: table.clone(),
            });
        }

        let by_name: HashMap<String, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let find = |column: &str, role: &'static str| {
            by_name
                .get(column)
                .copied()
                .ok_or_else(|| PgEmbedError::MissingColumn {
                    schema: schema.clone(),
                    table: table.clone(),
                    column: column.to_string(),
                    role,
                })
        };

        let id = find(config.id_column.as_str(), "id")?;
        let content = find(config.content_column.as_str(), "content")?;
        if !columns[content].is_character_string() {
            return Err(PgEmbedError::TypeMismatch {
                schema: schema.clone(),
                table: table.clone(),
                column: config.content_column.clone(),
                role: "content",
                expected: "a character string type",
                actual: columns[content].data_type.clone(),
            });
        }
        let embedding = find(config.embedding_column.as_str(), "embedding")?;
        if columns[embedding].kind() != ColumnKind::Vector {
            return Err(PgEmbedError::TypeMismatch {
                schema: schema.clone(),
                table: table.clone(),
                column: config.embedding_column.clone(),
                role: "embedding",
                expected: "vector",
                actual: columns[embedding].data_type.clone(),
            });
        }

        let overflow = config
            .overflow_column
            .as_deref()
            .and_then(|name| by_name.get(name).copied());
        if overflow.is_none() {
            if let Some(name) = &config.overflow_column {
                tracing::debug!(
                    "PgEmbeddingStore: overflow column '{name}' not found in {}, extra metadata will not be stored",
                    qualified_name(schema, table)
                );
            }
        }

        let metadata = if config.ignore_metadata_columns.is_empty() {
            config
                .metadata_columns
                .iter()
                .map(|name| find(name.as_str(), "metadata"))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            (0..columns.len())
                .filter(|i| ![id, content, embedding].contains(i) && Some(*i) != overflow)
                .filter(|i| !config.ignore_metadata_columns.contains(&columns[*i].name))
                .collect()
        };

        Ok(Self {
            schema_name: schema.clone(),
            table_name: table.clone(),
            columns,
            by_name,
            id,
            content,
            embedding,
            metadata,
            overflow,
        })
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// `"schema"."table"`.
    pub fn qualified_table(&self) -> String {
        qualified_name(&self.schema_name, &self.table_name)
    }

    /// All columns in ordinal order.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.by_name.get(name).map(|i| &self.columns[*i])
    }

    pub fn id_column(&self) -> &ColumnInfo {
        &self.columns[self.id]
    }

    pub fn content_column(&self) -> &ColumnInfo {
        &self.columns[self.content]
    }

    pub fn embedding_column(&self) -> &ColumnInfo {
        &self.columns[self.embedding]
    }

    /// Resolved metadata columns, in the order values are written and read.
    pub fn metadata_columns(&self) -> impl ExactSizeIterator<Item = &ColumnInfo> + '_ {
        self.metadata.iter().map(|i| &self.columns[*i])
    }

    /// The JSON overflow column, if the table has it.
    pub fn overflow_column(&self) -> Option<&ColumnInfo> {
        self.overflow.map(|i| &self.columns[i])
    }

    /// The metadata column holding `key`, if any.
    pub(crate) fn metadata_column(&self, key: &str) -> Option<&ColumnInfo> {
        self.metadata_columns().find(|c| c.name == key)
    }

    /// Declared embedding dimension, when the column was created as
    /// `vector(n)`.
    pub fn dimension(&self) -> Option<u32> {
        self.embedding_column().dimension()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", "uuid", "uuid"),
            ColumnInfo::new("content", "text", "text"),
            ColumnInfo::vector("embedding", 2),
            ColumnInfo::new("page", "integer", "int4"),
            ColumnInfo::new("source", "character varying(64)", "varchar"),
            ColumnInfo::new("created_at", "timestamp with time zone", "timestamptz"),
            ColumnInfo::new("metadata_json", "json", "json"),
        ]
    }

    fn names<'a>(columns: impl Iterator<Item = &'a ColumnInfo>) -> Vec<&'a str> {
        columns.map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn explicit_metadata_columns_keep_config_order() {
        let config = StoreConfig::new("docs").with_metadata_columns(["source", "page"]);
        let catalog = ColumnCatalog::verify(&config, sample_columns()).unwrap();
        assert_eq!(names(catalog.metadata_columns()), vec!["source", "page"]);
        assert_eq!(catalog.overflow_column().unwrap().name, "metadata_json");
        assert_eq!(catalog.dimension(), Some(2));
        assert_eq!(catalog.qualified_table(), "\"public\".\"docs\"");
    }

    #[test]
    fn ignore_list_takes_remaining_columns_in_discovery_order() {
        let config = StoreConfig::new("docs").with_ignore_metadata_columns(["created_at"]);
        let catalog = ColumnCatalog::verify(&config, sample_columns()).unwrap();
        assert_eq!(names(catalog.metadata_columns()), vec!["page", "source"]);
    }

    #[test]
    fn ignore_list_without_overflow_column_keeps_json_column_as_metadata() {
        let config = StoreConfig::new("docs")
            .without_overflow_column()
            .with_ignore_metadata_columns(["created_at"]);
        let catalog = ColumnCatalog::verify(&config, sample_columns()).unwrap();
        assert_eq!(
            names(catalog.metadata_columns()),
            vec!["page", "source", "metadata_json"]
        );
        assert!(catalog.overflow_column().is_none());
    }

    #[test]
    fn no_metadata_columns_by_default() {
        let catalog = ColumnCatalog::verify(&StoreConfig::new("docs"), sample_columns()).unwrap();
        assert_eq!(catalog.metadata_columns().len(), 0);
    }

    #[test]
    fn missing_overflow_column_disables_overflow() {
        let config = StoreConfig::new("docs").with_overflow_column("extra");
        let catalog = ColumnCatalog::verify(&config, sample_columns()).unwrap();
        assert!(catalog.overflow_column().is_none());
    }

    #[test]
    fn missing_embedding_column_is_schema_error() {
        let columns: Vec<ColumnInfo> = sample_columns()
            .into_iter()
            .filter(|c| c.name != "embedding")
            .collect();
        let err = ColumnCatalog::verify(&StoreConfig::new("docs"), columns).unwrap_err();
        match err {
            PgEmbedError::MissingColumn { column, role, .. } => {
                assert_eq!(column, "embedding");
                assert_eq!(role, "embedding");
            }
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn missing_id_and_metadata_columns() {
        let config = StoreConfig::new("docs").with_id_column("langchain_id");
        assert!(matches!(
            ColumnCatalog::verify(&config, sample_columns()),
            Err(PgEmbedError::MissingColumn { role: "id", .. })
        ));
        let config = StoreConfig::new("docs").with_metadata_columns(["nope"]);
        assert!(matches!(
            ColumnCatalog::verify(&config, sample_columns()),
            Err(PgEmbedError::MissingColumn { role: "metadata", .. })
        ));
    }

    #[test]
    fn content_must_be_character_string() {
        let mut columns = sample_columns();
        columns[1] = ColumnInfo::new("content", "integer", "int4");
        assert!(matches!(
            ColumnCatalog::verify(&StoreConfig::new("docs"), columns),
            Err(PgEmbedError::TypeMismatch { role: "content", .. })
        ));

        let mut columns = sample_columns();
        columns[1] = ColumnInfo::new("content", "character varying", "varchar");
        assert!(ColumnCatalog::verify(&StoreConfig::new("docs"), columns).is_ok());
    }

    #[test]
    fn embedding_must_be_vector() {
        let mut columns = sample_columns();
        columns[2] = ColumnInfo::new("embedding", "real[]", "_float4");
        let err = ColumnCatalog::verify(&StoreConfig::new("docs"), columns).unwrap_err();
        assert!(matches!(err, PgEmbedError::TypeMismatch { role: "embedding", .. }));
        assert!(err.to_string().contains("real[]"));
    }

    #[test]
    fn empty_table_is_not_found() {
        assert!(matches!(
            ColumnCatalog::verify(&StoreConfig::new("docs"), Vec::new()),
            Err(PgEmbedError::TableNotFound { .. })
        ));
    }

    #[test]
    fn conflict_is_reported_before_columns_are_checked() {
        let config = StoreConfig::new("docs")
            .with_metadata_columns(["page"])
            .with_ignore_metadata_columns(["source"]);
        assert!(matches!(
            ColumnCatalog::verify(&config, Vec::new()),
            Err(PgEmbedError::ConfigurationConflict(_))
        ));
    }

    #[test]
    fn undeclared_vector_dimension() {
        let mut columns = sample_columns();
        columns[2] = ColumnInfo::new("embedding", "vector", "vector");
        let catalog = ColumnCatalog::verify(&StoreConfig::new("docs"), columns).unwrap();
        assert_eq!(catalog.dimension(), None);
    }
}

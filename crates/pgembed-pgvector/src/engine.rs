use pgembed_core::PgEmbedError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::{qualified_name, quote_identifier, validate_identifier, TableConfig};
use crate::index::VectorIndex;

/// Connection handle used to create stores and manage their tables and
/// indexes.
///
/// Cloning is cheap; clones share the underlying [`PgPool`].
#[derive(Debug, Clone)]
pub struct PgEngine {
    pool: PgPool,
}

impl PgEngine {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool options.
    pub async fn connect(url: &str) -> Result<Self, PgEmbedError> {
        Self::connect_with(PgPoolOptions::new(), url).await
    }

    /// Connect with caller-tuned pool options.
    pub async fn connect_with(options: PgPoolOptions, url: &str) -> Result<Self, PgEmbedError> {
        let pool = options
            .connect(url)
            .await
            .map_err(|e| PgEmbedError::storage("failed to connect to PostgreSQL", e))?;
        Ok(Self { pool })
    }

    /// Return a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the pgvector extension and a table laid out by `config`.
    ///
    /// All statements run in one transaction. With `overwrite_existing` an
    /// existing table of the same name is dropped first; otherwise creating
    /// over an existing table fails.
    pub async fn init_vector_store_table(&self, config: &TableConfig) -> Result<(), PgEmbedError> {
        config.validate()?;
        let table = qualified_name(&config.schema_name, &config.table_name);
        let context = |what: &str| format!("{what} while creating {table}");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PgEmbedError::storage(context("failed to begin transaction"), e))?;
        for statement in config.create_statements() {
            tracing::debug!("PgEngine: {statement}");
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    tracing::error!("PgEngine: statement failed on {table}: {e}");
                    PgEmbedError::storage(context("statement failed"), e)
                })?;
        }
        tx.commit()
            .await
            .map_err(|e| PgEmbedError::storage(context("failed to commit"), e))?;

        tracing::info!(
            "PgEngine: created table {table} with vector({}) column {}",
            config.vector_size,
            quote_identifier(&config.embedding_column)
        );
        Ok(())
    }

    /// Create `index` on the embedding column of `schema_name.table_name`.
    ///
    /// Indexes that need an extension (ScaNN) install it first. With
    /// `concurrently` the index is built without locking writes, which cannot
    /// happen inside a transaction block.
    pub async fn apply_vector_index(
        &self,
        schema_name: &str,
        table_name: &str,
        embedding_column: &str,
        index: &VectorIndex,
        concurrently: bool,
    ) -> Result<(), PgEmbedError> {
        validate_identifier("schema_name", schema_name)?;
        validate_identifier("table_name", table_name)?;
        validate_identifier("embedding_column", embedding_column)?;
        let name = index.resolved_name(table_name);
        validate_identifier("index name", &name)?;
        let table = qualified_name(schema_name, table_name);

        if let Some(extension) = index.required_extension() {
            let sql = format!("CREATE EXTENSION IF NOT EXISTS {}", quote_identifier(extension));
            self.execute(&sql, || format!("failed to install extension {extension}"))
                .await?;
        }

        let sql = index.create_statement(schema_name, table_name, embedding_column, concurrently);
        self.execute(&sql, || format!("failed to create index \"{name}\" on {table}"))
            .await?;
        tracing::info!(
            "PgEngine: created {} index \"{name}\" on {table}",
            index.kind.index_type()
        );
        Ok(())
    }

    /// Drop an index if it exists.
    pub async fn drop_vector_index(
        &self,
        schema_name: &str,
        index_name: &str,
    ) -> Result<(), PgEmbedError> {
        validate_identifier("schema_name", schema_name)?;
        validate_identifier("index name", index_name)?;
        let index = qualified_name(schema_name, index_name);
        let sql = format!("DROP INDEX IF EXISTS {index}");
        self.execute(&sql, || format!("failed to drop index {index}"))
            .await?;
        tracing::info!("PgEngine: dropped index {index}");
        Ok(())
    }

    /// Rebuild an index.
    pub async fn reindex(&self, schema_name: &str, index_name: &str) -> Result<(), PgEmbedError> {
        validate_identifier("schema_name", schema_name)?;
        validate_identifier("index name", index_name)?;
        let index = qualified_name(schema_name, index_name);
        let sql = format!("REINDEX INDEX {index}");
        self.execute(&sql, || format!("failed to reindex {index}"))
            .await
    }

    async fn execute(
        &self,
        sql: &str,
        context: impl FnOnce() -> String,
    ) -> Result<(), PgEmbedError> {
        tracing::debug!("PgEngine: {sql}");
        sqlx::query(sql).execute(&self.pool).await.map_err(|e| {
            let context = context();
            tracing::error!("PgEngine: {context}: {e}");
            PgEmbedError::storage(context, e)
        })?;
        Ok(())
    }
}

use async_trait::async_trait;
use pgembed_core::{
    Embedding, EmbeddingMatch, EmbeddingSearchRequest, EmbeddingStore, PgEmbedError, TextSegment,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::ColumnCatalog;
use crate::codec;
use crate::config::StoreConfig;
use crate::engine::PgEngine;
use crate::filter;
use crate::mmr;
use crate::query::{self, Bindings, SearchLayout, SqlValue};

/// An [`EmbeddingStore`] over an existing PostgreSQL table with a pgvector
/// column.
///
/// The table layout is read and verified once in [`new`](Self::new); a store
/// that was built successfully never re-reads it. The store is `Send + Sync`
/// and can be shared behind an `Arc`.
pub struct PgEmbeddingStore {
    pool: PgPool,
    config: StoreConfig,
    catalog: ColumnCatalog,
}

impl PgEmbeddingStore {
    /// Validate `config`, then read and verify the table's columns.
    pub async fn new(engine: &PgEngine, config: StoreConfig) -> Result<Self, PgEmbedError> {
        config.validate()?;
        let catalog = ColumnCatalog::introspect(engine.pool(), &config).await?;
        tracing::info!(
            "PgEmbeddingStore: using {} ({} metadata columns, overflow {}, {:?} distance)",
            catalog.qualified_table(),
            catalog.metadata_columns().len(),
            catalog
                .overflow_column()
                .map_or("disabled", |c| c.name.as_str()),
            config.distance_strategy
        );
        Ok(Self {
            pool: engine.pool().clone(),
            config,
            catalog,
        })
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The verified column layout.
    pub fn catalog(&self) -> &ColumnCatalog {
        &self.catalog
    }

    /// Return a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn storage_error(&self, operation: &str, e: sqlx::Error) -> PgEmbedError {
        let context = format!("{operation} on {}", self.catalog.qualified_table());
        tracing::error!("PgEmbeddingStore: {context} failed: {e}");
        PgEmbedError::storage(context, e)
    }

    fn check_dimension(&self, embedding: &Embedding, expected: usize) -> Result<(), PgEmbedError> {
        if embedding.dimension() != expected {
            return Err(PgEmbedError::InvariantViolation(format!(
                "embedding has dimension {}, {} expects {expected}",
                embedding.dimension(),
                self.catalog.qualified_table()
            )));
        }
        Ok(())
    }

    /// Nearest rows, up to `limit`, nearest first.
    async fn nearest(
        &self,
        request: &EmbeddingSearchRequest,
        limit: usize,
    ) -> Result<Vec<EmbeddingMatch>, PgEmbedError> {
        if request.query_embedding.vector.is_empty() {
            return Err(PgEmbedError::InvariantViolation(
                "query embedding must not be empty".to_string(),
            ));
        }
        if let Some(dimension) = self.catalog.dimension() {
            self.check_dimension(&request.query_embedding, dimension as usize)?;
        }

        let mut bindings = Bindings::new();
        bindings.push(SqlValue::Vector(request.query_embedding.vector.clone()));
        let predicate = request
            .filter
            .as_ref()
            .map(|f| filter::to_predicate(f, &self.catalog, &mut bindings))
            .transpose()?;
        let statement = query::search_statement(
            &self.catalog,
            self.config.distance_strategy,
            predicate,
            limit,
            bindings,
        );
        tracing::debug!("PgEmbeddingStore: {}", statement.sql);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.storage_error("search", e))?;
        if let Some(options) = &self.config.query_options {
            for setting in options.parameter_settings() {
                sqlx::query(&format!("SET LOCAL {setting}"))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| self.storage_error("search", e))?;
            }
        }
        let rows = statement
            .query()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| self.storage_error("search", e))?;
        tx.commit()
            .await
            .map_err(|e| self.storage_error("search", e))?;

        let layout = SearchLayout::for_catalog(&self.catalog);
        rows.iter()
            .map(|row| codec::decode_match(&self.catalog, &layout, row))
            .collect()
    }

    fn result_limit(&self, request: &EmbeddingSearchRequest) -> Result<usize, PgEmbedError> {
        match request.max_results {
            Some(0) => Err(PgEmbedError::InvariantViolation(
                "max_results must be > 0".to_string(),
            )),
            Some(k) => Ok(k),
            None => Ok(self.config.k),
        }
    }

    /// Search for matches that are both close to the query and diverse.
    ///
    /// Fetches `fetch_k` nearest rows (at least as many as requested), then
    /// greedily re-ranks them by maximal marginal relevance with
    /// `lambda_mult`, returning up to `max_results` (or `k`) matches in
    /// selection order.
    pub async fn max_marginal_relevance_search(
        &self,
        request: EmbeddingSearchRequest,
    ) -> Result<Vec<EmbeddingMatch>, PgEmbedError> {
        let k = self.result_limit(&request)?;
        let fetch_k = self.config.fetch_k.max(k);
        let candidates = self.nearest(&request, fetch_k).await?;

        let vectors: Vec<&[f32]> = candidates
            .iter()
            .map(|m| m.embedding.vector.as_slice())
            .collect();
        let order = mmr::select(
            &request.query_embedding.vector,
            &vectors,
            k,
            self.config.lambda_mult,
        );

        let mut candidates: Vec<Option<EmbeddingMatch>> =
            candidates.into_iter().map(Some).collect();
        Ok(order
            .into_iter()
            .filter_map(|i| candidates[i].take())
            .collect())
    }
}

#[async_trait]
impl EmbeddingStore for PgEmbeddingStore {
    async fn add_all_with_ids(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Embedding>,
        segments: Vec<Option<TextSegment>>,
    ) -> Result<(), PgEmbedError> {
        if ids.len() != embeddings.len() || ids.len() != segments.len() {
            return Err(PgEmbedError::InvariantViolation(format!(
                "ids ({}), embeddings ({}) and segments ({}) must have the same length",
                ids.len(),
                embeddings.len(),
                segments.len()
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let uuids = parse_ids(&ids)?;
        let expected = match self.catalog.dimension() {
            Some(dimension) => dimension as usize,
            None => embeddings[0].dimension(),
        };
        if expected == 0 {
            return Err(PgEmbedError::InvariantViolation(
                "embeddings must not be empty".to_string(),
            ));
        }
        for embedding in &embeddings {
            self.check_dimension(embedding, expected)?;
        }

        let rows = uuids
            .into_iter()
            .zip(embeddings)
            .zip(&segments)
            .map(|((id, embedding), segment)| {
                codec::encode_row(&self.catalog, id, embedding, segment.as_ref())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let statements = query::insert_statements(&self.catalog, rows);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.storage_error("insert", e))?;
        for statement in &statements {
            tracing::debug!(
                "PgEmbeddingStore: insert of {} parameters into {}",
                statement.values.len(),
                self.catalog.qualified_table()
            );
            statement
                .query()
                .execute(&mut *tx)
                .await
                .map_err(|e| self.storage_error("insert", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| self.storage_error("insert", e))?;
        Ok(())
    }

    async fn remove_all(&self, ids: &[String]) -> Result<(), PgEmbedError> {
        if ids.is_empty() {
            return Err(PgEmbedError::InvariantViolation(
                "ids must not be empty".to_string(),
            ));
        }
        let statement = query::delete_statement(&self.catalog, parse_ids(ids)?);
        tracing::debug!("PgEmbeddingStore: {}", statement.sql);
        let result = statement
            .query()
            .execute(&self.pool)
            .await
            .map_err(|e| self.storage_error("delete", e))?;
        tracing::debug!(
            "PgEmbeddingStore: deleted {} of {} rows",
            result.rows_affected(),
            ids.len()
        );
        Ok(())
    }

    async fn search(
        &self,
        request: EmbeddingSearchRequest,
    ) -> Result<Vec<EmbeddingMatch>, PgEmbedError> {
        let limit = self.result_limit(&request)?;
        self.nearest(&request, limit).await
    }
}

fn parse_ids(ids: &[String]) -> Result<Vec<Uuid>, PgEmbedError> {
    ids.iter()
        .map(|id| {
            Uuid::parse_str(id).map_err(|_| {
                PgEmbedError::InvariantViolation(format!("id '{id}' is not a valid UUID"))
            })
        })
        .collect()
}

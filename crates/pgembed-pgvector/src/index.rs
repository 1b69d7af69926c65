use serde::{Deserialize, Serialize};

use crate::config::{qualified_name, quote_identifier};
use crate::distance::DistanceStrategy;

// ---------------------------------------------------------------------------
// VectorIndex
// ---------------------------------------------------------------------------

/// Index algorithm and its build parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexKind {
    /// pgvector HNSW.
    Hnsw { m: u32, ef_construction: u32 },
    /// pgvector IVFFlat.
    IvfFlat { lists: u32 },
    /// AlloyDB IVF.
    Ivf { lists: u32, quantizer: String },
    /// AlloyDB ScaNN.
    Scann { num_leaves: u32, quantizer: String },
}

impl IndexKind {
    pub fn hnsw() -> Self {
        Self::Hnsw {
            m: 16,
            ef_construction: 64,
        }
    }

    pub fn ivfflat() -> Self {
        Self::IvfFlat { lists: 100 }
    }

    pub fn ivf() -> Self {
        Self::Ivf {
            lists: 100,
            quantizer: "sq8".to_string(),
        }
    }

    pub fn scann() -> Self {
        Self::Scann {
            num_leaves: 5,
            quantizer: "sq8".to_string(),
        }
    }

    /// Access method name for `USING`.
    pub fn index_type(&self) -> &'static str {
        match self {
            Self::Hnsw { .. } => "hnsw",
            Self::IvfFlat { .. } => "ivfflat",
            Self::Ivf { .. } => "ivf",
            Self::Scann { .. } => "ScaNN",
        }
    }

    /// Contents of the `WITH (...)` clause.
    pub fn index_options(&self) -> String {
        match self {
            Self::Hnsw { m, ef_construction } => {
                format!("(m = {m}, ef_construction = {ef_construction})")
            }
            Self::IvfFlat { lists } => format!("(lists = {lists})"),
            Self::Ivf { lists, quantizer } => {
                format!("(lists = {lists}, quantizer = {quantizer})")
            }
            Self::Scann {
                num_leaves,
                quantizer,
            } => format!("(num_leaves = {num_leaves}, quantizer = {quantizer})"),
        }
    }
}

/// A vector index over the embedding column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    /// Defaults to `<table>_<type>_index`.
    #[serde(default)]
    pub name: Option<String>,
    pub kind: IndexKind,
    #[serde(default)]
    pub distance_strategy: DistanceStrategy,
    /// Predicates ANDed into a partial-index `WHERE` clause. Rendered
    /// verbatim; they must come from trusted configuration.
    #[serde(default)]
    pub partial_indexes: Vec<String>,
}

impl VectorIndex {
    pub fn new(kind: IndexKind) -> Self {
        Self {
            name: None,
            kind,
            distance_strategy: DistanceStrategy::default(),
            partial_indexes: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_distance_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.distance_strategy = strategy;
        self
    }

    pub fn with_partial_indexes<S: Into<String>>(
        mut self,
        predicates: impl IntoIterator<Item = S>,
    ) -> Self {
        self.partial_indexes = predicates.into_iter().map(Into::into).collect();
        self
    }

    /// Operator class (or ScaNN distance measure) for the configured strategy.
    pub fn operator_class(&self) -> &'static str {
        match self.kind {
            IndexKind::Scann { .. } => self.distance_strategy.scann_index_function(),
            IndexKind::Hnsw { .. } | IndexKind::IvfFlat { .. } | IndexKind::Ivf { .. } => {
                self.distance_strategy.index_function()
            }
        }
    }

    pub fn resolved_name(&self, table_name: &str) -> String {
        self.name.clone().unwrap_or_else(|| {
            format!(
                "{table_name}_{}_index",
                self.kind.index_type().to_ascii_lowercase()
            )
        })
    }

    /// Extension that must be installed before the index can be created.
    pub(crate) fn required_extension(&self) -> Option<&'static str> {
        match self.kind {
            IndexKind::Scann { .. } => Some("alloydb_scann"),
            IndexKind::Hnsw { .. } | IndexKind::IvfFlat { .. } | IndexKind::Ivf { .. } => None,
        }
    }

    pub(crate) fn create_statement(
        &self,
        schema_name: &str,
        table_name: &str,
        embedding_column: &str,
        concurrently: bool,
    ) -> String {
        let mut sql = format!(
            "CREATE INDEX {}{} ON {} USING {} ({} {}) WITH {}",
            if concurrently { "CONCURRENTLY " } else { "" },
            quote_identifier(&self.resolved_name(table_name)),
            qualified_name(schema_name, table_name),
            self.kind.index_type(),
            quote_identifier(embedding_column),
            self.operator_class(),
            self.kind.index_options(),
        );
        if !self.partial_indexes.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(
                &self
                    .partial_indexes
                    .iter()
                    .map(|p| format!("({p})"))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            );
        }
        sql
    }
}

// ---------------------------------------------------------------------------
// QueryOptions
// ---------------------------------------------------------------------------

/// Per-search session settings matching the index in use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryOptions {
    Hnsw {
        ef_search: u32,
    },
    IvfFlat {
        probes: u32,
    },
    Ivf {
        probes: u32,
    },
    Scann {
        num_leaves_to_search: u32,
        pre_reordering_num_neighbors: i32,
    },
}

impl QueryOptions {
    pub fn hnsw() -> Self {
        Self::Hnsw { ef_search: 40 }
    }

    pub fn ivfflat() -> Self {
        Self::IvfFlat { probes: 1 }
    }

    pub fn ivf() -> Self {
        Self::Ivf { probes: 1 }
    }

    pub fn scann() -> Self {
        Self::Scann {
            num_leaves_to_search: 1,
            pre_reordering_num_neighbors: -1,
        }
    }

    /// `key = value` pairs, each applied as `SET LOCAL key = value`.
    pub fn parameter_settings(&self) -> Vec<String> {
        match self {
            Self::Hnsw { ef_search } => vec![format!("hnsw.ef_search = {ef_search}")],
            Self::IvfFlat { probes } => vec![format!("ivfflat.probes = {probes}")],
            Self::Ivf { probes } => vec![format!("ivf.probes = {probes}")],
            Self::Scann {
                num_leaves_to_search,
                pre_reordering_num_neighbors,
            } => vec![
                format!("scann.num_leaves_to_search = {num_leaves_to_search}"),
                format!("scann.pre_reordering_num_neighbors = {pre_reordering_num_neighbors}"),
            ],
        }
    }
}

use serde::{Deserialize, Serialize};

/// Similarity metric used for ordering, scoring and index creation.
///
/// Every SQL fragment a strategy contributes comes from the same variant, so
/// an ordering operator can never be paired with another metric's distance
/// function or operator class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceStrategy {
    Euclidean,
    #[default]
    Cosine,
    InnerProduct,
}

impl DistanceStrategy {
    /// pgvector ordering operator.
    pub const fn operator(self) -> &'static str {
        match self {
            Self::Euclidean => "<->",
            Self::Cosine => "<=>",
            Self::InnerProduct => "<#>",
        }
    }

    /// pgvector scalar distance function.
    pub const fn search_function(self) -> &'static str {
        match self {
            Self::Euclidean => "l2_distance",
            Self::Cosine => "cosine_distance",
            Self::InnerProduct => "inner_product",
        }
    }

    /// Operator class for HNSW / IVFFlat / IVF indexes.
    pub const fn index_function(self) -> &'static str {
        match self {
            Self::Euclidean => "vector_l2_ops",
            Self::Cosine => "vector_cosine_ops",
            Self::InnerProduct => "vector_ip_ops",
        }
    }

    /// Distance measure name for AlloyDB ScaNN indexes.
    pub const fn scann_index_function(self) -> &'static str {
        match self {
            Self::Euclidean => "l2",
            Self::Cosine => "cosine",
            Self::InnerProduct => "dot_product",
        }
    }

    /// SQL expression for the reported distance between `column` and
    /// `vector`.
    ///
    /// `inner_product` grows with similarity while `<#>` yields its negation,
    /// so the inner-product distance is negated to agree with the ordering.
    pub(crate) fn distance_expression(self, column: &str, vector: &str) -> String {
        match self {
            Self::Euclidean | Self::Cosine => {
                format!("{}({column}, {vector})", self.search_function())
            }
            Self::InnerProduct => {
                format!("({}({column}, {vector}) * -1)", self.search_function())
            }
        }
    }

    /// `ORDER BY` expression, nearest first.
    pub(crate) fn order_expression(self, column: &str, vector: &str) -> String {
        format!("{column} {} {vector}", self.operator())
    }
}

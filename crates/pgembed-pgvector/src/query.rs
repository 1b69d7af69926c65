use pgvector::Vector;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use uuid::Uuid;

use crate::catalog::{ColumnCatalog, ColumnInfo, ColumnKind};
use crate::config::quote_identifier;
use crate::distance::DistanceStrategy;

/// PostgreSQL's wire protocol caps a statement at this many parameters.
pub(crate) const MAX_BIND_PARAMETERS: usize = 65_535;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A typed, owned bind value. `None` binds a typed NULL.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Text(Option<String>),
    Integer(Option<i32>),
    BigInt(Option<i64>),
    Real(Option<f32>),
    Double(Option<f64>),
    Uuid(Option<Uuid>),
    UuidArray(Vec<Uuid>),
    Vector(Vec<f32>),
}

/// A value together with the column type its placeholder is cast to, if any.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Param {
    pub value: SqlValue,
    pub cast: Option<String>,
}

impl Param {
    pub fn plain(value: SqlValue) -> Self {
        Self { value, cast: None }
    }

    pub fn cast(value: SqlValue, type_name: impl Into<String>) -> Self {
        Self {
            value,
            cast: Some(type_name.into()),
        }
    }
}

/// Accumulates bind values and hands out their numbered placeholders.
#[derive(Debug, Default)]
pub(crate) struct Bindings {
    values: Vec<SqlValue>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` and return its placeholder (`$n`).
    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    /// Append `param` and return its placeholder, cast when the param asks
    /// for it (`$n::"type"`).
    pub fn push_param(&mut self, param: Param) -> String {
        let placeholder = self.push(param.value);
        match param.cast {
            Some(type_name) => format!("{placeholder}::{}", quote_identifier(&type_name)),
            None => placeholder,
        }
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// Bind `values` to `query` in placeholder order.
pub(crate) fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: Vec<SqlValue>,
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Integer(v) => query.bind(v),
            SqlValue::BigInt(v) => query.bind(v),
            SqlValue::Real(v) => query.bind(v),
            SqlValue::Double(v) => query.bind(v),
            SqlValue::Uuid(v) => query.bind(v),
            SqlValue::UuidArray(v) => query.bind(v),
            SqlValue::Vector(v) => query.bind(Vector::from(v)),
        };
    }
    query
}

/// A rendered statement and its bind values.
#[derive(Debug)]
pub(crate) struct Statement {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl Statement {
    pub fn query(&self) -> Query<'_, Postgres, PgArguments> {
        bind_values(sqlx::query(&self.sql), self.values.clone())
    }
}

/// The `SELECT` expression for a column, reading types without a native
/// decoding as text.
pub(crate) fn select_expression(column: &ColumnInfo) -> String {
    let name = quote_identifier(&column.name);
    match column.kind() {
        ColumnKind::Text | ColumnKind::Numeric | ColumnKind::Other | ColumnKind::Vector => {
            format!("{name}::text")
        }
        ColumnKind::SmallInt
        | ColumnKind::Integer
        | ColumnKind::BigInt
        | ColumnKind::Real
        | ColumnKind::Double
        | ColumnKind::Uuid => name,
    }
}

// ---------------------------------------------------------------------------
// INSERT
// ---------------------------------------------------------------------------

/// Columns written by an insert, in statement order: id, content, embedding,
/// metadata columns, then the overflow column when present.
pub(crate) fn insert_columns(catalog: &ColumnCatalog) -> Vec<&ColumnInfo> {
    let mut columns = vec![
        catalog.id_column(),
        catalog.content_column(),
        catalog.embedding_column(),
    ];
    columns.extend(catalog.metadata_columns());
    columns.extend(catalog.overflow_column());
    columns
}

/// Render multi-row inserts, one statement per chunk, each staying under the
/// bind-parameter limit. Every row must hold one param per insert column.
pub(crate) fn insert_statements(catalog: &ColumnCatalog, rows: Vec<Vec<Param>>) -> Vec<Statement> {
    let columns = insert_columns(catalog);
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let rows_per_statement = (MAX_BIND_PARAMETERS / columns.len()).max(1);

    let mut statements = Vec::new();
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let mut bindings = Bindings::new();
        let tuples: Vec<String> = rows
            .by_ref()
            .take(rows_per_statement)
            .map(|row| {
                let placeholders: Vec<String> =
                    row.into_iter().map(|p| bindings.push_param(p)).collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();
        statements.push(Statement {
            sql: format!(
                "INSERT INTO {} ({column_list}) VALUES {}",
                catalog.qualified_table(),
                tuples.join(", ")
            ),
            values: bindings.into_values(),
        });
    }
    statements
}

// ---------------------------------------------------------------------------
// DELETE
// ---------------------------------------------------------------------------

pub(crate) fn delete_statement(catalog: &ColumnCatalog, ids: Vec<Uuid>) -> Statement {
    let id = catalog.id_column();
    Statement {
        sql: format!(
            "DELETE FROM {} WHERE {} = ANY($1::{}[])",
            catalog.qualified_table(),
            quote_identifier(&id.name),
            quote_identifier(&id.type_name)
        ),
        values: vec![SqlValue::UuidArray(ids)],
    }
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

/// Positions of the fixed columns in a search row. Metadata columns come
/// first, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SearchLayout {
    pub id: usize,
    pub content: usize,
    pub embedding: usize,
    pub overflow: Option<usize>,
    pub distance: usize,
}

impl SearchLayout {
    pub fn for_catalog(catalog: &ColumnCatalog) -> Self {
        let metadata = catalog.metadata_columns().len();
        let overflow = catalog.overflow_column().map(|_| metadata + 3);
        Self {
            id: metadata,
            content: metadata + 1,
            embedding: metadata + 2,
            overflow,
            distance: metadata + 3 + usize::from(overflow.is_some()),
        }
    }
}

/// Render a nearest-neighbor search. `bindings` must already hold the query
/// vector at `$1` and any filter values referenced by `predicate`.
pub(crate) fn search_statement(
    catalog: &ColumnCatalog,
    strategy: DistanceStrategy,
    predicate: Option<String>,
    limit: usize,
    mut bindings: Bindings,
) -> Statement {
    let embedding = quote_identifier(&catalog.embedding_column().name);
    let mut select: Vec<String> = catalog.metadata_columns().map(select_expression).collect();
    select.push(format!("{}::text", quote_identifier(&catalog.id_column().name)));
    select.push(format!(
        "{}::text",
        quote_identifier(&catalog.content_column().name)
    ));
    select.push(embedding.clone());
    if let Some(overflow) = catalog.overflow_column() {
        select.push(format!("{}::text", quote_identifier(&overflow.name)));
    }
    select.push(format!(
        "{} AS distance",
        strategy.distance_expression(&embedding, "$1")
    ));

    let mut sql = format!(
        "SELECT {} FROM {}",
        select.join(", "),
        catalog.qualified_table()
    );
    if let Some(predicate) = predicate {
        sql.push_str(" WHERE ");
        sql.push_str(&predicate);
    }
    let limit = bindings.push(SqlValue::BigInt(Some(
        i64::try_from(limit).unwrap_or(i64::MAX),
    )));
    sql.push_str(&format!(
        " ORDER BY {} LIMIT {limit}",
        strategy.order_expression(&embedding, "$1")
    ));
    Statement {
        sql,
        values: bindings.into_values(),
    }
}

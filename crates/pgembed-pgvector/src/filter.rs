use pgembed_core::{Filter, MetadataValue, PgEmbedError};

use crate::catalog::ColumnCatalog;
use crate::codec::column_param;
use crate::config::quote_identifier;
use crate::query::{Bindings, Param, SqlValue};

/// Where a filter key lives.
enum Target<'a> {
    Column(&'a crate::catalog::ColumnInfo),
    /// Key inside the JSON overflow column (quoted column name).
    Overflow(String),
}

/// Translate `filter` into a boolean SQL predicate, pushing every value onto
/// `bindings`.
///
/// Keys that name a metadata column compare against that column; any other
/// key is looked up in the overflow JSON. Negative comparisons (`Ne`,
/// `NotIn`, `Not`) also match rows where the key is absent.
pub(crate) fn to_predicate(
    filter: &Filter,
    catalog: &ColumnCatalog,
    bindings: &mut Bindings,
) -> Result<String, PgEmbedError> {
    let sql = match filter {
        Filter::Eq(key, value) => compare(catalog, bindings, key, "=", value)?,
        Filter::Ne(key, value) => {
            let lhs = lhs_for(catalog, bindings, key, value)?;
            let rhs = rhs_for(catalog, bindings, key, value)?;
            format!("({lhs} IS NULL OR {lhs} <> {rhs})")
        }
        Filter::Gt(key, value) => compare(catalog, bindings, key, ">", value)?,
        Filter::Gte(key, value) => compare(catalog, bindings, key, ">=", value)?,
        Filter::Lt(key, value) => compare(catalog, bindings, key, "<", value)?,
        Filter::Lte(key, value) => compare(catalog, bindings, key, "<=", value)?,
        Filter::In(key, values) => match values.first() {
            None => "FALSE".to_string(),
            Some(first) => {
                let lhs = lhs_for(catalog, bindings, key, first)?;
                let list = in_list(catalog, bindings, key, values)?;
                format!("{lhs} IN ({list})")
            }
        },
        Filter::NotIn(key, values) => match values.first() {
            None => "TRUE".to_string(),
            Some(first) => {
                let lhs = lhs_for(catalog, bindings, key, first)?;
                let list = in_list(catalog, bindings, key, values)?;
                format!("({lhs} IS NULL OR {lhs} NOT IN ({list}))")
            }
        },
        Filter::And(left, right) => format!(
            "({} AND {})",
            to_predicate(left, catalog, bindings)?,
            to_predicate(right, catalog, bindings)?
        ),
        Filter::Or(left, right) => format!(
            "({} OR {})",
            to_predicate(left, catalog, bindings)?,
            to_predicate(right, catalog, bindings)?
        ),
        Filter::Not(inner) => format!(
            "(NOT COALESCE({}, FALSE))",
            to_predicate(inner, catalog, bindings)?
        ),
    };
    Ok(sql)
}

fn resolve<'a>(catalog: &'a ColumnCatalog, key: &str) -> Result<Target<'a>, PgEmbedError> {
    if let Some(column) = catalog.metadata_column(key) {
        return Ok(Target::Column(column));
    }
    match catalog.overflow_column() {
        Some(overflow) => Ok(Target::Overflow(quote_identifier(&overflow.name))),
        None => Err(PgEmbedError::InvariantViolation(format!(
            "filter key '{key}' is not a metadata column of {} and the table has no overflow column",
            catalog.qualified_table()
        ))),
    }
}

/// Left-hand side for `key`, typed by the value it is compared with.
fn lhs_for(
    catalog: &ColumnCatalog,
    bindings: &mut Bindings,
    key: &str,
    value: &MetadataValue,
) -> Result<String, PgEmbedError> {
    Ok(match resolve(catalog, key)? {
        Target::Column(column) => quote_identifier(&column.name),
        Target::Overflow(overflow) => {
            let key = bindings.push(SqlValue::Text(Some(key.to_string())));
            if value.is_numeric() {
                format!(
                    "(CASE WHEN jsonb_typeof({overflow}::jsonb -> {key}) = 'number' \
                     THEN ({overflow}::jsonb ->> {key})::numeric END)"
                )
            } else {
                format!("({overflow}::jsonb ->> {key})")
            }
        }
    })
}

/// Right-hand placeholder for `value` compared against `key`.
fn rhs_for(
    catalog: &ColumnCatalog,
    bindings: &mut Bindings,
    key: &str,
    value: &MetadataValue,
) -> Result<String, PgEmbedError> {
    Ok(match resolve(catalog, key)? {
        Target::Column(column) => bindings.push_param(column_param(column, Some(value))),
        Target::Overflow(_) if value.is_numeric() => {
            // Same text the overflow JSON holds for this value.
            let text = value.to_json()?.to_string();
            bindings.push_param(Param::cast(SqlValue::Text(Some(text)), "numeric"))
        }
        Target::Overflow(_) => bindings.push(SqlValue::Text(Some(value.to_string()))),
    })
}

fn compare(
    catalog: &ColumnCatalog,
    bindings: &mut Bindings,
    key: &str,
    op: &str,
    value: &MetadataValue,
) -> Result<String, PgEmbedError> {
    let lhs = lhs_for(catalog, bindings, key, value)?;
    let rhs = rhs_for(catalog, bindings, key, value)?;
    Ok(format!("{lhs} {op} {rhs}"))
}

fn in_list(
    catalog: &ColumnCatalog,
    bindings: &mut Bindings,
    key: &str,
    values: &[MetadataValue],
) -> Result<String, PgEmbedError> {
    let numeric = values.first().is_some_and(MetadataValue::is_numeric);
    if values.iter().any(|v| v.is_numeric() != numeric) {
        return Err(PgEmbedError::InvariantViolation(format!(
            "filter on '{key}' mixes numeric and non-numeric values"
        )));
    }
    let placeholders = values
        .iter()
        .map(|value| rhs_for(catalog, bindings, key, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(placeholders.join(", "))
}

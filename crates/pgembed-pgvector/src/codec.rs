use pgembed_core::{Embedding, EmbeddingMatch, Metadata, MetadataValue, PgEmbedError, TextSegment};
use pgvector::Vector;
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::catalog::{ColumnCatalog, ColumnInfo, ColumnKind};
use crate::query::{Param, SearchLayout, SqlValue};

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Bind a metadata value for `column`.
///
/// Values whose kind matches the column bind natively, numbers in the
/// column's own width. Anything else is bound as text and cast to the column
/// type, leaving the conversion to PostgreSQL. `numeric` columns always take
/// the text form so no precision is lost on the way in.
pub(crate) fn column_param(column: &ColumnInfo, value: Option<&MetadataValue>) -> Param {
    let kind = column.kind();
    match (kind, value) {
        (ColumnKind::Text, value) => {
            Param::plain(SqlValue::Text(value.map(MetadataValue::to_string)))
        }
        (ColumnKind::Numeric | ColumnKind::Vector | ColumnKind::Other, value) => {
            text_cast(column, value)
        }
        (_, None) => Param::plain(typed_null(kind)),
        (ColumnKind::Uuid, Some(MetadataValue::Uuid(u))) => Param::plain(SqlValue::Uuid(Some(*u))),
        (ColumnKind::Uuid, value) => text_cast(column, value),
        (_, Some(value)) if value.is_numeric() => Param::plain(numeric_value(kind, value)),
        (_, value) => text_cast(column, value),
    }
}

fn text_cast(column: &ColumnInfo, value: Option<&MetadataValue>) -> Param {
    Param::cast(
        SqlValue::Text(value.map(MetadataValue::to_string)),
        &column.type_name,
    )
}

fn typed_null(kind: ColumnKind) -> SqlValue {
    match kind {
        ColumnKind::SmallInt | ColumnKind::Integer => SqlValue::Integer(None),
        ColumnKind::BigInt => SqlValue::BigInt(None),
        ColumnKind::Real => SqlValue::Real(None),
        ColumnKind::Double => SqlValue::Double(None),
        ColumnKind::Uuid => SqlValue::Uuid(None),
        ColumnKind::Text | ColumnKind::Numeric | ColumnKind::Vector | ColumnKind::Other => {
            SqlValue::Text(None)
        }
    }
}

/// A numeric value coerced to the width of a `kind` column, so a filter on a
/// `real` column compares against the same float4 the column stores.
fn numeric_value(kind: ColumnKind, value: &MetadataValue) -> SqlValue {
    match (kind, value) {
        (ColumnKind::Real, MetadataValue::Float(f)) => SqlValue::Real(Some(*f)),
        (ColumnKind::Real, MetadataValue::Double(d)) => SqlValue::Real(Some(*d as f32)),
        (ColumnKind::Double, MetadataValue::Float(f)) => SqlValue::Double(Some(widen(*f))),
        (ColumnKind::BigInt, MetadataValue::Integer(i)) => SqlValue::BigInt(Some(i64::from(*i))),
        (ColumnKind::SmallInt | ColumnKind::Integer, MetadataValue::Long(l)) => {
            match i32::try_from(*l) {
                Ok(i) => SqlValue::Integer(Some(i)),
                Err(_) => SqlValue::BigInt(Some(*l)),
            }
        }
        (_, MetadataValue::Integer(i)) => SqlValue::Integer(Some(*i)),
        (_, MetadataValue::Long(l)) => SqlValue::BigInt(Some(*l)),
        (_, MetadataValue::Float(f)) => SqlValue::Real(Some(*f)),
        (_, MetadataValue::Double(d)) => SqlValue::Double(Some(*d)),
        (_, MetadataValue::String(_) | MetadataValue::Uuid(_)) => {
            SqlValue::Text(Some(value.to_string()))
        }
    }
}

/// Widen through the shortest decimal form: `0.1f32` becomes `0.1`, not
/// `0.10000000149011612`.
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or_else(|_| f64::from(value))
}

/// Metadata split into one param per metadata column plus the overflow param.
#[derive(Debug)]
pub(crate) struct SplitMetadata {
    pub columns: Vec<Param>,
    pub overflow: Option<Param>,
}

/// Split `metadata` across the catalog's metadata columns.
///
/// Keys without a column go into the overflow JSON object when the table has
/// an overflow column and are dropped otherwise. A row stored without a
/// segment gets NULL everywhere, including the overflow column.
pub(crate) fn split(
    catalog: &ColumnCatalog,
    metadata: Option<&Metadata>,
) -> Result<SplitMetadata, PgEmbedError> {
    let columns: Vec<Param> = catalog
        .metadata_columns()
        .map(|column| column_param(column, metadata.and_then(|m| m.get(&column.name))))
        .collect();

    let remaining = metadata.map(|m| {
        m.iter()
            .filter(|(key, _)| catalog.metadata_column(key).is_none())
            .collect::<Vec<_>>()
    });

    let overflow = match catalog.overflow_column() {
        Some(column) => {
            let json = match remaining {
                Some(entries) => {
                    let object = entries
                        .into_iter()
                        .map(|(key, value)| Ok((key.clone(), value.to_json()?)))
                        .collect::<Result<Map<String, Value>, PgEmbedError>>()?;
                    Some(Value::Object(object).to_string())
                }
                None => None,
            };
            Some(Param::cast(SqlValue::Text(json), &column.type_name))
        }
        None => {
            if let Some(entries) = remaining.filter(|e| !e.is_empty()) {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
                tracing::debug!(
                    "PgEmbeddingStore: no overflow column in {}, dropping metadata keys {:?}",
                    catalog.qualified_table(),
                    keys
                );
            }
            None
        }
    };

    Ok(SplitMetadata { columns, overflow })
}

/// One insert row: id, content, embedding, metadata columns, overflow.
pub(crate) fn encode_row(
    catalog: &ColumnCatalog,
    id: Uuid,
    embedding: Embedding,
    segment: Option<&TextSegment>,
) -> Result<Vec<Param>, PgEmbedError> {
    let id_column = catalog.id_column();
    let id = if id_column.kind() == ColumnKind::Uuid {
        Param::plain(SqlValue::Uuid(Some(id)))
    } else {
        Param::cast(SqlValue::Uuid(Some(id)), &id_column.type_name)
    };
    let split = split(catalog, segment.map(|s| &s.metadata))?;

    let mut row = Vec::with_capacity(3 + split.columns.len() + 1);
    row.push(id);
    row.push(Param::plain(SqlValue::Text(segment.map(|s| s.text.clone()))));
    row.push(Param::plain(SqlValue::Vector(embedding.vector)));
    row.extend(split.columns);
    row.extend(split.overflow);
    Ok(row)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Merge typed column values over the overflow object. Column values win;
/// NULL columns leave overflow entries alone.
pub(crate) fn merge(
    columns: Vec<(String, Option<MetadataValue>)>,
    overflow: Option<&str>,
) -> Result<Metadata, PgEmbedError> {
    let mut metadata = match overflow {
        Some(text) => {
            let value: Value = serde_json::from_str(text).map_err(|e| {
                PgEmbedError::Encoding(format!("overflow metadata is not valid JSON: {e}"))
            })?;
            Metadata::from_json_value(&value)?
        }
        None => Metadata::new(),
    };
    for (key, value) in columns {
        if let Some(value) = value {
            metadata.put(key, value);
        }
    }
    Ok(metadata)
}

fn decode_error(catalog: &ColumnCatalog, e: sqlx::Error) -> PgEmbedError {
    PgEmbedError::storage(
        format!("failed to decode search row from {}", catalog.qualified_table()),
        e,
    )
}

/// Integral `numeric` text becomes `Integer` or `Long`, anything else
/// `Double`.
fn numeric_from_text(text: String) -> MetadataValue {
    if let Ok(l) = text.parse::<i64>() {
        return match i32::try_from(l) {
            Ok(i) => MetadataValue::Integer(i),
            Err(_) => MetadataValue::Long(l),
        };
    }
    match text.parse::<f64>() {
        Ok(d) => MetadataValue::Double(d),
        Err(_) => MetadataValue::String(text),
    }
}

fn read_column(
    row: &PgRow,
    index: usize,
    column: &ColumnInfo,
) -> Result<Option<MetadataValue>, sqlx::Error> {
    let value = match column.kind() {
        ColumnKind::SmallInt => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| MetadataValue::Integer(i32::from(v))),
        ColumnKind::Integer => row.try_get::<Option<i32>, _>(index)?.map(MetadataValue::Integer),
        ColumnKind::BigInt => row.try_get::<Option<i64>, _>(index)?.map(MetadataValue::Long),
        ColumnKind::Real => row.try_get::<Option<f32>, _>(index)?.map(MetadataValue::Float),
        ColumnKind::Double => row.try_get::<Option<f64>, _>(index)?.map(MetadataValue::Double),
        ColumnKind::Uuid => row.try_get::<Option<Uuid>, _>(index)?.map(MetadataValue::Uuid),
        ColumnKind::Numeric => row
            .try_get::<Option<String>, _>(index)?
            .map(numeric_from_text),
        ColumnKind::Text | ColumnKind::Vector | ColumnKind::Other => row
            .try_get::<Option<String>, _>(index)?
            .map(MetadataValue::String),
    };
    Ok(value)
}

/// Decode one search row laid out by
/// [`search_statement`](crate::query::search_statement).
pub(crate) fn decode_match(
    catalog: &ColumnCatalog,
    layout: &SearchLayout,
    row: &PgRow,
) -> Result<EmbeddingMatch, PgEmbedError> {
    let columns = catalog
        .metadata_columns()
        .enumerate()
        .map(|(index, column)| Ok((column.name.clone(), read_column(row, index, column)?)))
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(|e| decode_error(catalog, e))?;

    let id: String = row.try_get(layout.id).map_err(|e| decode_error(catalog, e))?;
    let content: Option<String> = row
        .try_get(layout.content)
        .map_err(|e| decode_error(catalog, e))?;
    let vector: Vector = row
        .try_get(layout.embedding)
        .map_err(|e| decode_error(catalog, e))?;
    let overflow: Option<String> = match layout.overflow {
        Some(index) => row.try_get(index).map_err(|e| decode_error(catalog, e))?,
        None => None,
    };
    let distance: f64 = row
        .try_get(layout.distance)
        .map_err(|e| decode_error(catalog, e))?;

    let metadata = merge(columns, overflow.as_deref())?;

    Ok(EmbeddingMatch {
        distance,
        embedding_id: id,
        embedding: Embedding::new(vector.to_vec()),
        embedded: embedded_segment(content, metadata),
    })
}

/// The segment for a decoded row. A row with neither content nor metadata
/// has none; NULL content next to stored metadata yields empty text.
fn embedded_segment(content: Option<String>, metadata: Metadata) -> Option<TextSegment> {
    if content.is_none() && metadata.is_empty() {
        return None;
    }
    Some(TextSegment::with_metadata(content.unwrap_or_default(), metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_columns;
    use crate::config::StoreConfig;

    fn catalog(config: StoreConfig) -> ColumnCatalog {
        ColumnCatalog::verify(&config, sample_columns()).unwrap()
    }

    fn overflow_json(param: &Param) -> Value {
        match &param.value {
            SqlValue::Text(Some(text)) => serde_json::from_str(text).unwrap(),
            other => panic!("expected JSON text, got {other:?}"),
        }
    }

    #[test]
    fn split_places_columns_positionally_and_rest_in_overflow() {
        let catalog = catalog(StoreConfig::new("docs").with_metadata_columns(["source", "page"]));
        let metadata = Metadata::new()
            .with("page", 7)
            .with("lang", "en")
            .with("score", 0.5);
        let split = split(&catalog, Some(&metadata)).unwrap();

        assert_eq!(
            split.columns,
            vec![
                Param::plain(SqlValue::Text(None)),
                Param::plain(SqlValue::Integer(Some(7))),
            ]
        );
        let overflow = split.overflow.unwrap();
        assert_eq!(overflow.cast.as_deref(), Some("json"));
        assert_eq!(
            overflow_json(&overflow),
            serde_json::json!({ "lang": "en", "score": 0.5 })
        );
    }

    #[test]
    fn split_without_segment_writes_nulls() {
        let catalog = catalog(StoreConfig::new("docs").with_metadata_columns(["page"]));
        let split = split(&catalog, None).unwrap();
        assert_eq!(split.columns, vec![Param::plain(SqlValue::Integer(None))]);
        assert_eq!(
            split.overflow,
            Some(Param::cast(SqlValue::Text(None), "json"))
        );
    }

    #[test]
    fn split_without_overflow_drops_unmatched_keys() {
        let catalog = catalog(
            StoreConfig::new("docs")
                .with_metadata_columns(["page"])
                .without_overflow_column(),
        );
        let metadata = Metadata::new().with("page", 1).with("lang", "en");
        let split = split(&catalog, Some(&metadata)).unwrap();
        assert_eq!(split.columns.len(), 1);
        assert!(split.overflow.is_none());
    }

    #[test]
    fn split_rejects_non_finite_overflow_values() {
        let catalog = catalog(StoreConfig::new("docs"));
        let metadata = Metadata::new().with("bad", f64::INFINITY);
        assert!(matches!(
            split(&catalog, Some(&metadata)),
            Err(PgEmbedError::Encoding(_))
        ));
    }

    #[test]
    fn mismatched_kinds_are_cast_to_column_type() {
        let columns = sample_columns();
        let page = &columns[3];
        let created_at = &columns[5];
        assert_eq!(
            column_param(page, Some(&MetadataValue::from("12"))),
            Param::cast(SqlValue::Text(Some("12".to_string())), "int4")
        );
        assert_eq!(
            column_param(page, Some(&MetadataValue::Long(12))),
            Param::plain(SqlValue::Integer(Some(12)))
        );
        assert_eq!(
            column_param(page, Some(&MetadataValue::Long(i64::MAX))),
            Param::plain(SqlValue::BigInt(Some(i64::MAX)))
        );
        assert_eq!(
            column_param(created_at, Some(&MetadataValue::from("2024-01-01T00:00:00Z"))),
            Param::cast(
                SqlValue::Text(Some("2024-01-01T00:00:00Z".to_string())),
                "timestamptz"
            )
        );

        let uuid_column = ColumnInfo::new("source_id", "uuid", "uuid");
        let id = Uuid::new_v4();
        assert_eq!(
            column_param(&uuid_column, Some(&MetadataValue::Uuid(id))),
            Param::plain(SqlValue::Uuid(Some(id)))
        );
        assert_eq!(
            column_param(&uuid_column, Some(&MetadataValue::String(id.to_string()))),
            Param::cast(SqlValue::Text(Some(id.to_string())), "uuid")
        );
    }

    #[test]
    fn numbers_bind_in_the_column_width() {
        let ratio = ColumnInfo::new("ratio", "real", "float4");
        assert_eq!(
            column_param(&ratio, Some(&MetadataValue::Double(0.1))),
            Param::plain(SqlValue::Real(Some(0.1f32)))
        );
        let score = ColumnInfo::new("score", "double precision", "float8");
        assert_eq!(
            column_param(&score, Some(&MetadataValue::Float(0.1))),
            Param::plain(SqlValue::Double(Some(0.1)))
        );
        let offset = ColumnInfo::new("offset", "bigint", "int8");
        assert_eq!(
            column_param(&offset, Some(&MetadataValue::Integer(5))),
            Param::plain(SqlValue::BigInt(Some(5)))
        );
        assert_eq!(column_param(&offset, None), Param::plain(SqlValue::BigInt(None)));
    }

    #[test]
    fn numeric_columns_round_trip_through_text() {
        let price = ColumnInfo::new("price", "numeric(10,2)", "numeric");
        let param = column_param(&price, Some(&MetadataValue::Double(1.5)));
        assert_eq!(param, Param::cast(SqlValue::Text(Some("1.5".to_string())), "numeric"));
        assert_eq!(column_param(&price, None), Param::cast(SqlValue::Text(None), "numeric"));
        assert_eq!(crate::query::select_expression(&price), "\"price\"::text");

        // PostgreSQL renders numeric(10,2) values with their scale.
        let read = numeric_from_text("1.50".to_string());
        let merged = merge(vec![("price".to_string(), Some(read))], None).unwrap();
        assert_eq!(merged.get_double("price"), Some(1.5));

        assert_eq!(numeric_from_text("42".to_string()), MetadataValue::Integer(42));
        assert_eq!(
            numeric_from_text("9000000000".to_string()),
            MetadataValue::Long(9_000_000_000)
        );
        assert_eq!(
            numeric_from_text("0.30000000000000004".to_string()),
            MetadataValue::Double(0.1 + 0.2)
        );
    }

    #[test]
    fn null_content_keeps_stored_metadata() {
        let metadata = merge(
            vec![("page".to_string(), Some(MetadataValue::Integer(3)))],
            Some(r#"{"lang": "en"}"#),
        )
        .unwrap();
        let segment = embedded_segment(None, metadata).expect("metadata kept");
        assert_eq!(segment.text, "");
        assert_eq!(segment.metadata.get_integer("page"), Some(3));
        assert_eq!(segment.metadata.get_string("lang"), Some("en"));

        let empty = merge(vec![("page".to_string(), None)], Some("{}")).unwrap();
        assert!(embedded_segment(None, empty).is_none());

        let segment = embedded_segment(Some("hello".to_string()), Metadata::new()).unwrap();
        assert_eq!(segment.text, "hello");
        assert!(segment.metadata.is_empty());
    }

    #[test]
    fn text_columns_take_any_value_as_text() {
        let columns = sample_columns();
        assert_eq!(
            column_param(&columns[4], Some(&MetadataValue::Integer(3))),
            Param::plain(SqlValue::Text(Some("3".to_string())))
        );
    }

    #[test]
    fn encode_row_orders_params_like_insert_columns() {
        let catalog = catalog(StoreConfig::new("docs").with_metadata_columns(["page"]));
        let id = Uuid::new_v4();
        let segment = TextSegment::with_metadata("hello", Metadata::new().with("page", 2));
        let row = encode_row(&catalog, id, Embedding::new(vec![1.0, 0.0]), Some(&segment)).unwrap();
        assert_eq!(row.len(), 5);
        assert_eq!(row[0], Param::plain(SqlValue::Uuid(Some(id))));
        assert_eq!(row[1], Param::plain(SqlValue::Text(Some("hello".to_string()))));
        assert_eq!(row[2], Param::plain(SqlValue::Vector(vec![1.0, 0.0])));
        assert_eq!(row[3], Param::plain(SqlValue::Integer(Some(2))));
        assert_eq!(overflow_json(&row[4]), serde_json::json!({}));
    }

    #[test]
    fn encode_row_casts_non_uuid_id_columns() {
        let mut columns = sample_columns();
        columns[0] = ColumnInfo::new("id", "text", "text");
        let catalog = ColumnCatalog::verify(&StoreConfig::new("docs"), columns).unwrap();
        let row = encode_row(&catalog, Uuid::nil(), Embedding::new(vec![0.0, 1.0]), None).unwrap();
        assert_eq!(row[0], Param::cast(SqlValue::Uuid(Some(Uuid::nil())), "text"));
        assert_eq!(row[1], Param::plain(SqlValue::Text(None)));
    }

    #[test]
    fn merge_prefers_columns_and_treats_null_overflow_as_empty() {
        let merged = merge(
            vec![
                ("page".to_string(), Some(MetadataValue::Integer(3))),
                ("source".to_string(), None),
            ],
            Some(r#"{"page": 99, "lang": "en", "source": "wiki"}"#),
        )
        .unwrap();
        assert_eq!(merged.get_integer("page"), Some(3));
        assert_eq!(merged.get_string("lang"), Some("en"));
        assert_eq!(merged.get_string("source"), Some("wiki"));

        let merged = merge(vec![("page".to_string(), None)], None).unwrap();
        assert!(merged.is_empty());
        assert!(merge(Vec::new(), Some("null")).unwrap().is_empty());
    }

    #[test]
    fn merge_rejects_bad_overflow() {
        assert!(matches!(
            merge(Vec::new(), Some("[1, 2]")),
            Err(PgEmbedError::Encoding(_))
        ));
        assert!(matches!(
            merge(Vec::new(), Some("not json")),
            Err(PgEmbedError::Encoding(_))
        ));
    }

    #[test]
    fn overflow_round_trips_numbers_and_uuids_exactly() {
        let catalog = catalog(StoreConfig::new("docs"));
        let id = Uuid::new_v4();
        let metadata = Metadata::new()
            .with("big", i64::MAX)
            .with("ratio", 0.1f64 + 0.2f64)
            .with("ref", id);
        let split = split(&catalog, Some(&metadata)).unwrap();
        let json = match split.overflow.unwrap().value {
            SqlValue::Text(Some(text)) => text,
            other => panic!("unexpected {other:?}"),
        };
        let back = merge(Vec::new(), Some(&json)).unwrap();
        assert_eq!(back.get_long("big"), Some(i64::MAX));
        assert_eq!(back.get_double("ratio"), Some(0.1f64 + 0.2f64));
        assert_eq!(back.get_uuid("ref"), Some(id));
    }
}

//! Type & Value Adapter (§4.7): maps a logical column value to a concrete,
//! bindable SQL parameter, and implements the timestamp shim that emulates
//! triggerless `createdAt`/`updatedAt` maintenance.

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::types::ColumnType;

/// A logical record: the JSON-object view of one row that callers pass to
/// `insert`/`update` and receive back from `load`. Uses `serde_json::Map` so
/// field order is preserved the way a caller's JS-style object would be.
pub type Record = Map<String, JsonValue>;

/// A value ready to be bound as a `tokio_postgres` query parameter.
///
/// A real column's SQL type is only known at bind time (it comes from the
/// schema descriptor, not from the value itself), so this enum dispatches
/// to the wrapped type's own `ToSql` rather than trying to infer a SQL type
/// from the JSON shape.
#[derive(Debug, Clone)]
pub enum BoundValue {
    Null,
    Text(String),
    Integer(i32),
    Bigint(i64),
    Boolean(bool),
    Uuid(Uuid),
    /// Naive timestamp bound to a `TIMESTAMP` column.
    Timestamp(chrono::NaiveDateTime),
    /// Timezone-aware timestamp bound to a `TIMESTAMPTZ` shadow column.
    TimestampTz(DateTime<Utc>),
}

impl ToSql for BoundValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Text(v) => v.to_sql(ty, out),
            Self::Integer(v) => v.to_sql(ty, out),
            Self::Bigint(v) => v.to_sql(ty, out),
            Self::Boolean(v) => v.to_sql(ty, out),
            Self::Uuid(v) => v.to_sql(ty, out),
            Self::Timestamp(v) => v.to_sql(ty, out),
            Self::TimestampTz(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Stringifies a JSON object/array for storage in a `TEXT` column, per the
/// "backwards-compatible JSON storage" rule: a bare JSON string passes
/// through unchanged (it is already the caller's intended text), but an
/// object or array is serialized to its compact JSON representation.
fn stringify_for_storage(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_timestamp_str(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Config {
            message: format!("column {column:?}: not a valid ISO-8601 timestamp: {e}"),
        })
}

/// Prepares one field's value for binding against a column of the given
/// logical type, per §4.7:
///
/// - `null` passes through.
/// - `jsonb` columns: objects/arrays are stringified; strings pass through.
/// - all other columns: a non-string object is stringified for backwards
///   compatibility, then parsed according to the column's logical type.
pub fn prepare_value(column: &str, column_type: ColumnType, value: &JsonValue) -> Result<BoundValue> {
    if value.is_null() {
        return Ok(BoundValue::Null);
    }

    match column_type {
        ColumnType::Jsonb | ColumnType::Text => Ok(BoundValue::Text(stringify_for_storage(value))),
        ColumnType::Integer => value
            .as_i64()
            .map(|n| BoundValue::Integer(n as i32))
            .ok_or_else(|| StorageError::Config {
                message: format!("column {column:?}: expected an integer"),
            }),
        ColumnType::Bigint => value
            .as_i64()
            .map(BoundValue::Bigint)
            .ok_or_else(|| StorageError::Config {
                message: format!("column {column:?}: expected an integer"),
            }),
        ColumnType::Boolean => value
            .as_bool()
            .map(BoundValue::Boolean)
            .ok_or_else(|| StorageError::Config {
                message: format!("column {column:?}: expected a boolean"),
            }),
        ColumnType::Uuid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(BoundValue::Uuid)
            .ok_or_else(|| StorageError::Config {
                message: format!("column {column:?}: expected a UUID string"),
            }),
        ColumnType::Timestamp => {
            let raw = value.as_str().ok_or_else(|| StorageError::Config {
                message: format!("column {column:?}: expected an ISO-8601 timestamp string"),
            })?;
            let dt = parse_timestamp_str(raw, column)?;
            Ok(BoundValue::Timestamp(dt.naive_utc()))
        }
    }
}

/// Prepares a value for binding against a `*Z` `TIMESTAMPTZ` shadow column.
pub fn prepare_timestamptz_value(column: &str, value: &JsonValue) -> Result<BoundValue> {
    if value.is_null() {
        return Ok(BoundValue::Null);
    }
    let raw = value.as_str().ok_or_else(|| StorageError::Config {
        message: format!("column {column:?}: expected an ISO-8601 timestamp string"),
    })?;
    Ok(BoundValue::TimestampTz(parse_timestamp_str(raw, column)?))
}

/// Current instant as the ISO-8601 string the shim writes into `updatedAt`/
/// `updatedAtZ` (and their snake_case siblings).
pub fn now_iso8601(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Field pairs the insert-time shim mirrors, if present on the record.
const INSERT_SHADOW_PAIRS: [(&str, &str); 3] = [
    ("createdAt", "createdAtZ"),
    ("created_at", "created_atZ"),
    ("updatedAt", "updatedAtZ"),
];

/// Insert-time shim (§4.7): if the record sets `createdAt`, `created_at`, or
/// `updatedAt`, mirror each into its matching `*Z` shadow field.
pub fn apply_insert_timestamp_shim(record: &mut Record) {
    for (base, shadow) in INSERT_SHADOW_PAIRS {
        if let Some(value) = record.get(base).cloned() {
            record.entry(shadow.to_string()).or_insert(value);
        }
    }
}

/// Update-time shim (§4.7): unconditionally stamps `updatedAt` and
/// `updatedAtZ` with `now`, since DSQL has no triggers to do this
/// automatically.
pub fn apply_update_timestamp_shim(record: &mut Record, now: DateTime<Utc>) {
    let stamp = JsonValue::String(now_iso8601(now));
    record.insert("updatedAt".to_string(), stamp.clone());
    record.insert("updatedAtZ".to_string(), stamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn jsonb_object_is_stringified() {
        let value = json!({"a": 1});
        let prepared = prepare_value("payload", ColumnType::Jsonb, &value).unwrap();
        match prepared {
            BoundValue::Text(s) => assert_eq!(s, "{\"a\":1}"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn jsonb_string_passes_through_unchanged() {
        let value = json!("already-json");
        let prepared = prepare_value("payload", ColumnType::Jsonb, &value).unwrap();
        match prepared {
            BoundValue::Text(s) => assert_eq!(s, "already-json"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn null_passes_through_for_any_type() {
        assert!(matches!(
            prepare_value("x", ColumnType::Integer, &JsonValue::Null).unwrap(),
            BoundValue::Null
        ));
        assert!(matches!(
            prepare_value("x", ColumnType::Jsonb, &JsonValue::Null).unwrap(),
            BoundValue::Null
        ));
    }

    #[test]
    fn non_string_object_in_a_text_column_is_stringified_for_backcompat() {
        let value = json!({"nested": true});
        let prepared = prepare_value("notes", ColumnType::Text, &value).unwrap();
        match prepared {
            BoundValue::Text(s) => assert_eq!(s, "{\"nested\":true}"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn timestamp_shim_mirrors_created_at_into_shadow_on_insert() {
        let mut record = Record::new();
        record.insert("createdAt".to_string(), json!("2024-01-01T00:00:00.000Z"));
        apply_insert_timestamp_shim(&mut record);
        assert_eq!(record.get("createdAtZ").unwrap(), "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn timestamp_shim_does_not_overwrite_an_explicit_shadow_value() {
        let mut record = Record::new();
        record.insert("createdAt".to_string(), json!("2024-01-01T00:00:00.000Z"));
        record.insert("createdAtZ".to_string(), json!("2024-06-01T00:00:00.000Z"));
        apply_insert_timestamp_shim(&mut record);
        assert_eq!(record.get("createdAtZ").unwrap(), "2024-06-01T00:00:00.000Z");
    }

    #[test]
    fn update_shim_sets_matching_updated_at_and_updated_at_z() {
        let mut record = Record::new();
        let now = Utc::now();
        apply_update_timestamp_shim(&mut record, now);
        let base = record.get("updatedAt").unwrap().as_str().unwrap();
        let shadow = record.get("updatedAtZ").unwrap().as_str().unwrap();
        assert_eq!(base, shadow);
    }

    #[test]
    fn uuid_column_parses_valid_uuid_strings() {
        let value = json!("3b1b4f0a-0000-4000-8000-000000000000");
        let prepared = prepare_value("id", ColumnType::Uuid, &value).unwrap();
        assert!(matches!(prepared, BoundValue::Uuid(_)));
    }

    #[test]
    fn uuid_column_rejects_non_uuid_strings() {
        let value = json!("not-a-uuid");
        assert!(prepare_value("id", ColumnType::Uuid, &value).is_err());
    }
}

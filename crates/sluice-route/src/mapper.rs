//! Turning result rows into change records

use sluice_rdbc::{Row, Value};

use crate::error::{Error, Result};
use crate::model::{Data, EventType};

/// Maps one result row to a [`Data`] record
pub trait RowMapper: Send + Sync {
    /// Map a row; rows that cannot be interpreted are a data-format error
    fn map(&self, row: &Row) -> Result<Data>;
}

/// Maps the columns of the default select by name
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnRowMapper;

fn required<'a>(row: &'a Row, column: &str) -> Result<&'a Value> {
    match row.get_by_name(column) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(Error::data_format(format!("column '{}' is missing", column))),
    }
}

/// Text of an optional column; SQL NULL and absent columns are `None`
fn optional_text(row: &Row, column: &str) -> Option<String> {
    row.get_by_name(column).and_then(Value::as_string)
}

impl RowMapper for ColumnRowMapper {
    fn map(&self, row: &Row) -> Result<Data> {
        let data_id = required(row, "data_id")?.as_i64().ok_or_else(|| {
            Error::data_format("column 'data_id' is not an integer")
        })?;
        let table_name = required(row, "table_name")?
            .as_string()
            .ok_or_else(|| Error::data_format("column 'table_name' is not text"))?;
        let event_type = required(row, "event_type")?
            .as_str()
            .ok_or_else(|| Error::data_format("column 'event_type' is not text"))?
            .parse::<EventType>()?;

        Ok(Data {
            data_id,
            table_name,
            event_type,
            old_data: optional_text(row, "old_data"),
            row_data: optional_text(row, "row_data"),
            pk_data: optional_text(row, "pk_data"),
            transaction_id: optional_text(row, "transaction_id"),
            channel_id: optional_text(row, "channel_id").unwrap_or_default(),
            created_at: row.get_by_name("create_time").and_then(Value::as_datetime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(event_type: &str) -> Row {
        Row::from_pairs([
            ("data_id", Value::Int64(42)),
            ("table_name", Value::from("item")),
            ("event_type", Value::from(event_type)),
            ("row_data", Value::from("\"1\",\"widget\"")),
            ("pk_data", Value::Null),
            ("old_data", Value::from("")),
            (
                "create_time",
                Value::DateTimeTz(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            ),
            ("transaction_id", Value::from("tx-9")),
            ("channel_id", Value::from("default")),
            ("route_marker", Value::Null),
        ])
    }

    #[test]
    fn test_map_full_row() {
        let data = ColumnRowMapper.map(&row("U")).unwrap();

        assert_eq!(data.data_id, 42);
        assert_eq!(data.table_name, "item");
        assert_eq!(data.event_type, EventType::Update);
        assert_eq!(data.row_data.as_deref(), Some("\"1\",\"widget\""));
        assert_eq!(data.pk_data, None);
        // blanked payload columns come back as empty text, not NULL
        assert_eq!(data.old_data.as_deref(), Some(""));
        assert_eq!(data.transaction_id.as_deref(), Some("tx-9"));
        assert_eq!(data.channel_id, "default");
        assert!(data.created_at.is_some());
    }

    #[test]
    fn test_unknown_event_type_is_data_format_error() {
        let err = ColumnRowMapper.map(&row("Z")).unwrap_err();
        assert!(matches!(err, Error::DataFormat { .. }));
    }

    #[test]
    fn test_missing_data_id_is_data_format_error() {
        let row = Row::from_pairs([
            ("table_name", Value::from("item")),
            ("event_type", Value::from("I")),
        ]);
        let err = ColumnRowMapper.map(&row).unwrap_err();
        assert!(err.to_string().contains("data_id"));
    }
}

//! Change records and the channel settings that shape how they are read

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Kind of change captured for a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
    /// Full reload of a row or table requested
    Reload,
    /// Raw SQL to replay on the target
    Sql,
    /// Table definition to create on the target
    Create,
}

impl EventType {
    /// One-letter code stored in the capture table
    pub const fn code(self) -> &'static str {
        match self {
            Self::Insert => "I",
            Self::Update => "U",
            Self::Delete => "D",
            Self::Reload => "R",
            Self::Sql => "S",
            Self::Create => "C",
        }
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "I" => Ok(Self::Insert),
            "U" => Ok(Self::Update),
            "D" => Ok(Self::Delete),
            "R" => Ok(Self::Reload),
            "S" => Ok(Self::Sql),
            "C" => Ok(Self::Create),
            other => Err(Error::data_format(format!(
                "unknown event type code '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One captured change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    /// Identity of the change in the capture table
    pub data_id: i64,
    /// Table the change belongs to
    pub table_name: String,
    /// Kind of change
    pub event_type: EventType,
    /// Row image before the change
    pub old_data: Option<String>,
    /// Row image after the change
    pub row_data: Option<String>,
    /// Primary key values of the row
    pub pk_data: Option<String>,
    /// Source transaction that produced the change
    pub transaction_id: Option<String>,
    /// Channel the change was captured on
    pub channel_id: String,
    /// When the change was captured
    pub created_at: Option<DateTime<Utc>>,
}

impl Data {
    /// Create a record with no payloads
    pub fn new(
        data_id: i64,
        table_name: impl Into<String>,
        event_type: EventType,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            data_id,
            table_name: table_name.into(),
            event_type,
            old_data: None,
            row_data: None,
            pk_data: None,
            transaction_id: None,
            channel_id: channel_id.into(),
            created_at: None,
        }
    }

    /// Set the transaction id
    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Set the after-image
    pub fn with_row_data(mut self, row_data: impl Into<String>) -> Self {
        self.row_data = Some(row_data.into());
        self
    }

    /// Set the before-image
    pub fn with_old_data(mut self, old_data: impl Into<String>) -> Self {
        self.old_data = Some(old_data.into());
        self
    }

    /// Set the primary key payload
    pub fn with_pk_data(mut self, pk_data: impl Into<String>) -> Self {
        self.pk_data = Some(pk_data.into());
        self
    }
}

fn default_true() -> bool {
    true
}

/// Channel settings relevant to reading
///
/// The `use_*_to_route` flags say whether routing needs a payload column at all.
/// Columns that are not needed are blanked out of the select to save I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier
    pub channel_id: String,
    /// Routing looks at the before-image
    #[serde(default = "default_true")]
    pub use_old_data_to_route: bool,
    /// Routing looks at the after-image
    #[serde(default = "default_true")]
    pub use_row_data_to_route: bool,
    /// Routing looks at the primary key payload
    #[serde(default = "default_true")]
    pub use_pk_data_to_route: bool,
}

impl Channel {
    /// Create a channel that needs every payload
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            use_old_data_to_route: true,
            use_row_data_to_route: true,
            use_pk_data_to_route: true,
        }
    }

    /// Toggle use of the before-image
    pub fn with_old_data_to_route(mut self, enabled: bool) -> Self {
        self.use_old_data_to_route = enabled;
        self
    }

    /// Toggle use of the after-image
    pub fn with_row_data_to_route(mut self, enabled: bool) -> Self {
        self.use_row_data_to_route = enabled;
        self
    }

    /// Toggle use of the primary key payload
    pub fn with_pk_data_to_route(mut self, enabled: bool) -> Self {
        self.use_pk_data_to_route = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_codes() {
        for event in [
            EventType::Insert,
            EventType::Update,
            EventType::Delete,
            EventType::Reload,
            EventType::Sql,
            EventType::Create,
        ] {
            assert_eq!(event.code().parse::<EventType>().unwrap(), event);
        }
        assert!("X".parse::<EventType>().is_err());
        assert_eq!(" U ".parse::<EventType>().unwrap(), EventType::Update);
    }

    #[test]
    fn test_channel_defaults_from_yaml_like_json() {
        let channel: Channel =
            serde_json::from_str(r#"{"channel_id":"sale","use_old_data_to_route":false}"#)
                .unwrap();

        assert_eq!(channel.channel_id, "sale");
        assert!(!channel.use_old_data_to_route);
        assert!(channel.use_row_data_to_route);
        assert!(channel.use_pk_data_to_route);
    }

    #[test]
    fn test_data_builder() {
        let data = Data::new(7, "item", EventType::Insert, "default")
            .with_transaction_id("tx-1")
            .with_row_data("\"1\",\"widget\"");

        assert_eq!(data.transaction_id.as_deref(), Some("tx-1"));
        assert!(data.old_data.is_none());
        assert_eq!(data.event_type.to_string(), "I");
    }
}

//! SQL templates for selecting data to route
//!
//! Templates are looked up by name and then adapted to the channel: payload
//! columns routing does not need are replaced by an empty literal so the
//! database never ships them.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::Channel;

/// Name of the optimized select
pub const SELECT_DATA_TO_ROUTE: &str = "select_data_to_route";

/// Name of the conservative select used when the optimized one is rejected
pub const SELECT_DATA_TO_ROUTE_FALLBACK: &str = "select_data_to_route_fallback";

const OLD_DATA_EXPR: &str = "d.old_data";
const ROW_DATA_EXPR: &str = "d.row_data";
const PK_DATA_EXPR: &str = "d.pk_data";
const EMPTY_LITERAL: &str = "''";

const SELECT_COLUMNS: &str = "SELECT d.data_id, d.table_name, d.event_type, d.row_data, \
     d.pk_data, d.old_data, d.create_time, d.transaction_id, d.channel_id, \
     e.data_id AS route_marker";

/// Supplier of SQL text by name
pub trait SqlTemplates: Send + Sync {
    /// Look up a template
    fn template(&self, name: &str) -> Result<String>;
}

/// In-memory template map
#[derive(Debug, Clone, Default)]
pub struct StaticSqlTemplates {
    templates: HashMap<String, String>,
}

impl StaticSqlTemplates {
    /// Create an empty template map
    pub fn new() -> Self {
        Self::default()
    }

    /// PostgreSQL templates for the `sym_data` capture schema.
    ///
    /// The primary select restricts itself to rows inside open data gaps; the
    /// fallback scans from the lowest open gap instead. Both expose
    /// `route_marker`, which is non-null when the row already has a data event.
    pub fn defaults() -> Self {
        Self::new()
            .with_template(
                SELECT_DATA_TO_ROUTE,
                format!(
                    "{SELECT_COLUMNS} FROM sym_data d \
                     INNER JOIN sym_data_gap g ON g.status = 'GP' \
                     AND d.data_id BETWEEN g.start_id AND g.end_id \
                     LEFT OUTER JOIN sym_data_event e ON e.data_id = d.data_id \
                     WHERE d.channel_id = $1 \
                     ORDER BY d.data_id ASC"
                ),
            )
            .with_template(
                SELECT_DATA_TO_ROUTE_FALLBACK,
                format!(
                    "{SELECT_COLUMNS} FROM sym_data d \
                     LEFT OUTER JOIN sym_data_event e ON e.data_id = d.data_id \
                     WHERE d.channel_id = $1 \
                     AND d.data_id >= (SELECT COALESCE(MIN(start_id), 0) \
                     FROM sym_data_gap WHERE status = 'GP') \
                     ORDER BY d.data_id ASC"
                ),
            )
    }

    /// Add or replace a template
    pub fn with_template(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.templates.insert(name.into(), sql.into());
        self
    }

    /// Add every template from a map, replacing existing names
    pub fn extend(&mut self, templates: HashMap<String, String>) {
        self.templates.extend(templates);
    }
}

impl SqlTemplates for StaticSqlTemplates {
    fn template(&self, name: &str) -> Result<String> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingTemplate {
                name: name.to_string(),
            })
    }
}

/// Blank out payload columns the channel does not route on
pub fn adapt_sql(template: &str, channel: &Channel) -> String {
    let mut sql = template.to_string();
    if !channel.use_old_data_to_route {
        sql = sql.replace(OLD_DATA_EXPR, EMPTY_LITERAL);
    }
    if !channel.use_row_data_to_route {
        sql = sql.replace(ROW_DATA_EXPR, EMPTY_LITERAL);
    }
    if !channel.use_pk_data_to_route {
        sql = sql.replace(PK_DATA_EXPR, EMPTY_LITERAL);
    }
    sql
}

//! # sluice-route
//!
//! Reads captured change rows that still need routing and hands them to
//! routing consumers through a bounded queue.
//!
//! - **Reader** makes one pass per channel, with a fallback select when the
//!   database rejects the optimized one
//! - **Backpressure** keeps the number of buffered records within the queue
//!   capacity
//! - **End-of-stream** is always signalled once, whether the pass succeeded,
//!   failed or was cancelled
//! - **Statistics** accumulate query, read, re-read and enqueue times
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice_route::prelude::*;
//!
//! let templates = Arc::new(StaticSqlTemplates::defaults());
//! let reader = DataToRouteReader::new(
//!     data_source,
//!     ReaderConfig::default(),
//!     Arc::new(TemplateQueryStrategy::new(templates)),
//!     RunContext::new(Channel::new("default")),
//!     Arc::new(ColumnRowMapper),
//! )?;
//!
//! let handle = reader.handle();
//! let run = tokio::spawn(reader.run());
//! let consumer = tokio::task::spawn_blocking(move || {
//!     while let Take::Data(data) = handle.poll_next() {
//!         println!("{} {}", data.data_id, data.table_name);
//!     }
//! });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod error;
pub mod mapper;
pub mod model;
pub mod queue;
pub mod reader;
pub mod strategy;
pub mod template;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ReaderConfig;
    pub use crate::context::{RouterStats, RunContext, Stat, StatsSnapshot};
    pub use crate::error::{Error, Result};
    pub use crate::mapper::{ColumnRowMapper, RowMapper};
    pub use crate::model::{Channel, Data, EventType};
    pub use crate::queue::{BoundedQueue, QueueItem, Take};
    pub use crate::reader::{DataToRouteReader, ReaderHandle, ReaderState, RunSummary};
    pub use crate::strategy::{QueryShape, QueryStrategy, RouteStatement, TemplateQueryStrategy};
    pub use crate::template::{
        adapt_sql, SqlTemplates, StaticSqlTemplates, SELECT_DATA_TO_ROUTE,
        SELECT_DATA_TO_ROUTE_FALLBACK,
    };
}

pub use error::{Error, Result};
pub use reader::{DataToRouteReader, ReaderHandle};

//! Query strategies: how a reader selects the rows it routes
//!
//! A strategy offers two shapes of the same select. The primary one is tuned
//! for the common case; the fallback is slower but should still run when the
//! database refuses the primary one.

use async_trait::async_trait;
use sluice_rdbc::{connection::Connection, connection::PreparedStatement, Value};
use std::fmt;
use std::sync::Arc;

use crate::context::RunContext;
use crate::error::Result;
use crate::template::{
    adapt_sql, SqlTemplates, SELECT_DATA_TO_ROUTE, SELECT_DATA_TO_ROUTE_FALLBACK,
};

/// Which statement shape a pass runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryShape {
    /// Optimized statement
    Primary,
    /// Conservative statement
    Fallback,
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// A prepared select together with its bound parameters
pub struct RouteStatement {
    /// Prepared statement on the reader's connection
    pub statement: Box<dyn PreparedStatement>,
    /// Parameters to execute it with
    pub params: Vec<Value>,
}

impl RouteStatement {
    /// Pair a statement with its parameters
    pub fn new(statement: Box<dyn PreparedStatement>, params: Vec<Value>) -> Self {
        Self { statement, params }
    }
}

impl fmt::Debug for RouteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteStatement")
            .field("sql", &self.statement.sql())
            .field("params", &self.params)
            .finish()
    }
}

/// Supplies the statements a reader executes
#[async_trait]
pub trait QueryStrategy: Send + Sync {
    /// Optimized select for the context's channel
    async fn primary(&self, conn: &dyn Connection, ctx: &RunContext) -> Result<RouteStatement>;

    /// Conservative select for the context's channel
    async fn fallback(&self, conn: &dyn Connection, ctx: &RunContext) -> Result<RouteStatement>;

    /// Prepare the statement for a shape
    async fn prepare(
        &self,
        shape: QueryShape,
        conn: &dyn Connection,
        ctx: &RunContext,
    ) -> Result<RouteStatement> {
        match shape {
            QueryShape::Primary => self.primary(conn, ctx).await,
            QueryShape::Fallback => self.fallback(conn, ctx).await,
        }
    }
}

/// Strategy built from two named SQL templates, binding the channel id as `$1`
pub struct TemplateQueryStrategy {
    templates: Arc<dyn SqlTemplates>,
    primary: String,
    fallback: String,
}

impl TemplateQueryStrategy {
    /// Use the default template names
    pub fn new(templates: Arc<dyn SqlTemplates>) -> Self {
        Self::with_names(templates, SELECT_DATA_TO_ROUTE, SELECT_DATA_TO_ROUTE_FALLBACK)
    }

    /// Use custom template names
    pub fn with_names(
        templates: Arc<dyn SqlTemplates>,
        primary: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            templates,
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    async fn prepare_template(
        &self,
        name: &str,
        conn: &dyn Connection,
        ctx: &RunContext,
    ) -> Result<RouteStatement> {
        let channel = ctx.channel();
        let sql = adapt_sql(&self.templates.template(name)?, channel);
        let statement = conn.prepare(&sql).await?;
        Ok(RouteStatement::new(
            statement,
            vec![Value::from(channel.channel_id.as_str())],
        ))
    }
}

#[async_trait]
impl QueryStrategy for TemplateQueryStrategy {
    async fn primary(&self, conn: &dyn Connection, ctx: &RunContext) -> Result<RouteStatement> {
        self.prepare_template(&self.primary, conn, ctx).await
    }

    async fn fallback(&self, conn: &dyn Connection, ctx: &RunContext) -> Result<RouteStatement> {
        self.prepare_template(&self.fallback, conn, ctx).await
    }
}

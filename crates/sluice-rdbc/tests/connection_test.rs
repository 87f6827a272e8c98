//! Tests for sluice-rdbc connection module

use async_trait::async_trait;
use sluice_rdbc::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct NullConnection {
    auto_commit: AtomicBool,
}

#[async_trait]
impl Connection for NullConnection {
    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.auto_commit.store(auto_commit, Ordering::SeqCst);
        Ok(())
    }

    async fn prepare(&self, _sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Err(Error::unsupported("no statements"))
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct CountingFactory {
    connects: AtomicUsize,
}

#[async_trait]
impl ConnectionFactory for CountingFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        if config.url.is_empty() {
            return Err(Error::config("empty url"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NullConnection {
            auto_commit: AtomicBool::new(true),
        }))
    }
}

// ==================== ConnectionConfig Tests ====================

#[test]
fn test_connection_config_default() {
    let config = ConnectionConfig::default();

    assert!(config.url.is_empty());
    assert!(config.connect_timeout_ms > 0);
    assert_eq!(config.application_name, Some("sluice".to_string()));
}

#[test]
fn test_connection_config_with_app_name() {
    let config =
        ConnectionConfig::new("postgresql://localhost/testdb").with_application_name("router");

    assert_eq!(config.application_name, Some("router".to_string()));
}

// ==================== DataSource Tests ====================

#[tokio::test]
async fn test_factory_data_source_opens_dedicated_connections() {
    let factory = Arc::new(CountingFactory::default());
    let source = FactoryDataSource::new(
        factory.clone(),
        ConnectionConfig::new("postgres://localhost/db"),
    );

    let first = source.connection().await.unwrap();
    let second = source.connection().await.unwrap();

    first.set_auto_commit(false).await.unwrap();
    assert!(!first.auto_commit());
    assert!(second.auto_commit());
    assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_factory_data_source_propagates_errors() {
    let source = FactoryDataSource::new(
        Arc::new(CountingFactory::default()),
        ConnectionConfig::default(),
    );

    let err = source.connection().await.err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

//! MySQL provider integration tests.
//!
//! This test suite covers:
//! - Table creation from the store schema
//! - Loading with each strategy
//! - Foreign key and duplicate key classification
//! - Upsert idempotence

#![cfg(feature = "mysql")]

use std::sync::Arc;
use std::time::Duration;
use storeload_core::provider::MySqlProvider;
use storeload_core::{
    ConnectionProvider, ConstraintKind, LoadOptions, Loader, Operation, RawRow, Result,
    Sanitizer, SanitizerConfig, SchemaRegistry, Strategy,
};
use storeload_core::loader::FailureCause;
use testcontainers_modules::{mysql::Mysql, testcontainers::runners::AsyncRunner};

/// Helper function to wait for MySQL to be ready
async fn wait_for_mysql_ready(database_url: &str, max_attempts: u32) -> Result<MySqlProvider> {
    let mut attempts = 0;
    loop {
        let provider = MySqlProvider::connect(database_url).await?;
        match provider.test_connection().await {
            Ok(()) => return Ok(provider),
            Err(error) => {
                provider.close().await;
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(error);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

fn brand_rows(sanitizer: &Sanitizer, ids: &[i64]) -> Vec<storeload_core::Sanitized> {
    let table = sanitizer.for_table("brands").unwrap();
    ids.iter()
        .zip(1u64..)
        .map(|(id, ordinal)| {
            table.sanitize(
                &RawRow::new(ordinal)
                    .with("brand_id", *id)
                    .with("brand_name", format!("Brand {id}").as_str()),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_mysql_load_and_classification() -> Result<()> {
    let mysql = Mysql::default().start().await.unwrap();
    let port = mysql.get_host_port_ipv4(3306).await.unwrap();
    let database_url = format!("mysql://root@localhost:{}/test", port);

    let provider = wait_for_mysql_ready(&database_url, 30).await?;
    let registry = Arc::new(SchemaRegistry::store_schema()?);
    assert_eq!(provider.create_tables(&registry).await?, 9);
    // Idempotent.
    provider.create_tables(&registry).await?;

    let sanitizer = Sanitizer::new(Arc::clone(&registry), SanitizerConfig::default())?;
    let loader = Loader::new(Arc::clone(&registry), LoadOptions::default())?;

    let result = loader
        .load(&provider, "brands", brand_rows(&sanitizer, &[1, 2, 2, 3]), Strategy::Standard)
        .await?;
    assert_eq!((result.inserted, result.failed), (3, 1));
    assert_eq!(
        result.failures[0].cause,
        FailureCause::Constraint {
            kind: ConstraintKind::UniqueViolation
        }
    );

    let products = sanitizer.for_table("products")?;
    let rows = vec![
        products.sanitize(
            &RawRow::new(1)
                .with("product_id", "1")
                .with("product_name", "Trek 820 - 2016")
                .with("brand_id", "1")
                .with("model_year", "2016")
                .with("list_price", "379.99"),
        ),
        products.sanitize(
            &RawRow::new(2)
                .with("product_id", "2")
                .with("product_name", "Surly Wednesday Frameset - 2016")
                .with("brand_id", "99")
                .with("list_price", "999.99"),
        ),
    ];
    let result = loader
        .load(&provider, "products", rows, Strategy::Streaming)
        .await?;
    assert_eq!((result.inserted, result.failed), (1, 1));
    assert_eq!(
        result.failures[0].cause,
        FailureCause::Constraint {
            kind: ConstraintKind::ForeignKeyViolation
        }
    );

    for _ in 0..2 {
        let upsert = loader
            .load_with(
                &provider,
                "brands",
                brand_rows(&sanitizer, &[1, 2, 3, 4]),
                Strategy::Direct,
                Operation::Upsert,
            )
            .await?;
        assert_eq!(upsert.failed, 0);
    }

    let counts = provider.table_counts(&registry).await?;
    let brands = counts.iter().find(|(table, _)| table == "brands").unwrap();
    assert_eq!(brands.1, 4);

    assert!(provider.describe().starts_with("mysql://root@localhost"));
    provider.close().await;
    Ok(())
}

#[tokio::test]
async fn test_mysql_unreachable_is_connectivity_error() {
    let url = "mysql://root@127.0.0.1:1/test";
    let mut config = storeload_core::provider::mysql::parse_mysql_connection_config(url).unwrap();
    config.connect_timeout = Duration::from_secs(2);
    let provider = MySqlProvider::with_config(url, config).await.unwrap();
    let error = provider.test_connection().await.unwrap_err();
    assert!(matches!(error, storeload_core::LoadError::Connectivity { .. }));
}

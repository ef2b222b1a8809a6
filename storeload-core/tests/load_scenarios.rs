//! End-to-end load scenarios against the in-memory provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use storeload_core::loader::{BatchStatus, FailureCause, RowStream};
use storeload_core::source::Cancellable;
use storeload_core::{
    ConstraintKind, LoadError, LoadOptions, Loader, MemoryProvider, Operation, RawRow,
    RejectionPolicy, Sanitizer, SanitizerConfig, SchemaRegistry, Strategy, Value,
};

struct Fixture {
    provider: MemoryProvider,
    sanitizer: Sanitizer,
    loader: Loader,
}

fn fixture_with(options: LoadOptions) -> Fixture {
    let registry = Arc::new(SchemaRegistry::store_schema().unwrap());
    Fixture {
        provider: MemoryProvider::new(Arc::clone(&registry)),
        sanitizer: Sanitizer::new(Arc::clone(&registry), SanitizerConfig::default()).unwrap(),
        loader: Loader::new(registry, options).unwrap(),
    }
}

fn fixture() -> Fixture {
    fixture_with(LoadOptions::default())
}

impl Fixture {
    fn stream(&self, table: &str, op: Operation, rows: Vec<RawRow>) -> RowStream {
        let table = self.sanitizer.for_table(table).unwrap().for_operation(op);
        Box::new(rows.into_iter().map(move |raw| table.sanitize(&raw)))
    }
}

fn numbered(rows: Vec<RawRow>) -> Vec<RawRow> {
    rows.into_iter()
        .zip(1u64..)
        .map(|(mut row, ordinal)| {
            row.ordinal = ordinal;
            row
        })
        .collect()
}

fn brands(ids: &[i64]) -> Vec<RawRow> {
    numbered(
        ids.iter()
            .map(|id| {
                RawRow::new(0)
                    .with("brand_id", *id)
                    .with("brand_name", format!("Brand {id}").as_str())
            })
            .collect(),
    )
}

fn stores() -> Vec<RawRow> {
    numbered(vec![
        RawRow::new(0)
            .with("store_name", "Santa Cruz Bikes")
            .with("city", "Santa Cruz"),
        RawRow::new(0)
            .with("store_name", "Baldwin Bikes")
            .with("city", "Baldwin"),
        RawRow::new(0).with("store_name", "NULL").with("city", "Rowlett"),
    ])
}

fn products() -> Vec<RawRow> {
    numbered(vec![
        RawRow::new(0)
            .with("product_id", "1")
            .with("product_name", "Trek 820 - 2016")
            .with("brand_id", "1")
            .with("list_price", "379.99"),
        RawRow::new(0)
            .with("product_id", "2")
            .with("product_name", "Ritchey Timberwolf Frameset - 2016")
            .with("brand_id", "NaN")
            .with("list_price", "749.99"),
    ])
}

fn stocks() -> Vec<RawRow> {
    numbered(vec![
        RawRow::new(0)
            .with("store_name", "Santa Cruz Bikes")
            .with("product_id", "1")
            .with("quantity", "27"),
        RawRow::new(0)
            .with("store_name", "Rowlett Bikes")
            .with("product_id", "1")
            .with("quantity", "5"),
        RawRow::new(0)
            .with("store_name", "Baldwin Bikes")
            .with("product_id", "2")
            .with("quantity", ""),
    ])
}

fn counts(result: &storeload_core::LoadResult) -> (u64, u64, u64, u64) {
    (result.attempted, result.inserted, result.rejected, result.failed)
}

#[tokio::test]
async fn test_brands_load_cleanly() {
    let f = fixture();
    let rows = f.stream("brands", Operation::Insert, brands(&[1, 2, 3]));
    let result = f
        .loader
        .load(&f.provider, "brands", rows, Strategy::Standard)
        .await
        .unwrap();

    assert_eq!(counts(&result), (3, 3, 0, 0));
    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(f.provider.row_count("brands"), 3);
    assert_eq!(f.provider.open_handles(), 0);
}

#[tokio::test]
async fn test_stores_and_stocks_isolate_bad_rows() {
    let f = fixture();
    let mut grouped = HashMap::new();
    grouped.insert("brands".to_string(), f.stream("brands", Operation::Insert, brands(&[1])));
    grouped.insert("stores".to_string(), f.stream("stores", Operation::Insert, stores()));
    grouped.insert("products".to_string(), f.stream("products", Operation::Insert, products()));
    grouped.insert("stocks".to_string(), f.stream("stocks", Operation::Insert, stocks()));

    let report = f
        .loader
        .load_all(&f.provider, grouped, Strategy::Standard)
        .await
        .unwrap();

    assert_eq!(report.results.len(), 9);
    let stores = report.get("stores").unwrap();
    assert_eq!(counts(stores), (3, 2, 1, 0));
    assert_eq!(stores.failures[0].column.as_deref(), Some("name"));

    let stocks = report.get("stocks").unwrap();
    assert_eq!(counts(stocks), (3, 2, 0, 1));
    assert!(stocks.is_partial());
    assert_eq!(stocks.failures[0].row.ordinal, 2);
    assert_eq!(
        stocks.failures[0].cause,
        FailureCause::Constraint {
            kind: ConstraintKind::ForeignKeyViolation
        }
    );

    // A blank value in a nullable column is stored as NULL.
    let stock_rows = f.provider.rows("stocks");
    assert!(
        stock_rows
            .iter()
            .any(|row| row["product_id"] == Value::Integer(2) && row["quantity"] == Value::Null)
    );
    // NaN in a nullable foreign key is stored as NULL.
    let product_rows = f.provider.rows("products");
    assert_eq!(product_rows[1]["brand_id"], Value::Null);

    assert_eq!(counts(report.get("customers").unwrap()), (0, 0, 0, 0));
    assert_eq!(report.failure_count(), 2);
    assert!(report.is_partial());
    assert_eq!(f.provider.open_handles(), 0);
}

#[tokio::test]
async fn test_strategies_produce_the_same_outcome() {
    let mut outcomes = Vec::new();
    for strategy in [Strategy::Standard, Strategy::Streaming, Strategy::Direct] {
        let f = fixture_with(
            LoadOptions::default()
                .with_chunk_size(Strategy::Standard, 2)
                .with_chunk_size(Strategy::Streaming, 2),
        );
        let mut grouped = HashMap::new();
        grouped.insert("brands".to_string(), f.stream("brands", Operation::Insert, brands(&[1, 2, 2, 3])));
        grouped.insert("stores".to_string(), f.stream("stores", Operation::Insert, stores()));
        grouped.insert("products".to_string(), f.stream("products", Operation::Insert, products()));
        grouped.insert("stocks".to_string(), f.stream("stocks", Operation::Insert, stocks()));

        let report = f.loader.load_all(&f.provider, grouped, strategy).await.unwrap();
        let per_table: Vec<_> = report
            .results
            .iter()
            .map(|r| (r.table.clone(), counts(r)))
            .collect();
        let contents: Vec<_> = ["brands", "stores", "products", "stocks"]
            .into_iter()
            .map(|table| f.provider.rows(table))
            .collect();
        outcomes.push((per_table, contents));
    }

    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[1], outcomes[2]);
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let f = fixture();
    for _ in 0..2 {
        let rows = f.stream("brands", Operation::Upsert, brands(&[1, 2, 3]));
        let result = f
            .loader
            .load_with(&f.provider, "brands", rows, Strategy::Standard, Operation::Upsert)
            .await
            .unwrap();
        assert_eq!(counts(&result), (3, 3, 0, 0));
    }
    assert_eq!(f.provider.row_count("brands"), 3);

    let rows = f.stream("brands", Operation::Upsert, brands(&[1]));
    let result = f
        .loader
        .load_with(&f.provider, "brands", rows, Strategy::Direct, Operation::Upsert)
        .await
        .unwrap();
    assert_eq!(result.affected_rows, 0);
}

#[tokio::test]
async fn test_duplicate_key_in_batch_fails_second_occurrence() {
    let f = fixture();
    let rows = f.stream("brands", Operation::Insert, brands(&[1, 2, 1]));
    let result = f
        .loader
        .load(&f.provider, "brands", rows, Strategy::Standard)
        .await
        .unwrap();

    assert_eq!(counts(&result), (3, 2, 0, 1));
    assert_eq!(result.failures[0].row.ordinal, 3);
    assert_eq!(result.failures[0].row.key.as_deref(), Some("1"));
    assert_eq!(
        result.failures[0].cause,
        FailureCause::Constraint {
            kind: ConstraintKind::UniqueViolation
        }
    );
}

#[tokio::test]
async fn test_empty_input_needs_no_connection() {
    let f = fixture();
    f.provider.set_offline(true);

    let result = f
        .loader
        .load(&f.provider, "brands", Vec::new(), Strategy::Standard)
        .await
        .unwrap();
    assert_eq!(counts(&result), (0, 0, 0, 0));

    let report = f
        .loader
        .load_all(&f.provider, HashMap::new(), Strategy::Streaming)
        .await
        .unwrap();
    assert_eq!(report.results.len(), 9);
    assert_eq!(report.total_attempted(), 0);
    assert_eq!(f.provider.statements_executed(), 0);
}

#[tokio::test]
async fn test_unreachable_database_aborts() {
    let f = fixture();
    f.provider.set_offline(true);
    let rows = f.stream("brands", Operation::Insert, brands(&[1]));
    let error = f
        .loader
        .load(&f.provider, "brands", rows, Strategy::Direct)
        .await
        .unwrap_err();

    assert!(matches!(error, LoadError::Connectivity { .. }));
    assert!(error.is_fatal());
    assert_eq!(f.provider.open_handles(), 0);
}

#[tokio::test]
async fn test_abort_policy_halts_after_flushing() {
    let f = fixture_with(LoadOptions::default().with_rejection_policy(RejectionPolicy::Abort));
    let mut rows = brands(&[1, 2]);
    rows.push(RawRow::new(3).with("brand_id", "3").with("brand_name", "  "));
    rows.push(RawRow::new(4).with("brand_id", "4").with("brand_name", "Surly"));

    let stream = f.stream("brands", Operation::Insert, rows);
    let result = f
        .loader
        .load(&f.provider, "brands", stream, Strategy::Standard)
        .await
        .unwrap();

    assert_eq!(result.status, BatchStatus::Halted);
    assert_eq!(counts(&result), (3, 2, 1, 0));
    assert_eq!(f.provider.row_count("brands"), 2);
}

#[tokio::test]
async fn test_table_skipped_when_required_parent_loaded_nothing() {
    let f = fixture();
    let rejected_stores = numbered(vec![
        RawRow::new(0).with("store_name", ""),
        RawRow::new(0).with("store_name", "None"),
    ]);
    let mut grouped = HashMap::new();
    grouped.insert("brands".to_string(), f.stream("brands", Operation::Insert, Vec::new()));
    grouped.insert("stores".to_string(), f.stream("stores", Operation::Insert, rejected_stores));
    grouped.insert("products".to_string(), f.stream("products", Operation::Insert, products()));
    grouped.insert("stocks".to_string(), f.stream("stocks", Operation::Insert, stocks()));

    let report = f
        .loader
        .load_all(&f.provider, grouped, Strategy::Standard)
        .await
        .unwrap();

    let stores = report.get("stores").unwrap();
    assert!(stores.is_wholly_failed());

    let stocks = report.get("stocks").unwrap();
    assert_eq!(
        stocks.status,
        BatchStatus::Skipped {
            blocked_by: vec!["stores".to_string()]
        }
    );
    assert_eq!(stocks.attempted, 0);
    assert_eq!(f.provider.row_count("stocks"), 0);

    // Nullable references never block: products load without brands.
    let products = report.get("products").unwrap();
    assert_eq!(products.status, BatchStatus::Completed);
    assert_eq!(products.failed, 1);
    assert_eq!(products.inserted, 1);
}

#[tokio::test]
async fn test_delete_runs_children_first() {
    let f = fixture();
    let mut grouped = HashMap::new();
    grouped.insert("brands".to_string(), f.stream("brands", Operation::Insert, brands(&[1])));
    grouped.insert("products".to_string(), f.stream("products", Operation::Insert, products()));
    f.loader
        .load_all(&f.provider, grouped, Strategy::Standard)
        .await
        .unwrap();
    assert_eq!(f.provider.row_count("products"), 2);

    // The parent cannot go while children remain.
    let rows = f.stream("brands", Operation::Delete, brands(&[1]));
    let result = f
        .loader
        .load_with(&f.provider, "brands", rows, Strategy::Direct, Operation::Delete)
        .await
        .unwrap();
    assert_eq!(result.failed, 1);

    let mut grouped = HashMap::new();
    grouped.insert("brands".to_string(), f.stream("brands", Operation::Delete, brands(&[1])));
    grouped.insert("products".to_string(), f.stream("products", Operation::Delete, products()));
    let report = f
        .loader
        .load_all_with(&f.provider, grouped, Strategy::Standard, Operation::Delete)
        .await
        .unwrap();

    let position = |table: &str| report.results.iter().position(|r| r.table == table).unwrap();
    assert!(position("products") < position("brands"));
    assert_eq!(report.failure_count(), 0);
    assert_eq!(f.provider.row_count("brands"), 0);
    assert_eq!(f.provider.row_count("products"), 0);

    // Deleting again matches nothing and still counts as applied.
    let rows = f.stream("brands", Operation::Delete, brands(&[1]));
    let result = f
        .loader
        .load_with(&f.provider, "brands", rows, Strategy::Standard, Operation::Delete)
        .await
        .unwrap();
    assert_eq!(counts(&result), (1, 1, 0, 0));
    assert_eq!(result.affected_rows, 0);
}

#[tokio::test]
async fn test_update_changes_existing_rows() {
    let f = fixture();
    let rows = f.stream("brands", Operation::Insert, brands(&[1, 2]));
    f.loader
        .load(&f.provider, "brands", rows, Strategy::Standard)
        .await
        .unwrap();

    let renamed = numbered(vec![
        RawRow::new(0).with("brand_id", 2_i64).with("name", "Haro"),
        RawRow::new(0).with("brand_id", 9_i64).with("name", "Ghost"),
    ]);
    let rows = f.stream("brands", Operation::Update, renamed);
    let result = f
        .loader
        .load_with(&f.provider, "brands", rows, Strategy::Streaming, Operation::Update)
        .await
        .unwrap();

    assert_eq!(counts(&result), (2, 2, 0, 0));
    assert_eq!(result.affected_rows, 1);
    assert_eq!(
        f.provider.rows("brands")[1]["brand_name"],
        Value::Text("Haro".into())
    );
}

#[tokio::test]
async fn test_cancellation_stops_between_rows() {
    let f = fixture();
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let table = f.sanitizer.for_table("brands").unwrap();
    let rows = brands(&[1, 2, 3, 4, 5, 6]).into_iter().map(move |raw| {
        if raw.ordinal == 4 {
            flag.store(true, Ordering::Relaxed);
        }
        table.sanitize(&raw)
    });

    let result = f
        .loader
        .load(
            &f.provider,
            "brands",
            Cancellable::new(rows, Arc::clone(&cancelled)),
            Strategy::Streaming,
        )
        .await
        .unwrap();

    assert_eq!(counts(&result), (4, 4, 0, 0));
    assert_eq!(f.provider.row_count("brands"), 4);
}

#[tokio::test]
async fn test_failure_list_is_capped() {
    let f = fixture_with(LoadOptions::default().with_max_recorded_failures(2));
    let rows = numbered((0..5).map(|_| RawRow::new(0).with("brand_id", "x")).collect());
    let stream = f.stream("brands", Operation::Insert, rows);
    let result = f
        .loader
        .load(&f.provider, "brands", stream, Strategy::Standard)
        .await
        .unwrap();

    assert_eq!(result.rejected, 5);
    assert_eq!(result.failures.len(), 2);
    assert!(result.failures_truncated);
}

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use assert_matches::assert_matches;
use common::FakeDynamo;
use dynosql_driver::Connection;
use dynosql_driver::ConnectionConfig;
use dynosql_driver::DriverError;
use dynosql_driver::ResultSet;
use pretty_assertions::assert_eq;

fn connection_over(fake: Arc<FakeDynamo>, extra: &[(&str, &str)]) -> Connection {
    let mut props: HashMap<String, String> = HashMap::new();
    props.insert("schemaCache".to_string(), "false".to_string());
    props.insert("retryMaxAttempts".to_string(), "0".to_string());
    for (key, value) in extra {
        props.insert((*key).to_string(), (*value).to_string());
    }
    Connection::with_transport(ConnectionConfig::from_properties(&props), fake)
}

async fn collect_ids(rows: &mut ResultSet) -> Vec<i64> {
    let mut ids = Vec::new();
    while rows.advance().await.unwrap() {
        ids.push(rows.get_i64("id").unwrap().unwrap());
    }
    ids
}

#[tokio::test]
async fn limit_offset_fetch_size_end_to_end() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 10));
    let conn = connection_over(fake.clone(), &[]);
    conn.set_fetch_size(2);

    let mut rows = conn
        .execute_query("SELECT * FROM \"t\" LIMIT 3 OFFSET 2")
        .await
        .unwrap();
    assert_eq!(collect_ids(&mut rows).await, vec![3, 4, 5]);
    assert_eq!(rows.rows_returned(), 3);

    // The statement hit the wire stripped of LIMIT/OFFSET, with the first
    // page capped at min(limit, fetch_size) = 2.
    let first = &fake.statements()[0];
    assert_eq!(first.statement, "SELECT * FROM \"t\"");
    assert_eq!(first.limit, Some(2));
}

#[tokio::test]
async fn index_syntax_is_rewritten_before_the_wire() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("users", 1));
    let conn = connection_over(fake.clone(), &[]);

    // The fake matches on the quoted base-table name, so resolution of the
    // rewritten statement also proves the rewrite happened.
    let mut rows = conn
        .execute_query("SELECT * FROM \"users.idx1\"")
        .await
        .unwrap();
    assert_eq!(collect_ids(&mut rows).await, vec![1]);
    assert_eq!(
        fake.statements()[0].statement,
        "SELECT * FROM \"users\".\"idx1\""
    );
}

#[tokio::test]
async fn dml_is_rejected_by_execute_query_and_accepted_by_execute_update() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let conn = connection_over(fake.clone(), &[]);

    let error = conn
        .execute_query("DELETE FROM \"t\" WHERE id = 1")
        .await
        .unwrap_err();
    assert_matches!(error, DriverError::Validation { .. });

    let updated = conn
        .execute_update("DELETE FROM \"t\" WHERE id = 1")
        .await
        .unwrap();
    assert_eq!(updated, 1);
}

#[tokio::test]
async fn large_offsets_warn_but_do_not_fail() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 5));
    let conn = connection_over(fake, &[]);

    let mut rows = conn
        .execute_query("SELECT * FROM \"t\" OFFSET 5000")
        .await
        .unwrap();
    assert_eq!(collect_ids(&mut rows).await, Vec::<i64>::new());

    let warnings = conn.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, "LARGE_OFFSET");
    conn.clear_warnings();
    assert!(conn.warnings().is_empty());
}

#[tokio::test]
async fn oversized_limit_is_rejected() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let conn = connection_over(fake, &[]);
    let error = conn
        .execute_query("SELECT * FROM \"t\" LIMIT 2000000")
        .await
        .unwrap_err();
    assert_matches!(error, DriverError::Validation { .. });
}

#[tokio::test]
async fn offset_cache_shortcuts_a_repeat_scan() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 10_000));
    let conn = connection_over(
        fake.clone(),
        &[("offsetCacheInterval", "100"), ("offsetCacheSize", "200")],
    );
    conn.set_fetch_size(100);

    // First scan walks the whole table, recording a token every 100 rows.
    let mut warmup = conn.execute_query("SELECT * FROM \"t\"").await.unwrap();
    let mut scanned = 0u64;
    while warmup.advance().await.unwrap() {
        scanned += 1;
    }
    assert_eq!(scanned, 100, "fetch-size safety cap bounds the warmup scan");

    // Deep scan without the cap to fill the cache further.
    conn.set_max_rows(10_000);
    let mut full = conn.execute_query("SELECT * FROM \"t\"").await.unwrap();
    let mut count = 0u64;
    while full.advance().await.unwrap() {
        count += 1;
    }
    assert_eq!(count, 10_000);

    let calls_before = fake.execute_calls();
    let mut tail = conn
        .execute_query("SELECT * FROM \"t\" LIMIT 3 OFFSET 9500")
        .await
        .unwrap();
    assert_eq!(collect_ids(&mut tail).await, vec![9501, 9502, 9503]);
    let calls_for_tail = fake.execute_calls() - calls_before;
    assert!(
        calls_for_tail <= 2,
        "cached token should skip ~9500 rows, used {calls_for_tail} calls"
    );
}

#[tokio::test]
async fn information_schema_tables_is_answered_locally() {
    let fake = Arc::new(
        FakeDynamo::new()
            .with_numbered_table("alpha", 1)
            .with_numbered_table("beta", 1),
    );
    let conn = connection_over(fake.clone(), &[]);

    let calls_before = fake.execute_calls();
    let mut rows = conn
        .execute_query("SELECT * FROM information_schema.tables")
        .await
        .unwrap();
    let mut names = Vec::new();
    while rows.advance().await.unwrap() {
        names.push(rows.get_string("table_name").unwrap().unwrap());
    }
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(
        fake.execute_calls(),
        calls_before,
        "metadata queries never reach ExecuteStatement"
    );
}

#[tokio::test]
async fn information_schema_columns_respects_table_filter_predicate() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("users", 3));
    let conn = connection_over(fake, &[("schemaDiscovery", "SAMPLING")]);

    let mut rows = conn
        .execute_query(
            "SELECT * FROM information_schema.columns WHERE table_name = 'users'",
        )
        .await
        .unwrap();
    let mut columns = Vec::new();
    while rows.advance().await.unwrap() {
        columns.push(rows.get_string("column_name").unwrap().unwrap());
    }
    columns.sort();
    assert_eq!(columns, vec!["flag", "id", "name"]);
}

#[tokio::test]
async fn table_filter_restricts_listing() {
    let fake = Arc::new(
        FakeDynamo::new()
            .with_numbered_table("prod_users", 1)
            .with_numbered_table("dev_users", 1),
    );
    let conn = connection_over(fake, &[("tableFilter", "prod_*")]);
    assert_eq!(conn.tables().await.unwrap(), vec!["prod_users"]);
}

#[tokio::test]
async fn prepared_parameters_are_substituted() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 3));
    let conn = connection_over(fake.clone(), &[]);

    let mut rows = conn
        .execute_prepared_query(
            "SELECT * FROM \"t\" WHERE name = ?",
            &[dynosql_driver::ParamValue::Str("it's".to_string())],
        )
        .await
        .unwrap();
    let _ = collect_ids(&mut rows).await;
    assert_eq!(
        fake.statements()[0].statement,
        "SELECT * FROM \"t\" WHERE name = 'it''s'"
    );
}

#[tokio::test]
async fn updatable_result_set_writes_back_through_the_executor() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 3));
    let conn = connection_over(fake.clone(), &[]);

    let mut rows = conn
        .execute_query_with("SELECT * FROM \"t\"", true)
        .await
        .unwrap();
    assert!(rows.advance().await.unwrap());
    let updatable = rows.as_updatable().expect("updatable result set");

    updatable
        .update_current(&[(
            "name".to_string(),
            dynosql_client::AttributeValue::S("renamed".to_string()),
        )])
        .await
        .unwrap();
    updatable.delete_current().await.unwrap();

    let statements: Vec<String> = fake
        .statements()
        .into_iter()
        .map(|request| request.statement)
        .collect();
    assert!(
        statements
            .iter()
            .any(|s| s == "UPDATE \"t\" SET \"name\" = 'renamed' WHERE \"id\" = 1"),
        "missing synthesized update in {statements:?}"
    );
    assert!(
        statements
            .iter()
            .any(|s| s == "DELETE FROM \"t\" WHERE \"id\" = 1"),
        "missing synthesized delete in {statements:?}"
    );
}

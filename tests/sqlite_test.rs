//! The access service against a real SQLite database file.

use db_access::db::{AccessService, Context, DbPool, Driver, Query};
use db_access::{DbConfig, DbError, DbResult, QueryParam, Value, params};
use tempfile::TempDir;

async fn setup(dir: &TempDir) -> (DbPool, AccessService<DbPool>) {
    let path = dir.path().join("access.db");
    let config = DbConfig {
        metric_prefix: "sqlite_test".to_string(),
        ..DbConfig::new(format!("sqlite://{}", path.display()))
    };
    let pool = DbPool::connect(&config).await.unwrap();
    pool.execute(
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL)",
        &[],
    )
    .await
    .unwrap();
    let service = AccessService::new(pool.clone(), &config);
    (pool, service)
}

async fn count(service: &AccessService<DbPool>) -> i64 {
    let mut ctx = service.context();
    service
        .select_unique_value_non_empty(&mut ctx, "SELECT COUNT(*) AS n FROM accounts", false, &[])
        .await
        .unwrap()
        .get_int64_required("n")
        .unwrap()
}

#[tokio::test]
async fn test_with_transaction_commits_multi_row_insert() {
    let dir = TempDir::new().unwrap();
    let (pool, service) = setup(&dir).await;

    let mut insert =
        Query::begin_end("INSERT INTO accounts (id, owner, balance) VALUES ", "", "(?, ?, ?)")
            .unwrap();
    insert.add_params(params![1, "alice", 100]).unwrap();
    insert.add_params(params![2, "bob", 50]).unwrap();
    insert.add_params(params![3, "carol", 0]).unwrap();

    let mut ctx = service.context();
    let affected = service
        .with_transaction(&mut ctx, async |ctx: &mut Context<DbPool>| -> DbResult<u64> {
            Ok(service.execute_with_query(ctx, &insert).await?.affected_rows)
        })
        .await
        .unwrap();
    assert_eq!(affected, 3);
    assert!(ctx.is_detached());

    let mut lookup = Query::placeholder(
        "SELECT id, owner FROM accounts WHERE id IN (#IDS#) ORDER BY id",
        "#IDS#",
        "?",
    )
    .unwrap();
    lookup.add_params([1]).unwrap();
    lookup.add_params([3]).unwrap();

    let result = service.select_with_query(&mut ctx, &lookup).await.unwrap();
    let owners: Vec<&str> = result
        .rows
        .iter()
        .map(|row| row.get_string_required("owner").unwrap())
        .collect();
    assert_eq!(owners, vec!["alice", "carol"]);

    pool.close().await;
}

#[tokio::test]
async fn test_rolled_back_writes_are_not_visible() {
    let dir = TempDir::new().unwrap();
    let (pool, service) = setup(&dir).await;

    let mut ctx = service.context();
    let err = service
        .with_transaction(&mut ctx, async |ctx: &mut Context<DbPool>| -> DbResult<()> {
            service
                .execute(
                    ctx,
                    "INSERT INTO accounts (id, owner, balance) VALUES (?, ?, ?)",
                    &params![1, "alice", 100],
                )
                .await?;
            // Primary key clash aborts the unit of work.
            service
                .execute(
                    ctx,
                    "INSERT INTO accounts (id, owner, balance) VALUES (?, ?, ?)",
                    &params![1, "mallory", 0],
                )
                .await?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Database { .. }), "{err:?}");
    assert!(ctx.is_detached());
    assert_eq!(count(&service).await, 0);

    pool.close().await;
}

#[tokio::test]
async fn test_nested_transactions_commit_once() {
    let dir = TempDir::new().unwrap();
    let (pool, service) = setup(&dir).await;

    let mut ctx = service.context();
    service.begin(&mut ctx).await.unwrap();
    service
        .execute(
            &mut ctx,
            "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 10)",
            &[],
        )
        .await
        .unwrap();

    service.begin(&mut ctx).await.unwrap();
    service
        .execute_ensuring_one_affected_row(
            &mut ctx,
            "UPDATE accounts SET balance = balance + ? WHERE id = ?",
            &params![5, 1],
        )
        .await
        .unwrap();
    service.commit(&mut ctx).await.unwrap();
    assert!(ctx.in_transaction());

    let row = service
        .select_unique_value(&mut ctx, "SELECT balance FROM accounts WHERE id = ?", false, &params![1])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get_int64_required("balance").unwrap(), 15);

    service.commit(&mut ctx).await.unwrap();
    assert!(ctx.is_detached());
    assert_eq!(count(&service).await, 1);

    pool.close().await;
}

#[tokio::test]
async fn test_cardinality_checks_against_real_rows() {
    let dir = TempDir::new().unwrap();
    let (pool, service) = setup(&dir).await;
    let mut ctx = service.context();

    service
        .execute(
            &mut ctx,
            "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 1), (2, 'alice', 2)",
            &[],
        )
        .await
        .unwrap();

    let by_owner = "SELECT id FROM accounts WHERE owner = ?";
    let err = service
        .select_unique_value(&mut ctx, by_owner, false, &params!["alice"])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::UnexpectedRecordCount { actual: 2, .. }));

    let missing = service
        .select_unique_value(&mut ctx, by_owner, false, &params!["nobody"])
        .await
        .unwrap();
    assert!(missing.is_none());

    let err = service
        .execute_ensuring_one_affected_row(
            &mut ctx,
            "UPDATE accounts SET balance = 0 WHERE owner = ?",
            &[QueryParam::from("alice")],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::UnexpectedAffectedRows {
            expected: 1,
            actual: 2
        }
    ));

    pool.close().await;
}

#[tokio::test]
async fn test_connection_context_ping_and_close() {
    let dir = TempDir::new().unwrap();
    let (pool, service) = setup(&dir).await;

    let mut ctx = service.connection().await.unwrap();
    service.test_connection(&mut ctx).await.unwrap();
    let row = service
        .select_unique_value_non_empty(&mut ctx, "SELECT 1 AS one", false, &[])
        .await
        .unwrap();
    assert!(row.get_bool_required("one").unwrap());
    service.close(&mut ctx).await.unwrap();
    assert!(ctx.is_detached());

    pool.close().await;
}

#[tokio::test]
async fn test_values_outside_declared_affinity_are_not_nulled() {
    let dir = TempDir::new().unwrap();
    let (pool, _service) = setup(&dir).await;
    pool.execute("CREATE TABLE loose (x REAL, b BOOLEAN, n REAL)", &[])
        .await
        .unwrap();
    pool.execute("INSERT INTO loose VALUES ('abc', 'yes', NULL)", &[])
        .await
        .unwrap();

    let rows = pool
        .fetch("SELECT x, b, n FROM loose", &[])
        .await
        .unwrap()
        .decode();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("x").unwrap().value(), &Value::Text("abc".into()));
    assert_eq!(row.get("b").unwrap().value(), &Value::Text("yes".into()));
    assert_eq!(row.get("n").unwrap().value(), &Value::Null);

    pool.close().await;
}

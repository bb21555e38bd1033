#![cfg(feature = "sqlite")]

use std::time::{Duration, Instant};

use sql_mapper::prelude::*;
use sql_mapper::test_utils::{AsyncScriptedConnection, ScriptedResponse};

const SLOW_COUNT: &str = "with recursive c(x) as (select 1 union all select x + 1 from c where x < 1000000000)
     select count(*) from c";

fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

#[tokio::test]
async fn an_already_cancelled_token_stops_before_execution()
 -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = AsyncScriptedConnection::new();
    let token = CancellationToken::new();
    token.cancel();

    let result = conn.sql("select 1").cancellation(token).execute().await;
    assert!(matches!(result, Err(SqlMapperError::Cancelled)));
    assert!(conn.recorded().commands().is_empty());
    assert_eq!(conn.recorded().opens(), conn.recorded().closes());
    Ok(())
}

#[tokio::test]
async fn cancelling_mid_call_returns_promptly() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = AsyncScriptedConnection::new().with_delay(Duration::from_secs(30));
    let token = CancellationToken::new();
    cancel_after(&token, Duration::from_millis(50));

    let started = Instant::now();
    let result: Result<Vec<i64>, _> = conn.sql("select slow").cancellation(token).query().await;
    assert!(matches!(result, Err(SqlMapperError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    // The connection opened for the call is released even though the call was cancelled.
    assert_eq!(conn.state(), ConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn untriggered_tokens_do_not_interfere() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = AsyncScriptedConnection::new().with_delay(Duration::from_millis(10));
    conn.script().push(ScriptedResponse::sets(vec![
        ResultSet::from_names(&["n"])
            .with_row(vec![DbValue::Int(1)])?
            .with_row(vec![DbValue::Int(2)])?,
    ]));
    let token = CancellationToken::new();

    let values: Vec<i64> = conn.sql("select n").cancellation(token.clone()).query().await?;
    assert_eq!(values, vec![1, 2]);
    assert!(!token.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn cancellation_between_grid_sets() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = AsyncScriptedConnection::new();
    conn.script().push(ScriptedResponse::sets(vec![
        ResultSet::from_names(&["a"]).with_row(vec![DbValue::Int(1)])?,
        ResultSet::from_names(&["b"]).with_row(vec![DbValue::Int(2)])?,
    ]));
    let token = CancellationToken::new();

    let mut grid = conn
        .sql("select a; select b")
        .cancellation(token.clone())
        .query_multiple()
        .await?;
    let a: i64 = grid.read_single().await?;
    assert_eq!(a, 1);
    token.cancel();
    let b: Result<i64, _> = grid.read_single().await;
    assert!(matches!(b, Err(SqlMapperError::Cancelled)));
    assert!(grid.is_consumed());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_statements_are_interrupted() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = AsyncSqliteConnection::in_memory();
    conn.open().await?;
    let token = CancellationToken::new();
    cancel_after(&token, Duration::from_millis(100));

    let started = Instant::now();
    let result: Result<i64, _> = conn
        .sql(SLOW_COUNT)
        .cancellation(token)
        .execute_scalar()
        .await;
    assert!(matches!(result, Err(SqlMapperError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));

    // The interrupted connection keeps working.
    let answer: i64 = conn.execute_scalar("select 41 + 1").await?;
    assert_eq!(answer, 42);
    conn.close().await?;
    Ok(())
}

#[test]
fn sync_sqlite_honours_a_cancelled_token() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = SqliteConnection::in_memory();
    conn.open()?;
    let token = CancellationToken::new();
    token.cancel();

    let result: Result<Vec<i64>, _> = conn.sql("select 1").cancellation(token).query();
    assert!(matches!(result, Err(SqlMapperError::Cancelled)));
    Ok(())
}

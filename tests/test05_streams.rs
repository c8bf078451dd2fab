use sql_session::prelude::*;
use sql_session::test_utils::{DriverEvent, MockDriver, init_tracing};

fn people_driver() -> MockDriver {
    MockDriver::new().with_rows(
        &["ID", "NAME"],
        vec![
            vec![RowValues::Int(1), RowValues::Text("alice".into())],
            vec![RowValues::Int(2), RowValues::Text("bob".into())],
            vec![RowValues::Int(3), RowValues::Text("carol".into())],
        ],
    )
}

#[tokio::test]
async fn draining_runs_the_deferred_rollback_once() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let driver = people_driver();
    let state = driver.state();
    let mut session = Session::new(driver);
    session.connect("orcl", "scott", None, None).await?;

    let mut rows = session
        .execute_query_streamed("SELECT id, name FROM people", &BindParams::new())
        .await?;
    assert_eq!(rows.column_names(), ["ID".to_string(), "NAME".to_string()]);
    assert_eq!(rows.connection_index(), 1);
    // the transaction stays open while rows are pending
    assert_eq!(state.rollbacks(), 0);

    let mut names = Vec::new();
    while let Some(row) = rows.next().await {
        let row = row?;
        names.push(row.get("NAME").and_then(RowValues::as_text).map(str::to_string));
    }
    assert_eq!(
        names,
        vec![Some("alice".into()), Some("bob".into()), Some("carol".into())]
    );
    assert!(rows.is_finished());
    assert!(rows.next().await.is_none());

    assert_eq!(state.commits(), 0);
    assert_eq!(state.rollbacks(), 1);
    assert_eq!(state.count(&DriverEvent::CloseCursor), 1);
    Ok(())
}

#[tokio::test]
async fn closing_early_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let driver = people_driver();
    let state = driver.state();
    let mut session = Session::new(driver);
    session.connect("orcl", "scott", None, None).await?;

    let mut rows = session
        .execute_query_streamed("SELECT id, name FROM people", &BindParams::new())
        .await?;
    let first = rows.next().await.ok_or("expected a row")??;
    assert_eq!(first.get("ID"), Some(&RowValues::Int(1)));
    rows.close().await?;

    assert_eq!(state.rollbacks(), 1);
    assert_eq!(state.count(&DriverEvent::Fetch), 1);
    Ok(())
}

#[tokio::test]
async fn switching_away_invalidates_the_stream() -> Result<(), Box<dyn std::error::Error>> {
    let driver = people_driver();
    let state = driver.state();
    let mut session = Session::new(driver);
    session.connect("orcl", "scott", None, Some("a")).await?;
    session.connect("orcl", "scott", None, Some("b")).await?;
    session.switch_connection("a")?;

    let mut rows = session
        .execute_query_streamed("SELECT id, name FROM people", &BindParams::new())
        .await?;
    assert!(rows.next().await.ok_or("expected a row")?.is_ok());

    session.switch_connection("b")?;
    assert!(matches!(
        rows.next().await,
        Some(Err(SqlSessionError::StreamLifecycle(_)))
    ));
    assert!(rows.next().await.is_none());
    // the suspended rollback is not performed on the abandoned cursor
    assert_eq!(state.rollbacks(), 0);

    // switching back does not revive the stream
    session.switch_connection("a")?;
    assert!(rows.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn disconnect_and_close_all_invalidate_streams() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(people_driver());
    session.connect("orcl", "scott", None, None).await?;

    let mut first = session
        .execute_query_streamed("SELECT id, name FROM people", &BindParams::new())
        .await?;
    session.disconnect().await?;
    assert!(matches!(
        first.next().await,
        Some(Err(SqlSessionError::StreamLifecycle(_)))
    ));

    session.connect("orcl", "scott", None, None).await?;
    let second = session
        .execute_query_streamed("SELECT id, name FROM people", &BindParams::new())
        .await?;
    session.close_all().await?;
    assert!(matches!(
        second.collect_rows().await,
        Err(SqlSessionError::StreamLifecycle(_))
    ));
    Ok(())
}

#[tokio::test]
async fn failed_stream_execution_rolls_back_immediately() -> Result<(), Box<dyn std::error::Error>> {
    let driver = MockDriver::new().failing_execute("ORA-00904: invalid identifier");
    let state = driver.state();
    let mut session = Session::new(driver);
    session.connect("orcl", "scott", None, None).await?;

    let err = session
        .execute_query_streamed("SELECT nope FROM people", &BindParams::new())
        .await
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, SqlSessionError::Statement(_)));
    assert_eq!(state.rollbacks(), 1);
    Ok(())
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_stream_is_lazy_and_matches_mapped() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(SqliteDriver::default());
    session.connect(":memory:", "app", None, Some("main")).await?;
    session
        .execute_block(
            "CREATE TABLE n (v INTEGER); \
             INSERT INTO n (v) WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500) SELECT x FROM c;",
            &BindParams::new(),
        )
        .await?;

    let query = "SELECT v, v * v AS square FROM n WHERE v % :m = 0 ORDER BY v";
    let params = BindParams::new().bind("m", 7);
    let mapped = session.execute_query_mapped(query, &params).await?;
    let streamed = session
        .execute_query_streamed(query, &params)
        .await?
        .collect_rows()
        .await?;
    assert_eq!(mapped.len(), 71);
    assert_eq!(streamed, mapped);

    // another statement on the same connection abandons the open cursor
    let mut rows = session.execute_query_streamed(query, &params).await?;
    assert!(rows.next().await.ok_or("expected a row")?.is_ok());
    session.execute_query("SELECT 1", &BindParams::new()).await?;
    assert!(matches!(
        rows.next().await,
        Some(Err(SqlSessionError::StreamLifecycle(_)))
    ));

    // a stream closed early leaves the connection ready for writes
    let rows = session.execute_query_streamed(query, &params).await?;
    rows.close().await?;
    session
        .execute_block("DELETE FROM n WHERE v > :max", &BindParams::new().bind("max", 10))
        .await?;
    let left = session
        .execute_query("SELECT count(*) FROM n", &BindParams::new())
        .await?;
    assert_eq!(left, vec![vec![RowValues::Int(10)]]);
    Ok(())
}

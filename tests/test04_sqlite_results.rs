#![cfg(feature = "sqlite")]

use sql_session::prelude::*;
use sql_session::test_utils::init_tracing;

const SCHEMA: &str = "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, score REAL, active INTEGER);";

async fn seeded(session: &mut Session, dbname: &str, alias: &str) -> Result<(), SqlSessionError> {
    session.connect(dbname, "app", Some("secret"), Some(alias)).await?;
    session.execute_block(SCHEMA, &BindParams::new()).await?;
    for (id, name, score) in [(1, "alice", 9.5), (2, "bob", 7.25), (3, "carol", 8.0)] {
        session
            .execute_block(
                "INSERT INTO people (id, name, score, active) VALUES (:id, :name, :score, :active)",
                &BindParams::new()
                    .bind("id", id)
                    .bind("name", name)
                    .bind("score", score)
                    .bind("active", id != 2),
            )
            .await?;
    }
    Ok(())
}

#[tokio::test]
async fn eager_and_streamed_materializers_agree() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut session = Session::new(SqliteDriver::default());
    seeded(&mut session, ":memory:", "mem").await?;

    let query = "SELECT id, name, score FROM people WHERE score > :min ORDER BY id";
    let params = BindParams::new().bind("min", 7.5);

    let tuples = session.execute_query(query, &params).await?;
    assert_eq!(
        tuples,
        vec![
            vec![RowValues::Int(1), RowValues::Text("alice".into()), RowValues::Float(9.5)],
            vec![RowValues::Int(3), RowValues::Text("carol".into()), RowValues::Float(8.0)],
        ]
    );

    let mapped = session.execute_query_mapped(query, &params).await?;
    assert_eq!(mapped.len(), 2);
    assert_eq!(mapped[0].column_names(), ["id", "name", "score"].map(String::from));
    assert_eq!(mapped[1].get("name"), Some(&RowValues::Text("carol".into())));

    let streamed = session
        .execute_query_streamed(query, &params)
        .await?
        .collect_rows()
        .await?;
    assert_eq!(streamed, mapped);

    let values: Vec<Vec<RowValues>> = mapped.into_iter().map(|row| row.into_values()).collect();
    assert_eq!(values, tuples);
    Ok(())
}

#[tokio::test]
async fn empty_results_and_bools() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(SqliteDriver::default());
    seeded(&mut session, ":memory:", "mem").await?;

    let none = session
        .execute_query_mapped("SELECT id FROM people WHERE id > 100", &BindParams::new())
        .await?;
    assert!(none.is_empty());

    let inactive = session
        .execute_query(
            "SELECT name FROM people WHERE active = :flag",
            &BindParams::new().bind("flag", false),
        )
        .await?;
    assert_eq!(inactive, vec![vec![RowValues::Text("bob".into())]]);
    Ok(())
}

#[tokio::test]
async fn committed_blocks_are_visible_to_other_connections() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("people.db");
    let path = path.to_str().ok_or("non-utf8 temp path")?;

    let mut session = Session::new(SqliteDriver::builder().build());
    seeded(&mut session, path, "writer").await?;
    session.connect(path, "app", None, Some("reader")).await?;

    let count = session
        .execute_query("SELECT count(*) FROM people", &BindParams::new())
        .await?;
    assert_eq!(count, vec![vec![RowValues::Int(3)]]);

    // the reader's rollback released its snapshot, so the writer is not blocked
    session.switch_connection("writer")?;
    session
        .execute_block("DELETE FROM people WHERE id = :id", &BindParams::new().bind("id", 2))
        .await?;
    session.switch_connection("reader")?;
    let count = session
        .execute_query("SELECT count(*) FROM people", &BindParams::new())
        .await?;
    assert_eq!(count, vec![vec![RowValues::Int(2)]]);

    session.close_all().await?;
    Ok(())
}

#[tokio::test]
async fn application_errors_surface_and_roll_back() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(SqliteDriver::default());
    seeded(&mut session, ":memory:", "mem").await?;
    session
        .execute_block(
            "CREATE TRIGGER no_mallory BEFORE INSERT ON people WHEN NEW.name = 'mallory' \
             BEGIN SELECT RAISE(ABORT, 'custom failure: mallory is not allowed'); END;",
            &BindParams::new(),
        )
        .await?;

    let err = session
        .execute_block(
            "INSERT INTO people (id, name) VALUES (10, 'dave'); \
             INSERT INTO people (id, name) VALUES (11, :name);",
            &BindParams::new().bind("name", "mallory"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SqlSessionError::Statement(_)));
    assert!(err.to_string().contains("mallory is not allowed"), "{err}");

    // neither statement of the failed block persisted
    let ids = session
        .execute_query("SELECT id FROM people WHERE id >= 10", &BindParams::new())
        .await?;
    assert!(ids.is_empty());
    Ok(())
}

#[tokio::test]
async fn multi_statement_blocks_run_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(SqliteDriver::default());
    seeded(&mut session, ":memory:", "mem").await?;

    session
        .execute_block(
            "UPDATE people SET score = score + :bonus WHERE id = 1; \
             DELETE FROM people WHERE id = 3;",
            &BindParams::new().bind("bonus", 0.5),
        )
        .await?;

    let rows = session
        .execute_query("SELECT id, score FROM people ORDER BY id", &BindParams::new())
        .await?;
    assert_eq!(
        rows,
        vec![
            vec![RowValues::Int(1), RowValues::Float(10.0)],
            vec![RowValues::Int(2), RowValues::Float(7.25)],
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unreferenced_bind_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(SqliteDriver::default());
    seeded(&mut session, ":memory:", "mem").await?;

    let err = session
        .execute_query(
            "SELECT name FROM people WHERE id = :id",
            &BindParams::new().bind("id", 1).bind("typo", 2),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SqlSessionError::Statement(DriverError::UnknownBind(name)) if name == "typo"));
    Ok(())
}

#[tokio::test]
async fn block_with_output_returns_put_lines() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(SqliteDriver::default());
    session.connect(":memory:", "app", None, None).await?;

    // lines written while the buffer is disabled are discarded
    session
        .execute_block("SELECT dbms_output_put_line('dropped')", &BindParams::new())
        .await?;

    let lines = session
        .execute_block_with_output(
            "SELECT dbms_output_put_line('first'); \
             SELECT dbms_output_put_line('second: ' || :n);",
            &BindParams::new().bind("n", 2),
        )
        .await?;
    assert_eq!(lines, vec!["first".to_string(), "second: 2".to_string()]);

    let again = session
        .execute_block_with_output("SELECT 1", &BindParams::new())
        .await?;
    assert!(again.is_empty());
    Ok(())
}

#[tokio::test]
async fn later_statements_see_tables_created_earlier_in_the_block() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(SqliteDriver::default());
    session.connect(":memory:", "app", None, None).await?;

    session
        .execute_block(
            "CREATE TABLE p (name TEXT); INSERT INTO p VALUES ('a'), ('b'), (:last);",
            &BindParams::new().bind("last", "c"),
        )
        .await?;

    let rows = session
        .execute_query("SELECT name FROM p ORDER BY name", &BindParams::new())
        .await?;
    assert_eq!(
        rows,
        vec![
            vec![RowValues::Text("a".into())],
            vec![RowValues::Text("b".into())],
            vec![RowValues::Text("c".into())],
        ]
    );
    Ok(())
}

#[tokio::test]
async fn block_ending_in_a_row_statement_runs_every_row() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(SqliteDriver::default());
    session.connect(":memory:", "app", None, None).await?;
    session
        .execute_block(
            "CREATE TABLE p (name TEXT); INSERT INTO p VALUES ('a'), ('b'), ('c');",
            &BindParams::new(),
        )
        .await?;

    // no ORDER BY, so every row is produced by its own step
    let lines = session
        .execute_block_with_output("SELECT dbms_output_put_line(name) FROM p", &BindParams::new())
        .await?;
    assert_eq!(lines, vec!["a".to_string(), "b".to_string(), "c".to_string()]);

    let lines = session
        .execute_block_with_output(
            "SELECT dbms_output_put_line('head'); SELECT dbms_output_put_line(name) FROM p WHERE name > 'a';",
            &BindParams::new(),
        )
        .await?;
    assert_eq!(lines, vec!["head".to_string(), "b".to_string(), "c".to_string()]);
    Ok(())
}

//! Unit tests for failover-rdbc query execution, incremental fetch and diagnostics

use std::sync::Arc;

use failover_rdbc::testing::{MockConnectionFactory, MockEvent, MockResponse};
use failover_rdbc::{
    named_params, params, Database, Error, Fetch, FetchMode, Params, QueryOutcome, ServerEntry,
    Value,
};

fn database(factory: &MockConnectionFactory) -> Database {
    Database::from_servers(
        &[ServerEntry::new("db0", "app", "secret", "shop")],
        false,
        Arc::new(factory.clone()),
    )
}

fn users(count: i64) -> MockResponse {
    MockResponse::rows(
        ["id", "name"],
        (1..=count)
            .map(|id| vec![Value::Int64(id), Value::from(format!("user{id}"))])
            .collect(),
    )
}

// ==================== Outcome Classification Tests ====================

#[test]
fn test_insert_returns_generated_key() {
    let factory =
        MockConnectionFactory::new().on_query("INSERT INTO users", MockResponse::Inserted(Some(42)));
    let mut db = database(&factory);

    let outcome = db
        .query("INSERT INTO users (name) VALUES (?)", "ada")
        .unwrap();
    assert_eq!(outcome, QueryOutcome::Inserted(42));
    assert_eq!(outcome.inserted_id(), Some(42));
}

#[test]
fn test_insert_without_positive_key_is_empty() {
    let factory =
        MockConnectionFactory::new().on_query("INSERT INTO tags", MockResponse::Inserted(Some(0)));
    let mut db = database(&factory);
    assert!(db
        .query("INSERT INTO tags (name) VALUES (?)", "rust")
        .unwrap()
        .is_empty());

    factory.respond("INSERT INTO tags", MockResponse::Inserted(None));
    assert!(db
        .query("  insert into tags (name) VALUES (?)", "go")
        .unwrap()
        .is_empty());
}

#[test]
fn test_mutating_statements_return_affected_rows() {
    let factory = MockConnectionFactory::new()
        .on_query("DELETE FROM sessions", MockResponse::Affected(5))
        .on_query("REPLACE INTO settings", MockResponse::Affected(2));
    let mut db = database(&factory);

    let deleted = db
        .query("DELETE FROM sessions WHERE expires < ?", 1_700_000_000i64)
        .unwrap();
    assert_eq!(deleted.affected(), Some(5));

    let replaced = db
        .query("REPLACE INTO settings (k, v) VALUES (?, ?)", params!["theme", "dark"])
        .unwrap();
    assert_eq!(replaced, QueryOutcome::Affected(2));
}

#[test]
fn test_select_returns_rows() {
    let factory = MockConnectionFactory::new().on_query("FROM users", users(3));
    let mut db = database(&factory);

    let rows = db
        .query("SELECT id, name FROM users WHERE id IN (?)", params![vec![1, 2, 3]])
        .unwrap()
        .into_rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].get_by_name("name"), Some(&Value::from("user3")));

    let (sql, params) = factory.executed().pop().unwrap();
    assert_eq!(sql, "SELECT id, name FROM users WHERE id IN (?,?,?)");
    assert_eq!(
        params,
        Params::Positional(vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)])
    );
}

#[test]
fn test_select_with_no_rows() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    let outcome = db.query("SELECT * FROM users WHERE 0", Params::None).unwrap();
    assert_eq!(outcome, QueryOutcome::Rows(Vec::new()));
}

#[test]
fn test_named_params_pass_through() {
    let factory = MockConnectionFactory::new().on_query("FROM users", users(1));
    let mut db = database(&factory);

    db.query(
        "SELECT * FROM users WHERE name = :name AND age > :age",
        named_params! { ":name" => "ada", "age" => 30 },
    )
    .unwrap();

    let (sql, params) = factory.executed().pop().unwrap();
    assert_eq!(sql, "SELECT * FROM users WHERE name = :name AND age > :age");
    assert_eq!(params.len(), 2);
}

// ==================== Single Row Tests ====================

#[test]
fn test_query_row() {
    let factory = MockConnectionFactory::new().on_query("FROM users", users(2));
    let mut db = database(&factory);

    let row = db
        .query_row("SELECT id, name FROM users", Params::None, true)
        .unwrap()
        .unwrap();
    assert_eq!(row.get(0), Some(&Value::Int64(1)));
}

#[test]
fn test_query_row_missing() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    assert!(db
        .query_row("SELECT * FROM users WHERE id = ?", 9, false)
        .unwrap()
        .is_none());

    let err = db
        .query_row("SELECT * FROM users WHERE id = ?", 9, true)
        .unwrap_err();
    assert!(matches!(err, Error::RequiredRowMissing { .. }));
    assert!(!err.is_retriable());
}

// ==================== Incremental Fetch Tests ====================

#[test]
fn test_incremental_fetch_yields_every_row_then_end() {
    let factory = MockConnectionFactory::new().on_query("FROM users", users(3));
    let mut db = database(&factory);

    db.begin_incremental_query("SELECT id, name FROM users", Params::None)
        .unwrap();

    let mut ids = Vec::new();
    loop {
        match db.next_row().unwrap() {
            Fetch::Row(row) => ids.push(row.get(0).and_then(Value::as_i64).unwrap()),
            Fetch::EndOfRows => break,
        }
    }
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(db.next_row().unwrap().is_end());
    assert!(db.next_row().unwrap().is_end());
}

#[test]
fn test_incremental_fetch_of_empty_result() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    let outcome = db
        .query_with("SELECT * FROM users", Params::None, FetchMode::Incremental)
        .unwrap();
    assert!(outcome.is_empty());
    assert!(db.next_row().unwrap().is_end());
}

#[test]
fn test_next_row_without_incremental_query() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    let err = db.next_row().unwrap_err();
    assert!(matches!(err, Error::Cursor { .. }));
}

#[test]
fn test_new_query_closes_cursor() {
    let factory = MockConnectionFactory::new().on_query("FROM users", users(3));
    let mut db = database(&factory);

    db.begin_incremental_query("SELECT id FROM users", Params::None)
        .unwrap();
    assert!(db.next_row().unwrap().into_row().is_some());

    db.query("SELECT id FROM users", Params::None).unwrap();
    assert!(matches!(db.next_row(), Err(Error::Cursor { .. })));
}

#[test]
fn test_incremental_fetch_error_rolls_back() {
    let factory = MockConnectionFactory::new().on_query(
        "FROM events",
        MockResponse::RowsThenError {
            columns: vec!["id".into()],
            rows: vec![vec![Value::Int64(1)]],
            code: 2013,
            message: "Lost connection to MySQL server during query".into(),
        },
    );
    let mut db = database(&factory);

    db.start_transaction(None).unwrap();
    db.begin_incremental_query("SELECT id FROM events", Params::None)
        .unwrap();

    assert!(db.next_row().unwrap().into_row().is_some());
    let err = db.next_row().unwrap_err();
    assert_eq!(err.vendor_code(), Some(2013));
    assert!(!db.in_transaction());
    assert_eq!(factory.count(&MockEvent::Rollback), 1);
    assert!(matches!(db.next_row(), Err(Error::Cursor { .. })));
}

// ==================== Diagnostics Tests ====================

#[test]
fn test_query_count() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);
    assert_eq!(db.query_count(), 0);

    db.query("SELECT 1", Params::None).unwrap();
    db.query_row("SELECT 2", Params::None, false).unwrap();
    db.query_column("SELECT 3", Params::None, 0).unwrap();
    assert_eq!(db.query_count(), 3);
}

#[test]
fn test_last_query_audit_describes_statement() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    db.query("SELECT * FROM t WHERE id IN (?)", params![vec![4, 5]])
        .unwrap();

    let sql = "SELECT * FROM t WHERE id IN (?,?)";
    assert_eq!(
        db.last_query_audit(),
        format!(
            "SQL: [{}] {}\nParams: 2 [{{\"Int32\":4}},{{\"Int32\":5}}]",
            sql.len(),
            sql
        )
    );
}

#[test]
fn test_debug_render_named() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);
    db.query("SELECT 1", Params::None).unwrap();

    let rendered = db
        .debug_render(
            "SELECT * FROM users WHERE name = :name AND note = :note AND age > :age",
            named_params! { "name" => "O'Brien", "age" => 30 },
        )
        .unwrap();

    assert!(rendered.starts_with("-- [WARNING]"));
    assert!(rendered.ends_with('\n'));
    assert!(rendered
        .contains("SELECT * FROM users WHERE name = 'O\\'Brien' AND note = :note AND age > 30"));
    assert_eq!(db.query_count(), 1);
}

#[test]
fn test_debug_render_rejects_named_arrays() {
    let factory = MockConnectionFactory::new();
    let db = database(&factory);

    let err = db
        .debug_render("SELECT :ids", named_params! { "ids" => vec![1, 2] })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }));
}

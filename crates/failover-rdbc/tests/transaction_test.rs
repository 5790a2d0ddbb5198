//! Unit tests for failover-rdbc transactions and the audit log

use std::sync::Arc;

use failover_rdbc::connection::IsolationLevel;
use failover_rdbc::testing::{MockConnectionFactory, MockEvent, MockResponse};
use failover_rdbc::transaction::TransactionState;
use failover_rdbc::{params, Database, Error, Params, ServerEntry};

fn database(factory: &MockConnectionFactory) -> Database {
    Database::from_servers(
        &[ServerEntry::new("db0", "app", "secret", "bank")],
        false,
        Arc::new(factory.clone()),
    )
}

// ==================== Lifecycle Tests ====================

#[test]
fn test_start_commit() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    db.start_transaction(None).unwrap();
    assert!(db.in_transaction());
    assert_eq!(
        db.transaction_state(),
        TransactionState::Open { isolation: None }
    );

    db.commit_transaction().unwrap();
    assert!(!db.in_transaction());
    assert_eq!(factory.count(&MockEvent::Begin), 1);
    assert_eq!(factory.count(&MockEvent::Commit), 1);
}

#[test]
fn test_start_while_open_is_noop() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    db.start_transaction(None).unwrap();
    db.start_transaction(Some(IsolationLevel::Serializable)).unwrap();

    assert_eq!(factory.count(&MockEvent::Begin), 1);
    assert!(factory.prepared().is_empty());
}

#[test]
fn test_isolation_statement_precedes_begin() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    db.start_transaction(Some(IsolationLevel::ReadCommitted))
        .unwrap();

    let events = factory.events();
    let set_at = events
        .iter()
        .position(|e| {
            *e == MockEvent::Prepare {
                sql: "SET TRANSACTION ISOLATION LEVEL READ COMMITTED".into(),
            }
        })
        .unwrap();
    let begin_at = events.iter().position(|e| *e == MockEvent::Begin).unwrap();
    assert!(set_at < begin_at);
    assert_eq!(
        db.transaction_state().isolation(),
        Some(IsolationLevel::ReadCommitted)
    );
}

#[test]
fn test_rollback_reports_whether_anything_was_open() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    assert!(!db.rollback_transaction().unwrap());

    db.start_transaction(None).unwrap();
    assert!(db.rollback_transaction().unwrap());
    assert!(!db.rollback_transaction().unwrap());
    assert_eq!(factory.count(&MockEvent::Rollback), 1);
}

#[test]
fn test_commit_when_idle_is_noop() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    db.commit_transaction().unwrap();
    assert_eq!(factory.count(&MockEvent::Commit), 0);
}

#[test]
fn test_start_transaction_without_servers() {
    let factory = MockConnectionFactory::new().fail_host("db0");
    let mut db = database(&factory);

    let err = db.start_transaction(None).unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { .. }));
    assert!(!db.in_transaction());
}

// ==================== Rollback On Failure Tests ====================

#[test]
fn test_failed_query_rolls_back_and_keeps_both_statements() {
    let factory = MockConnectionFactory::new()
        .on_query("UPDATE accounts", MockResponse::Affected(1))
        .on_query(
            "INSERT INTO ledger",
            MockResponse::execute_error(1452, "Cannot add or update a child row"),
        );
    let mut db = database(&factory);

    db.start_transaction(None).unwrap();
    db.query(
        "UPDATE accounts SET balance = balance - ? WHERE id = ?",
        params![100, 7],
    )
    .unwrap();
    let err = db
        .query(
            "INSERT INTO ledger (account_id, amount) VALUES (?, ?)",
            params![7, -100],
        )
        .unwrap_err();

    assert_eq!(err.vendor_code(), Some(1452));
    assert_eq!(db.transaction_state(), TransactionState::Idle);
    assert_eq!(factory.count(&MockEvent::Rollback), 1);
    assert_eq!(factory.count(&MockEvent::Commit), 0);

    let audit = db.last_query_audit();
    let first = audit
        .find("UPDATE accounts SET balance = balance - ? WHERE id = ?")
        .unwrap();
    let second = audit
        .find("INSERT INTO ledger (account_id, amount) VALUES (?, ?)")
        .unwrap();
    assert!(first < second);
}

#[test]
fn test_failure_error_carries_rendered_statement() {
    let factory = MockConnectionFactory::new().on_query(
        "INSERT INTO ledger",
        MockResponse::execute_error(1062, "Duplicate entry"),
    );
    let mut db = database(&factory);

    let err = db
        .query(
            "INSERT INTO ledger (memo) VALUES (?)",
            params!["rent"],
        )
        .unwrap_err();

    match err {
        Error::Execution { sql, params, .. } => {
            assert_eq!(sql, "INSERT INTO ledger (memo) VALUES ('rent')");
            assert_eq!(params, r#"[{"String":"rent"}]"#);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_prepare_failure_rolls_back() {
    let factory = MockConnectionFactory::new().on_query(
        "SELEC",
        MockResponse::prepare_error(1064, "You have an error in your SQL syntax"),
    );
    let mut db = database(&factory);

    db.start_transaction(None).unwrap();
    let err = db.query("SELEC * FROM accounts", Params::None).unwrap_err();

    assert!(matches!(err, Error::Prepare { .. }));
    assert!(!db.in_transaction());
    assert_eq!(factory.count(&MockEvent::Rollback), 1);
    assert!(db.last_query_audit().contains("SELEC * FROM accounts"));
}

#[test]
fn test_missing_required_row_rolls_back() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    db.start_transaction(None).unwrap();
    let err = db
        .query_row("SELECT * FROM accounts WHERE id = ?", 404, true)
        .unwrap_err();

    assert!(matches!(err, Error::RequiredRowMissing { .. }));
    assert!(!db.in_transaction());
    assert_eq!(factory.count(&MockEvent::Rollback), 1);
}

#[test]
fn test_failure_outside_transaction_does_not_roll_back() {
    let factory = MockConnectionFactory::new()
        .on_query("DELETE", MockResponse::execute_error(1451, "foreign key"));
    let mut db = database(&factory);

    assert!(db.query("DELETE FROM accounts", Params::None).is_err());
    assert_eq!(factory.count(&MockEvent::Rollback), 0);
}

// ==================== Audit Tests ====================

#[test]
fn test_audit_accumulates_only_inside_transaction() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    db.query("SELECT 'before'", Params::None).unwrap();
    db.start_transaction(None).unwrap();
    db.query("SELECT 'one'", Params::None).unwrap();
    db.query("SELECT 'two'", Params::None).unwrap();

    let audit = db.last_query_audit().to_string();
    assert!(!audit.contains("before"));
    assert!(audit.contains("'one'"));
    assert!(audit.contains("'two'"));

    db.commit_transaction().unwrap();
    db.query("SELECT 'after'", Params::None).unwrap();
    assert!(db.last_query_audit().contains("'after'"));
    assert!(!db.last_query_audit().contains("'one'"));
}

#[test]
fn test_query_count_includes_isolation_statement() {
    let factory = MockConnectionFactory::new();
    let mut db = database(&factory);

    db.start_transaction(Some(IsolationLevel::RepeatableRead))
        .unwrap();
    db.query("SELECT 1", Params::None).unwrap();
    db.commit_transaction().unwrap();

    assert_eq!(db.query_count(), 2);
}

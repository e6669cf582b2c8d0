//! End-to-end tests of mapped invocations against the scripted driver.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dbmap::testing::MockDriver;
use dbmap::{
    Config, Connection, EventKind, Mapped, QueryEvent, UpsertStrategy, Value, statement_id,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Line {
    sku: String,
    qty: i32,
}

#[derive(Debug, Default, Clone, PartialEq, Mapped)]
#[db(table = "orders")]
struct Order {
    #[db("id,pk,serial")]
    id: i64,
    customer: String,
    #[db("total_cents")]
    total: i64,
    #[db("lines,json")]
    lines: Vec<Line>,
    #[db("created_at,readonly")]
    created_at: Option<DateTime<Utc>>,
    #[db("-")]
    dirty: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Mapped)]
#[db(table = "kv")]
struct Entry {
    #[db("name,pk")]
    name: String,
    value: String,
}

#[derive(Debug, Default, Clone, PartialEq, Mapped)]
#[db(table = "users")]
struct UserFull {
    #[db("id,pk")]
    id: i64,
    email: String,
    name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Mapped)]
#[db(table = "users")]
struct UserSummary {
    #[db("id,pk")]
    id: i64,
    email: String,
}

const ORDER_COLUMNS: &[&str] = &["id", "customer", "total_cents", "lines", "created_at"];

type Seen = Arc<Mutex<Vec<(EventKind, String, &'static str, String, bool)>>>;

fn setup() -> (MockDriver, Connection<MockDriver>, Seen) {
    let driver = MockDriver::new();
    let conn = Connection::new(driver.clone(), Config::default());
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    conn.on_event(move |e: &QueryEvent<'_>| {
        sink.lock().unwrap().push((
            e.kind,
            e.label.to_string(),
            e.engine,
            e.database.to_string(),
            e.error.is_some(),
        ));
    });
    (driver, conn, seen)
}

fn new_order() -> Order {
    Order {
        customer: "ada".into(),
        total: 1250,
        lines: vec![Line {
            sku: "pen".into(),
            qty: 5,
        }],
        dirty: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_order_lifecycle() {
    let (driver, conn, seen) = setup();
    driver.push_rows(&["id"], vec![vec![Value::Int(100)]]);
    driver.push_rows(
        ORDER_COLUMNS,
        vec![vec![
            Value::Int(100),
            Value::from("ada"),
            Value::Int(1250),
            Value::from(r#"[{"sku":"pen","qty":5}]"#),
            Value::Null,
        ]],
    );

    let mut order = new_order();
    conn.create(&mut order).await.unwrap();
    assert_eq!(order.id, 100);

    let mut loaded = Order::default();
    assert!(conn.get(&mut loaded, &[Value::Int(100)]).await.unwrap());
    assert_eq!(loaded.lines, order.lines);
    assert_eq!(loaded.total, 1250);
    assert!(!loaded.dirty);

    loaded.total = 1500;
    assert_eq!(conn.update(&loaded).await.unwrap(), 1);
    assert_eq!(conn.delete(&loaded).await.unwrap(), 1);

    assert_eq!(
        driver.executed_sql(),
        vec![
            "INSERT INTO orders (customer, total_cents, lines) VALUES ($1, $2, $3) RETURNING id",
            "SELECT id, customer, total_cents, lines, created_at FROM orders WHERE id = $1",
            "UPDATE orders SET customer = $1, total_cents = $2, lines = $3 WHERE id = $4",
            "DELETE FROM orders WHERE id = $1",
        ]
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (EventKind::Query, "orders_create".to_string(), "mock", "postgres".to_string(), false),
            (EventKind::Query, "orders_get".to_string(), "mock", "postgres".to_string(), false),
            (EventKind::Exec, "orders_update".to_string(), "mock", "postgres".to_string(), false),
            (EventKind::Exec, "orders_delete".to_string(), "mock", "postgres".to_string(), false),
        ]
    );
    assert_eq!(driver.open_count(), 1);
}

#[tokio::test]
async fn test_repeated_operations_prepare_once() {
    let (driver, conn, _) = setup();
    for id in 1..=3 {
        driver.push_rows(&["id"], vec![vec![Value::Int(id)]]);
    }

    for expected in 1..=3 {
        let mut order = new_order();
        conn.create(&mut order).await.unwrap();
        assert_eq!(order.id, expected);
    }

    assert_eq!(driver.prepare_count(), 1);
    assert!(
        conn.statement_cache()
            .unwrap()
            .has_statement(&statement_id::<Order>("orders_create"))
    );
}

#[tokio::test]
async fn test_statement_cache_can_be_disabled_by_config() {
    let driver = MockDriver::new();
    let config = Config::builder().use_statement_cache(false).build().unwrap();
    let conn = Connection::new(driver.clone(), config);

    let entry = Entry {
        name: "a".into(),
        value: "b".into(),
    };
    conn.delete(&entry).await.unwrap();
    conn.delete(&entry).await.unwrap();

    assert!(!conn.is_statement_cache_enabled());
    assert_eq!(driver.prepare_count(), 2);
    assert!(conn.statement_cache().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_statement_reports_context() {
    let (driver, conn, seen) = setup();
    driver.push_error("duplicate key value violates unique constraint");

    let err = conn
        .invoke()
        .with_label("import_entry")
        .create_if_not_exists(&mut Entry::default())
        .await
        .unwrap_err();

    assert!(err.is_execution());
    assert_eq!(err.context.operation.as_deref(), Some("create_if_not_exists"));
    assert_eq!(err.context.model.as_deref(), Some("kv"));
    assert!(err.context.sql.is_some());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, "import_entry");
    assert!(seen[0].4);
}

struct Merge;

impl UpsertStrategy for Merge {
    fn render(
        &self,
        table: &str,
        insert: &[String],
        conflict: &[String],
        update: &[String],
        returning: &[String],
    ) -> String {
        format!(
            "UPSERT {} [{}] ON [{}] SET [{}] RETURNING [{}]",
            table,
            insert.join(","),
            conflict.join(","),
            update.join(","),
            returning.join(",")
        )
    }
}

#[tokio::test]
async fn test_custom_upsert_strategy() {
    let driver = MockDriver::new();
    let conn = Connection::new(driver.clone(), Config::default()).with_upsert_strategy(Merge);

    let mut entry = Entry {
        name: "theme".into(),
        value: "dark".into(),
    };
    conn.upsert(&mut entry).await.unwrap();

    let (sql, params) = driver.executed().remove(0);
    assert_eq!(sql, "UPSERT kv [value,name] ON [name] SET [value] RETURNING []");
    assert_eq!(params, vec![Value::from("dark"), Value::from("theme")]);
}

#[tokio::test]
async fn test_upsert_reads_back_generated_keys() {
    let (driver, conn, _) = setup();
    driver.push_rows(&["id"], vec![vec![Value::Int(77)]]);

    let mut order = new_order();
    conn.upsert(&mut order).await.unwrap();

    assert_eq!(order.id, 77);
    assert!(driver.executed_sql()[0].ends_with("RETURNING id"));
}

#[tokio::test]
async fn test_transaction_commit_and_rollback() {
    let (driver, conn, _) = setup();

    let tx = conn.begin().await.unwrap();
    conn.in_tx(&tx)
        .upsert(&mut Entry {
            name: "a".into(),
            value: "1".into(),
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let tx = conn.begin().await.unwrap();
    conn.in_tx(&tx).delete(&Entry::default()).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(
        driver.batches(),
        vec!["select 'ok!'", "BEGIN", "COMMIT", "BEGIN", "ROLLBACK"]
    );
    assert_eq!(driver.abandon_count(), 0);
    assert!(conn.statement_cache().unwrap().is_empty());
}

#[tokio::test]
async fn test_dropped_transaction_abandons_session() {
    let (driver, conn, _) = setup();
    {
        let tx = conn.begin().await.unwrap();
        conn.in_tx(&tx).delete(&Entry::default()).await.unwrap();
    }

    assert_eq!(driver.abandon_count(), 1);
    assert!(!driver.batches().iter().any(|b| b == "COMMIT" || b == "ROLLBACK"));
}

#[tokio::test]
async fn test_close_releases_cache_then_pool() {
    let (driver, conn, _) = setup();
    conn.delete(&Entry::default()).await.unwrap();

    conn.close().await.unwrap();
    assert_eq!(driver.session_close_count(), 1);
    assert_eq!(driver.pool_close_count(), 1);

    let err = conn.delete(&Entry::default()).await.unwrap_err();
    assert!(err.is_connection());
}

#[tokio::test]
async fn test_shared_connection_across_tasks() {
    let (driver, conn, seen) = setup();
    let conn = Arc::new(conn);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                let entry = Entry {
                    name: format!("k{}", i),
                    value: "v".into(),
                };
                conn.exists(&entry).await
            })
        })
        .collect();

    for handle in handles {
        assert!(!handle.await.unwrap().unwrap());
    }
    assert_eq!(driver.open_count(), 1);
    assert_eq!(seen.lock().unwrap().len(), 8);
}

#[tokio::test]
async fn test_types_on_one_table_use_their_own_statements() {
    let (driver, conn, seen) = setup();
    driver.push_rows(
        &["id", "email", "name"],
        vec![vec![Value::Int(7), Value::from("ada@example.com"), Value::from("Ada")]],
    );
    driver.push_rows(
        &["id", "email"],
        vec![vec![Value::Int(7), Value::from("ada@example.com")]],
    );

    let mut full = UserFull::default();
    assert!(conn.get(&mut full, &[Value::Int(7)]).await.unwrap());
    let mut summary = UserSummary::default();
    assert!(conn.get(&mut summary, &[Value::Int(7)]).await.unwrap());

    assert_eq!(full.name, "Ada");
    assert_eq!(summary.email, "ada@example.com");
    assert_eq!(
        driver.executed_sql(),
        vec![
            "SELECT id, email, name FROM users WHERE id = $1".to_string(),
            "SELECT id, email FROM users WHERE id = $1".to_string(),
        ]
    );
    assert_eq!(driver.prepare_count(), 2);

    // both still report the table label
    let labels: Vec<String> = seen.lock().unwrap().iter().map(|e| e.1.clone()).collect();
    assert_eq!(labels, vec!["users_get".to_string(), "users_get".to_string()]);
}

#[tokio::test]
async fn test_dead_statement_cache_session_is_replaced() {
    let (driver, conn, seen) = setup();
    let mut entry = Entry {
        name: "retries".into(),
        value: "3".into(),
    };
    conn.create(&mut entry).await.unwrap();

    let cache_session = conn.statement_cache().unwrap().session().id();
    assert_eq!(cache_session, 0);
    driver.kill_session(cache_session);

    assert!(conn.update(&entry).await.unwrap_err().is_connection());
    assert_eq!(conn.update(&entry).await.unwrap(), 1);
    assert_eq!(conn.statement_cache().unwrap().session().id(), 1);

    let errors: Vec<bool> = seen.lock().unwrap().iter().map(|e| e.4).collect();
    assert_eq!(errors, vec![false, true, false]);
}

#[tokio::test]
async fn test_timed_out_call_releases_its_session() {
    let (driver, conn, _) = setup();
    conn.open().await.unwrap();
    driver.set_latency(std::time::Duration::from_millis(200));

    for _ in 0..3 {
        let err = conn
            .invoke()
            .with_timeout(std::time::Duration::from_millis(5))
            .exec("UPDATE kv SET value = value || '!'", &[])
            .await
            .unwrap_err();
        assert!(err.is_execution());
    }

    // every checkout but the statement cache's came back
    assert_eq!(driver.acquire_count(), driver.release_count() + 1);
}

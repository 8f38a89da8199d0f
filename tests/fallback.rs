use serde_json::json;
use std::sync::Arc;
use tideql::{Connection, Value};

use test_helpers::{batch_of, MemoryAdapter};

fn sales_adapter() -> Arc<MemoryAdapter> {
    Arc::new(MemoryAdapter::new(vec![(
        "T",
        batch_of(vec![
            json!({"grp": "A", "val": 10}),
            json!({"grp": "A", "val": 20}),
            json!({"grp": "B", "val": 5}),
        ]),
    )]))
}

/// Aggregation fallback: the adapter declines GROUP BY pushdown, the engine
/// re-fetches with filters only and finishes the statement locally.
#[test]
fn test_aggregation_falls_back_to_local_engine() {
    let connection = Connection::local().unwrap();
    let adapter = sales_adapter();
    connection.register_adapter("fallback", adapter.clone());

    let mut cursor = connection.cursor().unwrap();
    cursor
        .execute(
            "SELECT grp, SUM(val) FROM fallback.T GROUP BY grp ORDER BY grp",
            &[],
        )
        .unwrap();

    let rows = cursor.fetchall().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], Value::String("A".to_string()));
    assert_eq!(rows[0][1], Value::Int64(30));
    assert_eq!(rows[1][0], Value::String("B".to_string()));
    assert_eq!(rows[1][1], Value::Int64(5));

    // The first fetch carried the full plan and was declined; the second
    // pushed filters only.
    let plans = adapter.plans.lock().unwrap();
    assert_eq!(plans.len(), 2);
    assert!(!plans[0].1.group_by.is_empty());
    assert!(plans[1].1.group_by.is_empty());
    assert!(plans[1].1.columns.is_none());
}

/// Disjunction soundness: a WHERE containing OR is answered by the local
/// engine over the unfiltered batch.
#[test]
fn test_disjunctions_are_evaluated_locally() {
    let connection = Connection::local().unwrap();
    connection.register_adapter("default", sales_adapter());

    let mut cursor = connection.cursor().unwrap();
    cursor
        .execute(
            "SELECT grp, val FROM T WHERE grp = 'B' OR val = 10 ORDER BY val",
            &[],
        )
        .unwrap();
    let rows = cursor.fetchall().unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::String("B".to_string()), Value::Int64(5)],
            vec![Value::String("A".to_string()), Value::Int64(10)],
        ]
    );
}

/// Consecutive fallbacks never collide: temporary names are fresh per
/// statement and deregistered afterwards.
#[test]
fn test_fallback_is_repeatable_on_one_cursor() {
    let connection = Connection::local().unwrap();
    connection.register_adapter("default", sales_adapter());

    let mut cursor = connection.cursor().unwrap();
    for _ in 0..3 {
        cursor
            .execute("SELECT COUNT(*) FROM T GROUP BY grp", &[])
            .unwrap();
        assert_eq!(cursor.rowcount(), 2);
    }
}

#[test]
fn test_explain_renders_a_local_plan() {
    let connection = Connection::local().unwrap();
    connection.register_adapter("default", sales_adapter());

    let mut cursor = connection.cursor().unwrap();
    cursor
        .execute("EXPLAIN SELECT grp FROM T WHERE val = 10", &[])
        .unwrap();
    assert!(cursor.rowcount() >= 1);
    assert!(cursor.description().is_some());
}

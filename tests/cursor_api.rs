use std::sync::Arc;

use serde_json::json;
use tideql::{Connection, DataType, Error, Value};

use test_helpers::{batch_of, MemoryAdapter};

fn people_connection() -> Connection {
    let connection = Connection::local().unwrap();
    connection.register_adapter(
        "default",
        Arc::new(MemoryAdapter::new(vec![(
            "people",
            batch_of(vec![
                json!({"id": 1, "name": "Alice"}),
                json!({"id": 2, "name": "Bob"}),
                json!({"id": 3, "name": "Carol"}),
            ]),
        )])),
    );
    connection
}

#[test]
fn test_description_and_rowcount() {
    let connection = people_connection();
    let mut cursor = connection.cursor().unwrap();
    cursor.execute("SELECT id, name FROM people", &[]).unwrap();

    assert_eq!(cursor.rowcount(), 3);
    let description = cursor.description().unwrap();
    assert_eq!(description.len(), 2);
    assert_eq!(description[0].name, "id");
    assert_eq!(description[0].data_type, DataType::Integer);
    assert_eq!(description[1].name, "name");
    assert_eq!(description[1].data_type, DataType::String);
}

#[test]
fn test_fetch_progression() {
    let connection = people_connection();
    let mut cursor = connection.cursor().unwrap();
    cursor.execute("SELECT id FROM people", &[]).unwrap();

    let first = cursor.fetchone().unwrap().unwrap();
    assert_eq!(first, vec![Value::Int64(1)]);

    let two = cursor.fetchmany(Some(2)).unwrap();
    assert_eq!(two.len(), 2);
    assert_eq!(two[1], vec![Value::Int64(3)]);

    assert!(cursor.fetchone().unwrap().is_none());
    assert!(cursor.fetchall().unwrap().is_empty());
}

#[test]
fn test_arraysize_drives_fetchmany() {
    let connection = people_connection();
    let mut cursor = connection.cursor().unwrap();
    assert_eq!(cursor.arraysize(), 100);
    cursor.set_arraysize(2);
    cursor.execute("SELECT id FROM people", &[]).unwrap();
    assert_eq!(cursor.fetchmany(None).unwrap().len(), 2);
    assert_eq!(cursor.fetchmany(None).unwrap().len(), 1);
}

#[test]
fn test_row_iteration() {
    let connection = people_connection();
    let mut cursor = connection.cursor().unwrap();
    cursor.execute("SELECT name FROM people", &[]).unwrap();
    let names: Vec<String> = cursor
        .rows()
        .map(|row| match &row.unwrap()[0] {
            Value::String(s) => s.clone(),
            other => panic!("unexpected value {:?}", other),
        })
        .collect();
    assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
}

#[test]
fn test_fetch_without_result_set_is_an_error() {
    let connection = people_connection();
    let mut cursor = connection.cursor().unwrap();
    let err = cursor.fetchall().unwrap_err();
    assert!(matches!(err, Error::Query(_)));
}

#[test]
fn test_closed_cursor_rejects_everything() {
    let connection = people_connection();
    let mut cursor = connection.cursor().unwrap();
    cursor.execute("SELECT id FROM people", &[]).unwrap();
    cursor.close();
    assert!(cursor.execute("SELECT id FROM people", &[]).is_err());
    assert!(cursor.fetchone().is_err());
}

#[test]
fn test_closed_connection_rejects_cursors() {
    let connection = people_connection();
    connection.close();
    assert!(connection.is_closed());
    assert!(matches!(
        connection.cursor().unwrap_err(),
        Error::Connection(_)
    ));
}

/// Statements with no adapter and no table run raw on the local engine.
#[test]
fn test_raw_statement_runs_locally() {
    let connection = Connection::local().unwrap();
    let mut cursor = connection.cursor().unwrap();
    cursor
        .execute("SELECT * FROM (VALUES (1), (2)) AS t(v)", &[])
        .unwrap();
    assert_eq!(cursor.rowcount(), 2);
}

#[test]
fn test_unknown_scheme_is_a_configuration_error() {
    assert!(matches!(
        tideql::connect("warehouse://example.com").unwrap_err(),
        Error::Configuration(_)
    ));
}

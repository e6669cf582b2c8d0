//! Integration tests for derived mappings and column collections.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use dbmap::{ColumnCollection, Mapped, Row, Value, column_names_csv, columns, table_name_of};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Metadata {
    tags: Vec<String>,
    score: i32,
}

#[derive(Debug, Default, Clone, PartialEq, Mapped)]
#[db(table = "my_struct")]
struct MyStruct {
    #[db("primary_key_column,pk,serial")]
    primary_key_column: i64,
    inferred_column: String,
    #[db("-")]
    excluded: i64,
    #[db("nullable_column,nullable")]
    nullable_column: Option<String>,
    #[db(",readonly")]
    inferred_with_flags: String,
    #[db("big_int")]
    big_int_column: i64,
    #[db("pointer,json")]
    metadata: Metadata,
    #[db("uuid")]
    uuid_column: Option<Uuid>,
    #[db("created,readonly")]
    created: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Mapped)]
struct Widget {
    #[db("id,pk")]
    id: i32,
    #[db("Label")]
    label: String,
}

#[derive(Debug, Default, Mapped)]
#[db(table = "joined_rows")]
struct Joined {
    #[db("id,pk")]
    id: i64,
    name: String,
}

fn names<T: 'static>(cc: &ColumnCollection<T>) -> Vec<String> {
    cc.column_names()
}

#[test]
fn test_derived_columns_in_declaration_order() {
    let cols = columns::<MyStruct>();

    assert_eq!(
        names(&cols),
        vec![
            "primary_key_column",
            "inferred_column",
            "nullable_column",
            "inferred_with_flags",
            "big_int",
            "pointer",
            "uuid",
            "created",
        ]
    );
    assert_eq!(cols.len(), 8);
    assert!(!cols.has_column("excluded"));

    let nullable = cols.get("nullable_column").unwrap();
    assert!(nullable.is_nullable);
    assert_eq!(nullable.index, 3);
    assert_eq!(nullable.table_name, "my_struct");
    assert_eq!(nullable.field_name, "nullable_column");

    assert!(cols.get("pointer").unwrap().is_json);
    assert!(cols.get("inferred_with_flags").unwrap().is_read_only);
}

#[test]
fn test_derived_subsets() {
    let cols = columns::<MyStruct>();

    assert_eq!(names(cols.primary_keys()), vec!["primary_key_column"]);
    assert_eq!(names(cols.autos()), vec!["primary_key_column"]);
    assert_eq!(names(cols.read_only()), vec!["inferred_with_flags", "created"]);
    assert_eq!(
        names(cols.write_columns()),
        vec!["inferred_column", "nullable_column", "big_int", "pointer", "uuid"]
    );
    assert_eq!(
        names(cols.update_columns()),
        vec![
            "inferred_column",
            "nullable_column",
            "big_int",
            "pointer",
            "uuid",
            "primary_key_column",
        ]
    );
    // memoized subsets are the same instance on every call
    assert!(std::ptr::eq(cols.write_columns(), cols.write_columns()));
}

#[test]
fn test_default_table_name_and_explicit_column_case() {
    assert_eq!(table_name_of::<Widget>(), "widget");
    assert_eq!(column_names_csv::<Widget>(), "id,Label");
}

#[test]
fn test_metadata_resolves_once_across_threads() {
    let handles: Vec<_> = (0..16).map(|_| thread::spawn(columns::<Joined>)).collect();
    let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for cc in &resolved {
        assert!(Arc::ptr_eq(cc, &resolved[0]));
    }
    assert!(Arc::ptr_eq(&columns::<Joined>(), &resolved[0]));
}

#[test]
fn test_column_values_render_json_as_text() {
    let id = Uuid::new_v4();
    let object = MyStruct {
        primary_key_column: 1,
        inferred_column: "inferred".into(),
        excluded: 99,
        nullable_column: None,
        inferred_with_flags: "flags".into(),
        big_int_column: 1 << 40,
        metadata: Metadata {
            tags: vec!["a".into()],
            score: 3,
        },
        uuid_column: Some(id),
        created: None,
    };

    let values = columns::<MyStruct>().column_values(&object).unwrap();
    assert_eq!(
        values,
        vec![
            Value::Int(1),
            Value::Text("inferred".into()),
            Value::Null,
            Value::Text("flags".into()),
            Value::Int(1 << 40),
            Value::Text(r#"{"score":3,"tags":["a"]}"#.into()),
            Value::Uuid(id),
            Value::Null,
        ]
    );
}

#[test]
fn test_set_values_is_all_or_nothing() {
    let cols = columns::<MyStruct>();
    let mut object = MyStruct::default();

    let values = vec![
        Value::Int(5),
        Value::Text("set".into()),
        Value::Text("maybe".into()),
        Value::Text("ro".into()),
        Value::Int(7),
        Value::Text(r#"{"tags":[],"score":1}"#.into()),
        Value::Null,
        Value::Bool(true),
    ];
    let err = cols.set_values(&mut object, values).unwrap_err();
    assert!(err.is_mapping());
    assert_eq!(object, MyStruct::default());

    let values = vec![
        Value::Int(5),
        Value::Text("set".into()),
        Value::Text("maybe".into()),
        Value::Text("ro".into()),
        Value::Int(7),
        Value::Text(r#"{"tags":[],"score":1}"#.into()),
        Value::Null,
        Value::Null,
    ];
    cols.set_values(&mut object, values).unwrap();
    assert_eq!(object.primary_key_column, 5);
    assert_eq!(object.nullable_column.as_deref(), Some("maybe"));
    assert_eq!(object.metadata.score, 1);
    assert_eq!(object.excluded, 0);
}

#[test]
fn test_set_values_rejects_wrong_arity() {
    let mut object = MyStruct::default();
    let err = columns::<MyStruct>()
        .set_values(&mut object, vec![Value::Int(1)])
        .unwrap_err();
    assert!(err.is_mapping());
}

#[test]
fn test_prefixed_copy_is_independent() {
    let cols = columns::<Joined>();
    let prefixed = cols.copy_with_prefix("j_");

    assert_eq!(prefixed.column_names_csv(), "j_id,j_name");
    assert_eq!(
        prefixed.column_names_csv_from_alias("t"),
        "t.id as j_id,t.name as j_name"
    );
    assert_eq!(prefixed.primary_keys().column_names_csv(), "j_id");
    assert_eq!(cols.column_names_csv(), "id,name");
    assert_eq!(cols.column_names_csv_from_alias("t"), "t.id,t.name");

    let mut copy = cols.copy();
    assert!(copy.remove("name"));
    assert_eq!(copy.column_names_csv(), "id");
    assert_eq!(cols.len(), 2);
}

#[test]
fn test_set_by_name_matches_prefixed_columns() {
    let prefixed = columns::<Joined>().copy_with_prefix("j_");
    let row = Row::new(
        Arc::from(vec!["j_id".to_string(), "j_name".to_string(), "other".to_string()]),
        vec![Value::Int(3), Value::Text("three".into()), Value::Int(0)],
    );

    let mut joined = Joined::default();
    prefixed.set_by_name(&mut joined, &row).unwrap();
    assert_eq!(joined.id, 3);
    assert_eq!(joined.name, "three");
}

#[test]
fn test_concat_keeps_order_and_drops_prefix() {
    let cols = columns::<Joined>();
    let prefixed = cols.copy_with_prefix("p_");
    let combined = prefixed.concat_with(cols.primary_keys());

    assert_eq!(combined.column_names_csv(), "id,name,id");
    assert_eq!(combined.prefix(), None);
}

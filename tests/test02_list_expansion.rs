#![cfg(feature = "sqlite")]

use std::sync::{Mutex, MutexGuard};

use sql_mapper::prelude::*;
use sql_mapper::test_utils::ScriptedConnection;

// Settings are process-wide; tests that change them run one at a time.
static SETTINGS: Mutex<()> = Mutex::new(());

fn settings_guard() -> MutexGuard<'static, ()> {
    let guard = match SETTINGS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    Settings::reset();
    guard
}

fn numbers() -> Result<SqliteConnection, SqlMapperError> {
    let mut conn = SqliteConnection::in_memory();
    conn.open()?;
    conn.execute("create table numbers (n integer primary key, label text);")?;
    let rows: Vec<DynamicParameters> = (1..=20_i64)
        .map(|n| sql_mapper::params! { "n" => n, "label" => format!("#{n}") })
        .collect();
    conn.execute_many("insert into numbers (n, label) values (@n, @label)", &rows)?;
    Ok(conn)
}

#[test]
fn lists_expand_into_in_clauses() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = settings_guard();
    let mut conn = numbers()?;

    let found: Vec<i64> = conn
        .sql("select n from numbers where n in @ids order by n")
        .params(&sql_mapper::params! { "ids" => vec![3_i64, 5, 8] })
        .query()?;
    assert_eq!(found, vec![3, 5, 8]);

    let labels: Vec<String> = conn
        .sql("select label from numbers where label in @labels order by n")
        .params(&sql_mapper::params! { "labels" => vec!["#2".to_string(), "#4".to_string()] })
        .query()?;
    assert_eq!(labels, vec!["#2", "#4"]);
    Ok(())
}

#[test]
fn empty_lists_match_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = settings_guard();
    let mut conn = numbers()?;

    let empty: Vec<i64> = Vec::new();
    let found: Vec<i64> = conn
        .sql("select n from numbers where n in @ids")
        .params(&sql_mapper::params! { "ids" => empty.clone() })
        .query()?;
    assert!(found.is_empty());

    let rest: i64 = conn
        .sql("select count(*) from numbers where n not in @ids")
        .params(&sql_mapper::params! { "ids" => empty })
        .execute_scalar()?;
    assert_eq!(rest, 20);
    Ok(())
}

#[test]
fn expanded_sql_and_parameters_are_sent_to_the_executor()
 -> Result<(), Box<dyn std::error::Error>> {
    let _guard = settings_guard();
    let mut conn = ScriptedConnection::new();

    conn.sql("select * from t where a in @ids or b in @IDS")
        .params(&sql_mapper::params! { "ids" => vec![1_i32, 2, 3] })
        .execute()?;

    let command = conn.last_command().ok_or("no command recorded")?;
    assert_eq!(
        command.sql,
        "select * from t where a in (@ids1,@ids2,@ids3) or b in (@IDS1,@IDS2,@IDS3)"
    );
    let names: Vec<&str> = command.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["ids1", "ids2", "ids3"]);
    assert_eq!(command.parameters[2].value, DbValue::Int(3));
    assert_eq!(command.parameters[0].db_type, Some(DbType::Int32));
    Ok(())
}

#[test]
fn padding_repeats_the_last_value() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = settings_guard();
    let mut conn = ScriptedConnection::new();
    let ids: Vec<i64> = (1..=7).collect();

    Settings::set_pad_list_expansions(true);
    conn.sql("select * from t where id in @ids")
        .params(&sql_mapper::params! { "ids" => ids.clone() })
        .execute()?;
    let padded = conn.last_command().ok_or("no command recorded")?;
    assert_eq!(padded.parameters.len(), 10);
    assert!(padded.parameters[7..].iter().all(|p| p.value == DbValue::Int(7)));
    assert!(padded.sql.ends_with("@ids10)"));

    Settings::set_pad_list_expansions(false);
    conn.sql("select * from t where id in @ids")
        .params(&sql_mapper::params! { "ids" => ids })
        .execute()?;
    let exact = conn.last_command().ok_or("no command recorded")?;
    assert_eq!(exact.parameters.len(), 7);
    Settings::reset();
    Ok(())
}

#[test]
fn padded_lists_still_return_the_right_rows() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = settings_guard();
    Settings::set_pad_list_expansions(true);
    let mut conn = numbers()?;

    let ids: Vec<i64> = vec![2, 4, 6, 8, 10, 12, 14];
    let found: Vec<i64> = conn
        .sql("select n from numbers where n in @ids order by n")
        .params(&sql_mapper::params! { "ids" => ids.clone() })
        .query()?;
    Settings::reset();
    assert_eq!(found, ids);
    Ok(())
}

#[test]
fn large_integer_lists_can_ship_as_one_string() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = settings_guard();
    Settings::set_in_list_string_split_count(3);
    let mut conn = ScriptedConnection::new();

    conn.sql("select * from t where id in @ids")
        .params(&sql_mapper::params! { "ids" => vec![10_i32, 20, 30, 40] })
        .execute()?;
    Settings::reset();

    let command = conn.last_command().ok_or("no command recorded")?;
    assert_eq!(
        command.sql,
        "select * from t where id in (SELECT CAST([value] AS int) FROM STRING_SPLIT(@ids, ','))"
    );
    assert_eq!(command.parameters.len(), 1);
    assert_eq!(command.parameters[0].value, DbValue::Text("10,20,30,40".into()));
    Ok(())
}

#[test]
fn literals_are_inlined() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = settings_guard();
    let mut conn = numbers()?;

    let found: Vec<String> = conn
        .sql("select label from numbers where n = {=n} or n in {=others} order by n")
        .params(&sql_mapper::params! { "n" => 1_i64, "others" => vec![19_i64, 20] })
        .query()?;
    assert_eq!(found, vec!["#1", "#19", "#20"]);

    let mut scripted = ScriptedConnection::new();
    scripted
        .sql("select top {=limit} * from t where name = {=name}")
        .params(&sql_mapper::params! { "limit" => 5_i32, "name" => "o'brien" })
        .execute()?;
    let command = scripted.last_command().ok_or("no command recorded")?;
    assert_eq!(command.sql, "select top 5 * from t where name = 'o''brien'");
    Ok(())
}

#[test]
fn literal_without_a_value_is_reported() {
    let _guard = settings_guard();
    let mut conn = ScriptedConnection::new();
    let result = conn
        .sql("select * from t where id = {=missing}")
        .params(&sql_mapper::params! { "id" => 1_i32 })
        .execute();
    assert!(matches!(result, Err(SqlMapperError::MissingLiteral(name)) if name == "missing"));
    assert!(conn.commands().is_empty());
}

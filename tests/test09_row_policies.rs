#![cfg(feature = "sqlite")]

use sql_mapper::prelude::*;
use sql_mapper::test_utils::{ScriptedConnection, ScriptedResponse};

fn people() -> Result<SqliteConnection, SqlMapperError> {
    let mut conn = SqliteConnection::in_memory();
    conn.open()?;
    conn.execute(
        "create table people (id integer primary key, name text not null);
         insert into people (id, name) values (1, 'ann'), (2, 'ben'), (3, 'cat');",
    )?;
    Ok(conn)
}

#[test]
fn first_and_single_policies() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = people()?;
    let many = "select name from people order by id";
    let one = "select name from people where id = 2";
    let none = "select name from people where id = 9";

    let first: String = conn.query_first(many)?;
    assert_eq!(first, "ann");
    assert!(matches!(conn.query_first::<String>(none), Err(SqlMapperError::NoRows)));
    assert_eq!(conn.query_first_or_default::<String>(none)?, None);

    let single: String = conn.query_single(one)?;
    assert_eq!(single, "ben");
    assert!(matches!(conn.query_single::<String>(many), Err(SqlMapperError::MultipleRows)));
    assert!(matches!(conn.query_single::<String>(none), Err(SqlMapperError::NoRows)));
    assert_eq!(conn.query_single_or_default::<String>(none)?, None);
    assert!(matches!(
        conn.query_single_or_default::<String>(many),
        Err(SqlMapperError::MultipleRows)
    ));
    Ok(())
}

#[test]
fn single_row_queries_only_read_what_they_need() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    let set = ResultSet::from_names(&["n"])
        .with_row(vec![DbValue::Int(1)])?
        .with_row(vec![DbValue::Text("not a number".into())])?;
    conn.push(ScriptedResponse::sets(vec![set]));

    // Only the first row is mapped, so the bad second row is never converted.
    let first: i64 = conn.query_first("select n")?;
    assert_eq!(first, 1);

    let command = conn.last_command().ok_or("no command recorded")?;
    assert!(command.behavior.single_result);
    Ok(())
}

#[test]
fn unbuffered_rows_release_the_connection_when_exhausted()
 -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    conn.push(ScriptedResponse::sets(vec![
        ResultSet::from_names(&["n"])
            .with_row(vec![DbValue::Int(1)])?
            .with_row(vec![DbValue::Int(2)])?
            .with_row(vec![DbValue::Int(3)])?,
    ]));

    {
        let rows: Rows<'_, i64> = conn.sql("select n").query_unbuffered()?;
        let values = rows.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(values, vec![1, 2, 3]);
    }
    assert_eq!(conn.opens(), 1);
    assert_eq!(conn.closes(), 1);
    Ok(())
}

#[test]
fn dropping_unbuffered_rows_early_releases_the_connection()
 -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    conn.push(ScriptedResponse::sets(vec![
        ResultSet::from_names(&["n"])
            .with_row(vec![DbValue::Int(1)])?
            .with_row(vec![DbValue::Int(2)])?,
    ]));

    {
        let mut rows: Rows<'_, i64> = conn.query_unbuffered("select n")?;
        assert_eq!(rows.next().transpose()?, Some(1));
    }
    assert_eq!(conn.closes(), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn unbuffered_rows_against_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = people()?;
    let names: Vec<String> = conn
        .sql("select name from people where id >= @min order by id")
        .params(&[("min", 2_i64)])
        .query_unbuffered()?
        .collect::<Result<_, _>>()?;
    assert_eq!(names, vec!["ben", "cat"]);
    // The connection was already open and stays open.
    assert_eq!(conn.state(), ConnectionState::Open);
    Ok(())
}

#[test]
fn statements_without_a_result_set_map_to_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = people()?;
    let rows: Vec<i64> = conn.query("update people set name = upper(name)")?;
    assert!(rows.is_empty());
    let first: Option<i64> = conn.query_first_or_default("delete from people where id = 3")?;
    assert_eq!(first, None);
    let remaining: i64 = conn.execute_scalar("select count(*) from people")?;
    assert_eq!(remaining, 2);
    Ok(())
}

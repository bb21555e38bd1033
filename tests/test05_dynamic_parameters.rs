#![cfg(feature = "sqlite")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sql_mapper::prelude::*;
use sql_mapper::test_utils::{ScriptedConnection, ScriptedResponse};

sql_mapper::map_entity! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Address {
        city: String,
        zip: String,
    }
}

sql_mapper::map_entity! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct LineItem {
        id: i64,
        total: f64,
        note: Option<String>,
    }
}

sql_mapper::map_entity! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Invoice {
        id: i64,
        total: f64,
        note: Option<String>,
        billing: Address,
    }
}

#[test]
fn dynamic_parameters_bind_every_value_unless_asked_not_to()
 -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();

    let params = sql_mapper::params! { "id" => 1_i32, "unused" => "x" };
    conn.sql("select * from t where id = @id").params(&params).execute()?;
    let bound: Vec<String> = conn
        .last_command()
        .ok_or("no command recorded")?
        .parameters
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(bound, vec!["id", "unused"]);

    let mut trimmed = sql_mapper::params! { "id" => 1_i32, "unused" => "x" };
    trimmed.remove_unused(true);
    conn.sql("select * from t where id = @id").params(&trimmed).execute()?;
    let command = conn.last_command().ok_or("no command recorded")?;
    assert_eq!(command.parameters.len(), 1);
    assert!(command.has_parameter("ID"));
    Ok(())
}

#[test]
fn entity_templates_merge_with_explicit_values() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    let item = LineItem { id: 7, total: 12.5, note: None };

    let mut params = DynamicParameters::new();
    params.add("total", 99.0_f64);
    params.add_dynamic_params(&item)?;
    conn.sql("update invoices set total = @total where id = @id")
        .params(&params)
        .execute()?;

    let command = conn.last_command().ok_or("no command recorded")?;
    assert_eq!(command.parameter("total").map(|p| &p.value), Some(&DbValue::Float(99.0)));
    assert_eq!(command.parameter("id").map(|p| &p.value), Some(&DbValue::Int(7)));
    Ok(())
}

#[test]
fn output_values_are_readable_after_the_call() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    conn.push(ScriptedResponse::affected(1).with_output("@new_id", DbValue::Int(314)));

    let mut params = DynamicParameters::new();
    params
        .add("name", "widget")
        .add_with(
            "new_id",
            0_i64,
            ParamOptions::default().direction(ParameterDirection::Output).db_type(DbType::Int64),
        );
    let affected = conn
        .sql("create_widget")
        .params(&params)
        .stored_procedure()
        .execute()?;

    assert_eq!(affected, 1);
    assert_eq!(params.get::<i64>("new_id")?, 314);
    assert_eq!(params.get::<String>("name")?, "widget");

    let command = conn.last_command().ok_or("no command recorded")?;
    assert_eq!(command.kind, CommandKind::StoredProcedure);
    let new_id = command.parameter("new_id").ok_or("output parameter was not bound")?;
    assert_eq!(new_id.direction, ParameterDirection::Output);
    assert_eq!(new_id.db_type, Some(DbType::Int64));
    Ok(())
}

#[test]
fn output_targets_write_back_into_entities() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    conn.push(
        ScriptedResponse::affected(1)
            .with_output("total", DbValue::Float(20.0))
            .with_output("billingcity", DbValue::Text("Oslo".into())),
    );

    let invoice = Arc::new(Mutex::new(Invoice { id: 5, total: 10.0, ..Invoice::default() }));
    let mut params = DynamicParameters::new();
    let total = params.output(&invoice, "total")?;
    let city = params.output(&invoice, "billing.city")?;
    assert_eq!(total, "total");
    assert_eq!(city, "billingcity");

    conn.sql("recalculate_invoice").stored_procedure().params(&params).execute()?;

    let updated = invoice.lock().map_err(|_| "poisoned")?.clone();
    assert!((updated.total - 20.0).abs() < f64::EPSILON);
    assert_eq!(updated.billing.city, "Oslo");
    assert_eq!(updated.id, 5);
    Ok(())
}

#[test]
fn stored_procedures_bind_every_entity_member() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    let item = LineItem { id: 1, total: 3.0, note: Some("n".into()) };

    conn.execute(CommandDefinition::new("save_line_item").stored_procedure().params(&item))?;
    let names: Vec<String> = conn
        .last_command()
        .ok_or("no command recorded")?
        .parameters
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(names, vec!["id", "total", "note"]);

    // A nested entity has no parameter form of its own.
    let invoice = Invoice::default();
    let result = conn.execute(
        CommandDefinition::new("save_invoice")
            .stored_procedure()
            .params(&invoice),
    );
    assert!(matches!(
        result,
        Err(SqlMapperError::Binding(BindingError::UnsupportedType { member, .. }))
            if member == "billing"
    ));
    Ok(())
}

#[test]
fn db_strings_carry_type_and_size() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    let params = sql_mapper::params! {
        "code" => DbString::new("AB").ansi().fixed_length(2),
        "label" => DbString::new("hello"),
    };
    conn.sql("select * from t where code = @code and label = @label")
        .params(&params)
        .execute()?;

    let command = conn.last_command().ok_or("no command recorded")?;
    let code = command.parameter("code").ok_or("code was not bound")?;
    assert_eq!(code.db_type, Some(DbType::AnsiStringFixedLength));
    assert_eq!(code.size, Some(2));
    let label = command.parameter("label").ok_or("label was not bound")?;
    assert_eq!(label.size, Some(4000));

    let bad = sql_mapper::params! { "code" => DbString::new("AB").fixed_length(-1) };
    let result = conn.sql("select @code").params(&bad).execute();
    assert!(matches!(result, Err(SqlMapperError::Binding(BindingError::InvalidParameter { .. }))));
    Ok(())
}

#[test]
fn db_strings_bind_against_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = SqliteConnection::in_memory();
    conn.open()?;
    let params = sql_mapper::params! { "a" => DbString::new("x"), "b" => DbString::null() };
    let row: DynamicRow = conn
        .sql("select @a as a, @b as b")
        .params(&params)
        .query_single()?;
    assert_eq!(row.get("a"), Some(&DbValue::Text("x".into())));
    assert_eq!(row.get("b"), Some(&DbValue::Null));
    Ok(())
}

#[test]
fn timeouts_and_errors_reach_the_executor() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    conn.push_error("deadlock victim");

    let result = conn
        .sql("update t set a = 1")
        .timeout(Duration::from_secs(3))
        .execute();
    assert!(matches!(
        result,
        Err(SqlMapperError::ExecutionError(message)) if message.contains("deadlock")
    ));

    let command = conn.last_command().ok_or("no command recorded")?;
    assert_eq!(command.timeout, Some(Duration::from_secs(3)));
    // A failed call still releases the connection it opened.
    assert_eq!(conn.opens(), conn.closes());
    Ok(())
}

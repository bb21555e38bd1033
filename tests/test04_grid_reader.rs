#![cfg(feature = "sqlite")]

use sql_mapper::prelude::*;
use sql_mapper::test_utils::{ScriptedConnection, ScriptedResponse};

sql_mapper::map_entity! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Customer {
        id: i64,
        name: String,
    }
}

sql_mapper::map_entity! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Order {
        id: i64,
        customer_id: i64,
        total: f64,
    }
}

fn shop() -> Result<SqliteConnection, SqlMapperError> {
    let mut conn = SqliteConnection::in_memory();
    conn.open()?;
    conn.execute(
        "create table customers (id integer primary key, name text not null);
         create table orders (id integer primary key, customer_id integer not null, total real not null);
         insert into customers (id, name) values (1, 'ann'), (2, 'ben');
         insert into orders (id, customer_id, total) values (10, 1, 5.5), (11, 1, 2.0), (12, 2, 9.0);",
    )?;
    Ok(conn)
}

#[test]
fn sets_are_read_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = shop()?;
    let params = sql_mapper::params! { "id" => 1_i64 };

    let mut grid = conn
        .sql(
            "select id, name from customers where id = @id;
             select id, customer_id, total from orders where customer_id = @id order by id;
             select count(*) from orders;",
        )
        .params(&params)
        .query_multiple()?;

    let customer: Customer = grid.read_single()?;
    let orders: Vec<Order> = grid.read()?;
    let total_orders: i64 = grid.read_first()?;

    assert_eq!(customer.name, "ann");
    assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), vec![10, 11]);
    assert_eq!(total_orders, 3);
    assert!(grid.is_consumed());
    assert!(matches!(grid.read::<i64>(), Err(SqlMapperError::Disposed)));
    Ok(())
}

#[test]
fn sets_can_be_multi_mapped_and_defaulted() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = shop()?;

    let mut grid = conn.query_multiple(
        "select o.id, o.customer_id, o.total, c.id, c.name
         from orders o join customers c on c.id = o.customer_id order by o.id;
         select name from customers where id = 99;",
    )?;
    let labelled = grid.read_map("id", |(order, customer): (Order, Customer)| {
        format!("{}:{}", order.id, customer.name)
    })?;
    let nobody: Option<String> = grid.read_first_or_default()?;

    assert_eq!(labelled, vec!["10:ann", "11:ann", "12:ben"]);
    assert_eq!(nobody, None);
    assert!(grid.is_consumed());
    Ok(())
}

#[test]
fn single_on_a_set_with_many_rows_fails_and_moves_on() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = shop()?;

    let mut grid = conn.query_multiple("select id from orders; select 1;")?;
    assert!(matches!(grid.read_single::<i64>(), Err(SqlMapperError::MultipleRows)));
    assert!(!grid.is_consumed());
    let one: i64 = grid.read_single()?;
    assert_eq!(one, 1);
    assert!(grid.is_consumed());
    Ok(())
}

fn customers_set() -> Result<ResultSet, SqlMapperError> {
    ResultSet::from_names(&["id", "name"])
        .with_row(vec![DbValue::Int(1), DbValue::Text("ann".into())])?
        .with_row(vec![DbValue::Int(2), DbValue::Text("ben".into())])
}

#[test]
fn reading_every_set_completes_outputs_and_closes() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    let count_set = ResultSet::from_names(&["count"]).with_row(vec![DbValue::Int(2)])?;
    conn.push(
        ScriptedResponse::sets(vec![customers_set()?, count_set])
            .with_output("@total", DbValue::Int(42)),
    );

    let mut params = DynamicParameters::new();
    params.add_with("total", 0_i64, ParamOptions::default().direction(ParameterDirection::Output));
    {
        let mut grid = conn
            .sql("exec list_customers @total out")
            .params(&params)
            .query_multiple()?;
        let customers: Vec<Customer> = grid.read()?;
        assert_eq!(customers.len(), 2);
        let count: i64 = grid.read_single()?;
        assert_eq!(count, 2);
        assert!(grid.is_consumed());
    }

    assert_eq!(params.get::<i64>("total")?, 42);
    assert_eq!(conn.opens(), 1);
    assert_eq!(conn.closes(), 1);
    Ok(())
}

#[test]
fn dropping_a_partially_read_grid_releases_the_connection()
 -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    conn.push(ScriptedResponse::sets(vec![customers_set()?, customers_set()?]));

    {
        let mut grid = conn.query_multiple("select * from customers; select * from customers;")?;
        let first: Customer = grid.read_first()?;
        assert_eq!(first.id, 1);
    }

    assert_eq!(conn.closes(), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn open_connections_stay_open() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = ScriptedConnection::new();
    conn.open()?;
    conn.push(ScriptedResponse::sets(vec![customers_set()?]));

    {
        let mut grid = conn.query_multiple("select * from customers")?;
        grid.dispose()?;
        assert!(grid.is_consumed());
    }

    assert_eq!(conn.closes(), 0);
    assert_eq!(conn.state(), ConnectionState::Open);
    Ok(())
}

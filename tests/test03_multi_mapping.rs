#![cfg(feature = "sqlite")]

use sql_mapper::prelude::*;

sql_mapper::map_entity! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Post {
        id: i64,
        title: String,
        author_id: Option<i64>,
    }
}

sql_mapper::map_entity! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Author {
        id: i64,
        name: String,
    }
}

sql_mapper::map_entity! {
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Comment {
        comment_id: i64,
        body: String,
    }
}

fn blog() -> Result<SqliteConnection, SqlMapperError> {
    let mut conn = SqliteConnection::in_memory();
    conn.open()?;
    conn.execute(
        "create table authors (id integer primary key, name text not null);
         create table posts (id integer primary key, title text not null, author_id integer);
         create table comments (comment_id integer primary key, post_id integer not null, body text not null);
         insert into authors (id, name) values (1, 'ann'), (2, 'ben');
         insert into posts (id, title, author_id) values (10, 'hello', 1), (11, 'again', 2), (12, 'orphan', null);
         insert into comments (comment_id, post_id, body) values (100, 10, 'first'), (101, 10, 'second');",
    )?;
    Ok(conn)
}

#[test]
fn two_types_split_on_the_rightmost_id() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = blog()?;

    let posts = conn.query_map(
        "select p.id, p.title, p.author_id, a.id, a.name
         from posts p join authors a on a.id = p.author_id
         order by p.id",
        "id",
        |(mut post, author): (Post, Author)| {
            post.title = format!("{} by {}", post.title, author.name);
            post
        },
    )?;

    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].title, "hello by ann");
    assert_eq!(posts[1].title, "again by ben");
    assert_eq!(posts[1].author_id, Some(2));
    Ok(())
}

#[test]
fn missing_right_side_maps_to_none() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = blog()?;

    let pairs = conn.query_map(
        "select p.id, p.title, a.id, a.name
         from posts p left join authors a on a.id = p.author_id
         order by p.id",
        "id",
        |pair: (Post, Option<Author>)| pair,
    )?;

    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[0].1.as_ref().map(|a| a.name.as_str()), Some("ann"));
    assert_eq!(pairs[2].0.title, "orphan");
    assert_eq!(pairs[2].1, None);
    Ok(())
}

#[test]
fn several_split_columns_for_three_types() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = blog()?;

    let rows = conn
        .sql(
            "select p.id, p.title, a.id, a.name, c.comment_id, c.body
             from posts p
             join authors a on a.id = p.author_id
             join comments c on c.post_id = p.id
             where p.id = @id
             order by c.comment_id",
        )
        .params(&[("id", 10_i64)])
        .query_map("id, comment_id", |(post, author, comment): (Post, Author, Comment)| {
            format!("{}/{}/{}", post.title, author.name, comment.body)
        })?;

    assert_eq!(rows, vec!["hello/ann/first", "hello/ann/second"]);
    Ok(())
}

#[test]
fn scalars_and_dynamic_rows_can_be_split() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = blog()?;

    let rows = conn.query_map(
        "select p.title, a.id, a.name from posts p join authors a on a.id = p.author_id order by p.id",
        "id",
        |(title, author): (String, DynamicRow)| (title, author.field("name").cloned()),
    )?;

    assert_eq!(rows[0].0, "hello");
    assert_eq!(rows[0].1, Some(DbValue::Text("ann".into())));
    Ok(())
}

#[test]
fn unknown_split_column_is_a_configuration_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut conn = blog()?;

    let result = conn.query_map(
        "select p.id, p.title from posts p",
        "author_key",
        |pair: (Post, Author)| pair,
    );
    match result {
        Err(SqlMapperError::SplitConfiguration(message)) => assert!(message.contains("author_key")),
        other => panic!("expected a split configuration error, got {other:?}"),
    }
    Ok(())
}

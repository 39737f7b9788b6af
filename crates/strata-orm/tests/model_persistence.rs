//! Create, read, update and delete against in-memory SQLite.

mod common;

use chrono::{Duration, Utc};
use common::{setup, setup_with, text, User};
use serde_json::json;
use strata_orm::{attributes, CompareOp, ModelExt, OrmError, Value};
use strata_sql_sqlite::SqliteDialect;

#[tokio::test]
async fn test_create_then_find_round_trips() {
    let (db, _) = setup().await;

    let created = User::create(&db, attributes! { "name" => "John", "email" => "john@example.com" })
        .await
        .unwrap();
    assert!(created.exists());
    assert!(created.is_clean());
    let id = created.key().cloned().unwrap();
    assert_eq!(id, Value::Int(1));

    let found = User::find(&db, id).await.unwrap().unwrap();
    assert_eq!(found.get("name").unwrap(), text("John"));
    assert_eq!(found.get("email").unwrap(), text("john@example.com"));
    assert!(!found.get("created_at").unwrap().is_null());
    assert_eq!(found.get("created_at").unwrap(), found.get("updated_at").unwrap());
}

#[tokio::test]
async fn test_create_without_returning_reselects() {
    let (db, counter) = setup_with(SqliteDialect::legacy()).await;

    let created = User::create(&db, attributes! { "name" => "Jane" }).await.unwrap();
    assert_eq!(created.key(), Some(&Value::Int(1)));
    // Column defaults come back through the re-select.
    assert_eq!(created.get("is_admin").unwrap(), Value::Bool(false));

    let statements = counter.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].starts_with("INSERT INTO users"));
    assert!(!statements[0].contains("RETURNING"));
    assert_eq!(statements[1], "SELECT last_insert_rowid() AS id");
    assert!(statements[2].starts_with("SELECT * FROM users WHERE"));
}

#[tokio::test]
async fn test_returning_insert_is_one_statement() {
    let (db, counter) = setup().await;

    User::create(&db, attributes! { "name" => "Jane" }).await.unwrap();

    let statements = counter.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].ends_with("RETURNING *"));
}

#[tokio::test]
async fn test_mass_assignment_skips_unfillable() {
    let (db, _) = setup().await;

    let user = User::create(&db, attributes! { "name" => "John", "password" => "hunter2" })
        .await
        .unwrap();
    assert_eq!(user.get("password").unwrap(), Value::Null);

    let stored = User::find_or_fail(&db, 1).await.unwrap();
    assert_eq!(stored.get_raw("password"), Some(&Value::Null));
}

#[tokio::test]
async fn test_saving_a_clean_record_writes_nothing() {
    let (db, counter) = setup().await;
    let mut user = User::create(&db, attributes! { "name" => "John" }).await.unwrap();
    counter.reset();

    assert!(user.save(&db).await.unwrap());
    assert_eq!(counter.count(), 0);

    // Setting a value equal to the stored one keeps the record clean.
    user.set("name", "John").unwrap();
    assert!(user.save(&db).await.unwrap());
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn test_update_writes_only_dirty_columns() {
    let (db, counter) = setup().await;
    let mut user = User::create(&db, attributes! { "name" => "John", "email" => "a@example.com" })
        .await
        .unwrap();
    counter.reset();

    user.set("email", "b@example.com").unwrap();
    assert!(user.is_dirty_key("email"));
    assert!(!user.is_dirty_key("name"));
    assert!(user.save(&db).await.unwrap());
    assert!(user.is_clean());

    let statements = counter.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("UPDATE users SET email = ?, updated_at = ?"));
    assert!(!statements[0].contains("name"));

    let stored = User::find_or_fail(&db, 1).await.unwrap();
    assert_eq!(stored.get("email").unwrap(), text("b@example.com"));
}

#[tokio::test]
async fn test_record_update_fills_and_saves() {
    let (db, _) = setup().await;
    let mut user = User::create(&db, attributes! { "name" => "John" }).await.unwrap();

    assert!(user
        .update(&db, attributes! { "name" => "Johnny", "password" => "ignored" })
        .await
        .unwrap());

    let stored = user.fresh(&db).await.unwrap().unwrap();
    assert_eq!(stored.get("name").unwrap(), text("Johnny"));
    assert_eq!(stored.get("password").unwrap(), Value::Null);
}

#[tokio::test]
async fn test_casts_apply_on_the_way_in_and_out() {
    let (db, _) = setup().await;

    let user = User::create(
        &db,
        attributes! {
            "name" => "John",
            "is_admin" => true,
            "settings" => json!({ "theme": "dark" }),
        },
    )
    .await
    .unwrap();

    // Storage form in the row, cast form through `get`.
    assert_eq!(user.get_raw("is_admin"), Some(&Value::Int(1)));
    assert_eq!(user.get("is_admin").unwrap(), Value::Bool(true));

    let stored = User::find_or_fail(&db, 1).await.unwrap();
    assert_eq!(stored.get("is_admin").unwrap(), Value::Bool(true));
    assert_eq!(
        stored.get("settings").unwrap(),
        Value::Json(json!({ "theme": "dark" }))
    );
}

#[tokio::test]
async fn test_malformed_stored_json_is_a_cast_error() {
    let (db, _) = setup().await;
    db.table("users")
        .unwrap()
        .insert(
            [
                ("name".to_string(), text("Broken")),
                ("settings".to_string(), text("{not json")),
            ]
            .into_iter()
            .collect(),
        )
        .await
        .unwrap();

    let user = User::find_or_fail(&db, 1).await.unwrap();
    assert!(matches!(
        user.get("settings"),
        Err(OrmError::Cast { ref attribute, .. }) if attribute == "settings"
    ));
}

#[tokio::test]
async fn test_hard_delete_removes_the_row() {
    let (db, _) = setup().await;
    let mut user = User::create(&db, attributes! { "name" => "John" }).await.unwrap();

    assert!(user.delete(&db).await.unwrap());
    assert!(!user.exists());
    assert!(User::find(&db, 1).await.unwrap().is_none());

    // Deleting again is a no-op.
    assert!(!user.delete(&db).await.unwrap());
}

#[tokio::test]
async fn test_find_or_fail_reports_the_model() {
    let (db, _) = setup().await;

    let err = User::find_or_fail(&db, 42).await.unwrap_err();
    assert!(matches!(err, OrmError::NotFound { model: "User" }));
    assert_eq!(err.to_string(), "User not found");
}

#[tokio::test]
async fn test_first_or_create_and_update_or_create() {
    let (db, counter) = setup().await;
    let query = User::query(&db).unwrap();

    let first = query
        .first_or_create(
            &[("email", text("john@example.com"))],
            &[("name", text("John"))],
        )
        .await
        .unwrap();
    assert_eq!(first.get("name").unwrap(), text("John"));

    let again = query
        .first_or_create(
            &[("email", text("john@example.com"))],
            &[("name", text("Someone else"))],
        )
        .await
        .unwrap();
    assert_eq!(again.key(), first.key());
    assert_eq!(again.get("name").unwrap(), text("John"));

    let updated = query
        .update_or_create(
            &[("email", text("john@example.com"))],
            &[("name", text("Johnny"))],
        )
        .await
        .unwrap();
    assert_eq!(updated.key(), first.key());
    assert_eq!(updated.get("name").unwrap(), text("Johnny"));

    query
        .update_or_create(&[("email", text("jane@example.com"))], &[("name", text("Jane"))])
        .await
        .unwrap();
    assert_eq!(query.count().await.unwrap(), 2);
    assert!(counter.writes() >= 3);
}

#[tokio::test]
async fn test_paginate_counts_and_slices() {
    let (db, _) = setup().await;
    for n in 1..=5 {
        User::create(&db, attributes! { "name" => format!("user{n}") })
            .await
            .unwrap();
    }

    let page = User::query(&db)
        .unwrap()
        .order_by("users.id")
        .paginate(2, 2)
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.last_page, 3);
    assert!(page.has_more_pages());
    let names: Vec<Value> = page.data.iter().map(|u| u.get("name").unwrap()).collect();
    assert_eq!(names, vec![text("user3"), text("user4")]);
}

#[tokio::test]
async fn test_mass_update_and_aggregates() {
    let (db, counter) = setup().await;
    for (name, admin) in [("a", true), ("b", false), ("c", false)] {
        User::create(&db, attributes! { "name" => name, "is_admin" => admin })
            .await
            .unwrap();
    }
    counter.reset();

    let affected = User::query(&db)
        .unwrap()
        .where_eq("is_admin", false)
        .update(attributes! { "email" => "none@example.com" })
        .await
        .unwrap();
    assert_eq!(affected, Some(2));
    assert_eq!(counter.count(), 1);

    let query = User::query(&db).unwrap();
    assert_eq!(
        query.clone().where_not_null("email").count().await.unwrap(),
        2
    );
    assert_eq!(query.max("id").await.unwrap(), Value::Int(3));
    assert_eq!(query.sum("is_admin").await.unwrap(), Value::Int(1));
    assert_eq!(
        query
            .clone()
            .where_op("id", CompareOp::Gt, 1)
            .order_by("-id")
            .pluck("name")
            .await
            .unwrap(),
        vec![text("c"), text("b")]
    );
}

#[tokio::test]
async fn test_to_json_hides_and_casts() {
    let (db, _) = setup().await;
    let mut user = User::create(&db, attributes! { "name" => "John", "is_admin" => 1 })
        .await
        .unwrap();
    user.set_raw("password", "secret");

    let json = user.to_json().unwrap();
    assert_eq!(json["name"], "John");
    assert_eq!(json["is_admin"], true);
    assert!(json.get("password").is_none());
}

#[tokio::test]
async fn test_datetime_filters_compare_against_stamped_columns() {
    let (db, _) = setup().await;
    let before = Utc::now() - Duration::seconds(60);
    User::create(&db, attributes! { "name" => "John" }).await.unwrap();
    let after = Utc::now() + Duration::seconds(60);

    let recent = User::query(&db)
        .unwrap()
        .where_op("created_at", CompareOp::Gt, before)
        .count()
        .await
        .unwrap();
    assert_eq!(recent, 1);

    let in_range = User::query(&db)
        .unwrap()
        .where_between("created_at", before, after)
        .count()
        .await
        .unwrap();
    assert_eq!(in_range, 1);

    let future = User::query(&db)
        .unwrap()
        .where_op("updated_at", CompareOp::Gt, after)
        .count()
        .await
        .unwrap();
    assert_eq!(future, 0);
}

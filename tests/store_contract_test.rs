//! The same behavioral checks, run against every adapter

mod common;

use airstore::{
    ComparisonOperator, Expression, Increment, Query, Record, SortDirection, Store, StoreError,
    WriteCondition,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

type TestResult = Result<(), Box<dyn std::error::Error>>;

macro_rules! contract_tests {
    ($($check:ident),* $(,)?) => {
        mod memory {
            $(
                #[tokio::test]
                async fn $check() -> super::TestResult {
                    let store = super::common::memory_store("memory");
                    super::$check(&store).await
                }
            )*
        }

        mod sqlite {
            $(
                #[tokio::test]
                async fn $check() -> super::TestResult {
                    let (_dir, store) = super::common::sqlite_store("sqlite");
                    super::$check(&store).await
                }
            )*
        }
    };
}

contract_tests!(
    save_and_get_round_trip,
    conditional_update_and_delete,
    missing_record_failures,
    patch_is_shallow,
    remove_attribute_stamps_timestamp,
    increment_attributes,
    collection_append_keeps_order,
    stale_item_condition_leaves_collection_unchanged,
    delete_item_from_collection,
    paginate_without_duplicates,
    like_patterns,
    filter_operators,
    order_missing_values_first,
    invalid_continuation_token,
    zero_limit_rejected,
    numeric_attribute_names,
    read_modify_write_needs_fresh_timestamp,
);

async fn save_and_get_round_trip(store: &dyn Store) -> TestResult {
    let record = Record::new("r1")
        .with("name", "Alice")
        .with("profile", json!({"age": 30, "tags": ["a", "b"]}));
    let saved = store.save(record).await?;
    assert!(saved.last_update.is_some());

    let loaded = store.get("r1").await?.expect("record saved");
    assert_eq!(loaded, saved);
    assert!(store.exists("r1").await?);
    assert!(store.get("missing").await?.is_none());

    let all = store
        .get_all(Some(&["r1".to_string(), "missing".to_string()]))
        .await?;
    assert_eq!(all.len(), 1);
    Ok(())
}

async fn conditional_update_and_delete(store: &dyn Store) -> TestResult {
    // 1. Initial write
    let first = store.save(Record::new("r1").with("n", 1)).await?;
    let first_ts = first.last_update.expect("stamped");

    // 2. Writer that saw the current state wins
    let newer = Utc::now() + chrono::Duration::seconds(1);
    store
        .update(
            Record::new("r1").with("n", 2).with_last_update(newer),
            Some(&WriteCondition::last_update(first_ts)),
        )
        .await?;

    // 3. Writer holding the stale timestamp loses
    let err = store
        .update(
            Record::new("r1").with("n", 3),
            Some(&WriteCondition::last_update(first_ts)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UpdateConditionFailed { ref id, .. } if id == "r1"));
    assert_eq!(store.get_required("r1").await?.get("n"), Some(&json!(2)));

    // 4. Stale delete leaves the record in place
    let err = store
        .delete("r1", Some(&WriteCondition::last_update(first_ts)))
        .await
        .unwrap_err();
    assert!(err.is_condition_failed());
    assert!(store.exists("r1").await?);

    // 5. Condition on a plain attribute
    store
        .delete("r1", Some(&WriteCondition::new("n", 2)))
        .await?;
    assert!(!store.exists("r1").await?);
    Ok(())
}

async fn missing_record_failures(store: &dyn Store) -> TestResult {
    assert!(store.get_required("ghost").await.unwrap_err().is_not_found());
    assert!(store
        .update(Record::new("ghost"), None)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store
        .update(Record::new("ghost"), Some(&WriteCondition::new("n", 1)))
        .await
        .unwrap_err()
        .is_condition_failed());
    assert!(store
        .patch(Record::new("ghost").with("a", 1), None)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store
        .increment_attributes("ghost", &[Increment::new("n", 1)], Utc::now())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store
        .upsert_item_to_collection("ghost", "items", json!(1), None, None, Utc::now())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store
        .delete("ghost", Some(&WriteCondition::new("n", 1)))
        .await
        .unwrap_err()
        .is_condition_failed());

    // Unconditioned delete of an absent record is a no-op
    store.delete("ghost", None).await?;
    Ok(())
}

async fn patch_is_shallow(store: &dyn Store) -> TestResult {
    store
        .save(
            Record::new("r1")
                .with("keep", "yes")
                .with("nickname", "Al")
                .with("profile", json!({"age": 30, "city": "Paris"})),
        )
        .await?;

    let ts = Utc::now() + chrono::Duration::seconds(5);
    store
        .patch(
            Record::new("r1")
                .with("nickname", Value::Null)
                .with("profile", json!({"age": 31}))
                .with_last_update(ts),
            None,
        )
        .await?;

    let record = store.get_required("r1").await?;
    assert_eq!(record.get("keep"), Some(&json!("yes")));
    assert_eq!(record.get("nickname"), Some(&Value::Null));
    assert_eq!(record.get("profile"), Some(&json!({"age": 31})));
    assert_eq!(record.last_update, Some(ts));
    Ok(())
}

async fn remove_attribute_stamps_timestamp(store: &dyn Store) -> TestResult {
    store
        .save(Record::new("r1").with("a", 1).with("b", 2))
        .await?;
    let ts = Utc::now() + chrono::Duration::seconds(5);
    store.remove_attribute("r1", "a", None, ts).await?;

    let record = store.get_required("r1").await?;
    assert!(record.get("a").is_none());
    assert_eq!(record.get("b"), Some(&json!(2)));
    assert_eq!(record.last_update, Some(ts));

    let err = store
        .remove_attribute("r1", "b", Some(&WriteCondition::new("b", 99)), Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_condition_failed());
    Ok(())
}

async fn increment_attributes(store: &dyn Store) -> TestResult {
    store
        .save(Record::new("r1").with("count", 1).with("score", 1))
        .await?;
    store
        .increment_attributes(
            "r1",
            &[
                Increment::new("count", 2),
                Increment::new("fresh", 5),
                Increment::new("count", 1),
            ],
            Utc::now(),
        )
        .await?;
    store
        .increment_attributes(
            "r1",
            &[Increment::new(
                "score",
                serde_json::Number::from_f64(0.5).expect("finite"),
            )],
            Utc::now(),
        )
        .await?;

    let record = store.get_required("r1").await?;
    assert_eq!(record.get("count"), Some(&json!(4)));
    assert_eq!(record.get("fresh"), Some(&json!(5)));
    assert_eq!(record.get("score"), Some(&json!(1.5)));
    Ok(())
}

async fn collection_append_keeps_order(store: &dyn Store) -> TestResult {
    store.save(Record::new("r1").with("label", "x")).await?;
    for item in ["a", "b", "c"] {
        store
            .upsert_item_to_collection("r1", "items", json!(item), None, None, Utc::now())
            .await?;
    }
    let record = store.get_required("r1").await?;
    assert_eq!(record.get("items"), Some(&json!(["a", "b", "c"])));

    // Replace in place
    store
        .upsert_item_to_collection("r1", "items", json!("B"), Some(1), None, Utc::now())
        .await?;
    // Out of range slot
    let err = store
        .upsert_item_to_collection("r1", "items", json!("z"), Some(7), None, Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_condition_failed());
    // Not a collection
    let err = store
        .upsert_item_to_collection("r1", "label", json!("z"), None, None, Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_backend());

    let record = store.get_required("r1").await?;
    assert_eq!(record.get("items"), Some(&json!(["a", "B", "c"])));
    Ok(())
}

async fn stale_item_condition_leaves_collection_unchanged(store: &dyn Store) -> TestResult {
    let items = json!([{"id": "a", "rev": 1}, {"id": "b", "rev": 2}]);
    store.save(Record::new("r1").with("items", items.clone())).await?;

    let err = store
        .upsert_item_to_collection(
            "r1",
            "items",
            json!({"id": "b", "rev": 3}),
            Some(1),
            Some(&WriteCondition::new("rev", 1)),
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert!(err.is_condition_failed());

    let err = store
        .delete_item_from_collection("r1", "items", 0, &WriteCondition::new("rev", 7), Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_condition_failed());

    assert_eq!(store.get_required("r1").await?.get("items"), Some(&items));

    store
        .upsert_item_to_collection(
            "r1",
            "items",
            json!({"id": "b", "rev": 3}),
            Some(1),
            Some(&WriteCondition::new("rev", 2)),
            Utc::now(),
        )
        .await?;
    assert_eq!(
        store.get_required("r1").await?.get("items"),
        Some(&json!([{"id": "a", "rev": 1}, {"id": "b", "rev": 3}]))
    );
    Ok(())
}

async fn delete_item_from_collection(store: &dyn Store) -> TestResult {
    store
        .save(Record::new("r1").with(
            "items",
            json!([{"id": "a", "rev": 1}, {"id": "b", "rev": 1}, {"id": "c", "rev": 1}]),
        ))
        .await?;

    store
        .delete_item_from_collection("r1", "items", 1, &WriteCondition::new("id", "b"), Utc::now())
        .await?;
    assert_eq!(
        store.get_required("r1").await?.get("items"),
        Some(&json!([{"id": "a", "rev": 1}, {"id": "c", "rev": 1}]))
    );

    // Compaction alone is idempotent
    store.compact_collection("r1", "items").await?;
    assert_eq!(
        store.get_required("r1").await?.get("items").map(|v| v.as_array().map(Vec::len)),
        Some(Some(2))
    );
    Ok(())
}

async fn paginate_without_duplicates(store: &dyn Store) -> TestResult {
    common::seed(store, 1..=25).await?;

    let mut seen = HashSet::new();
    let mut pages = Vec::new();
    let mut token = None;
    loop {
        let page = store
            .find(
                &Query::new()
                    .filter(Expression::compare("index", ComparisonOperator::GreaterOrEqual, 1))
                    .order_by("index", SortDirection::Desc)
                    .limit(10)
                    .continuation(token),
            )
            .await?;
        pages.push(page.results.len());
        for record in &page.results {
            assert!(seen.insert(record.uuid.clone()), "duplicate {}", record.uuid);
        }
        token = page.continuation_token;
        if token.is_none() {
            break;
        }
    }

    assert_eq!(pages, vec![10, 10, 5]);
    assert_eq!(seen.len(), 25);

    // Exactly one full page leaves no token behind
    let exact = store.find(&Query::new().limit(25)).await?;
    assert_eq!(exact.results.len(), 25);
    assert!(exact.continuation_token.is_none());

    let first = store
        .find(&Query::new().order_by("index", SortDirection::Desc).limit(1))
        .await?;
    assert_eq!(first.results[0].uuid, "25");
    Ok(())
}

async fn like_patterns(store: &dyn Store) -> TestResult {
    for (uid, name) in [
        ("1", "alice"),
        ("2", "Alicia"),
        ("3", "a_b"),
        ("4", "axb"),
        ("5", "bob*"),
        ("6", "bobby"),
        ("7", "x[1]"),
    ] {
        store.save(Record::new(uid).with("name", name)).await?;
    }
    store.save(Record::new("8").with("name", 42)).await?;

    let names = |pattern: &'static str| async move {
        let mut found: Vec<String> = store
            .find(&Query::new().filter(Expression::like("name", pattern)))
            .await?
            .results
            .into_iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        found.sort();
        Ok::<_, StoreError>(found)
    };

    assert_eq!(names("%lic%").await?, vec!["Alicia", "alice"]);
    assert_eq!(names("Ali%").await?, vec!["Alicia"]);
    assert_eq!(names("a_b").await?, vec!["a_b", "axb"]);
    assert_eq!(names("a\\_b").await?, vec!["a_b"]);
    assert_eq!(names("bob*").await?, vec!["bob*"]);
    assert_eq!(names("x[1]").await?, vec!["x[1]"]);
    assert!(names("lic").await?.is_empty());
    Ok(())
}

async fn filter_operators(store: &dyn Store) -> TestResult {
    store
        .save(
            Record::new("1")
                .with("status", "open")
                .with("tags", json!(["red", "blue"]))
                .with("profile", json!({"age": 30})),
        )
        .await?;
    store
        .save(
            Record::new("2")
                .with("status", "closed")
                .with("owner", "bob")
                .with("profile", json!({"age": 17})),
        )
        .await?;
    store.save(Record::new("3").with("status", "open")).await?;

    let ids = |expr: Expression| async move {
        let mut ids: Vec<String> = store
            .find(&Query::new().filter(expr))
            .await?
            .results
            .into_iter()
            .map(|r| r.uuid)
            .collect();
        ids.sort();
        Ok::<_, StoreError>(ids)
    };

    assert_eq!(ids(Expression::eq("status", "open")).await?, vec!["1", "3"]);
    assert_eq!(ids(Expression::ne("owner", "bob")).await?, vec!["1", "3"]);
    assert_eq!(ids(Expression::contains("tags", "blue")).await?, vec!["1"]);
    assert_eq!(ids(Expression::eq("tags", "red")).await?, vec!["1"]);
    assert_eq!(
        ids(Expression::compare("profile.age", ComparisonOperator::Less, 18)).await?,
        vec!["2"]
    );
    assert_eq!(
        ids(Expression::is_in("status", vec![json!("closed"), json!("archived")])).await?,
        vec!["2"]
    );
    assert!(ids(Expression::is_in("status", vec![])).await?.is_empty());
    assert_eq!(
        ids(Expression::or(vec![
            Expression::eq("owner", "bob"),
            Expression::and(vec![
                Expression::eq("status", "open"),
                Expression::compare("profile.age", ComparisonOperator::GreaterOrEqual, 18),
            ]),
        ]))
        .await?,
        vec!["1", "2"]
    );
    assert_eq!(ids(Expression::eq("uuid", "3")).await?, vec!["3"]);

    let bad = store
        .find(&Query::new().filter(Expression::compare("status", ComparisonOperator::In, "open")))
        .await
        .unwrap_err();
    assert!(matches!(bad, StoreError::QueryCompilation(_)));
    Ok(())
}

async fn order_missing_values_first(store: &dyn Store) -> TestResult {
    store.save(Record::new("a").with("age", 30)).await?;
    store.save(Record::new("b")).await?;
    store.save(Record::new("c").with("age", 20)).await?;
    store.save(Record::new("d").with("age", 20)).await?;

    let order = store
        .find(&Query::new().order_by("age", SortDirection::Asc))
        .await?
        .results
        .into_iter()
        .map(|r| r.uuid)
        .collect::<Vec<_>>();
    assert_eq!(order, vec!["b", "c", "d", "a"]);
    Ok(())
}

async fn invalid_continuation_token(store: &dyn Store) -> TestResult {
    let err = store
        .find(&Query::new().limit(5).continuation(Some("not a token".to_string())))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidContinuationToken(_)));
    Ok(())
}

async fn zero_limit_rejected(store: &dyn Store) -> TestResult {
    common::seed(store, 1..=3).await?;
    let err = store.find(&Query::new().limit(0)).await.unwrap_err();
    assert!(matches!(err, StoreError::QueryCompilation(_)));

    let huge = store.find(&Query::new().limit(usize::MAX)).await?;
    assert_eq!(huge.results.len(), 3);
    assert!(huge.continuation_token.is_none());
    Ok(())
}

async fn numeric_attribute_names(store: &dyn Store) -> TestResult {
    // 1. Digit-only names are plain keys, never array slots
    store.save(Record::new("r1").with("2024", 1)).await?;
    store
        .increment_attributes("r1", &[Increment::new("2024", 5)], Utc::now())
        .await?;
    store
        .patch(Record::new("r1").with("7", "x"), None)
        .await?;
    store
        .upsert_item_to_collection("r1", "10", json!("a"), None, None, Utc::now())
        .await?;
    store
        .upsert_item_to_collection("r1", "10", json!("b"), None, None, Utc::now())
        .await?;

    let record = store.get_required("r1").await?;
    assert_eq!(record.get("2024"), Some(&json!(6)));
    assert_eq!(record.get("7"), Some(&json!("x")));
    assert_eq!(record.get("10"), Some(&json!(["a", "b"])));

    // 2. Conditions and removal address the same keys
    store
        .remove_attribute("r1", "2024", Some(&WriteCondition::new("7", "x")), Utc::now())
        .await?;
    let record = store.get_required("r1").await?;
    assert!(record.get("2024").is_none());
    assert_eq!(record.get("7"), Some(&json!("x")));

    // 3. Dotted names stay whole
    store
        .patch(Record::new("r1").with("a.b", 1), None)
        .await?;
    let record = store.get_required("r1").await?;
    assert_eq!(record.get("a.b"), Some(&json!(1)));
    assert!(record.get("a").is_none());
    Ok(())
}

async fn read_modify_write_needs_fresh_timestamp(store: &dyn Store) -> TestResult {
    let saved = store.save(Record::new("r1").with("n", 1)).await?;
    let seen = saved.last_update.expect("stamped");

    // 1. Re-saving the fetched record keeps its timestamp
    let mut fetched = store.get_required("r1").await?;
    fetched.set("n", json!(2));
    let kept = store
        .update(fetched.clone(), Some(&WriteCondition::last_update(seen)))
        .await?;
    assert_eq!(kept.last_update, Some(seen));

    // 2. Touching it advances the timestamp and fences out the old holder
    let fresh = seen + chrono::Duration::seconds(1);
    fetched.set("n", json!(3));
    fetched.touch(fresh);
    store
        .update(fetched, Some(&WriteCondition::last_update(seen)))
        .await?;
    let err = store
        .update(
            Record::new("r1").with("n", 4).with_last_update(fresh + chrono::Duration::seconds(1)),
            Some(&WriteCondition::last_update(seen)),
        )
        .await
        .unwrap_err();
    assert!(err.is_condition_failed());

    let record = store.get_required("r1").await?;
    assert_eq!(record.get("n"), Some(&json!(3)));
    assert_eq!(record.last_update, Some(fresh));
    Ok(())
}

/// Writers racing on the same `_lastUpdate` condition: exactly one wins
async fn concurrent_conditional_updates(store: Arc<dyn Store>) -> TestResult {
    const WRITERS: i64 = 16;
    let saved = store.save(Record::new("r1").with("writer", -1)).await?;
    let seen = saved.last_update.expect("stamped");

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let record = Record::new("r1")
                    .with("writer", i)
                    .with_last_update(seen + chrono::Duration::seconds(i + 1));
                store
                    .update(record, Some(&WriteCondition::last_update(seen)))
                    .await
            })
        })
        .collect();

    let mut winners = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await? {
            Ok(_) => winners.push(i as i64),
            Err(err) => assert!(err.is_condition_failed(), "writer {}: {}", i, err),
        }
    }
    assert_eq!(winners.len(), 1);

    let record = store.get_required("r1").await?;
    assert_eq!(record.get("writer"), Some(&json!(winners[0])));
    assert_eq!(
        record.last_update,
        Some(seen + chrono::Duration::seconds(winners[0] + 1))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_conditional_updates() -> TestResult {
    concurrent_conditional_updates(Arc::new(common::memory_store("memory"))).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_conditional_updates() -> TestResult {
    let (_dir, store) = common::sqlite_store("sqlite");
    concurrent_conditional_updates(Arc::new(store)).await
}

//! KeyedStore interface tests.
//!
//! Every test works inside its own random partition so the suite can run
//! against a shared table.

use serde_json::{json, Value};
use uuid::Uuid;

use product_ratings::storage::{
    Cursor, FieldAction, Item, Key, KeyedStore, Patch, QueryOptions, ScanOptions, StorageError,
    UpdateOptions,
};

fn partition(name: &str) -> String {
    format!("TEST#{}#{}", name, Uuid::new_v4())
}

fn item(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn number(item: &Item, field: &str) -> f64 {
    item.get(field)
        .and_then(Value::as_f64)
        .unwrap_or_else(|| panic!("{field} missing or not numeric in {item:?}"))
}

fn sort_keys<S: KeyedStore>(store: &S, items: &[Item]) -> Vec<String> {
    items
        .iter()
        .map(|i| {
            store
                .key_schema()
                .key_of(i)
                .and_then(|k| k.sk)
                .expect("item carries its sort key")
        })
        .collect()
}

async fn query_all<S: KeyedStore>(store: &S, pk: &str, options: QueryOptions) -> Vec<Item> {
    let mut items = Vec::new();
    let mut cursor: Option<Cursor> = None;
    loop {
        let page = store
            .query(pk, options.clone().with_cursor(cursor.take()))
            .await
            .expect("query should succeed");
        if let Some(limit) = options.limit {
            assert!(page.items.len() <= limit as usize);
        }
        items.extend(page.items);
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => return items,
        }
    }
}

// =============================================================================
// Create / get
// =============================================================================

pub async fn test_get_missing_is_not_found<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("missing"), "ITEM");

    let err = store.get(&key).await.expect_err("absent item");

    assert!(matches!(err, StorageError::NotFound(k) if k == key));
}

pub async fn test_create_then_get<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("create"), "ITEM");

    store
        .create(&key, item(json!({"name": "Lamp", "price": 25, "tags": ["a", "b"]})))
        .await
        .expect("create should succeed");
    let stored = store.get(&key).await.expect("get should succeed");

    assert_eq!(stored.get("name"), Some(&json!("Lamp")));
    assert_eq!(number(&stored, "price"), 25.0);
    assert_eq!(stored.get("tags"), Some(&json!(["a", "b"])));
    assert_eq!(store.key_schema().key_of(&stored), Some(key));
}

pub async fn test_create_existing_conflicts<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("dup"), "ITEM");
    store.create(&key, item(json!({"v": 1}))).await.unwrap();

    let err = store
        .create(&key, item(json!({"v": 2})))
        .await
        .expect_err("second create must fail");

    assert!(err.is_conflict());
    assert_eq!(number(&store.get(&key).await.unwrap(), "v"), 1.0);
}

// =============================================================================
// Conditional updates
// =============================================================================

pub async fn test_update_missing_is_not_found<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("upd-missing"), "ITEM");

    let err = store
        .update(&key, Patch::new().set("v", 1), UpdateOptions::new())
        .await
        .expect_err("no upsert without create_if_missing");

    assert!(err.is_not_found());
    assert!(store.get(&key).await.unwrap_err().is_not_found());
}

pub async fn test_update_empty_patch_rejected<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("upd-empty"), "ITEM");

    let err = store
        .update(&key, Patch::new(), UpdateOptions::new().create_if_missing())
        .await
        .expect_err("empty patch has nothing to write");

    assert!(matches!(err, StorageError::Validation(_)));
    assert!(store.get(&key).await.unwrap_err().is_not_found());
}

pub async fn test_update_create_if_missing<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("upsert"), "ITEM");

    let updated = store
        .update(
            &key,
            Patch::new().set("v", 7),
            UpdateOptions::new().create_if_missing(),
        )
        .await
        .expect("upsert should succeed");

    assert_eq!(number(&updated, "v"), 7.0);
    assert_eq!(number(&store.get(&key).await.unwrap(), "v"), 7.0);
}

pub async fn test_update_replace_and_remove<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("replace"), "ITEM");
    store
        .create(&key, item(json!({"name": "old", "note": "drop me", "keep": true})))
        .await
        .unwrap();

    let updated = store
        .update(
            &key,
            Patch::new().set("name", "new").remove("note"),
            UpdateOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(updated.get("name"), Some(&json!("new")));
    assert!(!updated.contains_key("note"));
    assert_eq!(updated.get("keep"), Some(&json!(true)));
}

pub async fn test_update_accumulate<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("acc"), "ITEM");
    let options = UpdateOptions::new()
        .with_action("count", FieldAction::Accumulate)
        .with_action("sum", FieldAction::Accumulate)
        .create_if_missing();

    store
        .update(
            &key,
            Patch::new().set("count", 1).set("sum", 4),
            options.clone(),
        )
        .await
        .unwrap();
    store
        .update(
            &key,
            Patch::new().set("count", 1).set("sum", 2),
            options.clone(),
        )
        .await
        .unwrap();
    let updated = store
        .update(
            &key,
            Patch::new().set("count", -1).set("sum", -4),
            options,
        )
        .await
        .unwrap();

    assert_eq!(number(&updated, "count"), 1.0);
    assert_eq!(number(&updated, "sum"), 2.0);
}

pub async fn test_offset_fence<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("fence"), "ITEM");
    let apply = |offset: i64| {
        store.update(
            &key,
            Patch::new().set("count", 1).set("lastOffset", offset),
            UpdateOptions::new()
                .with_action("count", FieldAction::Accumulate)
                .with_offset_fence("lastOffset", offset)
                .create_if_missing(),
        )
    };

    apply(5).await.expect("absent fence attribute passes");
    let same = apply(5).await.expect_err("equal offset is a replay");
    let older = apply(3).await.expect_err("older offset is a replay");
    apply(6).await.expect("newer offset passes");

    assert!(same.is_conflict());
    assert!(older.is_conflict());
    let stored = store.get(&key).await.unwrap();
    assert_eq!(number(&stored, "count"), 2.0);
    assert_eq!(number(&stored, "lastOffset"), 6.0);
}

pub async fn test_update_return_original<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("original"), "ITEM");
    store
        .create(&key, item(json!({"rating": 2})))
        .await
        .unwrap();

    let original = store
        .update(
            &key,
            Patch::new().set("rating", 5),
            UpdateOptions::new().return_original(),
        )
        .await
        .unwrap();

    assert_eq!(number(&original, "rating"), 2.0);
    assert_eq!(number(&store.get(&key).await.unwrap(), "rating"), 5.0);
}

// =============================================================================
// Delete
// =============================================================================

pub async fn test_delete<S: KeyedStore>(store: &S) {
    let key = Key::new(partition("delete"), "ITEM");
    store.create(&key, item(json!({"v": 3}))).await.unwrap();

    let removed = store.delete(&key).await.expect("delete should succeed");

    assert_eq!(number(&removed, "v"), 3.0);
    assert!(store.get(&key).await.unwrap_err().is_not_found());
    assert!(store.delete(&key).await.unwrap_err().is_not_found());
}

// =============================================================================
// Listing
// =============================================================================

pub async fn test_query_prefix_and_order<S: KeyedStore>(store: &S) {
    let pk = partition("query");
    for sk in ["#REVIEW#01", "#REVIEW#03", "#REVIEW#02", "PRODUCT", "RATING"] {
        store
            .create(&Key::new(pk.clone(), sk), item(json!({})))
            .await
            .unwrap();
    }

    let ascending = query_all(store, &pk, QueryOptions::with_prefix("#REVIEW#")).await;
    let descending = query_all(store, &pk, QueryOptions::with_prefix("#REVIEW#").descending()).await;
    let everything = query_all(store, &pk, QueryOptions::default()).await;

    assert_eq!(
        sort_keys(store, &ascending),
        ["#REVIEW#01", "#REVIEW#02", "#REVIEW#03"]
    );
    assert_eq!(
        sort_keys(store, &descending),
        ["#REVIEW#03", "#REVIEW#02", "#REVIEW#01"]
    );
    assert_eq!(everything.len(), 5);
}

pub async fn test_query_pagination<S: KeyedStore>(store: &S) {
    let pk = partition("paging");
    for n in 0..5 {
        store
            .create(&Key::new(pk.clone(), format!("#REVIEW#{n:02}")), item(json!({"n": n})))
            .await
            .unwrap();
    }

    let first = store
        .query(&pk, QueryOptions::with_prefix("#REVIEW#").descending().with_limit(2))
        .await
        .unwrap();
    let all = query_all(
        store,
        &pk,
        QueryOptions::with_prefix("#REVIEW#").descending().with_limit(2),
    )
    .await;

    assert_eq!(sort_keys(store, &first.items), ["#REVIEW#04", "#REVIEW#03"]);
    assert!(first.cursor.is_some());
    assert_eq!(
        sort_keys(store, &all),
        ["#REVIEW#04", "#REVIEW#03", "#REVIEW#02", "#REVIEW#01", "#REVIEW#00"]
    );
}

pub async fn test_scan_pagination<S: KeyedStore>(store: &S) {
    let pk = partition("scan");
    for n in 0..3 {
        store
            .create(&Key::new(pk.clone(), format!("ITEM#{n}")), item(json!({})))
            .await
            .unwrap();
    }

    let mut found = Vec::new();
    let mut cursor = None;
    loop {
        let page = store
            .scan(ScanOptions {
                cursor: cursor.take(),
                limit: Some(2),
            })
            .await
            .expect("scan should succeed");
        assert!(page.items.len() <= 2);
        found.extend(
            page.items
                .iter()
                .filter_map(|i| store.key_schema().key_of(i))
                .filter(|k| k.pk == pk),
        );
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    found.sort();
    let sks: Vec<_> = found.into_iter().filter_map(|k| k.sk).collect();
    assert_eq!(sks, ["ITEM#0", "ITEM#1", "ITEM#2"]);
}

pub async fn test_invalid_cursor<S: KeyedStore>(store: &S) {
    let pk = partition("cursor");

    let err = store
        .query(
            &pk,
            QueryOptions::default().with_cursor(Some(Cursor::from_token("not a cursor"))),
        )
        .await
        .expect_err("garbage cursor must be rejected");

    assert!(matches!(err, StorageError::InvalidCursor(_)));
    assert!(err.is_client_error());
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all KeyedStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_keyed_store_tests {
    ($store:expr) => {
        use $crate::storage::keyed_store_tests::*;

        test_get_missing_is_not_found($store).await;
        println!("  test_get_missing_is_not_found: PASSED");

        test_create_then_get($store).await;
        println!("  test_create_then_get: PASSED");

        test_create_existing_conflicts($store).await;
        println!("  test_create_existing_conflicts: PASSED");

        test_update_missing_is_not_found($store).await;
        println!("  test_update_missing_is_not_found: PASSED");

        test_update_empty_patch_rejected($store).await;
        println!("  test_update_empty_patch_rejected: PASSED");

        test_update_create_if_missing($store).await;
        println!("  test_update_create_if_missing: PASSED");

        test_update_replace_and_remove($store).await;
        println!("  test_update_replace_and_remove: PASSED");

        test_update_accumulate($store).await;
        println!("  test_update_accumulate: PASSED");

        test_offset_fence($store).await;
        println!("  test_offset_fence: PASSED");

        test_update_return_original($store).await;
        println!("  test_update_return_original: PASSED");

        test_delete($store).await;
        println!("  test_delete: PASSED");

        test_query_prefix_and_order($store).await;
        println!("  test_query_prefix_and_order: PASSED");

        test_query_pagination($store).await;
        println!("  test_query_pagination: PASSED");

        test_scan_pagination($store).await;
        println!("  test_scan_pagination: PASSED");

        test_invalid_cursor($store).await;
        println!("  test_invalid_cursor: PASSED");
    };
}

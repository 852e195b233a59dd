use serde_json::json;

use super::*;

fn item(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn test_create_stamps_key_attributes() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "PRODUCT");

    let created = store
        .create(&key, item(json!({"name": "Lamp"})))
        .await
        .unwrap();

    assert_eq!(created["PK"], "PRODUCT#p1");
    assert_eq!(created["SK"], "PRODUCT");
    assert_eq!(store.get(&key).await.unwrap(), created);
}

#[tokio::test]
async fn test_create_existing_is_conflict() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "PRODUCT");
    store.create(&key, Item::new()).await.unwrap();

    let err = store.create(&key, Item::new()).await.unwrap_err();

    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_update_missing_without_create_is_not_found() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "RATING");

    let err = store
        .update(&key, Patch::new().set("a", 1), UpdateOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_accumulate_starts_from_zero() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "RATING");
    let options = UpdateOptions::new()
        .with_action("count", FieldAction::Accumulate)
        .create_if_missing();

    let first = store
        .update(&key, Patch::new().set("count", 1), options.clone())
        .await
        .unwrap();
    let second = store
        .update(&key, Patch::new().set("count", 2), options)
        .await
        .unwrap();

    assert_eq!(first["count"], 1);
    assert_eq!(second["count"], 3);
}

#[tokio::test]
async fn test_accumulate_mixes_integer_and_float() {
    let store = MemoryStore::new();
    let key = Key::new("p", "s");
    let options = UpdateOptions::new()
        .with_action("sum", FieldAction::Accumulate)
        .create_if_missing();

    store
        .update(&key, Patch::new().set("sum", 4), options.clone())
        .await
        .unwrap();
    let updated = store
        .update(&key, Patch::new().set("sum", 0.5), options)
        .await
        .unwrap();

    assert_eq!(updated["sum"].as_f64(), Some(4.5));
}

#[tokio::test]
async fn test_accumulate_on_string_is_validation_error() {
    let store = MemoryStore::new();
    let key = Key::new("p", "s");
    store
        .put_raw(key.clone(), item(json!({"count": "three"})))
        .await;

    let err = store
        .update(
            &key,
            Patch::new().set("count", 1),
            UpdateOptions::new().with_action("count", FieldAction::Accumulate),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn test_absent_value_removes_field() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "PRODUCT");
    store
        .create(&key, item(json!({"name": "Lamp", "averageRating": 4.5})))
        .await
        .unwrap();

    let updated = store
        .update(&key, Patch::new().remove("averageRating"), UpdateOptions::new())
        .await
        .unwrap();

    assert!(!updated.contains_key("averageRating"));
    assert_eq!(updated["name"], "Lamp");
}

#[tokio::test]
async fn test_offset_fence_rejects_equal_and_older() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "RATING");
    let write = |offset: i64| {
        (
            Patch::new().set("lastAppliedOffset", offset),
            UpdateOptions::new()
                .create_if_missing()
                .with_offset_fence("lastAppliedOffset", offset),
        )
    };

    let (patch, options) = write(5);
    store.update(&key, patch, options).await.unwrap();

    let (patch, options) = write(5);
    assert!(store.update(&key, patch, options).await.unwrap_err().is_conflict());

    let (patch, options) = write(3);
    assert!(store.update(&key, patch, options).await.unwrap_err().is_conflict());

    let (patch, options) = write(6);
    let updated = store.update(&key, patch, options).await.unwrap();
    assert_eq!(updated["lastAppliedOffset"], 6);
}

#[tokio::test]
async fn test_offset_fence_passes_when_attribute_absent() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "RATING");
    store.put_raw(key.clone(), item(json!({"count": 1}))).await;

    let updated = store
        .update(
            &key,
            Patch::new().set("lastAppliedOffset", 0),
            UpdateOptions::new().with_offset_fence("lastAppliedOffset", 0),
        )
        .await
        .unwrap();

    assert_eq!(updated["lastAppliedOffset"], 0);
}

#[tokio::test]
async fn test_conflict_leaves_item_unchanged() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "RATING");
    store
        .put_raw(key.clone(), item(json!({"count": 1, "lastAppliedOffset": 9})))
        .await;

    let _ = store
        .update(
            &key,
            Patch::new().set("count", 1).set("lastAppliedOffset", 2),
            UpdateOptions::new()
                .with_action("count", FieldAction::Accumulate)
                .with_offset_fence("lastAppliedOffset", 2),
        )
        .await;

    let stored = store.get(&key).await.unwrap();
    assert_eq!(stored["count"], 1);
    assert_eq!(stored["lastAppliedOffset"], 9);
}

#[tokio::test]
async fn test_return_original_values() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "PRODUCT");
    store
        .create(&key, item(json!({"name": "Lamp"})))
        .await
        .unwrap();

    let original = store
        .update(
            &key,
            Patch::new().set("name", "Desk Lamp"),
            UpdateOptions::new().return_original(),
        )
        .await
        .unwrap();

    assert_eq!(original["name"], "Lamp");
    assert_eq!(store.get(&key).await.unwrap()["name"], "Desk Lamp");
}

#[tokio::test]
async fn test_return_original_of_new_item_is_key_only() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "PRODUCT");

    let original = store
        .update(
            &key,
            Patch::new().set("name", "Lamp"),
            UpdateOptions::new().create_if_missing().return_original(),
        )
        .await
        .unwrap();

    assert_eq!(original.len(), 2);
    assert_eq!(original["PK"], "PRODUCT#p1");
}

#[tokio::test]
async fn test_updating_key_attribute_is_rejected() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "PRODUCT");
    store.create(&key, Item::new()).await.unwrap();

    let err = store
        .update(&key, Patch::new().set("PK", "other"), UpdateOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn test_delete_returns_old_item() {
    let store = MemoryStore::new();
    let key = Key::new("PRODUCT#p1", "PRODUCT");
    store
        .create(&key, item(json!({"name": "Lamp"})))
        .await
        .unwrap();

    let deleted = store.delete(&key).await.unwrap();

    assert_eq!(deleted["name"], "Lamp");
    assert!(store.delete(&key).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_query_prefix_and_order() {
    let store = MemoryStore::new();
    for sk in ["#REVIEW#a", "#REVIEW#b", "#REVIEW#c", "PRODUCT"] {
        store.put_raw(Key::new("PRODUCT#p1", sk), Item::new()).await;
    }
    store
        .put_raw(Key::new("PRODUCT#p2", "#REVIEW#z"), Item::new())
        .await;

    let page = store
        .query("PRODUCT#p1", QueryOptions::with_prefix("#REVIEW#").descending())
        .await
        .unwrap();

    let sks: Vec<_> = page.items.iter().map(|i| i["SK"].clone()).collect();
    assert_eq!(sks, vec!["#REVIEW#c", "#REVIEW#b", "#REVIEW#a"]);
    assert!(page.cursor.is_none());
}

#[tokio::test]
async fn test_query_pages_follow_cursor() {
    let store = MemoryStore::new();
    for sk in ["#REVIEW#1", "#REVIEW#2", "#REVIEW#3", "#REVIEW#4", "#REVIEW#5"] {
        store.put_raw(Key::new("PRODUCT#p1", sk), Item::new()).await;
    }

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = store
            .query(
                "PRODUCT#p1",
                QueryOptions::with_prefix("#REVIEW#")
                    .descending()
                    .with_limit(2)
                    .with_cursor(cursor),
            )
            .await
            .unwrap();
        seen.extend(page.items.iter().map(|i| i["SK"].as_str().unwrap().to_string()));
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(
        seen,
        vec!["#REVIEW#5", "#REVIEW#4", "#REVIEW#3", "#REVIEW#2", "#REVIEW#1"]
    );
}

#[tokio::test]
async fn test_scan_exact_page_has_no_cursor() {
    let store = MemoryStore::new();
    store.put_raw(Key::new("a", "1"), Item::new()).await;
    store.put_raw(Key::new("b", "1"), Item::new()).await;

    let page = store
        .scan(ScanOptions {
            cursor: None,
            limit: Some(2),
        })
        .await
        .unwrap();

    assert_eq!(page.items.len(), 2);
    assert!(page.cursor.is_none());
}

#[tokio::test]
async fn test_scan_with_bad_cursor() {
    let store = MemoryStore::new();

    let err = store
        .scan(ScanOptions {
            cursor: Some(Cursor::from_token("%%%")),
            limit: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::InvalidCursor(_)));
}

#[tokio::test]
async fn test_fail_all_injects_backend_error() {
    let store = MemoryStore::new();
    store.set_fail_all(true).await;

    let err = store.get(&Key::new("a", "b")).await.unwrap_err();

    assert!(matches!(err, StorageError::Backend(_)));
    assert!(!err.is_client_error());
}

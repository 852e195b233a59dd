use super::*;
use crate::storage::MemoryStore;

fn review(text: &str, rating: i64) -> NewReview {
    NewReview {
        first_name: "Grace".to_string(),
        last_name: "H".to_string(),
        review_text: text.to_string(),
        rating,
    }
}

#[tokio::test]
async fn test_create_and_get() {
    let repo = ReviewRepository::new(Arc::new(MemoryStore::new()));

    let created = repo.create("p1", review("Great", 5)).await.unwrap();

    assert_eq!(created.product_id, "p1");
    assert_eq!(repo.get("p1", &created.review_id).await.unwrap(), created);
}

#[tokio::test]
async fn test_create_rejects_out_of_range_rating() {
    let repo = ReviewRepository::new(Arc::new(MemoryStore::new()));

    let err = repo.create("p1", review("Meh", 6)).await.unwrap_err();

    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn test_list_is_newest_first_and_scoped_to_product() {
    let repo = ReviewRepository::new(Arc::new(MemoryStore::new()));
    let mut created = Vec::new();
    for text in ["first", "second", "third"] {
        created.push(repo.create("p1", review(text, 3)).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    repo.create("p2", review("elsewhere", 1)).await.unwrap();

    let page = repo.list("p1", None, None).await.unwrap();

    let texts: Vec<_> = page.items.iter().map(|r| r.review_text.as_str()).collect();
    assert_eq!(texts, vec!["third", "second", "first"]);
}

#[tokio::test]
async fn test_list_pages_through_reviews() {
    let repo = ReviewRepository::new(Arc::new(MemoryStore::new()));
    for text in ["a", "b", "c"] {
        repo.create("p1", review(text, 2)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let first = repo.list("p1", None, Some(2)).await.unwrap();
    let token = first.cursor.clone().expect("one review remains");
    let second = repo.list("p1", Some(token.as_str()), Some(2)).await.unwrap();

    assert_eq!(first.items.len(), 2);
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].review_text, "a");
    assert!(second.cursor.is_none());
}

#[tokio::test]
async fn test_update_can_return_original() {
    let repo = ReviewRepository::new(Arc::new(MemoryStore::new()));
    let created = repo.create("p1", review("ok", 4)).await.unwrap();
    let change = ReviewUpdate {
        rating: Some(2),
        ..ReviewUpdate::default()
    };

    let original = repo
        .update("p1", &created.review_id, change, true)
        .await
        .unwrap();

    assert_eq!(original.rating, 4);
    assert_eq!(repo.get("p1", &created.review_id).await.unwrap().rating, 2);
}

#[tokio::test]
async fn test_update_of_missing_review_is_not_found() {
    let repo = ReviewRepository::new(Arc::new(MemoryStore::new()));
    let change = ReviewUpdate {
        review_text: Some("x".to_string()),
        ..ReviewUpdate::default()
    };

    let err = repo.update("p1", "nope", change, false).await.unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delete_returns_review_then_not_found() {
    let repo = ReviewRepository::new(Arc::new(MemoryStore::new()));
    let created = repo.create("p1", review("bye", 1)).await.unwrap();

    assert_eq!(
        repo.delete("p1", &created.review_id).await.unwrap(),
        created
    );
    assert!(repo
        .delete("p1", &created.review_id)
        .await
        .unwrap_err()
        .is_not_found());
}

//! In-memory storage integration tests.
//!
//! Run with: cargo test --test storage_memory
//!
//! No external dependencies required.

mod storage;

use product_ratings::storage::MemoryStore;

#[tokio::test]
async fn test_memory_keyed_store() {
    println!("=== MemoryStore Tests ===");

    let store = MemoryStore::new();
    run_keyed_store_tests!(&store);

    println!("=== All MemoryStore tests PASSED ===");
}

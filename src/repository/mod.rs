//! Domain repositories.
//!
//! Products, their reviews and the rating accumulator share one table:
//!
//! | Entity      | PK                 | SK                     |
//! |-------------|--------------------|------------------------|
//! | Product     | `PRODUCT#<id>`     | `PRODUCT`              |
//! | Review      | `PRODUCT#<id>`     | `#REVIEW#<reviewId>`   |
//! | Accumulator | `PRODUCT#<id>`     | `RATING`               |
//!
//! Ids are UUIDv7, so review sort keys order by creation time.

mod product;
mod rating;
mod review;

pub use product::{NewProduct, Product, ProductRepository, ProductUpdate};
pub use rating::{RatingAccumulator, RatingRepository};
pub use review::{NewReview, Review, ReviewRepository, ReviewUpdate};

use uuid::Uuid;

use crate::storage::Key;

/// Key conventions.
pub mod keys {
    use super::Key;

    pub const PRODUCT_SK: &str = "PRODUCT";
    pub const REVIEW_SK_PREFIX: &str = "#REVIEW#";
    pub const RATING_SK: &str = "RATING";

    pub fn product_pk(product_id: &str) -> String {
        format!("PRODUCT#{}", product_id)
    }

    pub fn product(product_id: &str) -> Key {
        Key::new(product_pk(product_id), PRODUCT_SK)
    }

    pub fn review(product_id: &str, review_id: &str) -> Key {
        Key::new(
            product_pk(product_id),
            format!("{}{}", REVIEW_SK_PREFIX, review_id),
        )
    }

    pub fn rating(product_id: &str) -> Key {
        Key::new(product_pk(product_id), RATING_SK)
    }
}

/// Fresh time-ordered id.
pub(crate) fn new_id() -> String {
    Uuid::now_v7().to_string()
}

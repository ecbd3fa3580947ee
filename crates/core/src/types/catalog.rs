//! Catalog records as stored in the `products` and `categories` tables.
//!
//! From the cart's point of view products are immutable and referenced by
//! id; the catalog owns them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::id::{CategoryId, ProductId};

/// A product row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Unit price.
    pub price: Decimal,
    /// Optional "was" price shown struck through.
    #[serde(default)]
    pub compare_price: Option<Decimal>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub in_stock: Option<bool>,
    #[serde(default)]
    pub stock_quantity: Option<i32>,
    #[serde(default)]
    pub rating: Option<Decimal>,
    #[serde(default)]
    pub review_count: Option<i32>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Minimal product with the given name and price; everything optional
    /// left unset. Useful for seeding and tests.
    #[must_use]
    pub fn new(id: ProductId, name: &str, price: Decimal) -> Self {
        Self {
            id,
            name: name.to_owned(),
            slug: slugify(name),
            description: None,
            price,
            compare_price: None,
            category_id: None,
            image_url: None,
            images: None,
            in_stock: Some(true),
            stock_quantity: None,
            rating: None,
            review_count: None,
            tags: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Whether the product may be sold. A missing flag counts as in stock.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.in_stock.unwrap_or(true)
    }

    /// Whether a compare-at price above the current price is set.
    #[must_use]
    pub fn is_on_sale(&self) -> bool {
        self.compare_price.is_some_and(|compare| compare > self.price)
    }

    /// Whole-percent discount against the compare-at price, if on sale.
    #[must_use]
    pub fn discount_percent(&self) -> Option<u32> {
        let compare = self.compare_price.filter(|_| self.is_on_sale())?;
        let saved = (compare - self.price) / compare * Decimal::ONE_HUNDRED;
        saved.round().to_u32()
    }
}

/// A category row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Category {
    #[must_use]
    pub fn new(id: CategoryId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            slug: slugify(name),
            description: None,
            image_url: None,
            created_at: None,
        }
    }
}

/// Lowercase, hyphen-separated slug for a display name.
#[must_use]
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

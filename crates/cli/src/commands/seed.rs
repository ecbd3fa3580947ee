//! Seed the catalog from a YAML file.
//!
//! Categories are upserted by slug first, then products by slug with their
//! category resolved from the file. Everything runs in one transaction.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info};

use bazaar_core::{CategoryId, slugify};

use super::connect;

/// Catalog seed file.
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
    #[serde(default)]
    pub products: Vec<SeedProduct>,
}

#[derive(Debug, Deserialize)]
pub struct SeedCategory {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl SeedCategory {
    fn slug(&self) -> String {
        self.slug.clone().unwrap_or_else(|| slugify(&self.name))
    }
}

#[derive(Debug, Deserialize)]
pub struct SeedProduct {
    pub name: String,
    pub slug: Option<String>,
    /// Category slug.
    pub category: Option<String>,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub images: Option<Vec<String>>,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
    pub stock_quantity: Option<i32>,
    pub rating: Option<Decimal>,
    pub review_count: Option<i32>,
    pub tags: Option<Vec<String>>,
}

const fn default_in_stock() -> bool {
    true
}

impl SeedProduct {
    fn slug(&self) -> String {
        self.slug.clone().unwrap_or_else(|| slugify(&self.name))
    }
}

/// Problems that would make the seed fail or write nonsense.
#[must_use]
pub fn validate(file: &SeedFile) -> Vec<String> {
    let mut errors = Vec::new();

    let mut category_slugs = HashSet::new();
    for category in &file.categories {
        let slug = category.slug();
        if slug.is_empty() {
            errors.push(format!("category {:?} has an empty slug", category.name));
        } else if !category_slugs.insert(slug.clone()) {
            errors.push(format!("duplicate category slug {slug:?}"));
        }
    }

    let mut product_slugs = HashSet::new();
    for product in &file.products {
        let slug = product.slug();
        if slug.is_empty() {
            errors.push(format!("product {:?} has an empty slug", product.name));
        } else if !product_slugs.insert(slug.clone()) {
            errors.push(format!("duplicate product slug {slug:?}"));
        }
        if product.price.is_sign_negative() {
            errors.push(format!("product {slug:?} has a negative price"));
        }
        if product.compare_price.is_some_and(|p| p.is_sign_negative()) {
            errors.push(format!("product {slug:?} has a negative compare price"));
        }
        if product
            .rating
            .is_some_and(|r| r < Decimal::ZERO || r > Decimal::from(5))
        {
            errors.push(format!("product {slug:?} has a rating outside 0-5"));
        }
        if let Some(category) = &product.category
            && !category_slugs.contains(category)
        {
            errors.push(format!(
                "product {slug:?} references unknown category {category:?}"
            ));
        }
    }

    errors
}

/// Load and check a seed file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or fails
/// validation.
pub async fn load(path: &Path) -> Result<SeedFile, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()).into());
    }

    info!(path = %path.display(), "Loading catalog");
    let content = tokio::fs::read_to_string(path).await?;
    let file: SeedFile = serde_yaml::from_str(&content)?;

    let errors = validate(&file);
    if !errors.is_empty() {
        error!("Catalog validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(format!("{} validation errors found", errors.len()).into());
    }

    info!(
        categories = file.categories.len(),
        products = file.products.len(),
        "Catalog validated"
    );
    Ok(file)
}

/// Seed categories and products from `path`.
///
/// # Errors
///
/// Returns an error if the file is invalid, the database URL is missing, or
/// any write fails (nothing is committed in that case).
pub async fn catalog(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let file = load(path).await?;

    if dry_run {
        info!("Dry run: nothing written");
        return Ok(());
    }

    let pool = connect().await?;
    let mut tx = pool.begin().await?;

    let mut category_ids: HashMap<String, CategoryId> = HashMap::new();
    for category in &file.categories {
        let slug = category.slug();
        let id: CategoryId = sqlx::query_scalar(
            r"
            INSERT INTO categories (name, slug, description, image_url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                image_url = EXCLUDED.image_url
            RETURNING id
            ",
        )
        .bind(&category.name)
        .bind(&slug)
        .bind(&category.description)
        .bind(&category.image_url)
        .fetch_one(&mut *tx)
        .await?;
        category_ids.insert(slug, id);
    }

    for product in &file.products {
        let category_id = product
            .category
            .as_ref()
            .and_then(|slug| category_ids.get(slug).copied());

        sqlx::query(
            r"
            INSERT INTO products (
                name, slug, description, price, compare_price, category_id,
                image_url, images, in_stock, stock_quantity, rating, review_count, tags
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (slug) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                price = EXCLUDED.price,
                compare_price = EXCLUDED.compare_price,
                category_id = EXCLUDED.category_id,
                image_url = EXCLUDED.image_url,
                images = EXCLUDED.images,
                in_stock = EXCLUDED.in_stock,
                stock_quantity = EXCLUDED.stock_quantity,
                rating = EXCLUDED.rating,
                review_count = EXCLUDED.review_count,
                tags = EXCLUDED.tags,
                updated_at = now()
            ",
        )
        .bind(&product.name)
        .bind(product.slug())
        .bind(&product.description)
        .bind(product.price)
        .bind(product.compare_price)
        .bind(category_id)
        .bind(&product.image_url)
        .bind(&product.images)
        .bind(product.in_stock)
        .bind(product.stock_quantity)
        .bind(product.rating)
        .bind(product.review_count)
        .bind(&product.tags)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!("Seeding complete!");
    info!("  Categories upserted: {}", file.categories.len());
    info!("  Products upserted: {}", file.products.len());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalog_is_valid() {
        let file: SeedFile = serde_yaml::from_str(include_str!("../../seed/catalog.yaml")).unwrap();
        assert_eq!(validate(&file), Vec::<String>::new());
        assert_eq!(file.categories[1].slug(), "tea-coffee");
        assert_eq!(file.products[0].price, Decimal::new(49900, 2));
        assert!(!file.products[4].in_stock);
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let file: SeedFile = serde_yaml::from_str(
            r#"
categories:
  - name: Spices
  - name: spices
products:
  - name: Pepper
    category: herbs
    price: "-1"
    rating: "6"
  - name: pepper
    price: "10"
"#,
        )
        .unwrap();

        let errors = validate(&file);
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors.contains(&r#"duplicate category slug "spices""#.to_string()));
        assert!(errors.contains(&r#"duplicate product slug "pepper""#.to_string()));
        assert!(errors.iter().any(|e| e.contains("unknown category")));
    }

    #[test]
    fn test_products_default_to_in_stock() {
        let file: SeedFile =
            serde_yaml::from_str("products:\n  - name: Tea\n    price: \"5\"\n").unwrap();
        assert!(file.products[0].in_stock);
        assert!(file.categories.is_empty());
    }
}

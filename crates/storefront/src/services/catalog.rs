//! Read-only product and category queries.
//!
//! Reads go through an anonymous store session and are cached with `moka`.
//! Search queries are not cached.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Deserializer};
use tracing::{debug, instrument};

use bazaar_core::{Category, CategoryId, Product, ProductId};

use crate::remote::{Filter, Query, RemoteError, RemoteStore, Table, from_rows};

/// Number of products on the featured shelf.
pub const FEATURED_LIMIT: usize = 8;

/// Optional narrowing of the product listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductFilter {
    /// An empty `category=` means no category.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub category: Option<CategoryId>,
    /// Matched case-insensitively against name and description.
    pub q: Option<String>,
}

impl ProductFilter {
    /// Search text with wildcards stripped; `None` if nothing is left.
    fn search_text(&self) -> Option<String> {
        self.q
            .as_deref()
            .map(|q| q.replace(['%', '*'], "").trim().to_owned())
            .filter(|q| !q.is_empty())
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<CategoryId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    Products(Option<CategoryId>),
    Featured,
    Product(ProductId),
    Categories,
}

#[derive(Debug, Clone)]
enum CacheValue {
    Products(Arc<Vec<Product>>),
    Product(Box<Product>),
    Categories(Arc<Vec<Category>>),
}

/// Cached catalog reader.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    store: Arc<dyn RemoteStore>,
    cache: Cache<CacheKey, CacheValue>,
}

impl Catalog {
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(ttl)
            .build();

        Self {
            inner: Arc::new(CatalogInner { store, cache }),
        }
    }

    /// In-stock products, newest first.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the select fails.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        filter: &ProductFilter,
    ) -> Result<Arc<Vec<Product>>, RemoteError> {
        let search = filter.search_text();
        let cache_key = CacheKey::Products(filter.category);

        if search.is_none()
            && let Some(CacheValue::Products(products)) = self.inner.cache.get(&cache_key).await
        {
            debug!("Cache hit for products");
            return Ok(products);
        }

        let mut query = Query::new()
            .filter(Filter::eq("in_stock", true))
            .order_by("created_at", false);
        if let Some(category) = filter.category {
            query = query.filter(Filter::eq_id("category_id", category));
        }
        if let Some(text) = &search {
            let pattern = format!("%{text}%");
            query = query.filter(Filter::any_of(vec![
                Filter::ilike("name", pattern.clone()),
                Filter::ilike("description", pattern),
            ]));
        }

        let products = Arc::new(from_rows::<Product>(
            self.inner.store.select(Table::Products, &query).await?,
        )?);

        if search.is_none() {
            self.inner
                .cache
                .insert(cache_key, CacheValue::Products(Arc::clone(&products)))
                .await;
        }
        Ok(products)
    }

    /// Highest-rated in-stock products.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the select fails.
    #[instrument(skip(self))]
    pub async fn featured_products(&self) -> Result<Arc<Vec<Product>>, RemoteError> {
        if let Some(CacheValue::Products(products)) =
            self.inner.cache.get(&CacheKey::Featured).await
        {
            debug!("Cache hit for featured products");
            return Ok(products);
        }

        let query = Query::new()
            .filter(Filter::eq("in_stock", true))
            .order_by("rating", false)
            .limit(FEATURED_LIMIT);
        let products = Arc::new(from_rows::<Product>(
            self.inner.store.select(Table::Products, &query).await?,
        )?);

        self.inner
            .cache
            .insert(CacheKey::Featured, CacheValue::Products(Arc::clone(&products)))
            .await;
        Ok(products)
    }

    /// One product by id, in stock or not.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the select fails.
    #[instrument(skip(self), fields(product = %id))]
    pub async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RemoteError> {
        let cache_key = CacheKey::Product(id);
        if let Some(CacheValue::Product(product)) = self.inner.cache.get(&cache_key).await {
            debug!("Cache hit for product");
            return Ok(Some(*product));
        }

        let query = Query::new().filter(Filter::eq_id("id", id)).limit(1);
        let product = from_rows::<Product>(self.inner.store.select(Table::Products, &query).await?)?
            .into_iter()
            .next();

        if let Some(product) = &product {
            self.inner
                .cache
                .insert(cache_key, CacheValue::Product(Box::new(product.clone())))
                .await;
        }
        Ok(product)
    }

    /// All categories by name.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the select fails.
    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Arc<Vec<Category>>, RemoteError> {
        if let Some(CacheValue::Categories(categories)) =
            self.inner.cache.get(&CacheKey::Categories).await
        {
            debug!("Cache hit for categories");
            return Ok(categories);
        }

        let query = Query::new().order_by("name", true);
        let categories = Arc::new(from_rows::<Category>(
            self.inner.store.select(Table::Categories, &query).await?,
        )?);

        self.inner
            .cache
            .insert(
                CacheKey::Categories,
                CacheValue::Categories(Arc::clone(&categories)),
            )
            .await;
        Ok(categories)
    }

    /// Round-trip to the store; used by the readiness probe.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the store is unreachable.
    pub async fn ping(&self) -> Result<(), RemoteError> {
        self.inner
            .store
            .select(Table::Categories, &Query::new().limit(1))
            .await
            .map(|_| ())
    }

    /// Invalidate all cached data.
    pub async fn invalidate_all(&self) {
        self.inner.cache.invalidate_all();
        self.inner.cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::remote::Connector;
    use crate::remote::memory::{MemoryBackend, Operation};

    fn product(name: &str, day: u32, rating: i64) -> Product {
        let mut p = Product::new(ProductId::random(), name, Decimal::new(100, 0));
        p.created_at = Some(Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap());
        p.rating = Some(Decimal::new(rating, 1));
        p
    }

    async fn catalog(products: &[Product]) -> (MemoryBackend, Catalog) {
        let backend = MemoryBackend::new();
        backend.seed_products(products).await.unwrap();
        let catalog = Catalog::new(backend.connect(), Duration::from_secs(60));
        (backend, catalog)
    }

    #[test]
    fn test_filter_treats_blank_category_as_none() {
        let filter: ProductFilter =
            serde_json::from_value(serde_json::json!({"category": "", "q": "tea"})).unwrap();
        assert_eq!(filter.category, None);
        assert_eq!(filter.search_text().as_deref(), Some("tea"));

        let bad = serde_json::from_value::<ProductFilter>(serde_json::json!({"category": "x"}));
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_listing_is_in_stock_newest_first() {
        let old = product("Old Tea", 1, 40);
        let new = product("New Tea", 5, 30);
        let mut gone = product("Gone Tea", 9, 50);
        gone.in_stock = Some(false);
        let (_backend, catalog) = catalog(&[old, new, gone]).await;

        let names: Vec<String> = catalog
            .list_products(&ProductFilter::default())
            .await
            .unwrap()
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["New Tea", "Old Tea"]);
    }

    #[tokio::test]
    async fn test_search_matches_name_or_description() {
        let mut chai = product("Masala Chai", 1, 40);
        chai.description = Some("Spiced black tea".into());
        let mut mug = product("Clay Mug", 2, 40);
        mug.description = Some("For your CHAI".into());
        let salt = product("Rock Salt", 3, 40);
        let (_backend, catalog) = catalog(&[chai, mug, salt]).await;

        let filter = ProductFilter {
            category: None,
            q: Some(" chai ".into()),
        };
        let found = catalog.list_products(&filter).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_category_filter() {
        let spices = CategoryId::random();
        let mut pepper = product("Pepper", 1, 40);
        pepper.category_id = Some(spices);
        let (_backend, catalog) = catalog(&[pepper, product("Mug", 2, 40)]).await;

        let filter = ProductFilter {
            category: Some(spices),
            q: None,
        };
        let found = catalog.list_products(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Pepper");
    }

    #[tokio::test]
    async fn test_featured_by_rating_limited() {
        let products: Vec<Product> = (1..=10)
            .map(|i| product(&format!("p{i}"), i, i64::from(i) * 5))
            .collect();
        let (_backend, catalog) = catalog(&products).await;

        let featured = catalog.featured_products().await.unwrap();
        assert_eq!(featured.len(), FEATURED_LIMIT);
        assert_eq!(featured[0].name, "p10");
    }

    #[tokio::test]
    async fn test_listing_is_cached() {
        let (backend, catalog) = catalog(&[product("Tea", 1, 40)]).await;

        catalog.list_products(&ProductFilter::default()).await.unwrap();
        backend.fail_next(Operation::Select, None).await;
        let cached = catalog.list_products(&ProductFilter::default()).await;
        assert!(cached.is_ok());

        catalog.invalidate_all().await;
        assert!(catalog.list_products(&ProductFilter::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_get_product_and_categories() {
        let tea = product("Tea", 1, 40);
        let (backend, catalog) = catalog(std::slice::from_ref(&tea)).await;
        backend
            .seed_categories(&[
                Category::new(CategoryId::random(), "Textiles"),
                Category::new(CategoryId::random(), "Spices"),
            ])
            .await
            .unwrap();

        assert_eq!(catalog.get_product(tea.id).await.unwrap(), Some(tea));
        assert_eq!(catalog.get_product(ProductId::random()).await.unwrap(), None);

        let names: Vec<String> = catalog
            .list_categories()
            .await
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["Spices", "Textiles"]);
    }
}

//! Catalog route handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Serialize;
use tracing::instrument;

use bazaar_core::{Category, Product, ProductId};

use crate::error::{AppError, Result};
use crate::services::ProductFilter;
use crate::state::AppState;

/// A product as sent to the browser, with its sale badge worked out.
#[derive(Debug, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    product: Product,
    on_sale: bool,
    discount_percent: Option<u32>,
}

impl From<&Product> for ProductView {
    fn from(product: &Product) -> Self {
        Self {
            on_sale: product.is_on_sale(),
            discount_percent: product.discount_percent(),
            product: product.clone(),
        }
    }
}

fn views(products: &[Product]) -> Vec<ProductView> {
    products.iter().map(ProductView::from).collect()
}

/// In-stock products, newest first, optionally narrowed by category and
/// search text.
#[instrument(skip(state))]
pub async fn index(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<Vec<ProductView>>> {
    let products = state.catalog().list_products(&filter).await?;
    Ok(Json(views(&products)))
}

#[instrument(skip(state))]
pub async fn featured(State(state): State<AppState>) -> Result<Json<Vec<ProductView>>> {
    let products = state.catalog().featured_products().await?;
    Ok(Json(views(&products)))
}

#[instrument(skip(state))]
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<Json<ProductView>> {
    state
        .catalog()
        .get_product(id)
        .await?
        .map(|product| Json(ProductView::from(&product)))
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))
}

#[instrument(skip(state))]
pub async fn categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    let categories = state.catalog().list_categories().await?;
    Ok(Json(categories.to_vec()))
}

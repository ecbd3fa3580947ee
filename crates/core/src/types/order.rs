//! Checkout arithmetic and shipping-form validation.
//!
//! Everything here runs before any remote call: a form that fails
//! validation never reaches the order tables.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::email::{Email, EmailError};
use super::price::round_money;
use super::status::AddressType;

/// Flat shipping fee and tax rate applied at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Flat fee added to every order.
    pub shipping_fee: Decimal,
    /// Tax as a fraction of the subtotal (0.18 = 18%).
    pub tax_rate: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            shipping_fee: Decimal::new(50, 0),
            tax_rate: Decimal::new(18, 2),
        }
    }
}

/// Derived totals for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    /// Apply the policy to a cart subtotal.
    ///
    /// Tax is charged on the subtotal only, not on shipping.
    #[must_use]
    pub fn compute(subtotal: Decimal, policy: &PricingPolicy) -> Self {
        let subtotal = round_money(subtotal);
        let shipping = round_money(policy.shipping_fee);
        let tax = round_money(subtotal * policy.tax_rate);
        Self {
            subtotal,
            shipping,
            tax,
            total: subtotal + shipping + tax,
        }
    }
}

/// Shipping-form validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShippingError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),
}

fn default_country() -> String {
    "India".to_owned()
}

/// The shipping form submitted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub landmark: Option<String>,
    #[serde(default)]
    pub address_type: AddressType,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl ShippingDetails {
    /// Check required fields, then the email format.
    ///
    /// Whitespace-only values count as missing.
    ///
    /// # Errors
    ///
    /// Returns [`ShippingError::MissingFields`] listing every empty required
    /// field, or [`ShippingError::InvalidEmail`] if the email is malformed.
    pub fn validate(&self) -> Result<Email, ShippingError> {
        let required: [(&'static str, &str); 8] = [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("address", &self.address),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ];

        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(ShippingError::MissingFields(missing));
        }

        Ok(Email::parse(&self.email)?)
    }

    /// Full name as printed on the label.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

use serde::{Deserialize, Serialize};

/// Stock value an admin sets to mark a product as explicitly infinite.
pub const INFINITE_STOCK: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    /// NULL = unlimited, negative = explicitly infinite, otherwise units left
    pub stock: Option<i64>,
    pub needs_license: bool,
    pub download_link: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockLevel {
    Unlimited,
    Finite(i64),
}

impl Product {
    pub fn stock_level(&self) -> StockLevel {
        match self.stock {
            Some(n) if n >= 0 => StockLevel::Finite(n),
            _ => StockLevel::Unlimited,
        }
    }

    pub fn is_sold_out(&self) -> bool {
        matches!(self.stock_level(), StockLevel::Finite(n) if n <= 0)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub needs_license: bool,
    #[serde(default)]
    pub download_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub price_cents: Option<i64>,
    pub stock: Option<Option<i64>>,
    pub needs_license: Option<bool>,
    pub download_link: Option<Option<String>>,
}

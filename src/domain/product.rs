use super::money::Price;
use serde::{Deserialize, Serialize};

pub type ProductId = i64;

/// A catalog entry. The catalog is authoritative for price at order-compute time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub price: Price,
    #[serde(default)]
    pub number_in_stock: Option<i64>,
}

impl Product {
    pub fn in_stock(&self) -> bool {
        self.number_in_stock.is_some_and(|count| count > 0)
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier assigned by the store on insert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProductId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(ProductId)
    }
}

/// A validated-or-not submission, before the store assigns an id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewProduct {
    pub owner_id: u64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    /// Original image references in submission order.
    pub images: Vec<String>,
}

/// The authoritative Product Record.
///
/// `derived_images` starts empty and may lag behind `images` indefinitely: processing is
/// asynchronous and a failed item leaves no trace here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub owner_id: u64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub images: Vec<String>,
    #[serde(default)]
    pub derived_images: Vec<String>,
}

impl Product {
    pub fn from_new(id: ProductId, new: NewProduct) -> Self {
        Self {
            id,
            owner_id: new.owner_id,
            name: new.name,
            description: new.description,
            price: new.price,
            images: new.images,
            derived_images: Vec::new(),
        }
    }

    pub fn summary(&self) -> ProductSummary {
        ProductSummary {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
        }
    }
}

/// Row returned by listing queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSummary {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Decimal,
}

/// Conjunctive listing predicate. `None` fields are left out of the predicate entirely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub owner_id: u64,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    /// Case-insensitive substring of the product name.
    pub name_contains: Option<String>,
}

impl ListFilter {
    pub fn for_owner(owner_id: u64) -> Self {
        Self {
            owner_id,
            ..Default::default()
        }
    }

    pub fn matches(&self, product: &Product) -> bool {
        if product.owner_id != self.owner_id {
            return false;
        }
        if let Some(min) = self.min_price
            && product.price < min
        {
            return false;
        }
        if let Some(max) = self.max_price
            && product.price > max
        {
            return false;
        }
        if let Some(needle) = &self.name_contains
            && !product.name.to_lowercase().contains(&needle.to_lowercase())
        {
            return false;
        }
        true
    }
}

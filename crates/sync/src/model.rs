use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One spreadsheet row reduced to the columns the sync reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetRow {
    pub title: String,
    pub price: String,
}

impl SheetRow {
    /// `None` for rows with fewer than two cells.
    pub fn from_cells(cells: &[String]) -> Option<Self> {
        match cells {
            [title, price, ..] => Some(Self { title: title.clone(), price: price.clone() }),
            _ => None,
        }
    }
}

pub fn rows_from_cells(cells: &[Vec<String>]) -> Vec<SheetRow> {
    cells.iter().filter_map(|row| SheetRow::from_cells(row)).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Draft,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub price: String,
}

/// Storefront product payload built from a sheet row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub title: String,
    pub status: ProductStatus,
    pub variants: Vec<Variant>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("product title is empty")]
    EmptyTitle,
    #[error("product `{title}` has no variants")]
    MissingVariant { title: String },
    #[error("product `{title}` has an invalid price `{price}`")]
    InvalidPrice { title: String, price: String },
    #[error("product `{title}` has a negative price `{price}`")]
    NegativePrice { title: String, price: String },
}

impl ProductDraft {
    pub fn from_row(row: &SheetRow) -> Result<Self, ValidationError> {
        let draft = Self {
            title: row.title.trim().to_string(),
            status: ProductStatus::Active,
            variants: vec![Variant { price: row.price.trim().to_string() }],
        };
        draft.validate()?;
        Ok(draft)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.variants.is_empty() {
            return Err(ValidationError::MissingVariant { title: self.title.clone() });
        }
        for variant in &self.variants {
            let price = Decimal::from_str(variant.price.trim()).map_err(|_| {
                ValidationError::InvalidPrice {
                    title: self.title.clone(),
                    price: variant.price.clone(),
                }
            })?;
            if price.is_sign_negative() && !price.is_zero() {
                return Err(ValidationError::NegativePrice {
                    title: self.title.clone(),
                    price: variant.price.clone(),
                });
            }
        }
        Ok(())
    }
}

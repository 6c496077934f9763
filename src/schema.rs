//! Column schema of the feature vector and the category catalog derived from it.
//!
//! The schema artifact is the authoritative column order the model was trained
//! on. Numeric columns are unprefixed (`year`, `km_driven`, `owner`); one-hot
//! indicator columns are `brand_<name>`, `fuel_<name>` and
//! `transmission_<name>`, with lowercase suffixes.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{EstimateError, Result};

pub const BRAND_PREFIX: &str = "brand_";
pub const FUEL_PREFIX: &str = "fuel_";
pub const TRANSMISSION_PREFIX: &str = "transmission_";

/// The dataset only one-hot encodes one of these; the other is the baseline.
pub const TRANSMISSION_TYPES: [&str; 2] = ["manual", "automatic"];

#[derive(Deserialize)]
struct SchemaJson {
    data_columns: Vec<String>,
}

/// Numeric request fields, written into the vector without encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericField {
    Year,
    KmDriven,
    Owner,
}

impl NumericField {
    pub const ALL: [NumericField; 3] = [Self::Year, Self::KmDriven, Self::Owner];

    pub fn name(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::KmDriven => "km_driven",
            Self::Owner => "owner",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// Kinds of one-hot encoded request fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Brand,
    Fuel,
    Transmission,
}

impl Category {
    pub const ALL: [Category; 3] = [Self::Brand, Self::Fuel, Self::Transmission];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Brand => BRAND_PREFIX,
            Self::Fuel => FUEL_PREFIX,
            Self::Transmission => TRANSMISSION_PREFIX,
        }
    }
}

/// Ordered, unique column names plus the lookup tables built from them once.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    numeric: [Option<usize>; 3],
    indicators: HashMap<Category, HashMap<String, usize>>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<String>) -> Result<Self> {
        if columns.is_empty() {
            return Err(EstimateError::corrupt("schema", "data_columns is empty"));
        }

        let mut index = HashMap::with_capacity(columns.len());
        let mut indicators: HashMap<Category, HashMap<String, usize>> = HashMap::new();
        let mut numeric = [None; 3];

        for (i, name) in columns.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(EstimateError::corrupt(
                    "schema",
                    format!("duplicate column {name:?}"),
                ));
            }

            if let Some(field) = NumericField::from_name(name) {
                numeric[field as usize] = Some(i);
                continue;
            }

            if let Some((category, suffix)) = split_indicator(name) {
                if suffix.is_empty() {
                    return Err(EstimateError::corrupt(
                        "schema",
                        format!("indicator column {name:?} has no category"),
                    ));
                }
                if suffix != suffix.to_lowercase() {
                    return Err(EstimateError::corrupt(
                        "schema",
                        format!("indicator column {name:?} is not lowercase"),
                    ));
                }
                indicators
                    .entry(category)
                    .or_default()
                    .insert(suffix.to_owned(), i);
            }
        }

        Ok(Self {
            columns,
            index,
            numeric,
            indicators,
        })
    }

    /// Parse a schema document of the form `{"data_columns": [..]}`.
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: SchemaJson =
            serde_json::from_str(text).map_err(|e| EstimateError::corrupt("schema", e))?;
        Self::new(doc.data_columns)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn numeric_position(&self, field: NumericField) -> Option<usize> {
        self.numeric[field as usize]
    }

    /// Index of the indicator column for `value`, which must already be lowercase.
    pub fn indicator_position(&self, category: Category, value: &str) -> Option<usize> {
        self.indicators.get(&category)?.get(value).copied()
    }

    fn suffixes(&self, category: Category) -> Vec<String> {
        let mut out: Vec<String> = self
            .indicators
            .get(&category)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

fn split_indicator(name: &str) -> Option<(Category, &str)> {
    Category::ALL
        .into_iter()
        .find_map(|c| name.strip_prefix(c.prefix()).map(|rest| (c, rest)))
}

/// Client-facing option lists for brand, fuel and transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCatalog {
    pub brands: Vec<String>,
    pub fuel_types: Vec<String>,
    pub transmission_types: Vec<String>,
}

impl CategoryCatalog {
    pub fn from_schema(schema: &ColumnSchema) -> Self {
        Self {
            brands: schema.suffixes(Category::Brand),
            fuel_types: schema.suffixes(Category::Fuel),
            transmission_types: TRANSMISSION_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn example() -> ColumnSchema {
        ColumnSchema::new(cols(&[
            "brand_toyota",
            "brand_honda",
            "fuel_petrol",
            "fuel_diesel",
            "transmission_manual",
            "year",
            "km_driven",
            "owner",
        ]))
        .unwrap()
    }

    #[test]
    fn positions_follow_column_order() {
        let s = example();
        assert_eq!(s.len(), 8);
        assert_eq!(s.position("fuel_diesel"), Some(3));
        assert_eq!(s.numeric_position(NumericField::Year), Some(5));
        assert_eq!(s.numeric_position(NumericField::Owner), Some(7));
        assert_eq!(s.indicator_position(Category::Brand, "honda"), Some(1));
        assert_eq!(s.indicator_position(Category::Transmission, "manual"), Some(4));
        assert_eq!(s.indicator_position(Category::Transmission, "automatic"), None);
        assert_eq!(s.indicator_position(Category::Fuel, "toyota"), None);
    }

    #[test]
    fn catalog_is_sorted_and_transmissions_fixed() {
        let catalog = CategoryCatalog::from_schema(&example());
        assert_eq!(catalog.brands, vec!["honda", "toyota"]);
        assert_eq!(catalog.fuel_types, vec!["diesel", "petrol"]);
        assert_eq!(catalog.transmission_types, vec!["manual", "automatic"]);
    }

    #[test]
    fn missing_numeric_columns_are_tolerated() {
        let s = ColumnSchema::new(cols(&["brand_kia", "year"])).unwrap();
        assert_eq!(s.numeric_position(NumericField::KmDriven), None);
        assert_eq!(s.numeric_position(NumericField::Year), Some(1));
    }

    #[test]
    fn rejects_duplicates_empty_and_uppercase() {
        assert!(matches!(
            ColumnSchema::new(cols(&["year", "year"])),
            Err(EstimateError::ArtifactCorrupt { .. })
        ));
        assert!(ColumnSchema::new(vec![]).is_err());
        assert!(ColumnSchema::new(cols(&["brand_Toyota"])).is_err());
        assert!(ColumnSchema::new(cols(&["fuel_"])).is_err());
    }

    #[test]
    fn parses_json_and_requires_data_columns() {
        let s = ColumnSchema::from_json(r#"{"data_columns": ["year", "brand_bmw"], "v": 2}"#)
            .unwrap();
        assert_eq!(s.columns(), &["year".to_string(), "brand_bmw".to_string()]);

        let err = ColumnSchema::from_json(r#"{"columns": ["year"]}"#).unwrap_err();
        assert!(err.to_string().contains("data_columns"));
    }
}

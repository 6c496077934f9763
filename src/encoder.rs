//! Request validation, feature encoding and price estimation.

use serde::{de, Deserialize, Deserializer};
use std::{fmt, str::FromStr, sync::Arc};

use crate::error::{EstimateError, Result, ValidationError};
use crate::schema::{Category, NumericField};
use crate::store::{ArtifactStore, Artifacts};

/// Request fields as they arrive: any may be absent, numbers may be text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub brand: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub year: Option<String>,
    #[serde(default, alias = "fuel type", deserialize_with = "lenient_string")]
    pub fuel_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub transmission: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub km_driven: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub owner: Option<String>,
}

/// Accept a string or a bare number for the same field.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Lenient;

    impl<'de> de::Visitor<'de> for Lenient {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_owned()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Lenient)
}

/// A validated request. Categorical values are trimmed and lowercased.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub brand: String,
    pub year: i64,
    pub fuel_type: String,
    pub transmission: String,
    pub km_driven: f64,
    pub owner: i64,
}

impl PredictionRequest {
    pub fn new(
        brand: &str,
        year: i64,
        fuel_type: &str,
        transmission: &str,
        km_driven: f64,
        owner: i64,
    ) -> Self {
        Self {
            brand: canonical(brand),
            year,
            fuel_type: canonical(fuel_type),
            transmission: canonical(transmission),
            km_driven,
            owner,
        }
    }

    pub fn numeric(&self, field: NumericField) -> f64 {
        match field {
            NumericField::Year => self.year as f64,
            NumericField::KmDriven => self.km_driven,
            NumericField::Owner => self.owner as f64,
        }
    }

    pub fn category(&self, category: Category) -> &str {
        match category {
            Category::Brand => &self.brand,
            Category::Fuel => &self.fuel_type,
            Category::Transmission => &self.transmission,
        }
    }
}

fn canonical(value: &str) -> String {
    value.trim().to_lowercase()
}

impl TryFrom<&RawRequest> for PredictionRequest {
    type Error = ValidationError;

    fn try_from(raw: &RawRequest) -> std::result::Result<Self, Self::Error> {
        // presence of every field is checked before any parsing
        let brand = required("brand", &raw.brand)?;
        let year = required("year", &raw.year)?;
        let fuel_type = required("fuel_type", &raw.fuel_type)?;
        let transmission = required("transmission", &raw.transmission)?;
        let km_driven = required("km_driven", &raw.km_driven)?;
        let owner = required("owner", &raw.owner)?;

        let year: i64 = parse_number("year", year)?;
        let km_driven: f64 = parse_number("km_driven", km_driven)?;
        if !km_driven.is_finite() {
            return Err(ValidationError::InvalidNumber {
                field: "km_driven",
                value: km_driven.to_string(),
                cause: "value is not finite".into(),
            });
        }
        let owner: i64 = parse_number("owner", owner)?;

        Ok(Self::new(brand, year, fuel_type, transmission, km_driven, owner))
    }
}

fn required<'a>(
    field: &'static str,
    value: &'a Option<String>,
) -> std::result::Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField { field }),
    }
}

fn parse_number<T>(field: &'static str, value: &str) -> std::result::Result<T, ValidationError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ValidationError::InvalidNumber {
        field,
        value: value.to_owned(),
        cause: e.to_string(),
    })
}

/// Dense single-row input, index-aligned with the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn nonzero(&self) -> usize {
        self.values.iter().filter(|x| **x != 0.0).count()
    }
}

impl Artifacts {
    /// Build the unscaled vector: numeric fields copied, one-hot indicators set.
    ///
    /// Numeric columns absent from the schema are skipped. Categories the
    /// schema has no column for leave every indicator of that kind at zero.
    pub fn encode(&self, req: &PredictionRequest) -> FeatureVector {
        let mut v = FeatureVector::zeros(self.schema.len());

        for field in NumericField::ALL {
            if let Some(i) = self.schema.numeric_position(field) {
                v.values[i] = req.numeric(field);
            }
        }

        for category in Category::ALL {
            if let Some(i) = self.schema.indicator_position(category, req.category(category)) {
                v.values[i] = 1.0;
            }
        }

        v
    }

    /// Rescale the numeric positions in place; indicators are never touched.
    pub fn scale(&self, v: &mut FeatureVector) {
        let Some(bound) = &self.scaler else {
            return;
        };

        let input: Vec<f64> = bound
            .positions
            .iter()
            .map(|p| p.map_or(0.0, |i| v.values[i]))
            .collect();
        let scaled = bound.scaler.transform(&input);

        for (pos, value) in bound.positions.iter().zip(scaled) {
            if let Some(i) = pos {
                v.values[*i] = value;
            }
        }
    }

    /// Encoded and scaled vector, exactly as the model receives it.
    pub fn prepare(&self, req: &PredictionRequest) -> FeatureVector {
        let mut v = self.encode(req);
        self.scale(&mut v);
        v
    }

    /// Raw model output for an already prepared vector.
    pub fn predict(&self, v: &FeatureVector) -> Result<f64> {
        let y = self.model.predict(v.as_slice())?;
        if !y.is_finite() {
            return Err(EstimateError::Inference(format!("model returned {y}")));
        }
        Ok(y)
    }

    pub fn estimate(&self, req: &PredictionRequest) -> Result<f64> {
        let v = self.prepare(req);
        to_cents(self.predict(&v)?)
    }
}

/// Round to two decimal places, ties to even.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round_ties_even() / 100.0
}

/// Final price: [`round2`], failing if scaling by 100 left the finite range.
pub fn to_cents(y: f64) -> Result<f64> {
    let price = round2(y);
    if !price.is_finite() {
        return Err(EstimateError::Inference(format!(
            "model output {y} cannot be rounded to cents"
        )));
    }
    Ok(price)
}

/// Price estimator bound to a shared store.
#[derive(Clone)]
pub struct Estimator {
    store: Arc<ArtifactStore>,
}

impl Estimator {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Validate, encode and predict. Validation runs before the store is touched.
    pub fn estimate(&self, raw: &RawRequest) -> Result<f64> {
        let req = PredictionRequest::try_from(raw)?;
        self.estimate_request(&req)
    }

    pub fn estimate_request(&self, req: &PredictionRequest) -> Result<f64> {
        self.store.snapshot()?.estimate(req)
    }
}

//! Numeric feature scalers applied before inference.

use serde::Deserialize;

use crate::error::{EstimateError, Result};
use crate::schema::NumericField;

/// Transform over a fixed list of named numeric columns.
pub trait Scaler: Send + Sync {
    /// Column names, in the order `transform` expects its input.
    fn columns(&self) -> &[String];

    /// Scale one row of values laid out as `columns()`.
    fn transform(&self, values: &[f64]) -> Vec<f64>;
}

fn default_columns() -> Vec<String> {
    NumericField::ALL.iter().map(|f| f.name().to_string()).collect()
}

/// `(x - mean) / scale`.
#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler for StandardScaler {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| {
                // constant training column
                let s = if *s == 0.0 { 1.0 } else { *s };
                (x - m) / s
            })
            .collect()
    }
}

/// `x * scale + min`.
#[derive(Debug, Clone, Deserialize)]
pub struct MinMaxScaler {
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,
    pub min: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler for MinMaxScaler {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.min.iter().zip(&self.scale))
            .map(|(x, (m, s))| x * s + m)
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ScalerJson {
    Standard(StandardScaler),
    MinMax(MinMaxScaler),
}

/// Decode a JSON scaler artifact and check its shape.
pub fn from_json(text: &str) -> Result<Box<dyn Scaler>> {
    let doc: ScalerJson =
        serde_json::from_str(text).map_err(|e| EstimateError::corrupt("scaler", e))?;
    let (columns, params): (&[String], [&[f64]; 2]) = match &doc {
        ScalerJson::Standard(s) => (&s.columns[..], [&s.mean[..], &s.scale[..]]),
        ScalerJson::MinMax(s) => (&s.columns[..], [&s.min[..], &s.scale[..]]),
    };
    validate(columns, &params)?;
    let scaler: Box<dyn Scaler> = match doc {
        ScalerJson::Standard(s) => Box::new(s),
        ScalerJson::MinMax(s) => Box::new(s),
    };
    Ok(scaler)
}

fn validate(columns: &[String], params: &[&[f64]]) -> Result<()> {
    if columns.is_empty() {
        return Err(EstimateError::corrupt("scaler", "no columns"));
    }
    if let Some(c) = columns.iter().find(|c| NumericField::from_name(c).is_none()) {
        return Err(EstimateError::corrupt(
            "scaler",
            format!("column {c:?} is not a numeric feature"),
        ));
    }
    if let Some(p) = params.iter().find(|p| p.len() != columns.len()) {
        return Err(EstimateError::corrupt(
            "scaler",
            format!("{} parameters for {} columns", p.len(), columns.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_scaler_centres_and_scales() {
        let s = from_json(
            r#"{"kind":"standard","mean":[2010.0,50000.0,1.0],"scale":[5.0,25000.0,0.0]}"#,
        )
        .unwrap();
        assert_eq!(s.columns(), &["year", "km_driven", "owner"]);
        assert_eq!(s.transform(&[2015.0, 100000.0, 3.0]), vec![1.0, 2.0, 2.0]);
    }

    #[test]
    fn min_max_scaler_uses_fitted_scale_and_offset() {
        let s = from_json(
            r#"{"kind":"min_max","columns":["km_driven"],"min":[-0.5],"scale":[0.00001]}"#,
        )
        .unwrap();
        assert_eq!(s.columns(), &["km_driven"]);
        let out = s.transform(&[100000.0]);
        assert!((out[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_shapes() {
        let short = r#"{"kind":"standard","mean":[1.0],"scale":[1.0,1.0,1.0]}"#;
        assert!(matches!(from_json(short), Err(EstimateError::ArtifactCorrupt { .. })));

        let one_hot = r#"{"kind":"standard","columns":["brand_bmw"],"mean":[0.0],"scale":[1.0]}"#;
        let err = from_json(one_hot).err().unwrap();
        assert!(err.to_string().contains("brand_bmw"));

        assert!(from_json("not json").is_err());
    }
}

//! Used-car price estimation: artifact loading, feature encoding and inference.
//!
//! [`store::ArtifactStore`] holds the column schema, the regression model and
//! an optional numeric scaler. [`encoder::Estimator`] turns a loosely typed
//! request into the feature vector the model was trained on and returns the
//! estimated price rounded to two decimals.

pub mod config;
pub mod encoder;
pub mod error;
pub mod model;
pub mod scaler;
pub mod schema;
pub mod server;
pub mod store;

pub use encoder::{Estimator, FeatureVector, PredictionRequest, RawRequest};
pub use error::{EstimateError, ValidationError};
pub use schema::{CategoryCatalog, ColumnSchema};
pub use store::{ArtifactPaths, ArtifactStore, Artifacts};

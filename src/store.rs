//! Artifact store: owns the schema, model and optional scaler.
//!
//! Loading builds a complete [`Artifacts`] snapshot first and only then swaps
//! it in, so readers either see the previous snapshot or the new one, never a
//! mix. Readers take an `Arc` and run without holding the lock.

use parking_lot::RwLock;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::{EstimateError, Result};
use crate::model::{self, Regressor};
use crate::scaler::{self, Scaler};
use crate::schema::{CategoryCatalog, ColumnSchema, NumericField};

pub const SCHEMA_FILE: &str = "columns.json";
pub const MODEL_FILE: &str = "car_price_model.json";
pub const SCALER_FILE: &str = "scaler.json";

/// Where the three artifacts live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub schema: PathBuf,
    pub model: PathBuf,
    /// Optional; a missing file means no scaling.
    pub scaler: Option<PathBuf>,
}

impl ArtifactPaths {
    /// Default file names inside one artifacts directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            schema: dir.join(SCHEMA_FILE),
            model: dir.join(MODEL_FILE),
            scaler: Some(dir.join(SCALER_FILE)),
        }
    }
}

pub(crate) struct BoundScaler {
    pub(crate) scaler: Box<dyn Scaler>,
    /// Schema position of each scaler column; `None` when the schema lacks it.
    pub(crate) positions: Vec<Option<usize>>,
}

/// One consistent generation of loaded artifacts.
pub struct Artifacts {
    pub(crate) schema: ColumnSchema,
    catalog: CategoryCatalog,
    pub(crate) model: Box<dyn Regressor>,
    pub(crate) scaler: Option<BoundScaler>,
}

impl Artifacts {
    /// Assemble a snapshot, checking that the pieces agree with each other.
    pub fn new(
        schema: ColumnSchema,
        model: Box<dyn Regressor>,
        scaler: Option<Box<dyn Scaler>>,
    ) -> Result<Self> {
        if let Some(width) = model.n_features() {
            if width != schema.len() {
                return Err(EstimateError::corrupt(
                    "model",
                    format!("model expects {width} features, schema has {}", schema.len()),
                ));
            }
        }

        let scaler = scaler
            .map(|scaler| bind_scaler(&schema, scaler))
            .transpose()?;
        let catalog = CategoryCatalog::from_schema(&schema);

        Ok(Self {
            schema,
            catalog,
            model,
            scaler,
        })
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn catalog(&self) -> &CategoryCatalog {
        &self.catalog
    }

    pub fn has_scaler(&self) -> bool {
        self.scaler.is_some()
    }
}

fn bind_scaler(schema: &ColumnSchema, scaler: Box<dyn Scaler>) -> Result<BoundScaler> {
    let mut positions = Vec::with_capacity(scaler.columns().len());
    for column in scaler.columns() {
        let field = NumericField::from_name(column).ok_or_else(|| {
            EstimateError::corrupt("scaler", format!("column {column:?} is not a numeric feature"))
        })?;
        positions.push(schema.numeric_position(field));
    }
    Ok(BoundScaler { scaler, positions })
}

/// Read and assemble all artifacts from disk without touching any store.
pub fn read_artifacts(paths: &ArtifactPaths) -> Result<Artifacts> {
    let schema = ColumnSchema::from_json(&read_required(&paths.schema)?)
        .map_err(relabel(&paths.schema))?;
    let model = read_model(&paths.model, schema.len())?;

    let scaler = match &paths.scaler {
        Some(path) if path.exists() => {
            Some(scaler::from_json(&read_required(path)?).map_err(relabel(path))?)
        }
        Some(path) => {
            tracing::info!("no scaler at {}; numeric features pass through unscaled", path.display());
            None
        }
        None => None,
    };

    Artifacts::new(schema, model, scaler)
}

fn read_model(path: &Path, in_dim: usize) -> Result<Box<dyn Regressor>> {
    if path.extension().is_some_and(|ext| ext == "pt") {
        if !path.exists() {
            return Err(EstimateError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        return read_torch_model(path, in_dim);
    }
    model::from_json(&read_required(path)?).map_err(relabel(path))
}

#[cfg(feature = "torch")]
fn read_torch_model(path: &Path, in_dim: usize) -> Result<Box<dyn Regressor>> {
    Ok(Box::new(model::TorchModel::load(path, in_dim)?))
}

#[cfg(not(feature = "torch"))]
fn read_torch_model(path: &Path, _in_dim: usize) -> Result<Box<dyn Regressor>> {
    Err(EstimateError::corrupt(
        path.display().to_string(),
        "TorchScript models need the `torch` feature",
    ))
}

fn read_required(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => EstimateError::ArtifactNotFound {
            path: path.to_path_buf(),
        },
        _ => EstimateError::corrupt(path.display().to_string(), e),
    })
}

/// Point a decode error at the file it came from.
fn relabel(path: &Path) -> impl Fn(EstimateError) -> EstimateError + '_ {
    move |e| match e {
        EstimateError::ArtifactCorrupt { reason, .. } => EstimateError::ArtifactCorrupt {
            artifact: path.display().to_string(),
            reason,
        },
        other => other,
    }
}

/// Process-wide holder of the current artifact snapshot.
#[derive(Default)]
pub struct ArtifactStore {
    current: RwLock<Option<Arc<Artifacts>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every artifact and replace the current snapshot.
    ///
    /// Always reloads all three files; on failure the previous snapshot stays.
    pub fn load(&self, paths: &ArtifactPaths) -> Result<Arc<Artifacts>> {
        tracing::info!("loading saved artifacts from {}", paths.schema.display());
        let artifacts = read_artifacts(paths)?;
        let installed = self.install(artifacts);
        tracing::info!(
            "artifacts loaded: columns={} brands={} fuel_types={} scaler={}",
            installed.schema().len(),
            installed.catalog().brands.len(),
            installed.catalog().fuel_types.len(),
            installed.has_scaler()
        );
        Ok(installed)
    }

    /// Swap in an already assembled snapshot.
    pub fn install(&self, artifacts: Artifacts) -> Arc<Artifacts> {
        let artifacts = Arc::new(artifacts);
        *self.current.write() = Some(Arc::clone(&artifacts));
        artifacts
    }

    pub fn snapshot(&self) -> Result<Arc<Artifacts>> {
        self.current.read().clone().ok_or(EstimateError::NotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn list_brands(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.catalog().brands.clone())
    }

    pub fn list_fuel_types(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.catalog().fuel_types.clone())
    }

    pub fn list_transmission_types(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.catalog().transmission_types.clone())
    }
}

//! Regression models the store can serve.
//!
//! A model is anything implementing [`Regressor`]. The exported artifact is a
//! JSON document tagged by `kind`; TorchScript modules are available behind the
//! `torch` feature.

use serde::Deserialize;

use crate::error::{EstimateError, Result};

/// Single-row regression. Implementations are shared across request threads.
pub trait Regressor: Send + Sync {
    /// Predict one value for a row laid out in schema order.
    fn predict(&self, row: &[f64]) -> Result<f64>;

    /// Input width the model was trained with, when it is known up front.
    fn n_features(&self) -> Option<usize>;
}

/// Inverse of the transform applied to the training target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTransform {
    #[default]
    None,
    Log,
    Log1p,
}

impl TargetTransform {
    pub fn invert(self, y: f64) -> f64 {
        match self {
            Self::None => y,
            Self::Log => y.exp(),
            Self::Log1p => y.exp_m1(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub target_transform: TargetTransform,
}

impl Regressor for LinearModel {
    fn predict(&self, row: &[f64]) -> Result<f64> {
        check_width(row, self.coefficients.len())?;
        let y = self
            .coefficients
            .iter()
            .zip(row)
            .fold(self.intercept, |acc, (w, x)| acc + w * x);
        Ok(self.target_transform.invert(y))
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.coefficients.len())
    }
}

/// Node of a regression tree, stored in a flat array with index links.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Random-forest style average of tree outputs.
    #[default]
    Mean,
    /// Boosting style: `base_score + learning_rate * sum`.
    Sum,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<Vec<TreeNode>>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub base_score: f64,
    #[serde(default = "one")]
    pub learning_rate: f64,
    #[serde(default)]
    pub target_transform: TargetTransform,
    /// Width of the training matrix; checked against the schema on load.
    pub n_features: usize,
}

fn one() -> f64 {
    1.0
}

impl TreeEnsemble {
    /// Every tree must be non-empty, with forward-only child links and
    /// in-range feature indices, so evaluation always terminates.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.trees.is_empty() {
            return Err("ensemble has no trees".into());
        }
        for (t, nodes) in self.trees.iter().enumerate() {
            if nodes.is_empty() {
                return Err(format!("tree {t} has no nodes"));
            }
            for (i, node) in nodes.iter().enumerate() {
                if let TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } = *node
                {
                    if feature >= self.n_features {
                        return Err(format!("tree {t} node {i}: feature {feature} out of range"));
                    }
                    for child in [left, right] {
                        if child <= i || child >= nodes.len() {
                            return Err(format!("tree {t} node {i}: bad child link {child}"));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn eval_tree(nodes: &[TreeNode], row: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match nodes[i] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

impl Regressor for TreeEnsemble {
    fn predict(&self, row: &[f64]) -> Result<f64> {
        check_width(row, self.n_features)?;
        let sum: f64 = self.trees.iter().map(|t| Self::eval_tree(t, row)).sum();
        let y = match self.aggregation {
            Aggregation::Mean => sum / self.trees.len() as f64,
            Aggregation::Sum => self.base_score + self.learning_rate * sum,
        };
        Ok(self.target_transform.invert(y))
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.n_features)
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ModelJson {
    Linear(LinearModel),
    TreeEnsemble(TreeEnsemble),
}

/// Decode a JSON model artifact.
pub fn from_json(text: &str) -> Result<Box<dyn Regressor>> {
    let doc: ModelJson =
        serde_json::from_str(text).map_err(|e| EstimateError::corrupt("model", e))?;
    let model: Box<dyn Regressor> = match doc {
        ModelJson::Linear(m) => Box::new(m),
        ModelJson::TreeEnsemble(m) => {
            m.validate().map_err(|e| EstimateError::corrupt("model", e))?;
            Box::new(m)
        }
    };
    Ok(model)
}

fn check_width(row: &[f64], expected: usize) -> Result<()> {
    if row.len() != expected {
        return Err(EstimateError::Inference(format!(
            "feature length mismatch: got {}, expected {}",
            row.len(),
            expected
        )));
    }
    Ok(())
}

#[cfg(feature = "torch")]
pub use torch::TorchModel;

#[cfg(feature = "torch")]
mod torch {
    use std::path::Path;
    use tch::{kind::Kind, CModule, Device, Tensor};

    use super::{check_width, Regressor};
    use crate::error::{EstimateError, Result};

    /// TorchScript regressor taking `[1, n]` and returning a single value.
    pub struct TorchModel {
        model: CModule,
        device: Device,
        in_dim: usize,
    }

    impl TorchModel {
        pub fn load(path: &Path, in_dim: usize) -> Result<Self> {
            let device = Device::Cpu;
            let corrupt = |e: tch::TchError| EstimateError::corrupt(path.display().to_string(), e);

            let model = CModule::load_on_device(path, device).map_err(corrupt)?;

            // Probe output shape with a dummy forward
            let dummy = Tensor::zeros([1, in_dim as i64], (Kind::Float, device));
            let out = model.forward_ts(&[dummy]).map_err(corrupt)?;
            if out.numel() < 1 {
                return Err(EstimateError::corrupt(
                    path.display().to_string(),
                    format!("unexpected model output size: {:?}", out.size()),
                ));
            }

            Ok(Self {
                model,
                device,
                in_dim,
            })
        }
    }

    impl Regressor for TorchModel {
        fn predict(&self, row: &[f64]) -> Result<f64> {
            check_width(row, self.in_dim)?;
            let x: Vec<f32> = row.iter().map(|v| *v as f32).collect();
            let input = Tensor::from_slice(&x)
                .reshape([1, self.in_dim as i64])
                .to_device(self.device);
            let out = self
                .model
                .forward_ts(&[input])
                .map_err(|e| EstimateError::Inference(e.to_string()))?;
            Ok(out.reshape([-1]).double_value(&[0]))
        }

        fn n_features(&self) -> Option<usize> {
            Some(self.in_dim)
        }
    }
}

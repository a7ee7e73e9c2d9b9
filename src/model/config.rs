//! Model configuration.

use serde::{Deserialize, Serialize};

/// Which sequence/feature encoder to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceModel {
    /// Reshape `[batch, time, features]` to `[batch, time * features]`.
    Flat,
    /// LSTM over time; optionally bidirectional.
    Lstm,
    /// Variational recurrent encoder with per-step latent variables.
    Vrnn,
    /// Temporal convolutional network (causal dilated convolutions).
    Tcn,
    /// Image-style strided convolution stack.
    Cnn,
}

impl std::fmt::Display for SequenceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::Lstm => write!(f, "lstm"),
            Self::Vrnn => write!(f, "vrnn"),
            Self::Tcn => write!(f, "tcn"),
            Self::Cnn => write!(f, "cnn"),
        }
    }
}

/// Task-loss class weighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassWeights {
    /// One weight for every example (1.0 leaves the loss unchanged).
    Uniform(f32),
    /// One weight per class, applied per example by its predicted class.
    PerClass(Vec<f32>),
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self::Uniform(1.0)
    }
}

/// Configuration for [`DomainAdaptModel`](super::DomainAdaptModel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: SequenceModel,
    pub num_classes: usize,
    pub num_features: usize,
    pub time_steps: usize,
    /// Hidden width of the sequence encoders.
    pub units: usize,
    /// Enable the adversarial domain branch and source-only task-loss
    /// masking.
    pub adaptation: bool,
    /// Sigmoid-independent outputs instead of softmax-exclusive.
    pub multi_class: bool,
    pub class_weights: ClassWeights,
    /// Batch normalization after each classifier layer.
    pub batch_norm: bool,
    /// Run forward and backward encoders and concatenate their features.
    pub bidirectional: bool,
    /// Gradient reversal in front of the domain classifier; disabling it
    /// feeds the feature through directly.
    pub use_grl: bool,
    /// Add a second adversarial branch fed from the raw input.
    pub two_domain_classifiers: bool,
    /// Insert the 3-layer fully-connected feature extractor between the
    /// encoder and the classifier heads.
    pub use_feature_extractor: bool,
    /// Variational encoder: expose the latent feature instead of the
    /// deterministic hidden state.
    pub use_z: bool,
    /// Numerical floor inside the variational loss terms.
    pub eps: f32,
    /// Attach output histograms to the summaries.
    pub log_outputs: bool,
    /// Seed for weight initialization, dropout masks, and latent samples.
    pub seed: u64,
}

impl ModelConfig {
    /// Configuration with the conventional defaults for a given encoder and
    /// data shape.
    pub fn new(
        model: SequenceModel,
        num_classes: usize,
        num_features: usize,
        time_steps: usize,
    ) -> Self {
        Self {
            model,
            num_classes,
            num_features,
            time_steps,
            units: 100,
            adaptation: true,
            multi_class: false,
            class_weights: ClassWeights::default(),
            batch_norm: false,
            bidirectional: false,
            use_grl: true,
            two_domain_classifiers: false,
            use_feature_extractor: true,
            use_z: true,
            eps: 1e-9,
            log_outputs: true,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ModelConfig::new(SequenceModel::Lstm, 5, 10, 24);
        assert!(config.adaptation);
        assert!(config.use_grl);
        assert!(!config.multi_class);
        assert_eq!(config.units, 100);
        assert_eq!(config.class_weights, ClassWeights::Uniform(1.0));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(SequenceModel::Vrnn.to_string(), "vrnn");
        assert_eq!(SequenceModel::Flat.to_string(), "flat");
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = ModelConfig::new(SequenceModel::Tcn, 3, 4, 12);
        let json = serde_json::to_string(&config).unwrap();
        let back: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model, SequenceModel::Tcn);
        assert_eq!(back.num_classes, 3);
    }
}

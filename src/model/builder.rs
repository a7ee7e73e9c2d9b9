//! Model assembly: encoder, shared classifier heads, adversarial domain
//! branch, and the composite loss.

use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::classifier::{Classifier, ClassifierOutput};
use super::cnn::ConvNet;
use super::config::{ClassWeights, ModelConfig, SequenceModel};
use super::extractor::FeatureExtractor;
use super::loss::{
    gather_by_prediction, sigmoid_cross_entropy, softmax_cross_entropy, tile_class_weights,
};
use super::rnn::Rnn;
use super::summary::Summary;
use super::tcn::TemporalConvNet;
use super::vrnn::{VrnnCell, VrnnStep};
use crate::autograd::ops::{
    add, add_scalar, flip_gradient, ln_clamped, mean_all, mul, recip_clamped, scale,
    select_time_step, slice_rows, sub,
};
use crate::autograd::Tensor;
use crate::error::{AdaptarError, Result};

/// Decoder tensors usable for generative sampling (variational encoder
/// only), one per time step.
pub struct GenerativeOutputs {
    pub decoder_mu: Vec<Tensor>,
    pub decoder_sigma: Vec<Tensor>,
}

/// Everything one assembly call produces.
pub struct ModelOutputs {
    /// Task predictions: sigmoid per output when `multi_class`, else
    /// softmax. Covers only the labeled source half of the batch when
    /// adaptation masking applies.
    pub task_output: Tensor,
    pub domain_softmax: Tensor,
    pub task_loss: Tensor,
    pub domain_loss: Tensor,
    pub total_loss: Tensor,
    /// The feature vector both heads share (e.g. for t-SNE plots).
    pub feature: Tensor,
    pub summaries: Vec<Summary>,
    pub generative: Option<GenerativeOutputs>,
}

enum Encoder {
    Flat,
    Lstm(Rnn),
    Vrnn(VrnnCell),
    Tcn(TemporalConvNet),
    Cnn(ConvNet),
}

/// A domain-adaptive classifier: pluggable sequence encoder, optional
/// fully-connected feature extractor, task and domain heads, gradient
/// reversal, and loss composition.
///
/// Parameters are created once at construction; [`build`](Self::build)
/// composes a fresh graph per batch, so the `training` flag and adaptation
/// masking are runtime branches, not baked-in shapes.
pub struct DomainAdaptModel {
    config: ModelConfig,
    encoder: Encoder,
    extractor: Option<FeatureExtractor>,
    task_classifier: Classifier,
    domain_classifier: Classifier,
    input_domain_classifier: Option<Classifier>,
    rng: RefCell<StdRng>,
}

impl DomainAdaptModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        if config.num_classes == 0 || config.num_features == 0 || config.time_steps == 0 {
            return Err(AdaptarError::Shape(
                "num_classes, num_features, and time_steps must be positive".to_string(),
            ));
        }
        if config.bidirectional && config.model == SequenceModel::Vrnn {
            return Err(AdaptarError::Unsupported(
                "bidirectional variational encoder".to_string(),
            ));
        }
        if let ClassWeights::PerClass(v) = &config.class_weights {
            if v.len() != config.num_classes {
                return Err(AdaptarError::Shape(format!(
                    "{} class weights for {} classes",
                    v.len(),
                    config.num_classes
                )));
            }
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let flat_dim = config.time_steps * config.num_features;

        let (encoder, encoder_dim) = match config.model {
            SequenceModel::Flat => (Encoder::Flat, flat_dim),
            SequenceModel::Lstm => {
                let rnn = Rnn::new(
                    &mut rng,
                    config.num_features,
                    config.units,
                    config.bidirectional,
                );
                let dim = rnn.out_dim();
                (Encoder::Lstm(rnn), dim)
            }
            SequenceModel::Vrnn => {
                let cell = VrnnCell::new(&mut rng, config.num_features, config.units);
                (Encoder::Vrnn(cell), config.units)
            }
            SequenceModel::Tcn => {
                let tcn = TemporalConvNet::new(&mut rng, config.num_features, config.units);
                let dim = tcn.out_dim();
                (Encoder::Tcn(tcn), dim)
            }
            SequenceModel::Cnn => {
                let cnn = ConvNet::new(&mut rng, config.time_steps, config.num_features);
                let dim = cnn.out_dim();
                (Encoder::Cnn(cnn), dim)
            }
        };

        let extractor = config
            .use_feature_extractor
            .then(|| FeatureExtractor::new(&mut rng, encoder_dim, config.batch_norm));
        let head_dim = extractor.as_ref().map_or(encoder_dim, FeatureExtractor::out_dim);

        let task_classifier =
            Classifier::new(&mut rng, head_dim, config.num_classes, config.batch_norm);
        let domain_classifier = Classifier::new(&mut rng, head_dim, 2, config.batch_norm);
        let input_domain_classifier = config
            .two_domain_classifiers
            .then(|| Classifier::new(&mut rng, flat_dim, 2, config.batch_norm));

        log::debug!(
            "assembled {} model: encoder dim {encoder_dim}, head dim {head_dim}",
            config.model
        );
        Ok(Self {
            config,
            encoder,
            extractor,
            task_classifier,
            domain_classifier,
            input_domain_classifier,
            rng: RefCell::new(rng),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// All trainable parameters, for an external optimizer.
    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = match &self.encoder {
            Encoder::Flat => Vec::new(),
            Encoder::Lstm(rnn) => rnn.parameters(),
            Encoder::Vrnn(cell) => cell.parameters(),
            Encoder::Tcn(tcn) => tcn.parameters(),
            Encoder::Cnn(cnn) => cnn.parameters(),
        };
        if let Some(extractor) = &self.extractor {
            params.extend(extractor.parameters());
        }
        params.extend(self.task_classifier.parameters());
        params.extend(self.domain_classifier.parameters());
        if let Some(head) = &self.input_domain_classifier {
            params.extend(head.parameters());
        }
        params
    }

    /// Compose the graph for one batch.
    ///
    /// `x` is `[batch, time_steps, features]` flat, `y` is `[batch,
    /// num_classes]` one-hot (or multi-hot), `domain` is `[batch, 2]`
    /// one-hot. With adaptation enabled and `training` true, the batch is
    /// the concatenation of a labeled source half followed by an unlabeled
    /// target half.
    pub fn build(
        &self,
        x: &Tensor,
        y: &Tensor,
        domain: &Tensor,
        grl_lambda: f32,
        keep_prob: f32,
        training: bool,
    ) -> Result<ModelOutputs> {
        let config = &self.config;
        let flat_dim = config.time_steps * config.num_features;
        if x.len() == 0 || x.len() % flat_dim != 0 {
            return Err(AdaptarError::Shape(format!(
                "input length {} is not a multiple of time_steps * features = {flat_dim}",
                x.len()
            )));
        }
        let batch = x.len() / flat_dim;
        if y.len() != batch * config.num_classes {
            return Err(AdaptarError::Shape(format!(
                "label length {} for batch {batch} x {} classes",
                y.len(),
                config.num_classes
            )));
        }
        if domain.len() != batch * 2 {
            return Err(AdaptarError::Shape(format!(
                "domain label length {} for batch {batch}",
                domain.len()
            )));
        }

        let rng = &mut *self.rng.borrow_mut();

        // Encoder: one feature vector per example, plus the variational
        // step tensors when applicable.
        let (encoded, vrnn_steps): (Tensor, Option<Vec<VrnnStep>>) = match &self.encoder {
            Encoder::Flat => (x.clone(), None),
            Encoder::Lstm(rnn) => {
                let outputs = rnn.forward(
                    x,
                    batch,
                    config.time_steps,
                    keep_prob,
                    true,
                    training,
                    rng,
                );
                (outputs.last().expect("time_steps > 0").clone(), None)
            }
            Encoder::Vrnn(cell) => {
                let steps = cell.forward(x, batch, config.time_steps, rng);
                let last = steps.last().expect("time_steps > 0");
                let feature =
                    if config.use_z { last.phi_z.clone() } else { last.h.clone() };
                (feature, Some(steps))
            }
            Encoder::Tcn(tcn) => {
                let seq =
                    tcn.forward(x, batch, config.time_steps, keep_prob, training, rng);
                let last = select_time_step(
                    &seq,
                    batch,
                    config.time_steps,
                    tcn.out_dim(),
                    config.time_steps - 1,
                );
                (last, None)
            }
            Encoder::Cnn(cnn) => (cnn.forward(x, batch, keep_prob, training, rng), None),
        };

        let feature = match &self.extractor {
            Some(extractor) => extractor.forward(&encoded, batch, keep_prob, training, rng),
            None => encoded,
        };

        let task = self.task_classifier.forward(&feature, batch, keep_prob, training, rng);

        // Domain branch, adversarial via gradient reversal.
        let domain_input = if config.use_grl {
            flip_gradient(&feature, grl_lambda)
        } else {
            feature.clone()
        };
        let domain_head =
            self.domain_classifier.forward(&domain_input, batch, keep_prob, training, rng);

        let input_domain_head: Option<ClassifierOutput> =
            self.input_domain_classifier.as_ref().map(|head| {
                let raw_input = if config.use_grl {
                    flip_gradient(x, grl_lambda)
                } else {
                    x.clone()
                };
                head.forward(&raw_input, batch, keep_prob, training, rng)
            });

        // With adaptation, training batches carry labels only in their
        // source half; evaluation uses the whole batch. A runtime branch,
        // not a static shape.
        let classes = config.num_classes;
        let (task_logits, task_softmax, task_sigmoid, y_used, task_rows) =
            if config.adaptation && training {
                let half = batch / 2;
                if half == 0 {
                    return Err(AdaptarError::Shape(
                        "adaptation batch must hold source and target halves".to_string(),
                    ));
                }
                (
                    slice_rows(&task.logits, batch, classes, 0, half),
                    slice_rows(&task.softmax, batch, classes, 0, half),
                    slice_rows(&task.sigmoid, batch, classes, 0, half),
                    slice_rows(y, batch, classes, 0, half),
                    half,
                )
            } else {
                (task.logits.clone(), task.softmax.clone(), task.sigmoid.clone(), y.clone(), batch)
            };

        let task_loss = match (&config.class_weights, config.multi_class) {
            (ClassWeights::Uniform(w), false) => softmax_cross_entropy(
                &task_logits,
                &y_used,
                task_rows,
                classes,
                &vec![*w; task_rows],
            ),
            (ClassWeights::Uniform(w), true) => sigmoid_cross_entropy(
                &task_logits,
                &y_used,
                task_rows,
                classes,
                &vec![*w; task_rows * classes],
            ),
            (ClassWeights::PerClass(v), false) => {
                // One weight per example, chosen by the class the raw
                // classifier output predicts for it.
                let weights = gather_by_prediction(&task_logits, task_rows, classes, v);
                softmax_cross_entropy(&task_logits, &y_used, task_rows, classes, &weights)
            }
            (ClassWeights::PerClass(v), true) => {
                let weights = tile_class_weights(v, task_rows);
                sigmoid_cross_entropy(&task_logits, &y_used, task_rows, classes, &weights)
            }
        };

        let mut domain_loss =
            softmax_cross_entropy(&domain_head.logits, domain, batch, 2, &vec![1.0; batch]);
        if let Some(head) = &input_domain_head {
            let second =
                softmax_cross_entropy(&head.logits, domain, batch, 2, &vec![1.0; batch]);
            domain_loss = add(&domain_loss, &second);
        }

        let mut summaries = vec![
            Summary::scalar("loss/task_loss", task_loss.data()[0]),
            Summary::scalar("loss/domain_loss", domain_loss.data()[0]),
        ];

        let mut total_loss = task_loss.clone();

        let generative = if let Some(steps) = &vrnn_steps {
            let (kl, likelihood) = variational_terms(steps, x, batch, config);
            summaries.push(Summary::scalar("loss/kl", kl.data()[0]));
            summaries.push(Summary::scalar("loss/likelihood", likelihood.data()[0]));
            total_loss = add(&add(&total_loss, &kl), &likelihood);

            if config.log_outputs {
                let last = steps.last().expect("time_steps > 0");
                summaries.push(Summary::histogram(
                    "outputs/phi_x",
                    last.phi_x.data().to_vec(),
                ));
                summaries.push(Summary::histogram(
                    "outputs/phi_z",
                    last.phi_z.data().to_vec(),
                ));
            }

            Some(GenerativeOutputs {
                decoder_mu: steps.iter().map(|s| s.decoder_mu.clone()).collect(),
                decoder_sigma: steps.iter().map(|s| s.decoder_sigma.clone()).collect(),
            })
        } else {
            None
        };

        if config.adaptation {
            total_loss = add(&total_loss, &domain_loss);
        }

        let task_output = if config.multi_class { task_sigmoid } else { task_softmax };

        if config.log_outputs {
            summaries.push(Summary::histogram(
                "outputs/feature_extractor",
                feature.data().to_vec(),
            ));
            summaries.push(Summary::histogram(
                "outputs/domain_classifier",
                domain_head.softmax.data().to_vec(),
            ));
            let out = task_output.data();
            for class in 0..classes {
                let column: Vec<f32> =
                    (0..task_rows).map(|r| out[r * classes + class]).collect();
                summaries.push(Summary::histogram(
                    format!("outputs/task_classifier_{class}"),
                    column,
                ));
            }
        }

        Ok(ModelOutputs {
            task_output,
            domain_softmax: domain_head.softmax,
            task_loss,
            domain_loss,
            total_loss,
            feature,
            summaries,
            generative,
        })
    }
}

/// KL divergence between the per-step encoder and prior Gaussians, and the
/// Gaussian negative log likelihood of the input under the decoder. Both
/// averaged over features, batch, and time steps.
fn variational_terms(
    steps: &[VrnnStep],
    x: &Tensor,
    batch: usize,
    config: &ModelConfig,
) -> (Tensor, Tensor) {
    let eps = config.eps;
    let time_steps = steps.len();

    let mut kl_sum: Option<Tensor> = None;
    let mut nll_sum: Option<Tensor> = None;
    for (t, step) in steps.iter().enumerate() {
        // log(pσ) - log(eσ) + 0.5 * (eσ² + (eμ - pμ)²) / pσ² - 0.5, with the
        // eps floor inside the log and the division.
        let diff = sub(&step.encoder_mu, &step.prior_mu);
        let numerator = add(
            &mul(&step.encoder_sigma, &step.encoder_sigma),
            &mul(&diff, &diff),
        );
        let prior_var_recip =
            recip_clamped(&mul(&step.prior_sigma, &step.prior_sigma), eps);
        let ratio = scale(&mul(&numerator, &prior_var_recip), 0.5);
        let logs = sub(
            &ln_clamped(&step.prior_sigma, eps),
            &ln_clamped(&step.encoder_sigma, eps),
        );
        let kl_elem = add_scalar(&add(&logs, &ratio), -0.5);
        let kl_step = mean_all(&kl_elem);
        kl_sum = Some(match kl_sum {
            Some(acc) => add(&acc, &kl_step),
            None => kl_step,
        });

        // (dμ - x)² / dσ² + log(dσ²), eps-floored the same way.
        let x_t = select_time_step(x, batch, time_steps, config.num_features, t);
        let err = sub(&step.decoder_mu, &x_t);
        let var = mul(&step.decoder_sigma, &step.decoder_sigma);
        let nll_elem = add(
            &mul(&mul(&err, &err), &recip_clamped(&var, eps)),
            &ln_clamped(&var, eps),
        );
        let nll_step = mean_all(&nll_elem);
        nll_sum = Some(match nll_sum {
            Some(acc) => add(&acc, &nll_step),
            None => nll_step,
        });
    }

    let t = time_steps as f32;
    (
        scale(&kl_sum.expect("at least one step"), 1.0 / t),
        scale(&nll_sum.expect("at least one step"), 0.5 / t),
    )
}

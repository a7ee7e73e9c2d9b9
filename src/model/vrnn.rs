//! Variational recurrent encoder.
//!
//! Each time step maps the input through a feature network, draws a latent
//! sample from an input-conditioned encoder Gaussian (reparameterized so
//! gradients flow through the mean and standard deviation), and feeds both
//! feature maps into an LSTM recurrence. A prior Gaussian conditioned on
//! the hidden state and a decoder Gaussian over the input supply the KL and
//! reconstruction loss terms.

use super::init::Dense;
use super::rnn::LstmCell;
use crate::autograd::ops::{add, concat_cols, mul, relu, select_time_step, softplus};
use crate::autograd::Tensor;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

/// Per-step tensors exposed for the loss terms and generative sampling.
pub struct VrnnStep {
    pub h: Tensor,
    pub encoder_mu: Tensor,
    pub encoder_sigma: Tensor,
    pub decoder_mu: Tensor,
    pub decoder_sigma: Tensor,
    pub prior_mu: Tensor,
    pub prior_sigma: Tensor,
    pub phi_x: Tensor,
    pub phi_z: Tensor,
}

pub struct VrnnCell {
    phi_x: Dense,
    encoder: Dense,
    encoder_mu: Dense,
    encoder_sigma: Dense,
    prior: Dense,
    prior_mu: Dense,
    prior_sigma: Dense,
    phi_z: Dense,
    decoder: Dense,
    decoder_mu: Dense,
    decoder_sigma: Dense,
    lstm: LstmCell,
    num_features: usize,
    units: usize,
}

impl VrnnCell {
    pub fn new(rng: &mut StdRng, num_features: usize, units: usize) -> Self {
        Self {
            phi_x: Dense::new(rng, num_features, units),
            encoder: Dense::new(rng, 2 * units, units),
            encoder_mu: Dense::new(rng, units, units),
            encoder_sigma: Dense::new(rng, units, units),
            prior: Dense::new(rng, units, units),
            prior_mu: Dense::new(rng, units, units),
            prior_sigma: Dense::new(rng, units, units),
            phi_z: Dense::new(rng, units, units),
            decoder: Dense::new(rng, 2 * units, units),
            decoder_mu: Dense::new(rng, units, num_features),
            decoder_sigma: Dense::new(rng, units, num_features),
            lstm: LstmCell::new(rng, 2 * units, units),
            num_features,
            units,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    fn step(
        &self,
        x_t: &Tensor,
        h: &Tensor,
        c: &Tensor,
        batch: usize,
        rng: &mut StdRng,
    ) -> (VrnnStep, Tensor) {
        let units = self.units;

        let phi_x = relu(&self.phi_x.forward(x_t, batch));

        let enc_in = concat_cols(&phi_x, h, batch, units, units);
        let enc_hidden = relu(&self.encoder.forward(&enc_in, batch));
        let encoder_mu = self.encoder_mu.forward(&enc_hidden, batch);
        let encoder_sigma = softplus(&self.encoder_sigma.forward(&enc_hidden, batch));

        let prior_hidden = relu(&self.prior.forward(h, batch));
        let prior_mu = self.prior_mu.forward(&prior_hidden, batch);
        let prior_sigma = softplus(&self.prior_sigma.forward(&prior_hidden, batch));

        // Reparameterized sample: z = mu + sigma * eps, eps ~ N(0, 1). The
        // noise is a constant of the graph; gradients reach mu and sigma.
        let noise: Vec<f32> =
            (0..batch * units).map(|_| StandardNormal.sample(rng)).collect();
        let eps = Tensor::new(Array1::from(noise), false);
        let z = add(&encoder_mu, &mul(&encoder_sigma, &eps));

        let phi_z = relu(&self.phi_z.forward(&z, batch));

        let dec_in = concat_cols(&phi_z, h, batch, units, units);
        let dec_hidden = relu(&self.decoder.forward(&dec_in, batch));
        let decoder_mu = self.decoder_mu.forward(&dec_hidden, batch);
        let decoder_sigma = softplus(&self.decoder_sigma.forward(&dec_hidden, batch));

        let rnn_in = concat_cols(&phi_x, &phi_z, batch, units, units);
        let (h_new, c_new) = self.lstm.step(&rnn_in, h, c, batch);

        let step = VrnnStep {
            h: h_new,
            encoder_mu,
            encoder_sigma,
            decoder_mu,
            decoder_sigma,
            prior_mu,
            prior_sigma,
            phi_x,
            phi_z,
        };
        (step, c_new)
    }

    /// Unroll over all time steps of a `[batch, time, features]` input.
    pub fn forward(
        &self,
        x: &Tensor,
        batch: usize,
        time_steps: usize,
        rng: &mut StdRng,
    ) -> Vec<VrnnStep> {
        let mut h = Tensor::zeros(batch * self.units, false);
        let mut c = Tensor::zeros(batch * self.units, false);
        let mut steps = Vec::with_capacity(time_steps);

        for t in 0..time_steps {
            let x_t = select_time_step(x, batch, time_steps, self.num_features, t);
            let (step, c_new) = self.step(&x_t, &h, &c, batch, rng);
            h = step.h.clone();
            c = c_new;
            steps.push(step);
        }
        steps
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = Vec::new();
        for dense in [
            &self.phi_x,
            &self.encoder,
            &self.encoder_mu,
            &self.encoder_sigma,
            &self.prior,
            &self.prior_mu,
            &self.prior_sigma,
            &self.phi_z,
            &self.decoder,
            &self.decoder_mu,
            &self.decoder_sigma,
        ] {
            params.extend(dense.parameters());
        }
        params.extend(self.lstm.parameters());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::autograd::ops::sum;
    use rand::SeedableRng;

    fn run(batch: usize, time: usize, features: usize, units: usize) -> Vec<VrnnStep> {
        let mut rng = StdRng::seed_from_u64(0);
        let cell = VrnnCell::new(&mut rng, features, units);
        let x = Tensor::new(
            Array1::from_iter((0..batch * time * features).map(|v| (v as f32 * 0.1).cos())),
            true,
        );
        cell.forward(&x, batch, time, &mut rng)
    }

    #[test]
    fn test_step_tensor_shapes() {
        let steps = run(2, 3, 4, 5);
        assert_eq!(steps.len(), 3);
        for step in &steps {
            assert_eq!(step.h.len(), 2 * 5);
            assert_eq!(step.encoder_mu.len(), 2 * 5);
            assert_eq!(step.prior_sigma.len(), 2 * 5);
            // Decoder reconstructs the input width.
            assert_eq!(step.decoder_mu.len(), 2 * 4);
            assert_eq!(step.decoder_sigma.len(), 2 * 4);
        }
    }

    #[test]
    fn test_sigmas_are_positive() {
        for step in run(1, 4, 3, 4) {
            assert!(step.encoder_sigma.data().iter().all(|&v| v > 0.0));
            assert!(step.prior_sigma.data().iter().all(|&v| v > 0.0));
            assert!(step.decoder_sigma.data().iter().all(|&v| v > 0.0));
        }
    }

    #[test]
    fn test_gradient_flows_through_latent_sample() {
        let mut rng = StdRng::seed_from_u64(1);
        let cell = VrnnCell::new(&mut rng, 2, 3);
        let x = Tensor::new(Array1::from_elem(2 * 2, 0.5), false);
        let steps = cell.forward(&x, 2, 1, &mut rng);
        let loss = sum(&steps[0].phi_z);
        backward(&loss, None);
        // The encoder mean's weights sit upstream of z = mu + sigma * eps.
        let grad = cell.encoder_mu.w.grad();
        assert!(grad.is_some());
        assert!(grad.unwrap().iter().any(|&g| g != 0.0));
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let a: Vec<f32> = run(1, 2, 2, 3)[1].phi_z.data().to_vec();
        let b: Vec<f32> = run(1, 2, 2, 3)[1].phi_z.data().to_vec();
        assert_eq!(a, b);
    }
}

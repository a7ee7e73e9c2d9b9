//! LSTM encoder, unidirectional or bidirectional.

use super::init::glorot;
use crate::autograd::ops::{
    add, concat_cols, dropout, mul, select_time_step, sigmoid, slice_cols, tanh,
};
use crate::autograd::Tensor;
use ndarray::Array1;
use rand::rngs::StdRng;

/// A single LSTM cell. Gates are computed from `[x_t, h]` in one fused
/// matmul; the forget-gate bias starts at 1.0.
pub struct LstmCell {
    w: Tensor,
    b: Tensor,
    input_dim: usize,
    units: usize,
}

impl LstmCell {
    pub fn new(rng: &mut StdRng, input_dim: usize, units: usize) -> Self {
        let w = glorot(rng, input_dim + units, 4 * units);
        let mut bias = Array1::<f32>::zeros(4 * units);
        // Gate layout is [input, forget, candidate, output].
        for v in bias.slice_mut(ndarray::s![units..2 * units]).iter_mut() {
            *v = 1.0;
        }
        Self { w, b: Tensor::new(bias, true), input_dim, units }
    }

    /// One step: returns the new `(h, c)`, each `[batch, units]`.
    pub fn step(&self, x_t: &Tensor, h: &Tensor, c: &Tensor, batch: usize) -> (Tensor, Tensor) {
        let units = self.units;
        let joined = concat_cols(x_t, h, batch, self.input_dim, units);
        let gates = crate::autograd::ops::linear(
            &joined,
            &self.w,
            &self.b,
            batch,
            self.input_dim + units,
            4 * units,
        );

        let i = sigmoid(&slice_cols(&gates, batch, 4 * units, 0, units));
        let f = sigmoid(&slice_cols(&gates, batch, 4 * units, units, units));
        let g = tanh(&slice_cols(&gates, batch, 4 * units, 2 * units, units));
        let o = sigmoid(&slice_cols(&gates, batch, 4 * units, 3 * units, units));

        let c_new = add(&mul(&f, c), &mul(&i, &g));
        let h_new = mul(&o, &tanh(&c_new));
        (h_new, c_new)
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![self.w.clone(), self.b.clone()]
    }
}

/// LSTM encoder over a `[batch, time, features]` input.
pub struct Rnn {
    forward_cell: LstmCell,
    backward_cell: Option<LstmCell>,
    input_dim: usize,
    units: usize,
}

impl Rnn {
    pub fn new(rng: &mut StdRng, input_dim: usize, units: usize, bidirectional: bool) -> Self {
        let forward_cell = LstmCell::new(rng, input_dim, units);
        let backward_cell = bidirectional.then(|| LstmCell::new(rng, input_dim, units));
        Self { forward_cell, backward_cell, input_dim, units }
    }

    /// Width of each per-step output.
    pub fn out_dim(&self) -> usize {
        if self.backward_cell.is_some() {
            2 * self.units
        } else {
            self.units
        }
    }

    /// Run over all time steps. Returns one `[batch, out_dim]` tensor per
    /// step, in input time order; callers typically take the last.
    ///
    /// Dropout applies to the emitted outputs only, not the recurrent
    /// state. In bidirectional mode the backward direction's output at step
    /// `t` summarizes `x[t..]`, so at the final step it has seen only
    /// `x[time-1]`.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        x: &Tensor,
        batch: usize,
        time_steps: usize,
        keep_prob: f32,
        use_dropout: bool,
        training: bool,
        rng: &mut StdRng,
    ) -> Vec<Tensor> {
        let fw = self.run_direction(&self.forward_cell, x, batch, time_steps, false);
        let mut outputs = match &self.backward_cell {
            Some(cell) => {
                let bw = self.run_direction(cell, x, batch, time_steps, true);
                fw.iter()
                    .zip(bw.iter())
                    .map(|(f, b)| concat_cols(f, b, batch, self.units, self.units))
                    .collect()
            }
            None => fw,
        };

        if use_dropout {
            outputs = outputs
                .into_iter()
                .map(|h| dropout(&h, keep_prob, training, rng))
                .collect();
        }
        outputs
    }

    /// Unroll one direction; `reversed` walks time back-to-front and
    /// re-reverses its outputs into input time order.
    fn run_direction(
        &self,
        cell: &LstmCell,
        x: &Tensor,
        batch: usize,
        time_steps: usize,
        reversed: bool,
    ) -> Vec<Tensor> {
        let mut h = Tensor::zeros(batch * self.units, false);
        let mut c = Tensor::zeros(batch * self.units, false);
        let mut outputs = Vec::with_capacity(time_steps);

        for step in 0..time_steps {
            let t = if reversed { time_steps - 1 - step } else { step };
            let x_t = select_time_step(x, batch, time_steps, self.input_dim, t);
            let (h_new, c_new) = cell.step(&x_t, &h, &c, batch);
            h = h_new;
            c = c_new;
            outputs.push(h.clone());
        }

        if reversed {
            outputs.reverse();
        }
        outputs
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.forward_cell.parameters();
        if let Some(cell) = &self.backward_cell {
            params.extend(cell.parameters());
        }
        params
    }
}

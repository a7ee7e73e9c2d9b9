//! Input feeding with a two-phase initialization handshake.
//!
//! Build the pipeline first, bind concrete data after the runtime context
//! exists: [`input_fn`] returns an unbound [`InputPipeline`] plus an
//! [`InitHook`] that carries the arrays. Drawing batches before the hook has
//! run is a programming error.

use ndarray::{Array2, Array3, Axis};

use super::shuffle::permutation;

/// A shuffled, batched view over one loaded domain.
pub struct InputPipeline {
    batch_size: usize,
    evaluation: bool,
    seed: u64,
    data: Option<(Array3<f32>, Array2<f32>)>,
    order: Vec<usize>,
    pos: usize,
    epoch: u64,
}

impl InputPipeline {
    fn new(batch_size: usize, evaluation: bool, seed: u64) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self { batch_size, evaluation, seed, data: None, order: Vec::new(), pos: 0, epoch: 0 }
    }

    /// Whether the init hook has bound data yet.
    pub fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    fn bind(&mut self, features: Array3<f32>, labels: Array2<f32>) {
        assert_eq!(
            features.len_of(Axis(0)),
            labels.len_of(Axis(0)),
            "features and labels must pair up"
        );
        self.order = permutation(features.len_of(Axis(0)), self.seed);
        self.data = Some((features, labels));
    }

    /// Next batch of (features, labels).
    ///
    /// Evaluation pipelines make one seeded-shuffle pass and then return
    /// `None`; training pipelines repeat forever, reshuffling every epoch.
    /// Panics if called before the init hook has run.
    pub fn next_batch(&mut self) -> Option<(Array3<f32>, Array2<f32>)> {
        assert!(self.is_bound(), "pipeline used before its init hook ran");
        let n = self.order.len();
        if n == 0 {
            return None;
        }

        if self.pos >= n {
            if self.evaluation {
                return None;
            }
            self.epoch += 1;
            self.order = permutation(n, self.seed.wrapping_add(self.epoch));
            self.pos = 0;
        }

        let end = (self.pos + self.batch_size).min(n);
        let idx = &self.order[self.pos..end];
        let (features, labels) = self.data.as_ref().expect("bound above");
        let batch = (features.select(Axis(0), idx), labels.select(Axis(0), idx));
        self.pos = end;
        Some(batch)
    }
}

/// Deferred initialization callback: created alongside the pipeline, run
/// once the runtime context exists.
pub struct InitHook {
    bind_fn: Option<Box<dyn FnOnce(&mut InputPipeline)>>,
}

impl InitHook {
    /// Attach the initialization closure.
    pub fn bind(f: impl FnOnce(&mut InputPipeline) + 'static) -> Self {
        Self { bind_fn: Some(Box::new(f)) }
    }

    /// Run the bound closure against the pipeline. Runs at most once.
    pub fn run(&mut self, pipeline: &mut InputPipeline) {
        let f = self.bind_fn.take().expect("init hook already ran (or was never bound)");
        f(pipeline);
    }
}

/// Build an input pipeline over one domain's arrays.
///
/// The pipeline itself is unbound until the returned hook runs; the hook
/// owns the arrays in the meantime.
pub fn input_fn(
    features: Array3<f32>,
    labels: Array2<f32>,
    batch_size: usize,
    evaluation: bool,
    seed: u64,
) -> (InputPipeline, InitHook) {
    let pipeline = InputPipeline::new(batch_size, evaluation, seed);
    let hook = InitHook::bind(move |p: &mut InputPipeline| p.bind(features, labels));
    (pipeline, hook)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> (Array3<f32>, Array2<f32>) {
        let x = Array3::from_shape_fn((n, 2, 1), |(i, _, _)| i as f32);
        let y = Array2::from_shape_fn((n, 2), |(i, c)| ((i + c) % 2) as f32);
        (x, y)
    }

    #[test]
    fn test_two_phase_handshake() {
        let (x, y) = dataset(6);
        let (mut pipeline, mut hook) = input_fn(x, y, 4, true, 0);
        assert!(!pipeline.is_bound());
        hook.run(&mut pipeline);
        assert!(pipeline.is_bound());
        assert!(pipeline.next_batch().is_some());
    }

    #[test]
    #[should_panic(expected = "init hook")]
    fn test_unbound_pipeline_panics() {
        let (x, y) = dataset(4);
        let (mut pipeline, _hook) = input_fn(x, y, 2, true, 0);
        pipeline.next_batch();
    }

    #[test]
    fn test_evaluation_makes_one_pass() {
        let (x, y) = dataset(5);
        let (mut pipeline, mut hook) = input_fn(x, y, 2, true, 3);
        hook.run(&mut pipeline);
        let mut seen = 0;
        while let Some((bx, by)) = pipeline.next_batch() {
            assert_eq!(bx.len_of(Axis(0)), by.len_of(Axis(0)));
            seen += bx.len_of(Axis(0));
        }
        assert_eq!(seen, 5);
        assert!(pipeline.next_batch().is_none());
    }

    #[test]
    fn test_training_repeats_with_reshuffle() {
        let (x, y) = dataset(4);
        let (mut pipeline, mut hook) = input_fn(x, y, 4, false, 1);
        hook.run(&mut pipeline);
        let first: Vec<f32> = pipeline.next_batch().unwrap().0.iter().copied().collect();
        let second: Vec<f32> = pipeline.next_batch().unwrap().0.iter().copied().collect();
        // Same multiset of examples each epoch.
        let mut a = first.clone();
        let mut b = second.clone();
        a.sort_by(f32::total_cmp);
        b.sort_by(f32::total_cmp);
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_seed_same_order() {
        let (x, y) = dataset(8);
        let (mut p1, mut h1) = input_fn(x.clone(), y.clone(), 3, true, 42);
        let (mut p2, mut h2) = input_fn(x, y, 3, true, 42);
        h1.run(&mut p1);
        h2.run(&mut p2);
        while let (Some(a), Some(b)) = (p1.next_batch(), p2.next_batch()) {
            assert_eq!(a.0, b.0);
            assert_eq!(a.1, b.1);
        }
    }
}

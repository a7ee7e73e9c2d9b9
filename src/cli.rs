//! Command-line interface: inspect datasets and dry-run model assembly.

use clap::{Parser, Subcommand, ValueEnum};
use ndarray::Axis;

use crate::data::{
    load_csv, load_data_home, load_data_icu_ahrf, load_data_icu_icd9, load_data_sleep,
    ClinicalOptions, DatasetSplits, HomeOptions, SleepOptions,
};
use crate::model::{DomainAdaptModel, ModelConfig, SequenceModel, Summary};
use crate::{Result, Tensor};

#[derive(Parser)]
#[command(name = "adaptar", about = "Domain-adaptive time-series tooling", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a dataset variant and report the eight split shapes.
    Info {
        /// Dataset variant.
        #[arg(value_enum)]
        dataset: Dataset,
        /// Dataset directory (or CSV file for the ucr variant).
        path: std::path::PathBuf,
        /// Domain A name (home variant).
        #[arg(long, default_value = "ihs95")]
        domain_a: String,
        /// Domain B name (home variant).
        #[arg(long, default_value = "ihs117")]
        domain_b: String,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 0.7)]
        train_percent: f64,
        #[arg(long, default_value_t = 5)]
        window_size: usize,
        #[arg(long, default_value_t = 0)]
        fold: usize,
    },
    /// Assemble a model over synthetic data and print its losses.
    Demo {
        #[arg(value_enum)]
        model: ModelKind,
        #[arg(long, default_value_t = 8)]
        batch: usize,
        #[arg(long, default_value_t = 12)]
        time_steps: usize,
        #[arg(long, default_value_t = 4)]
        features: usize,
        #[arg(long, default_value_t = 3)]
        classes: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Skip the adversarial domain branch.
        #[arg(long)]
        no_adaptation: bool,
    },
}

#[derive(Copy, Clone, ValueEnum)]
pub enum Dataset {
    Ucr,
    Sleep,
    Ahrf,
    Icd9,
    Home,
    /// Wearable activity data; not collected yet.
    Watch,
}

#[derive(Copy, Clone, ValueEnum)]
pub enum ModelKind {
    Flat,
    Lstm,
    Vrnn,
    Tcn,
    Cnn,
}

impl From<ModelKind> for SequenceModel {
    fn from(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Flat => Self::Flat,
            ModelKind::Lstm => Self::Lstm,
            ModelKind::Vrnn => Self::Vrnn,
            ModelKind::Tcn => Self::Tcn,
            ModelKind::Cnn => Self::Cnn,
        }
    }
}

fn report<X, Y>(splits: &DatasetSplits<ndarray::Array3<X>, Y>, len_y: impl Fn(&Y) -> usize) {
    let shape = |x: &ndarray::Array3<X>| format!("{:?}", x.dim());
    println!("train A: x {} / y {}", shape(&splits.train_x_a), len_y(&splits.train_y_a));
    println!("test  A: x {} / y {}", shape(&splits.test_x_a), len_y(&splits.test_y_a));
    println!("train B: x {} / y {}", shape(&splits.train_x_b), len_y(&splits.train_y_b));
    println!("test  B: x {} / y {}", shape(&splits.test_x_b), len_y(&splits.test_y_b));
}

pub fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Info {
            dataset,
            path,
            domain_a,
            domain_b,
            seed,
            train_percent,
            window_size,
            fold,
        } => match dataset {
            Dataset::Ucr => {
                let (x, y) = load_csv(&path)?;
                println!("examples: {:?}, labels: {}", x.dim(), y.len());
                Ok(())
            }
            Dataset::Sleep => {
                let options = SleepOptions { train_percent, seed, ..SleepOptions::default() };
                let splits = load_data_sleep(&path, &options)?;
                report(&splits, |y| y.len());
                Ok(())
            }
            Dataset::Ahrf => {
                let options = ClinicalOptions { fold, ..ClinicalOptions::default() };
                let splits = load_data_icu_ahrf(&path, &options)?;
                report(&splits, |y| y.len());
                Ok(())
            }
            Dataset::Icd9 => {
                let options = ClinicalOptions { fold, ..ClinicalOptions::default() };
                let splits = load_data_icu_icd9(&path, &options)?;
                report(&splits, |y| y.len_of(Axis(0)));
                Ok(())
            }
            Dataset::Home => {
                let options = HomeOptions { train_percent, seed, window_size };
                let splits = load_data_home(&path, &domain_a, &domain_b, &options)?;
                report(&splits, |y| y.len());
                Ok(())
            }
            Dataset::Watch => {
                let splits = crate::data::load_data_watch(&path)?;
                report(&splits, |y| y.len());
                Ok(())
            }
        },
        Command::Demo {
            model,
            batch,
            time_steps,
            features,
            classes,
            seed,
            no_adaptation,
        } => {
            let mut config =
                ModelConfig::new(model.into(), classes, features, time_steps);
            config.seed = seed;
            config.adaptation = !no_adaptation;
            let model = DomainAdaptModel::new(config)?;

            let x = Tensor::from_vec(
                (0..batch * time_steps * features)
                    .map(|v| (v as f32 * 0.13).sin())
                    .collect(),
                false,
            );
            let y = Tensor::from_vec(
                (0..batch * classes)
                    .map(|i| if i % classes == i / classes % classes { 1.0 } else { 0.0 })
                    .collect(),
                false,
            );
            let domain = Tensor::from_vec(
                (0..batch * 2)
                    .map(|i| {
                        let target = i / 2 >= batch / 2;
                        if (i % 2 == 1) == target {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect(),
                false,
            );

            let outputs = model.build(&x, &y, &domain, 1.0, 0.8, true)?;
            crate::backward(&outputs.total_loss, None);

            for summary in &outputs.summaries {
                if let Summary::Scalar { name, value } = summary {
                    println!("{name}: {value:.4}");
                }
            }
            println!("total: {:.4}", outputs.total_loss.data()[0]);
            let trained = model
                .parameters()
                .iter()
                .filter(|p| p.grad().is_some())
                .count();
            println!("parameters with gradients: {trained}/{}", model.parameters().len());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_demo_runs_for_every_model() {
        for model in [ModelKind::Flat, ModelKind::Lstm, ModelKind::Tcn] {
            let cli = Cli {
                command: Command::Demo {
                    model,
                    batch: 4,
                    time_steps: 3,
                    features: 2,
                    classes: 2,
                    seed: 0,
                    no_adaptation: false,
                },
            };
            run_command(cli).unwrap();
        }
    }

    #[test]
    fn test_watch_variant_unsupported() {
        let cli = Cli {
            command: Command::Info {
                dataset: Dataset::Watch,
                path: ".".into(),
                domain_a: "a".into(),
                domain_b: "b".into(),
                seed: 0,
                train_percent: 0.7,
                window_size: 5,
                fold: 0,
            },
        };
        assert!(matches!(run_command(cli), Err(crate::AdaptarError::Unsupported(_))));
    }
}

use std::{fs, path::Path, time::Instant};

use burn::{
    config::Config,
    data::dataloader::DataLoaderBuilder,
    module::{AutodiffModule, Module},
    optim::{AdamWConfig, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, TrainStep, ValidStep},
};
use serde::Serialize;
use tracing::info;

use crate::{
    augment::AugmentationConfig,
    callback::{EarlyStoppingConfig, ReduceLrOnPlateauConfig},
    data::{EmnistBatcher, EmnistDataset},
    error,
    evaluate::{correct_predictions, evaluate, Evaluation},
    model::{Model, ModelConfig},
    preview::save_preview,
};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,

    pub optimizer: AdamWConfig,

    #[config(default = "AugmentationConfig::new()")]
    pub augmentation: AugmentationConfig,

    #[config(default = "ReduceLrOnPlateauConfig::new()")]
    pub plateau: ReduceLrOnPlateauConfig,

    #[config(default = "EarlyStoppingConfig::new()")]
    pub early_stopping: EarlyStoppingConfig,

    #[config(default = 50)]
    pub epoch_count: usize,

    #[config(default = 512)]
    pub batch_size: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1.0e-3)]
    pub learning_rate: f64,

    /// Share of every class held out of the training file for validation.
    #[config(default = 0.1)]
    pub valid_fraction: f64,

    #[config(default = 4)]
    pub worker_count: usize,

    /// Samples written to the augmentation preview; zero disables it.
    #[config(default = 64)]
    pub preview_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
    pub learning_rate: f64,
}

#[derive(Debug)]
pub struct TrainingReport {
    pub history: Vec<EpochSummary>,
    pub best_epoch: Option<usize>,
    pub evaluation: Evaluation,
}

/// Item-weighted running loss and accuracy over one pass.
#[derive(Debug, Default)]
struct Accumulator {
    loss_sum: f64,
    correct: usize,
    items: usize,
}

impl Accumulator {
    fn update<B: Backend>(&mut self, output: &ClassificationOutput<B>) {
        let batch_size = output.targets.dims()[0];
        let loss = output.loss.clone().into_scalar().elem::<f64>();

        self.loss_sum += loss * batch_size as f64;
        self.correct += correct_predictions(output.output.clone(), output.targets.clone());
        self.items += batch_size;
    }

    fn loss(&self) -> f64 {
        self.loss_sum / self.items.max(1) as f64
    }

    fn accuracy(&self) -> f64 {
        self.correct as f64 / self.items.max(1) as f64
    }
}

fn create_artifact_dir(artifact_dir: &Path) -> error::Result<()> {
    fs::remove_dir_all(artifact_dir).ok();
    fs::create_dir_all(artifact_dir)?;
    Ok(())
}

fn write_history(history: &[EpochSummary], path: &Path) -> error::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for summary in history {
        writer.serialize(summary)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn train<B: AutodiffBackend>(
    artifact_dir: &Path,
    data_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> error::Result<TrainingReport> {
    create_artifact_dir(artifact_dir)?;

    config.save(artifact_dir.join("config.json"))?;

    B::seed(config.seed);

    let (train, valid) =
        EmnistDataset::train_valid(data_dir, config.valid_fraction, config.seed)?;
    let test = EmnistDataset::test(data_dir)?;

    let augmentation = config.augmentation.init();
    save_preview(
        &train,
        &augmentation,
        config.preview_count,
        &artifact_dir.join("augmentation-preview.png"),
    )?;

    let batcher_train = EmnistBatcher::<B>::new(device.clone()).with_augmentation(augmentation);
    let batcher_valid = EmnistBatcher::<B::InnerBackend>::new(device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.worker_count)
        .build(train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid.clone())
        .batch_size(config.batch_size)
        .num_workers(config.worker_count)
        .build(valid);

    let dataloader_test = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.worker_count)
        .build(test);

    let mut model = config.model.init::<B>(&device);
    let mut optim = config.optimizer.init::<B, Model<B>>();
    let mut scheduler = config.plateau.init(config.learning_rate);
    let mut early_stopping = config.early_stopping.init::<Model<B>>();
    let mut history = Vec::with_capacity(config.epoch_count);

    info!(params = model.num_params(), "starting training");

    for epoch in 1..config.epoch_count + 1 {
        let start = Instant::now();
        let learning_rate = scheduler.learning_rate();

        let mut train_metrics = Accumulator::default();
        for batch in dataloader_train.iter() {
            let output = TrainStep::step(&model, batch);
            train_metrics.update(&output.item);

            model = optim.step(learning_rate, model, output.grads);
        }

        let model_valid = model.valid();
        let mut valid_metrics = Accumulator::default();
        for batch in dataloader_valid.iter() {
            let output = ValidStep::step(&model_valid, batch);
            valid_metrics.update(&output);
        }

        let summary = EpochSummary {
            epoch,
            train_loss: train_metrics.loss(),
            train_accuracy: train_metrics.accuracy(),
            valid_loss: valid_metrics.loss(),
            valid_accuracy: valid_metrics.accuracy(),
            learning_rate,
        };
        info!(
            epoch,
            epochs = config.epoch_count,
            train_loss = %format!("{:.4}", summary.train_loss),
            train_accuracy = %format!("{:.4}", summary.train_accuracy),
            valid_loss = %format!("{:.4}", summary.valid_loss),
            valid_accuracy = %format!("{:.4}", summary.valid_accuracy),
            learning_rate,
            elapsed = ?start.elapsed(),
            "epoch finished"
        );

        let valid_loss = summary.valid_loss;
        history.push(summary);

        scheduler.step(valid_loss);
        if early_stopping.step(epoch, valid_loss, &model) {
            info!(
                epoch,
                best_epoch = ?early_stopping.best_epoch(),
                "validation loss stopped improving, stopping early"
            );
            break;
        }
    }

    let best_epoch = early_stopping.best_epoch();
    let model = early_stopping.finish(model);

    write_history(&history, &artifact_dir.join("history.csv"))?;
    model
        .clone()
        .save_file(artifact_dir.join("model"), &CompactRecorder::new())?;

    let evaluation = evaluate(&model.valid(), &dataloader_test);
    evaluation.log_report();

    Ok(TrainingReport {
        history,
        best_epoch,
        evaluation,
    })
}

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    use super::*;

    fn summary(epoch: usize) -> EpochSummary {
        EpochSummary {
            epoch,
            train_loss: 0.5,
            train_accuracy: 0.75,
            valid_loss: 0.25,
            valid_accuracy: 0.875,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn accumulator_weights_by_batch_size() {
        let device = Default::default();
        let mut accumulator = Accumulator::default();

        for (loss, batch) in [(1.0, 1), (4.0, 3)] {
            let output = Tensor::<NdArray, 2>::zeros([batch, 2], &device);
            let targets = Tensor::<NdArray, 1, Int>::zeros([batch], &device);
            let loss = Tensor::<NdArray, 1>::from_floats([loss], &device);
            accumulator.update(&ClassificationOutput::new(loss, output, targets));
        }

        assert_eq!(accumulator.loss(), 13.0 / 4.0);
        assert_eq!(accumulator.accuracy(), 1.0);
    }

    #[test]
    fn history_is_written_as_csv() {
        let path = std::env::temp_dir().join(format!("emnist-history-{}.csv", std::process::id()));

        write_history(&[summary(1), summary(2)], &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).ok();

        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[0],
            "epoch,train_loss,train_accuracy,valid_loss,valid_accuracy,learning_rate"
        );
        assert_eq!(lines[2], "2,0.5,0.75,0.25,0.875,0.001");
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let config = TrainingConfig::new(
            ModelConfig::new(26),
            AdamWConfig::new().with_weight_decay(1e-4),
        );
        let path = std::env::temp_dir().join(format!("emnist-config-{}.json", std::process::id()));

        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.batch_size, 512);
        assert_eq!(loaded.epoch_count, 50);
        assert_eq!(loaded.plateau.patience, 3);
        assert_eq!(loaded.early_stopping.patience, 5);
        assert_eq!(loaded.model.loss.gamma, 2.0);
    }

    #[test]
    fn short_run_on_tiny_csv_files() {
        let dir = std::env::temp_dir().join(format!("emnist-run-{}", std::process::id()));
        let artifact_dir = dir.join("artifact");
        fs::create_dir_all(&dir).unwrap();

        let rows = |count: usize| {
            (0..count)
                .map(|i| {
                    let label = 10 + i % 26;
                    std::iter::once(label.to_string())
                        .chain((0..784).map(|p| ((p * 7 + i * 13) % 256).to_string()))
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        fs::write(dir.join(crate::data::TRAIN_FILE), rows(26 * 4)).unwrap();
        fs::write(dir.join(crate::data::TEST_FILE), rows(26)).unwrap();

        let config = TrainingConfig::new(ModelConfig::new(26), AdamWConfig::new())
            .with_epoch_count(2)
            .with_batch_size(16)
            .with_valid_fraction(0.25)
            .with_worker_count(1)
            .with_preview_count(4);

        let report =
            train::<Autodiff<NdArray>>(&artifact_dir, &dir, config, Default::default()).unwrap();

        assert!(!report.history.is_empty() && report.history.len() <= 2);
        assert_eq!(report.evaluation.total(), 26);
        assert!(report.best_epoch.is_some());
        assert!(artifact_dir.join("config.json").exists());
        assert!(artifact_dir.join("history.csv").exists());
        assert!(artifact_dir.join("model.mpk").exists());
        assert!(artifact_dir.join("augmentation-preview.png").exists());

        fs::remove_dir_all(dir).ok();
    }
}

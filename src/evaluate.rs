use std::sync::Arc;

use burn::{data::dataloader::DataLoader, prelude::*};
use ndarray::Array2;
use tracing::info;

use crate::{data::EmnistBatch, model::Model, LABELS};

/// Classification results over a dataset, kept as a confusion matrix with
/// true classes as rows and predicted classes as columns.
#[derive(Debug, Clone)]
pub struct Evaluation {
    confusion: Array2<u64>,
}

impl Evaluation {
    pub fn new(classes: usize) -> Self {
        Self {
            confusion: Array2::zeros((classes, classes)),
        }
    }

    pub fn record(&mut self, predictions: &[i64], targets: &[i64]) {
        for (&prediction, &target) in predictions.iter().zip(targets) {
            if let Some(cell) = self
                .confusion
                .get_mut((target as usize, prediction as usize))
            {
                *cell += 1;
            }
        }
    }

    pub fn confusion(&self) -> &Array2<u64> {
        &self.confusion
    }

    pub fn total(&self) -> u64 {
        self.confusion.sum()
    }

    pub fn correct(&self) -> u64 {
        self.confusion.diag().sum()
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f64 / total as f64,
        }
    }

    /// Recall of every class; `None` for classes absent from the targets.
    pub fn per_class_accuracy(&self) -> Vec<Option<f64>> {
        self.confusion
            .rows()
            .into_iter()
            .enumerate()
            .map(|(class, row)| match row.sum() {
                0 => None,
                total => Some(row[class] as f64 / total as f64),
            })
            .collect()
    }

    pub fn log_report(&self) {
        for (label, accuracy) in LABELS.iter().zip(self.per_class_accuracy()) {
            if let Some(accuracy) = accuracy {
                info!(%label, accuracy = %format!("{accuracy:.4}"), "class accuracy");
            }
        }

        info!(
            correct = self.correct(),
            total = self.total(),
            accuracy = self.accuracy(),
            "evaluation finished"
        );
    }
}

/// Counts the rows of `output` whose highest logit is at the target class.
pub fn correct_predictions<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    output
        .argmax(1)
        .flatten::<1>(0, 1)
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

pub fn evaluate<B: Backend>(
    model: &Model<B>,
    dataloader: &Arc<dyn DataLoader<EmnistBatch<B>>>,
) -> Evaluation {
    let mut evaluation = Evaluation::new(LABELS.len());

    for batch in dataloader.iter() {
        let predictions = model.forward(batch.images).argmax(1).flatten::<1>(0, 1);

        let predictions = predictions.into_data().iter::<i64>().collect::<Vec<_>>();
        let targets = batch.targets.into_data().iter::<i64>().collect::<Vec<_>>();

        evaluation.record(&predictions, &targets);
    }

    evaluation
}

use burn::{
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};
use nn::{
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig, Relu,
};

use crate::{
    data::EmnistBatch,
    loss::{FocalLoss, FocalLossConfig},
    module::{
        conv2d_norm::{Conv2dNorm, Conv2dNormConfig},
        norm_conv2d::{NormConv2d, NormConv2dConfig},
    },
};

const STEM_CHANNELS: usize = 16;

const BLOCK_SETTINGS: [(usize, usize, Option<f64>); 10] = [
    // (output channels, stride, spatial dropout)
    (32, 1, None),
    (32, 2, Some(0.1)),
    (32, 1, None),
    (32, 1, None),
    (64, 2, Some(0.1)),
    (64, 1, None),
    (64, 1, None),
    (128, 2, Some(0.15)),
    (128, 1, None),
    (128, 1, None),
];

#[derive(Module, Debug)]
struct Classifier<B: Backend> {
    norm: BatchNorm<B, 0>,
    activation: Relu,
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> Classifier<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        let x = self.hidden.forward(x);
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    stem: Conv2dNorm<B>,
    blocks: Vec<NormConv2d<B>>,

    norm: BatchNorm<B, 2>,
    activation: Relu,
    avg_pool: AdaptiveAvgPool2d,
    classifier: Classifier<B>,

    loss: FocalLoss,
}

impl<B: Backend> Model<B> {
    /// Maps `[batch_size, 1, 28, 28]` images to `[batch_size, classes]` logits.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem.forward(x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));

        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        let x = self.avg_pool.forward(x);
        let x = x.flatten(1, 3);

        self.classifier.forward(x)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = self.loss.forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<EmnistBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: EmnistBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<EmnistBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: EmnistBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub classes: usize,

    #[config(default = 128)]
    pub hidden: usize,

    #[config(default = 0.3)]
    pub dropout: f64,

    #[config(default = "FocalLossConfig::new()")]
    pub loss: FocalLossConfig,

    /// Kernel initializer of every convolution and dense layer.
    #[config(default = "Initializer::XavierUniform { gain: 1.0 }")]
    pub initializer: Initializer,
}

impl ModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let stem = Conv2dNormConfig::new([1, STEM_CHANNELS])
            .with_initializer(self.initializer.clone())
            .init(device);

        let mut input_channel = STEM_CHANNELS;
        let mut blocks = Vec::with_capacity(BLOCK_SETTINGS.len());

        for (c, s, dropout) in BLOCK_SETTINGS {
            blocks.push(
                NormConv2dConfig::new([input_channel, c])
                    .with_stride([s, s])
                    .with_dropout(dropout)
                    .with_initializer(self.initializer.clone())
                    .init(device),
            );
            input_channel = c;
        }

        let mut output = LinearConfig::new(self.hidden, self.classes)
            .with_initializer(self.initializer.clone())
            .init(device);
        output.bias = Some(Initializer::Zeros.init([self.classes], device));

        let classifier = Classifier {
            norm: BatchNormConfig::new(input_channel)
                .with_momentum(0.01)
                .with_epsilon(1e-3)
                .init(device),
            activation: Relu::new(),
            hidden: LinearConfig::new(input_channel, self.hidden)
                .with_bias(false)
                .with_initializer(self.initializer.clone())
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            output,
        };

        Model {
            stem,
            blocks,
            norm: BatchNormConfig::new(input_channel)
                .with_momentum(0.01)
                .with_epsilon(1e-3)
                .init(device),
            activation: Relu::new(),
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier,
            loss: self.loss.init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    use super::*;

    #[test]
    fn maps_images_to_class_logits() {
        let device = Default::default();
        let model = ModelConfig::new(26).init::<NdArray>(&device);

        let output = model.forward(Tensor::zeros([3, 1, 28, 28], &device));

        assert_eq!(output.dims(), [3, 26]);
    }

    #[test]
    fn train_step_produces_gradients_and_finite_loss() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let model = ModelConfig::new(26).init::<B>(&device);

        let batch = EmnistBatch {
            images: Tensor::<B, 4>::random(
                [4, 1, 28, 28],
                burn::tensor::Distribution::Uniform(0.0, 1.0),
                &device,
            ),
            targets: Tensor::<B, 1, Int>::from_ints([0, 5, 12, 25], &device),
        };

        let output = TrainStep::step(&model, batch);
        let loss: f32 = output.item.loss.into_scalar();

        assert!(loss.is_finite() && loss > 0.0);
        assert_eq!(output.item.output.dims(), [4, 26]);
    }

    #[test]
    fn has_expected_parameter_count() {
        let device = Default::default();
        let model = ModelConfig::new(26).init::<NdArray>(&device);

        // convolutions (no bias)
        let convs = 9 * 16
            + 9 * 16 * 32
            + 3 * 9 * 32 * 32
            + 9 * 32 * 64
            + 2 * 9 * 64 * 64
            + 9 * 64 * 128
            + 2 * 9 * 128 * 128;
        // gamma, beta, running mean and running variance of every batch norm
        let norms = 4 * (16 + 16 + 4 * 32 + 3 * 64 + 2 * 128 + 128 + 128);
        let dense = 128 * 128 + 128 * 26 + 26;

        assert_eq!(model.num_params(), convs + norms + dense);
    }

    #[test]
    fn output_layer_starts_with_zero_bias() {
        let device = Default::default();
        let model = ModelConfig::new(26).init::<NdArray>(&device);
        let output = &model.classifier.output;

        let bias = output.bias.as_ref().map(|bias| bias.val().abs().sum().into_scalar());
        let bound = (6.0f32 / (128.0 + 26.0)).sqrt();

        assert_eq!(bias, Some(0.0));
        assert!(output.weight.val().abs().max().into_scalar() <= bound * 1.0001);
    }
}

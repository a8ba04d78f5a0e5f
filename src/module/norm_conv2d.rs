use burn::{nn::conv::Conv2d, prelude::*};
use nn::{conv::Conv2dConfig, BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu};

use super::{
    padding::pad_same,
    spatial_dropout::{SpatialDropout, SpatialDropoutConfig},
};

/// Pre-activation convolution: batch norm, ReLU, then convolution, with an
/// optional spatial dropout on the output.
#[derive(Module, Debug)]
pub struct NormConv2d<B: Backend> {
    norm: BatchNorm<B, 2>,
    activation: Relu,
    conv: Conv2d<B>,
    dropout: Option<SpatialDropout>,
}

impl<B: Backend> NormConv2d<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        let x = pad_same(x, self.conv.kernel_size, self.conv.stride);
        let x = self.conv.forward(x);

        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

#[derive(Config, Debug)]
pub struct NormConv2dConfig {
    channels: [usize; 2],

    #[config(default = "[1, 1]")]
    stride: [usize; 2],

    #[config(default = "[3, 3]")]
    kernel_size: [usize; 2],

    #[config(default = "None")]
    dropout: Option<f64>,

    #[config(default = 0.01)]
    momentum: f64,

    #[config(default = 1e-3)]
    epsilon: f64,

    #[config(default = "Initializer::XavierUniform { gain: 1.0 }")]
    initializer: Initializer,
}

impl NormConv2dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> NormConv2d<B> {
        NormConv2d {
            norm: BatchNormConfig::new(self.channels[0])
                .with_momentum(self.momentum)
                .with_epsilon(self.epsilon)
                .init(device),
            activation: Relu::new(),
            conv: Conv2dConfig::new(self.channels, self.kernel_size)
                .with_stride(self.stride)
                .with_padding(PaddingConfig2d::Valid)
                .with_bias(false)
                .with_initializer(self.initializer.clone())
                .init(device),
            dropout: self
                .dropout
                .map(|prob| SpatialDropoutConfig::new(prob).init()),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    #[test]
    fn stride_two_halves_spatial_size() {
        let device = Default::default();
        let block = NormConv2dConfig::new([8, 16])
            .with_stride([2, 2])
            .with_dropout(Some(0.1))
            .init::<NdArray>(&device);

        let shapes = [28, 14, 7].map(|size| {
            let input = Tensor::<NdArray, 4>::zeros([2, 8, size, size], &device);
            block.forward(input).dims()
        });

        assert_eq!(shapes, [[2, 16, 14, 14], [2, 16, 7, 7], [2, 16, 4, 4]]);
    }

    #[test]
    fn kernels_start_within_glorot_bound() {
        let device = Default::default();
        let block = NormConv2dConfig::new([16, 32]).init::<NdArray>(&device);

        let bound = (6.0f32 / (9.0 * 16.0 + 9.0 * 32.0)).sqrt();
        let max = block.conv.weight.val().abs().max().into_scalar();

        // a Kaiming uniform kernel would stay below 1/12
        assert!(max <= bound * 1.0001);
        assert!(max > 1.0 / 12.0);
    }
}

use burn::{nn::conv::Conv2d, prelude::*};
use nn::{conv::Conv2dConfig, BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu};

use super::padding::pad_same;

/// Convolution followed by batch norm and ReLU.
#[derive(Module, Debug)]
pub struct Conv2dNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> Conv2dNorm<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = pad_same(x, self.conv.kernel_size, self.conv.stride);
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);

        self.activation.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct Conv2dNormConfig {
    channels: [usize; 2],

    #[config(default = "[3, 3]")]
    kernel_size: [usize; 2],

    #[config(default = "[1, 1]")]
    stride: [usize; 2],

    #[config(default = 0.01)]
    momentum: f64,

    #[config(default = 1e-3)]
    epsilon: f64,

    #[config(default = "Initializer::XavierUniform { gain: 1.0 }")]
    initializer: Initializer,
}

impl Conv2dNormConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Conv2dNorm<B> {
        Conv2dNorm {
            conv: Conv2dConfig::new(self.channels, self.kernel_size)
                .with_stride(self.stride)
                .with_padding(PaddingConfig2d::Valid)
                .with_bias(false)
                .with_initializer(self.initializer.clone())
                .init(device),
            norm: BatchNormConfig::new(self.channels[1])
                .with_momentum(self.momentum)
                .with_epsilon(self.epsilon)
                .init(device),
            activation: Relu::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    #[test]
    fn keeps_spatial_size() {
        let device = Default::default();
        let stem = Conv2dNormConfig::new([1, 16]).init::<NdArray>(&device);

        let output = stem.forward(Tensor::zeros([2, 1, 28, 28], &device));

        assert_eq!(output.dims(), [2, 16, 28, 28]);
    }
}

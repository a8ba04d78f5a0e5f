use burn::{prelude::*, tensor::Distribution};

/// Configuration to create a [SpatialDropout](SpatialDropout) layer.
#[derive(Config, Debug)]
pub struct SpatialDropoutConfig {
    /// The probability of dropping a whole feature map.
    pub prob: f64,
}

/// Dropout over entire channels of a `[batch, channels, height, width]`
/// tensor.
///
/// Adjacent pixels of a feature map are strongly correlated, so dropping
/// them one by one barely regularizes a convolution. A dropped channel is
/// zero everywhere; surviving channels are scaled by `1 / (1 - prob)`.
/// Only active when the backend tracks gradients.
#[derive(Module, Clone, Debug)]
pub struct SpatialDropout {
    prob: f64,
}

impl SpatialDropoutConfig {
    pub fn init(&self) -> SpatialDropout {
        if !(0.0..1.0).contains(&self.prob) {
            panic!(
                "Dropout probability should be in [0, 1), got {}",
                self.prob
            );
        }

        SpatialDropout { prob: self.prob }
    }
}

impl SpatialDropout {
    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        if !B::ad_enabled() || self.prob == 0.0 {
            return input;
        }

        let [batch_size, channels, _, _] = input.dims();
        let prob_keep = 1.0 - self.prob;

        let mask = Tensor::<B, 4>::random(
            [batch_size, channels, 1, 1],
            Distribution::Bernoulli(prob_keep),
            &input.device(),
        );

        input * mask * (1.0 / prob_keep)
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    use super::*;

    #[test]
    fn identity_without_autodiff() {
        let device = Default::default();
        let input = Tensor::<NdArray, 4>::ones([2, 4, 3, 3], &device);

        let output = SpatialDropoutConfig::new(0.5).init().forward(input.clone());

        output.into_data().assert_eq(&input.into_data(), true);
    }

    #[test]
    fn drops_whole_channels_in_training() {
        let device = Default::default();
        let input = Tensor::<Autodiff<NdArray>, 4>::ones([4, 16, 5, 5], &device);

        let output = SpatialDropoutConfig::new(0.5).init().forward(input);
        let values = output.into_data().iter::<f32>().collect::<Vec<_>>();

        for channel in values.chunks(25) {
            let first = channel[0];
            assert!(first == 0.0 || first == 2.0, "unexpected value {first}");
            assert!(channel.iter().all(|&value| value == first));
        }
    }
}

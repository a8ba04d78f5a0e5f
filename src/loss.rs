use burn::{prelude::*, tensor::activation::softmax};

/// Configuration to create a [focal loss](FocalLoss).
#[derive(Config, Debug)]
pub struct FocalLossConfig {
    /// Focusing parameter; zero reduces to (weighted) cross entropy.
    #[config(default = 2.0)]
    pub gamma: f64,

    /// Weight applied to every class term.
    #[config(default = 0.25)]
    pub alpha: f64,

    /// Mass moved from the true class and spread uniformly over all classes.
    #[config(default = 0.1)]
    pub label_smoothing: f64,

    /// Probabilities are clamped to `[epsilon, 1 - epsilon]` before the log.
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

impl FocalLossConfig {
    pub fn init(&self) -> FocalLoss {
        if !(0.0..=1.0).contains(&self.label_smoothing) {
            panic!(
                "Label smoothing should be in [0, 1], got {}",
                self.label_smoothing
            );
        }

        FocalLoss {
            gamma: self.gamma,
            alpha: self.alpha,
            label_smoothing: self.label_smoothing,
            epsilon: self.epsilon,
        }
    }
}

/// Categorical focal cross entropy over logits.
///
/// `loss = mean_i Σ_c α (1 - p_ic)^γ · (-y_ic ln p_ic)` where `p = softmax(logits)`
/// and `y` is the smoothed one-hot target. Well-classified samples have
/// `p` close to one and contribute little, which keeps the gradient focused
/// on hard examples.
#[derive(Module, Clone, Debug)]
pub struct FocalLoss {
    gamma: f64,
    alpha: f64,
    label_smoothing: f64,
    epsilon: f64,
}

impl FocalLoss {
    /// Shapes:
    ///   - logits: `[batch_size, num_classes]`
    ///   - targets: `[batch_size]`
    ///   - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let [batch_size, num_classes] = logits.dims();
        let targets = self.smoothed_targets(targets, [batch_size, num_classes]);

        let probs = softmax(logits, 1).clamp(self.epsilon, 1.0 - self.epsilon);

        let cross_entropy = targets.neg() * probs.clone().log();
        let modulating = (probs.neg() + 1.0).powf_scalar(self.gamma);

        (cross_entropy * modulating * self.alpha).sum_dim(1).mean()
    }

    fn smoothed_targets<B: Backend>(
        &self,
        targets: Tensor<B, 1, Int>,
        shape: [usize; 2],
    ) -> Tensor<B, 2> {
        let [batch_size, num_classes] = shape;
        let device = &targets.device();

        let one_hot = Tensor::<B, 2>::zeros(shape, device).scatter(
            1,
            targets.reshape([batch_size, 1]),
            Tensor::ones([batch_size, 1], device),
        );

        one_hot * (1.0 - self.label_smoothing) + self.label_smoothing / num_classes as f64
    }
}

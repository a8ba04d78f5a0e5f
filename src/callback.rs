//! Epoch-level convergence control driven by the validation loss.

use burn::config::Config;
use tracing::info;

/// Best value seen so far of a quantity where lower is better.
#[derive(Debug, Clone)]
struct Monitor {
    best: f64,
    min_delta: f64,
}

impl Monitor {
    fn new(min_delta: f64) -> Self {
        Self {
            best: f64::INFINITY,
            min_delta,
        }
    }

    /// Records `value`, returning whether it beats the best by more than `min_delta`.
    fn improved(&mut self, value: f64) -> bool {
        if value < self.best - self.min_delta {
            self.best = value;
            true
        } else {
            false
        }
    }
}

#[derive(Config, Debug)]
pub struct ReduceLrOnPlateauConfig {
    /// Multiplier applied to the learning rate on a plateau.
    #[config(default = 0.5)]
    pub factor: f64,

    /// Epochs without improvement before reducing.
    #[config(default = 3)]
    pub patience: usize,

    #[config(default = 1e-6)]
    pub min_lr: f64,

    #[config(default = 1e-4)]
    pub min_delta: f64,

    /// Epochs to wait after a reduction before counting again.
    #[config(default = 0)]
    pub cooldown: usize,
}

impl ReduceLrOnPlateauConfig {
    pub fn init(&self, learning_rate: f64) -> ReduceLrOnPlateau {
        if !(0.0..1.0).contains(&self.factor) {
            panic!("Plateau factor should be in [0, 1), got {}", self.factor);
        }

        ReduceLrOnPlateau {
            factor: self.factor,
            patience: self.patience,
            min_lr: self.min_lr,
            cooldown: self.cooldown,
            monitor: Monitor::new(self.min_delta),
            learning_rate,
            wait: 0,
            cooldown_counter: 0,
        }
    }
}

/// Halves (by default) the learning rate once the monitored loss stops improving.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    cooldown: usize,
    monitor: Monitor,
    learning_rate: f64,
    wait: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Feeds the loss of the finished epoch and returns the learning rate for the next one.
    pub fn step(&mut self, loss: f64) -> f64 {
        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if self.monitor.improved(loss) {
            self.wait = 0;
        } else if self.cooldown_counter == 0 {
            self.wait += 1;

            if self.wait >= self.patience && self.learning_rate > self.min_lr {
                let learning_rate = (self.learning_rate * self.factor).max(self.min_lr);
                info!(
                    from = self.learning_rate,
                    to = learning_rate,
                    "loss plateaued, reducing learning rate"
                );

                self.learning_rate = learning_rate;
                self.cooldown_counter = self.cooldown;
                self.wait = 0;
            }
        }

        self.learning_rate
    }
}

#[derive(Config, Debug)]
pub struct EarlyStoppingConfig {
    /// Epochs without improvement before stopping.
    #[config(default = 5)]
    pub patience: usize,

    #[config(default = 0.0)]
    pub min_delta: f64,

    /// Hand back the best state instead of the last one.
    #[config(default = true)]
    pub restore_best: bool,
}

impl EarlyStoppingConfig {
    pub fn init<M>(&self) -> EarlyStopping<M> {
        EarlyStopping {
            patience: self.patience,
            restore_best: self.restore_best,
            monitor: Monitor::new(self.min_delta),
            wait: 0,
            best_epoch: None,
            best_state: None,
        }
    }
}

/// Stops training when the monitored loss has not improved for `patience`
/// epochs, keeping a copy of the best state seen.
#[derive(Debug)]
pub struct EarlyStopping<M> {
    patience: usize,
    restore_best: bool,
    monitor: Monitor,
    wait: usize,
    best_epoch: Option<usize>,
    best_state: Option<M>,
}

impl<M: Clone> EarlyStopping<M> {
    /// Returns `true` once training should stop.
    pub fn step(&mut self, epoch: usize, loss: f64, state: &M) -> bool {
        if self.monitor.improved(loss) {
            self.wait = 0;
            self.best_epoch = Some(epoch);
            if self.restore_best {
                self.best_state = Some(state.clone());
            }
            return false;
        }

        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_loss(&self) -> f64 {
        self.monitor.best
    }

    /// Consumes the tracker, returning the best state when restoring is
    /// enabled and one was recorded, `last` otherwise.
    pub fn finish(self, last: M) -> M {
        match self.best_state {
            Some(best) => {
                if let Some(epoch) = self.best_epoch {
                    info!(epoch, loss = self.monitor.best, "restoring best weights");
                }
                best
            }
            None => last,
        }
    }
}

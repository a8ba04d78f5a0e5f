use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use burn::{
    backend::{wgpu::WgpuDevice, Autodiff, Wgpu},
    config::Config,
    optim::AdamWConfig,
};
use model::ModelConfig;
use predict::Predictor;
use tracing::info;
use tracing_subscriber::EnvFilter;
use training::{train, TrainingConfig};

pub mod augment;
pub mod callback;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod loss;
pub mod model;
pub mod module;
pub mod predict;
pub mod preview;
pub mod training;

const LABELS: [char; 26] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z',
];

const ARTIFACT_DIR: &str = "artifact";

/// Optional override of the default training configuration.
const CONFIG_FILE: &str = "training.json";

type Backend = Wgpu<f32, i32>;
type AutodiffBackend = Autodiff<Backend>;

fn load_config() -> anyhow::Result<TrainingConfig> {
    if !Path::new(CONFIG_FILE).exists() {
        return Ok(TrainingConfig::new(
            ModelConfig::new(LABELS.len()),
            AdamWConfig::new()
                .with_weight_decay(1.0e-4)
                .with_epsilon(1.0e-7),
        ));
    }

    let config = TrainingConfig::load(CONFIG_FILE)
        .map_err(error::Error::from)
        .with_context(|| format!("loading {CONFIG_FILE}"))?;

    Ok(config)
}

fn run_training(artifact_dir: &Path) -> anyhow::Result<()> {
    let device = WgpuDevice::default();
    let data_dir = env::var_os("EMNIST_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = load_config()?;

    let report = train::<AutodiffBackend>(artifact_dir, &data_dir, config, device)
        .with_context(|| format!("training on data in {}", data_dir.display()))?;

    info!(
        epochs = report.history.len(),
        best_epoch = ?report.best_epoch,
        artifact_dir = %artifact_dir.display(),
        "training finished"
    );
    println!("Test accuracy: {}", report.evaluation.accuracy());

    Ok(())
}

fn run_inference(artifact_dir: &Path, images: &[PathBuf]) -> anyhow::Result<()> {
    if images.is_empty() {
        bail!("no images given, usage: emnist-letters infer <image>...");
    }

    let predictor = Predictor::<Backend>::load(artifact_dir, WgpuDevice::default())
        .with_context(|| format!("loading the trained model from {}", artifact_dir.display()))?;

    for path in images {
        let image = image::open(path).with_context(|| format!("reading {}", path.display()))?;

        match predictor.predict(&image) {
            Some(label) => println!("{}: {label}", path.display()),
            None => println!("{}: blank", path.display()),
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let artifact_dir = Path::new(ARTIFACT_DIR);
    let mut args = env::args().skip(1);

    match args.next().as_deref() {
        None | Some("train") => run_training(artifact_dir),
        Some("infer") => run_inference(artifact_dir, &args.map(PathBuf::from).collect::<Vec<_>>()),
        Some(command) => bail!("unknown command {command:?}, expected `train` or `infer`"),
    }
}

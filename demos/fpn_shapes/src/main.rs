#![recursion_limit = "256"]

use burn::backend::NdArray;
use burn::config::Config;
use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::{Distribution, Tensor};
use clap::Parser;
use retina_fpn::models::retina_fpn::model::{RetinaFpn, RetinaFpnAbstractConfig, RetinaFpnConfig};
use retina_fpn::models::retina_fpn::prefabs::{PREFAB_RETINA_FPN_MAP, lookup_prefab};
use retina_fpn::models::retina_fpn::pyramid::{PYRAMID_LEVEL_NAMES, PYRAMID_STRIDES};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Name of the prefab model config.
    #[arg(long, default_value = "retina_fpn101")]
    model: String,

    /// Load the model config from a JSON file; overrides `--model`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// List the prefab model configs and exit.
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Input batch size.
    #[arg(long, default_value_t = 1)]
    batch: usize,

    /// Input height.
    #[arg(long, default_value_t = 600)]
    height: usize,

    /// Input width.
    #[arg(long, default_value_t = 300)]
    width: usize,

    /// Save the initialized model record to this path.
    #[arg(long)]
    save: Option<PathBuf>,
}

fn load_config(args: &Args) -> anyhow::Result<RetinaFpnAbstractConfig> {
    if let Some(path) = &args.config {
        return RetinaFpnAbstractConfig::load(path)
            .map_err(|err| anyhow::anyhow!("failed to load config {path:?}: {err}"));
    }

    match lookup_prefab(&args.model) {
        Some(prefab) => Ok(prefab.new_config()),
        None => anyhow::bail!(
            "unknown model {:?}; expected one of {:?}",
            args.model,
            PREFAB_RETINA_FPN_MAP.names()
        ),
    }
}

fn load_structure(args: &Args) -> anyhow::Result<RetinaFpnConfig> {
    let config = load_config(args)?.to_structure();
    config.try_validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

/// The preset name, or the config path when `--config` is given.
fn config_source(args: &Args) -> String {
    match &args.config {
        Some(path) => path.display().to_string(),
        None => args.model.clone(),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if args.list {
        for prefab in PREFAB_RETINA_FPN_MAP.items {
            println!("{:<16} {}", prefab.name, prefab.description);
        }
        return Ok(());
    }

    type B = NdArray<f32>;
    let device = Default::default();

    let config = load_structure(&args)?;

    let expected = config.output_resolutions([args.height, args.width]);
    let in_channels = config.in_channels();
    let fpn_planes = config.fpn_planes();

    tracing::info!(source = %config_source(&args), "building model");
    let model: RetinaFpn<B> = config.init(&device);
    tracing::info!(num_params = model.num_params(), "model ready");

    if let Some(path) = &args.save {
        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .map_err(|err| anyhow::anyhow!("failed to save model to {path:?}: {err:?}"))?;
        tracing::info!(?path, "saved model record");
    }

    let input: Tensor<B, 4> = Tensor::random(
        [args.batch, in_channels, args.height, args.width],
        Distribution::Default,
        &device,
    );
    let shapes = model.forward(input).shapes();

    for (idx, shape) in shapes.iter().enumerate() {
        println!(
            "{} (stride {:>3}): {:?}",
            PYRAMID_LEVEL_NAMES[idx], PYRAMID_STRIDES[idx], shape
        );

        let [height, width] = expected[idx];
        if *shape != [args.batch, fpn_planes, height, width] {
            anyhow::bail!(
                "{} shape {shape:?} does not match the predicted [{}, {fpn_planes}, {height}, {width}]",
                PYRAMID_LEVEL_NAMES[idx],
                args.batch,
            );
        }
    }

    Ok(())
}

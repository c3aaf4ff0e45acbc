use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use sarmap::io::metadata::{load_scene_job, normalize_order_key, read_metadata, TargetTable};
use sarmap::io::{
    Gdal2TilesCommand, GdalRasterSource, GdalTransformFactory, GdalWarpCommand, GmtMapRenderer,
    SvgOverlayRenderer, SvgTextMeasurer,
};
use sarmap::{Collaborators, EngineConfig, ScenePipeline, ThreadHint};

#[derive(Parser, Debug)]
#[command(name = "sarmap", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce tiles and annotated previews for extracted scene directories.
    Process(ProcessArgs),
    /// Print the metadata and target resolved for a scene directory.
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct ProcessArgs {
    /// Scene directories holding `sar_image.tif` and `metadata.xml`.
    #[arg(required = true)]
    scenes: Vec<PathBuf>,

    /// Output root; products go under `Orbit <n>-<dir>/<date>/`.
    #[arg(long)]
    out: PathBuf,

    /// Target table JSON (order key -> target record).
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Engine configuration JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Thread count for warping and tiling (default: all CPUs).
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    scene: PathBuf,

    #[arg(long)]
    targets: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("load config from '{}'", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_targets(path: Option<&PathBuf>) -> anyhow::Result<TargetTable> {
    match path {
        Some(path) => TargetTable::from_file(path)
            .with_context(|| format!("load target table from '{}'", path.display())),
        None => Ok(TargetTable::default()),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Process(args) => process(args),
        Command::Inspect(args) => inspect(args),
    }
}

fn process(args: ProcessArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(threads) = args.threads {
        config.threads = ThreadHint::Count(threads);
    }
    let targets = load_targets(args.targets.as_ref())?;

    let rasters = GdalRasterSource;
    let transforms = GdalTransformFactory::default();
    let warper = GdalWarpCommand::default();
    let tiles = Gdal2TilesCommand::default();
    let renderer = GmtMapRenderer::default();
    let measurer = SvgTextMeasurer::new(
        config.annotation.font_family.clone(),
        &config.annotation.font_dirs,
    );
    let overlay = SvgOverlayRenderer::new(measurer.clone());

    let mut failed = 0usize;
    let mut jobs = Vec::with_capacity(args.scenes.len());
    for scene in &args.scenes {
        match load_scene_job(scene, &args.out, &targets, &config) {
            Ok(job) => jobs.push(job),
            Err(failure) => {
                log::error!("{}", failure);
                failed += 1;
            }
        }
    }

    let pipeline = ScenePipeline::new(
        config,
        Collaborators {
            rasters: &rasters,
            transforms: &transforms,
            warper: &warper,
            tiles: &tiles,
            renderer: &renderer,
            measurer: &measurer,
            overlay: &overlay,
        },
    )
    .context("set up pipeline")?;

    for result in pipeline.process_batch(&jobs) {
        match result {
            Ok(products) => {
                println!("{}", products.annotated_product.display());
                println!("  tiles:  {}", products.tile_dir.display());
                println!("  region: {}", products.crop_bounds.to_region_string());
                println!(
                    "  scale:  {} {}",
                    products.scale_bar.length, products.scale_bar.unit
                );
            }
            Err(_) => failed += 1,
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} scene(s) failed", failed, args.scenes.len());
    }
    Ok(())
}

fn inspect(args: InspectArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let targets = load_targets(args.targets.as_ref())?;

    let metadata = read_metadata(args.scene.join("metadata.xml"), &config.missions)
        .with_context(|| format!("read metadata in '{}'", args.scene.display()))?;
    let key = normalize_order_key(&metadata.order_name, &metadata.order_id)?;
    println!("mission:   {} ({})", metadata.mission_name, metadata.mission_code);
    println!("orbit:     {} {}", metadata.orbit, metadata.direction);
    println!("time:      {}", metadata.scene_time.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("image:     {}", metadata.image_file_name);
    println!("order key: {}", key.lookup_key);

    let job = load_scene_job(&args.scene, &PathBuf::from("."), &targets, &config)?;
    println!("target:    {}", job.target.target_name);
    println!("rotation:  {}", job.target.rotation_degrees);
    println!("zoomed:    {}", job.target.zoomed);
    Ok(())
}

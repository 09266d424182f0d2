use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stereo_vo::config::{CliArgs, RunConfig, TrackerVariant};
use stereo_vo::frame::CameraModel;
use stereo_vo::io::{load_camera_params, load_image_list};
use stereo_vo::pipeline::RunSummary;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stereo_vo=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = CliArgs::parse();
    let config = RunConfig::from_args(&args).context("invalid configuration")?;
    let camera = load_camera_params(&config.camera_params)?;
    let entries = load_image_list(&config.imglist)?;
    info!(
        pairs = entries.len() / 2,
        camera = ?camera,
        refinement = config.refinement_enabled,
        tracker = ?config.tracker_variant,
        "configuration loaded"
    );

    if config.tracker_variant == TrackerVariant::Libviso {
        bail!("the libviso tracker is not available in this build, use `bfm` or `refiner`");
    }

    let summary = run(&config, camera, entries)?;
    info!(
        poses = summary.num_poses,
        skipped = summary.skipped,
        refined = summary.refined,
        fallbacks = summary.refinement_fallbacks,
        gt_better = summary.ground_truth_better,
        mean_direct_px = ?summary.mean_direct_error,
        mean_refined_px = ?summary.mean_refined_error,
        "run finished"
    );
    Ok(())
}

#[cfg(feature = "opencv")]
fn run(config: &RunConfig, camera: CameraModel, entries: Vec<String>) -> Result<RunSummary> {
    use opencv::core::Mat;
    use stereo_vo::egomotion::opencv_estimator::{OpencvImageLoader, OrbStereoEstimator};
    use stereo_vo::evaluation::GroundTruth;
    use stereo_vo::frame::{FrameSource, ImageListSource, PrefetchSource};
    use stereo_vo::pipeline::VoPipeline;

    const ORB_FEATURES: i32 = 2000;

    let subpixel = config.tracker_variant == TrackerVariant::Refiner;
    let estimator = OrbStereoEstimator::new(camera, ORB_FEATURES, subpixel)?;

    let list = ImageListSource::new(&config.source_folder, entries, OpencvImageLoader)
        .with_range(config.start_frame, config.end_frame);
    let source: Box<dyn FrameSource<Image = Mat>> = if config.prefetch > 0 {
        Box::new(PrefetchSource::spawn(list, config.prefetch))
    } else {
        Box::new(list)
    };

    let mut pipeline = VoPipeline::new(config.pipeline_options(), camera, source, estimator);
    if let Some(path) = &config.ground_truth {
        let gt = GroundTruth::load(path)
            .with_context(|| format!("loading ground truth {}", path.display()))?;
        pipeline = pipeline.with_ground_truth(gt.with_offset(config.start_frame));
    }
    Ok(pipeline.run()?)
}

#[cfg(not(feature = "opencv"))]
fn run(config: &RunConfig, _camera: CameraModel, _entries: Vec<String>) -> Result<RunSummary> {
    bail!(
        "the {:?} tracker needs OpenCV, rebuild with `--features opencv`",
        config.tracker_variant
    )
}

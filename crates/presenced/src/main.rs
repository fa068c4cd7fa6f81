use anyhow::{Context, Result};
use presence_core::{gallery, DetectOptions, OnnxEngine, SystemClock};
use presence_hw::Camera;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod pipeline;
mod render;

use attendance::Attendance;
use config::Config;
use pipeline::{Pipeline, PipelineOptions, RunSummary, StopSignal};
use render::{NullRenderer, PreviewRenderer, Renderer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        gallery = %config.gallery_dir.display(),
        attendance = %config.attendance_file.display(),
        tolerance = config.tolerance,
        model = %config.detection_model,
        "presenced starting"
    );

    let stop = StopSignal::default();
    spawn_ctrl_c(stop.clone());
    spawn_quit_key(stop.clone());

    let summary = tokio::task::spawn_blocking(move || run(config, stop))
        .await
        .context("recognition thread panicked")??;

    tracing::info!(
        frames = summary.frames,
        reason = %summary.reason,
        "presenced shutting down"
    );
    Ok(())
}

fn spawn_ctrl_c(stop: StopSignal) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, finishing current frame");
                stop.trigger();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });
}

/// Typing `q` and Enter on the controlling terminal ends the run.
fn spawn_quit_key(stop: StopSignal) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => {
                    tracing::info!("quit key pressed, finishing current frame");
                    stop.trigger();
                    return;
                }
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!(error = %e, "stdin closed");
                    return;
                }
            }
        }
    });
}

/// Startup plus the blocking recognition loop.
fn run(config: Config, stop: StopSignal) -> Result<RunSummary> {
    let mut engine = OnnxEngine::load(&config.model_dir, config.detection_model)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    let gallery_options = DetectOptions {
        upsample: 1,
        model: config.detection_model,
    };
    let gallery = gallery::build(&config.gallery_dir, &mut engine, &gallery_options)
        .with_context(|| format!("building gallery from {}", config.gallery_dir.display()))?;
    if gallery.is_empty() {
        tracing::warn!("gallery is empty, every face will be reported as unknown");
    } else {
        tracing::info!(identities = ?gallery.identities(), "gallery ready");
    }

    let store = presence_core::AttendanceStore::new(&config.attendance_file);
    let attendance = Attendance::open(store, SystemClock).with_context(|| {
        format!("opening attendance file {}", config.attendance_file.display())
    })?;

    let camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    let mut stream = camera.stream()?;
    stream.discard(config.warmup_frames);

    let renderer: Box<dyn Renderer> = match &config.preview_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "writing annotated preview");
            Box::new(PreviewRenderer::new(path.clone()))
        }
        None => Box::new(NullRenderer),
    };

    let options = PipelineOptions {
        tolerance: config.tolerance,
        resize: config.resize,
        detect: DetectOptions {
            upsample: config.upsample,
            model: config.detection_model,
        },
    };

    tracing::info!("presenced ready, press q then Enter or Ctrl-C to stop");
    let mut pipeline =
        Pipeline::new(stream, engine, renderer, gallery, attendance, options).with_stop(stop);
    let summary = pipeline.run();
    tracing::info!(
        present = pipeline.attendance().snapshot().len(),
        "attendance for today"
    );
    Ok(summary)
}

use anyhow::Context;
use clap::Parser;
use common::{Environment, LogLevel, setup_logging};
use inference::{
    DeviceSelection, InferenceMetrics, InferenceService,
    annotate::Annotator,
    backend::ort::OrtEngine,
    config::DEFAULT_CONFIDENCE_THRESHOLD,
    pool::WorkerPool,
    processing::{post::DEFAULT_IOU_THRESHOLD, pre::DEFAULT_INPUT_SIZE},
};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Run the detector on one image or video file
#[derive(Parser, Debug)]
#[command(name = "predict")]
struct Args {
    /// Image or video to run detection on
    #[arg(long)]
    input: PathBuf,

    /// ONNX model exported from the trained checkpoint
    #[arg(long, default_value = "models/best.onnx")]
    model: PathBuf,

    /// auto, cpu or cuda
    #[arg(long, default_value = "auto")]
    device: DeviceSelection,

    /// Confidence threshold
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    conf: f32,

    /// Where to write the annotated image or video
    #[arg(long)]
    save: Option<PathBuf>,

    /// TrueType/OpenType font for "<class> <score>" labels on saved output
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Image,
    Video,
}

impl InputKind {
    fn as_str(self) -> &'static str {
        match self {
            InputKind::Image => "image",
            InputKind::Video => "video",
        }
    }
}

fn input_kind(path: &Path) -> anyhow::Result<InputKind> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        Ok(InputKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        Ok(InputKind::Video)
    } else {
        anyhow::bail!("Unsupported input type: {}", path.display())
    }
}

/// The annotated output must be the same kind of media as the input.
fn check_save_target(kind: InputKind, save: &Path) -> anyhow::Result<()> {
    let save_kind = input_kind(save)
        .with_context(|| format!("Unsupported output type: {}", save.display()))?;
    if save_kind != kind {
        anyhow::bail!(
            "Cannot save {} input as {}",
            kind.as_str(),
            save.display()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(LogLevel::Info, Environment::from_env());

    if !args.input.exists() {
        anyhow::bail!("Input not found: {}", args.input.display());
    }
    let kind = input_kind(&args.input)?;
    if let Some(save) = &args.save {
        check_save_target(kind, save)?;
    }
    let annotator = match &args.font {
        Some(font) => Annotator::with_font_file(font)?,
        None => Annotator::new(),
    };

    let engine = OrtEngine::load(
        &args.model,
        args.device,
        DEFAULT_INPUT_SIZE,
        DEFAULT_IOU_THRESHOLD,
    )?;
    tracing::info!(model = %args.model.display(), "Model loaded");

    let service = InferenceService::new(
        engine,
        WorkerPool::new(1)?,
        InferenceMetrics::new()?,
        args.conf,
    );

    match kind {
        InputKind::Image => {
            predict_image(&service, &args.input, args.save.as_deref(), &annotator).await
        }
        InputKind::Video => {
            predict_video(&service, &args.input, args.save.as_deref(), &annotator).await
        }
    }
}

async fn predict_image(
    service: &InferenceService<OrtEngine>,
    input: &Path,
    save: Option<&Path>,
    annotator: &Annotator,
) -> anyhow::Result<()> {
    let image = image::open(input)
        .with_context(|| format!("Could not load image: {}", input.display()))?
        .to_rgb8();

    let batch = service.predict(image.clone()).await?;

    for detection in batch.detections() {
        let b = &detection.bbox;
        println!(
            "{} {:.2} [{:.0}, {:.0}, {:.0}, {:.0}]",
            detection.class_name, detection.confidence, b.x1, b.y1, b.x2, b.y2
        );
    }
    println!(
        "{} objects in {:.1} ms",
        batch.num_objects(),
        batch.inference_time_ms()
    );

    if let Some(path) = save {
        let mut annotated = image;
        annotator.draw(&mut annotated, &batch);
        annotated
            .save(path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        println!("Saved annotated image to {}", path.display());
    }

    Ok(())
}

#[cfg(feature = "ffmpeg")]
async fn predict_video(
    service: &InferenceService<OrtEngine>,
    input: &Path,
    save: Option<&Path>,
    annotator: &Annotator,
) -> anyhow::Result<()> {
    use inference::video::ffmpeg::{FfmpegDecoder, FfmpegEncoder};

    let path = input.to_path_buf();
    let result = inference::process_video(service, move || FfmpegDecoder::open(&path)).await?;

    for (index, frame) in result.frames.iter().enumerate() {
        println!("frame {index}: {} objects", frame.num_objects());
    }
    println!("{} frames at {:.2} fps", result.frames.len(), result.fps);

    if let Some(save) = save {
        let input = input.to_path_buf();
        let output = save.to_path_buf();
        let annotator = annotator.clone();
        let written = tokio::task::spawn_blocking(move || {
            inference::annotate_video(
                FfmpegDecoder::open(&input)?,
                &result,
                &annotator,
                |width, height, fps| FfmpegEncoder::create(&output, width, height, fps),
            )
        })
        .await??;
        println!("Saved {written} annotated frames to {}", save.display());
    }

    Ok(())
}

#[cfg(not(feature = "ffmpeg"))]
async fn predict_video(
    _service: &InferenceService<OrtEngine>,
    input: &Path,
    _save: Option<&Path>,
    _annotator: &Annotator,
) -> anyhow::Result<()> {
    anyhow::bail!(
        "Video input requires the `ffmpeg` feature: {}",
        input.display()
    )
}

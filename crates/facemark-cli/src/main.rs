use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod annotate;
mod client;

use facemark_core::{
    analyze, load_upload, Analysis, ModelConfig, ModelRegistry, SessionCache, UploadToken,
    DEFAULT_THRESHOLD, MAX_DETECTIONS, MAX_IMAGE_DIM,
};

#[derive(Parser)]
#[command(name = "facemark", about = "Face and facial landmark detection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces and landmarks in an image, locally
    Detect {
        /// Image file (JPEG or PNG)
        image: PathBuf,
        /// Confidence threshold; repeat to sweep several without re-running the detector
        #[arg(short = 't', long = "threshold", default_values_t = [DEFAULT_THRESHOLD])]
        thresholds: Vec<f32>,
        /// Detector backend: "caffe" or "tf"
        #[arg(long, env = "FACEMARK_BACKEND", default_value = "caffe")]
        backend: String,
        /// Directory containing the ONNX models
        #[arg(long, env = "FACEMARK_MODEL_DIR", default_value = "models")]
        model_dir: PathBuf,
        /// Skip landmark fitting at or above this many faces
        #[arg(long, default_value_t = MAX_DETECTIONS)]
        max_detections: usize,
        /// Downscale uploads larger than this on both sides
        #[arg(long, default_value_t = MAX_IMAGE_DIM)]
        max_image_dim: u32,
        /// Write an annotated copy of the (last) analysis to this path
        #[arg(long)]
        annotate: Option<PathBuf>,
        /// Print analyses as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload an image to the running daemon and print the analysis
    Remote {
        /// Image file (JPEG or PNG)
        image: PathBuf,
        /// Confidence threshold; repeat to sweep several
        #[arg(short = 't', long = "threshold", default_values_t = [DEFAULT_THRESHOLD])]
        thresholds: Vec<f32>,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect {
            image,
            thresholds,
            backend,
            model_dir,
            max_detections,
            max_image_dim,
            annotate: annotate_out,
            json,
        } => {
            let config = ModelConfig { backend, model_dir };
            let mut registry = ModelRegistry::new(&config)?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;

            let mut cache = SessionCache::new();
            let token = UploadToken::new(image.display().to_string());
            let upload = cache.get_or_refresh(&token, || load_upload(&bytes, max_image_dim), &mut registry)?;
            tracing::debug!(
                %token,
                width = upload.image().width(),
                height = upload.image().height(),
                candidates = upload.detections().len(),
                "image loaded and detector run"
            );

            let mut last = None;
            for threshold in thresholds {
                let analysis = analyze(
                    upload.image(),
                    upload.detections(),
                    threshold,
                    max_detections,
                    &mut registry,
                )?;
                print_analysis(&analysis, json)?;
                last = Some(analysis);
            }

            if let (Some(out), Some(analysis)) = (annotate_out, last) {
                annotate::save_annotated(upload.image(), &analysis, &out)?;
                println!("Annotated image written to {}", out.display());
            }
        }
        Commands::Remote { image, thresholds } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let proxy = client::connect().await?;

            let session = proxy.open_session().await?;
            tracing::debug!(%session, "daemon session opened");
            let summary = proxy
                .upload(&session, &image.display().to_string(), &bytes)
                .await
                .context("upload rejected by facemarkd")?;
            println!("{summary}");

            for threshold in thresholds {
                let analysis = proxy.analyze(&session, threshold as f64).await?;
                println!("{analysis}");
            }
            proxy.close_session(&session).await?;
            tracing::debug!(%session, "daemon session closed");
        }
        Commands::Status => {
            let proxy = client::connect().await?;
            println!("{}", proxy.status().await?);
        }
    }

    Ok(())
}

fn print_analysis(analysis: &Analysis, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(analysis)?);
        return Ok(());
    }

    println!(
        "threshold {:.2}: {} face(s) in {}x{}",
        analysis.threshold,
        analysis.face_count(),
        analysis.width,
        analysis.height
    );
    if analysis.crowded {
        println!("  landmark fitting skipped: too many faces");
    }
    for (i, b) in analysis.boxes.iter().enumerate() {
        let points = analysis
            .landmarks
            .as_ref()
            .and_then(|sets| sets.get(i))
            .map(|set| set.len())
            .unwrap_or(0);
        println!(
            "  #{i}: x={} y={} w={} h={} landmarks={points}",
            b.x, b.y, b.width, b.height
        );
    }
    Ok(())
}

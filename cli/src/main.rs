use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use specto::{
    CaptureReader, CaptureSource, GraphicsDevice, ImageCodec, PixelFormat, Presenter,
    StreamEncoding, SyntheticSource, TestPattern,
};

#[derive(Parser)]
#[command(name = "spectocap")]
#[command(about = "Live capture to GPU presentation bridge", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the capture session and the GPU adapter it would run on
    Info {
        /// Capture source to inspect (synthetic, camera)
        #[arg(short, long, default_value = "synthetic")]
        source: String,

        /// Camera device node (with --source camera)
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,

        /// Frame width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "480")]
        height: u32,

        /// Frame rate in frames per second
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pull frames from a source, present them, and export the last one
    Grab {
        /// Capture source to read from (synthetic, camera)
        #[arg(short, long, default_value = "synthetic")]
        source: String,

        /// Camera device node (with --source camera)
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,

        /// Frames to pull before exporting
        #[arg(short = 'n', long, default_value = "30")]
        frames: u64,

        /// Output file for the final frame
        #[arg(short, long, default_value = "frame.png")]
        output: PathBuf,

        /// Still-image codec (png, jpeg, bmp); inferred from the output
        /// extension when omitted
        #[arg(short, long)]
        codec: Option<String>,

        /// Frame width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "480")]
        height: u32,

        /// Frame rate in frames per second
        #[arg(long, default_value = "30")]
        fps: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info {
            source,
            device,
            width,
            height,
            fps,
            json,
        } => {
            let encoding =
                StreamEncoding::uncompressed(PixelFormat::Bgra8, width, height)
                    .with_frame_rate(fps, 1);
            let session = make_session(&source, &device, encoding)?;
            let gfx = GraphicsDevice::from_session(session.as_ref())?;

            if json {
                let payload = serde_json::json!({
                    "source": source,
                    "encoding": encoding,
                    "adapter": gfx.adapter_summary(),
                    "output_format": format!("{:?}", gfx.output_format()),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Source:        {source}");
                println!("Encoding:      {encoding}");
                println!("GPU adapter:   {}", gfx.adapter_summary());
                println!("Output format: {:?}", gfx.output_format());
            }
        }

        Commands::Grab {
            source,
            device,
            frames,
            output,
            codec,
            width,
            height,
            fps,
        } => {
            anyhow::ensure!(frames > 0, "--frames must be at least 1");

            let encoding =
                StreamEncoding::uncompressed(PixelFormat::Bgra8, width, height)
                    .with_frame_rate(fps, 1);
            let session = make_session(&source, &device, encoding)?;

            let gfx = GraphicsDevice::from_session(session.as_ref())?;
            log::info!("Using GPU adapter: {}", gfx.adapter_summary());

            let reader = CaptureReader::create(session, gfx.clone(), encoding).await?;
            let mut presenter = Presenter::composition(&gfx, width, height)?;

            let mut last = None;
            for index in 0..frames {
                let sample = reader.next_sample().await?;
                presenter.present(&sample)?;
                log::debug!("frame {index} presented at {:?}", sample.timestamp());
                if let Some(previous) = last.replace(sample) {
                    previous.release();
                }
            }

            let dropped = reader.frames_dropped();
            if dropped > 0 {
                log::warn!("{dropped} frame(s) dropped upstream during the run");
            }

            let Some(sample) = last else {
                anyhow::bail!("no frames captured");
            };
            let codec = match codec {
                Some(name) => name
                    .parse::<ImageCodec>()
                    .with_context(|| format!("--codec {name}"))?,
                None => infer_codec(&output)?,
            };
            sample.save_to_file(&output, codec).await?;
            sample.release();
            reader.close();

            println!(
                "Saved {} ({} frame(s) presented)",
                output.display(),
                presenter.frames_presented()
            );
        }
    }

    Ok(())
}

fn make_session(
    source: &str,
    device: &str,
    encoding: StreamEncoding,
) -> Result<Arc<dyn CaptureSource>> {
    match source {
        "synthetic" => {
            Ok(Arc::new(SyntheticSource::new(encoding).with_pattern(TestPattern::Bars)))
        }

        #[cfg(feature = "camera")]
        "camera" => Ok(Arc::new(specto::CameraSource::new(device, encoding)?)),

        #[cfg(not(feature = "camera"))]
        "camera" => {
            let _ = device;
            anyhow::bail!("camera support is not compiled in; rebuild with --features camera")
        }

        other => anyhow::bail!("unknown capture source '{other}' (expected synthetic or camera)"),
    }
}

fn infer_codec(path: &Path) -> Result<ImageCodec> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");
    extension
        .parse::<ImageCodec>()
        .with_context(|| format!("cannot infer a codec from '{}'", path.display()))
}

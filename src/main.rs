use clap::{Args, Parser, Subcommand};
use fluxgen::logger::{LogLevel, LoggerConfig};
use fluxgen::{Config, FluxClient, ImageSize, RawGenerationRequest, RawImageToImageRequest};
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "fluxgen", version, about = "FLUX image generation on the fal.ai queue")]
struct Cli {
    /// Write log lines as JSON
    #[arg(long, global = true)]
    json_logs: bool,
    /// Also append log lines to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate images from a text prompt
    Generate(GenerateArgs),
    /// Generate an image from a source image and a prompt
    #[command(name = "img2img")]
    ImageToImage(ImageToImageArgs),
    /// List stored images, newest first
    Gallery,
    /// Print the generation parameters stored in an image
    Metadata { filename: String },
    /// Turn a scene description into a generation prompt
    Optimize {
        scene: String,
        #[arg(long)]
        regenerate: bool,
    },
}

#[derive(Debug, Args)]
struct GenerateArgs {
    prompt: String,
    #[arg(long, default_value = "fal-ai/flux/schnell")]
    model: String,
    #[arg(long, default_value = "4")]
    steps: String,
    #[arg(long)]
    count: Option<String>,
    #[arg(long, default_value = "3.5")]
    guidance: String,
    #[arg(long, default_value = "landscape_4_3")]
    size: String,
    #[arg(long)]
    safety_tolerance: Option<String>,
}

#[derive(Debug, Args)]
struct ImageToImageArgs {
    source: PathBuf,
    prompt: String,
    #[arg(long, default_value = "0.95")]
    strength: String,
    #[arg(long, default_value = "28")]
    steps: String,
    #[arg(long, default_value = "3.5")]
    guidance: String,
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn logger_config(cli: &Cli) -> LoggerConfig {
    let level = env::var("RUST_LOG")
        .ok()
        .and_then(|name| LogLevel::parse(&name))
        .unwrap_or(LogLevel::Info);
    let mut config = LoggerConfig::development()
        .with_level(level)
        .with_colors(!cli.no_color)
        .with_json_output(cli.json_logs);
    if let Some(path) = &cli.log_file {
        config = config.with_file_output(&path.to_string_lossy());
    }
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let env_loaded = dotenv::dotenv().is_ok();
    fluxgen::logger::init_with_config(logger_config(&cli))?;

    if env_loaded {
        log::info!("✅ .env file loaded");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let config = Config::from_env();
    fluxgen::logger::log_config_info(&config);
    let client = FluxClient::new(config)?;

    match cli.command {
        Command::Generate(args) => {
            let request = RawGenerationRequest {
                model: args.model,
                prompt: args.prompt,
                image_size: Some(ImageSize::Preset(args.size)),
                num_inference_steps: Some(args.steps),
                image_count: args.count,
                guidance_scale: Some(args.guidance),
                safety_tolerance: args.safety_tolerance.map(Value::String),
            };
            for image in client.generate_image(request).await? {
                log::info!("🖼️  {} -> {}", image.filename, image.url);
            }
        }
        Command::ImageToImage(args) => {
            let bytes = tokio::fs::read(&args.source).await?;
            let request = RawImageToImageRequest {
                prompt: args.prompt,
                strength: Some(args.strength),
                image_size: None,
                num_inference_steps: Some(args.steps),
                guidance_scale: Some(args.guidance),
            };
            let images = client
                .generate_image_to_image(bytes, content_type_for(&args.source), request)
                .await?;
            for image in images {
                log::info!("🖼️  {} -> {}", image.filename, image.url);
            }
        }
        Command::Gallery => {
            let entries = client.list_gallery().await?;
            log::info!("📚 {} images in gallery", entries.len());
            for entry in entries {
                log::info!("  {} {} ({})", entry.created_at, entry.filename, entry.url);
            }
        }
        Command::Metadata { filename } => {
            let provenance = client.get_provenance(&filename).await?;
            println!("{}", serde_json::to_string_pretty(&provenance)?);
        }
        Command::Optimize { scene, regenerate } => {
            let prompt = client.optimize_prompt(&scene, regenerate).await?;
            println!("{}", prompt);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_flags_and_defaults() {
        let cli = Cli::try_parse_from([
            "fluxgen",
            "generate",
            "a red fox",
            "--model",
            "fal-ai/flux-pro",
            "--count",
            "2",
        ])
        .unwrap();
        match cli.command {
            Command::Generate(args) => {
                assert_eq!(args.prompt, "a red fox");
                assert_eq!(args.model, "fal-ai/flux-pro");
                assert_eq!(args.steps, "4");
                assert_eq!(args.count.as_deref(), Some("2"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_help_is_not_taken_as_a_value() {
        let err = Cli::try_parse_from(["fluxgen", "generate", "p", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_img2img_and_logging_flags() {
        let cli = Cli::try_parse_from([
            "fluxgen",
            "img2img",
            "photo.png",
            "night",
            "--strength",
            "0.8",
            "--json-logs",
        ])
        .unwrap();
        assert!(cli.json_logs);
        assert!(logger_config(&cli).output_json);
        match cli.command {
            Command::ImageToImage(args) => {
                assert_eq!(content_type_for(&args.source), "image/png");
                assert_eq!(args.strength, "0.8");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

//! ID photo editing CLI
//!
//! Opens one image, applies one edit through [`PhotoEditor`] and writes the result.

use crate::{
    adjust::{AspectRatio, CropRequest, Enhancement, LayoutSpec},
    assets::AssetSpec,
    config::{EditorConfig, ExecutionProvider},
    editor::{EditSummary, GarmentSource, PhotoEditor},
    models::BackendType,
    services::{ImageIOService, OutputFormat},
    tracing_config::{init_cli_tracing, spans},
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Background and garment replacement for ID photos
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "idphoto-edit")]
pub struct Cli {
    /// Input image
    #[arg(value_name = "INPUT", required_unless_present = "show_providers")]
    pub input: Option<PathBuf>,

    /// Output file; format follows the extension unless --format is given
    #[arg(short, long, value_name = "OUTPUT", required_unless_present = "show_providers")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// JPEG quality (0-100)
    #[arg(long, default_value_t = 90)]
    pub jpeg_quality: u8,

    /// Editor configuration JSON
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Saliency model used for background edits
    #[arg(long, value_name = "PATH")]
    pub background_model: Option<PathBuf>,

    /// Clothes-parsing model used for garment edits
    #[arg(long, value_name = "PATH")]
    pub garment_model: Option<PathBuf>,

    /// Inference backend
    #[arg(long, value_enum)]
    pub backend: Option<CliBackend>,

    /// Execution provider for the ONNX backend
    #[arg(short, long, value_enum)]
    pub execution_provider: Option<CliProvider>,

    /// Number of threads (0 = auto-detect optimal threading)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Directory with garment images and stored backgrounds
    #[arg(long, value_name = "DIR")]
    pub assets: Option<PathBuf>,

    /// Enable verbose logging (-v: INFO, -vv: DEBUG, -vvv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Replace the background with a colour or a stored image
    Background {
        /// Colour as #RRGGBB, RRGGBB or #RGB
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        color: Option<String>,
        /// Stored background id inside the asset directory
        #[arg(long)]
        image: Option<String>,
    },
    /// Make the background transparent
    RemoveBackground,
    /// Replace the clothing region with a garment
    Garment {
        /// Garment style from the catalogue
        #[arg(long, default_value = "formal", conflicts_with = "asset")]
        style: String,
        /// Explicit asset: a colour or image:<id>
        #[arg(long)]
        asset: Option<String>,
    },
    /// Crop to a rectangle, clamped to the image
    Crop {
        #[arg(long, allow_negative_numbers = true)]
        x: i64,
        #[arg(long, allow_negative_numbers = true)]
        y: i64,
        #[arg(long)]
        width: i64,
        #[arg(long)]
        height: i64,
    },
    /// Resize; giving only one side keeps the aspect ratio
    Resize {
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Adjust brightness and contrast (-100 to 100)
    Enhance {
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        brightness: i32,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        contrast: i32,
    },
    /// Tile the photo onto a print sheet
    Layout {
        #[arg(long, default_value_t = 2)]
        rows: u32,
        #[arg(long, default_value_t = 2)]
        columns: u32,
        #[arg(long, default_value_t = 2.0)]
        border_mm: f32,
        /// Sheet width, 6 inches by default
        #[arg(long, default_value_t = 152.4)]
        sheet_width_mm: f32,
        /// Sheet height, 4 inches by default
        #[arg(long, default_value_t = 101.6)]
        sheet_height_mm: f32,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Background { .. } => "background",
            Self::RemoveBackground => "remove-background",
            Self::Garment { .. } => "garment",
            Self::Crop { .. } => "crop",
            Self::Resize { .. } => "resize",
            Self::Enhance { .. } => "enhance",
            Self::Layout { .. } => "layout",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
    Tiff,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => Self::Png,
            CliOutputFormat::Jpeg => Self::Jpeg,
            CliOutputFormat::Webp => Self::WebP,
            CliOutputFormat::Tiff => Self::Tiff,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    Onnx,
    Tract,
}

impl From<CliBackend> for BackendType {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Onnx => Self::Onnx,
            CliBackend::Tract => Self::Tract,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliProvider {
    Auto,
    Cpu,
    Cuda,
    Coreml,
}

impl From<CliProvider> for ExecutionProvider {
    fn from(provider: CliProvider) -> Self {
        match provider {
            CliProvider::Auto => Self::Auto,
            CliProvider::Cpu => Self::Cpu,
            CliProvider::Cuda => Self::Cuda,
            CliProvider::Coreml => Self::CoreMl,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let (Some(input), Some(output)) = (cli.input.as_deref(), cli.output.as_deref()) else {
        bail!("INPUT and --output are required");
    };
    let Some(command) = cli.command.clone() else {
        bail!("No edit command given; see --help");
    };

    let _session = spans::session(input, command.name()).entered();
    let start_time = Instant::now();

    let config = build_editor_config(&cli)?;
    let editor = {
        let _span = spans::model_loading(command.name()).entered();
        PhotoEditor::from_config(config).context("Failed to create photo editor")?
    };

    let image = ImageIOService::load_image(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    let id = editor.open(image)?;

    if let Err(e) = run_command(&editor, &id, &command) {
        if e.is_user_correctable() {
            bail!("{}", e.user_message());
        }
        return Err(anyhow::Error::new(e).context(format!("{} failed", command.name())));
    }

    let format = output_format(&cli, output);
    let result = editor.current(&id)?;
    if result.color().has_alpha() && !format.supports_transparency() {
        warn!("{format:?} output has no alpha channel; transparency is dropped");
    }
    ImageIOService::save_image(&result, output, format, cli.jpeg_quality)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        "Wrote {} in {:.2}s",
        output.display(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_command(editor: &PhotoEditor, id: &str, command: &Command) -> crate::Result<()> {
    match command {
        Command::Background { color, image } => {
            let spec = match (color, image) {
                (_, Some(image)) => AssetSpec::Stored(image.clone()),
                (Some(color), None) => AssetSpec::parse(color)?,
                (None, None) => {
                    return Err(crate::EditError::invalid_config(
                        "background needs --color or --image",
                    ))
                },
            };
            report(&editor.replace_background(id, &spec)?, "no subject detected");
        },
        Command::RemoveBackground => {
            report(&editor.remove_background(id)?, "no subject detected");
        },
        Command::Garment { style, asset } => {
            let source = match asset {
                Some(asset) => GarmentSource::Asset(AssetSpec::parse(asset)?),
                None => GarmentSource::Style(style.clone()),
            };
            report(
                &editor.replace_garment(id, &source)?,
                "no clothing region detected - try a clearer photo",
            );
        },
        Command::Crop {
            x,
            y,
            width,
            height,
        } => editor.crop(id, CropRequest::new(*x, *y, *width, *height))?,
        Command::Resize { width, height } => {
            let (w, h, aspect) = resize_request(*width, *height)?;
            editor.resize(id, w, h, aspect)?;
        },
        Command::Enhance {
            brightness,
            contrast,
        } => editor.enhance(id, Enhancement::new(*brightness, *contrast)?)?,
        Command::Layout {
            rows,
            columns,
            border_mm,
            sheet_width_mm,
            sheet_height_mm,
        } => editor.layout(
            id,
            &LayoutSpec {
                rows: *rows,
                columns: *columns,
                border_mm: *border_mm,
                sheet_width_mm: *sheet_width_mm,
                sheet_height_mm: *sheet_height_mm,
            },
        )?,
    }
    Ok(())
}

fn report(summary: &EditSummary, nothing_found: &str) {
    if summary.applied {
        info!("{}", summary.result.timing_summary());
    } else {
        warn!("{nothing_found}; writing the image unchanged");
    }
}

/// Merge the config file, if any, with command-line overrides
fn build_editor_config(cli: &Cli) -> Result<EditorConfig> {
    let mut config = match &cli.config {
        Some(path) => EditorConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EditorConfig::default(),
    };

    if let Some(path) = &cli.background_model {
        config.background_model = Some(path.clone());
    }
    if let Some(path) = &cli.garment_model {
        config.garment_model = Some(path.clone());
    }
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    if let Some(dir) = &cli.assets {
        config.asset_dir = dir.clone();
    }
    for pipeline in [&mut config.background, &mut config.garment] {
        if let Some(provider) = cli.execution_provider {
            pipeline.execution_provider = provider.into();
        }
        if let Some(threads) = cli.threads {
            pipeline.intra_threads = threads;
            pipeline.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        }
    }
    config.validate()?;
    Ok(config)
}

fn output_format(cli: &Cli, output: &Path) -> OutputFormat {
    cli.format
        .map(OutputFormat::from)
        .or_else(|| OutputFormat::from_path(output))
        .unwrap_or_default()
}

fn resize_request(width: Option<u32>, height: Option<u32>) -> crate::Result<(u32, u32, AspectRatio)> {
    match (width, height) {
        (Some(w), Some(h)) => Ok((w, h, AspectRatio::Free)),
        (Some(w), None) => Ok((w, 0, AspectRatio::FromWidth)),
        (None, Some(h)) => Ok((0, h, AspectRatio::FromHeight)),
        (None, None) => Err(crate::EditError::invalid_config(
            "resize needs --width, --height or both",
        )),
    }
}

/// Display backend and execution provider availability
fn show_provider_diagnostics() {
    println!("🔍 Backend and Execution Provider Diagnostics");
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 onnx:");
        print_providers(&crate::backends::OnnxBackend::list_providers());
    }
    #[cfg(feature = "tract")]
    {
        println!("\n🦀 tract:");
        print_providers(&crate::backends::TractBackend::list_providers());
    }
}

#[allow(dead_code)]
fn print_providers(providers: &[(String, bool, String)]) {
    for (name, available, description) in providers {
        let status = if *available {
            "✅ Available"
        } else {
            "❌ Not Available"
        };
        println!("  • {name}: {status} - {description}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_background_color_parsing() {
        let cli = parse(&["idphoto-edit", "in.jpg", "-o", "out.png", "background", "--color", "#ffffff"]);
        assert_eq!(
            cli.command,
            Some(Command::Background {
                color: Some("#ffffff".to_string()),
                image: None
            })
        );
    }

    #[test]
    fn test_background_requires_a_source() {
        let result = Cli::try_parse_from(["idphoto-edit", "in.jpg", "-o", "out.png", "background"]);
        assert!(result.is_err());
        let both = Cli::try_parse_from([
            "idphoto-edit", "in.jpg", "-o", "out.png", "background", "--color", "fff", "--image", "x",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn test_output_required_without_show_providers() {
        assert!(Cli::try_parse_from(["idphoto-edit", "in.jpg", "crop"]).is_err());
        assert!(Cli::try_parse_from(["idphoto-edit", "--show-providers"]).is_ok());
    }

    #[test]
    fn test_negative_crop_and_enhance_values() {
        let cli = parse(&[
            "idphoto-edit", "in.jpg", "-o", "o.png", "crop", "--x", "-10", "--y", "5", "--width", "100",
            "--height", "120",
        ]);
        assert!(matches!(cli.command, Some(Command::Crop { x: -10, .. })));

        let cli = parse(&["idphoto-edit", "in.jpg", "-o", "o.png", "enhance", "--brightness", "-20"]);
        assert_eq!(
            cli.command,
            Some(Command::Enhance {
                brightness: -20,
                contrast: 0
            })
        );
    }

    #[test]
    fn test_output_format_resolution() {
        let cli = parse(&["idphoto-edit", "in.jpg", "-o", "out.jpg", "remove-background"]);
        assert_eq!(output_format(&cli, Path::new("out.jpg")), OutputFormat::Jpeg);

        let cli = parse(&["idphoto-edit", "in.jpg", "-o", "out.jpg", "-f", "png", "remove-background"]);
        assert_eq!(output_format(&cli, Path::new("out.jpg")), OutputFormat::Png);

        let cli = parse(&["idphoto-edit", "in.jpg", "-o", "out", "remove-background"]);
        assert_eq!(output_format(&cli, Path::new("out")), OutputFormat::Png);
    }

    #[test]
    fn test_resize_request_aspect() {
        assert_eq!(resize_request(Some(10), None).unwrap().2, AspectRatio::FromWidth);
        assert_eq!(resize_request(None, Some(10)).unwrap().2, AspectRatio::FromHeight);
        assert_eq!(resize_request(Some(1), Some(2)).unwrap(), (1, 2, AspectRatio::Free));
        assert!(resize_request(None, None).is_err());
    }

    #[test]
    fn test_config_overrides() {
        let cli = parse(&[
            "idphoto-edit", "in.jpg", "-o", "o.png", "--backend", "tract", "-e", "cpu", "-t", "8",
            "--assets", "/srv/assets", "--garment-model", "parser.onnx", "garment",
        ]);
        let config = build_editor_config(&cli).unwrap();
        assert_eq!(config.backend, BackendType::Tract);
        assert_eq!(config.asset_dir, PathBuf::from("/srv/assets"));
        assert_eq!(config.garment_model, Some(PathBuf::from("parser.onnx")));
        assert_eq!(config.garment.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.background.intra_threads, 8);
        assert_eq!(config.background.inter_threads, 4);
    }
}

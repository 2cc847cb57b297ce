use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use idphoto_fx::codec::{self, OutputFormat};
use idphoto_fx::dimensions::{builtin_countries, builtin_templates};
use idphoto_fx::{
    BackgroundSpec, CanvasCompositor, DimensionResolver, NormalizerSettings, PhotoNormalizer,
    PixelBuffer, RasterOps, Rect, ResizeStrategy, SizeRequest,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (JSON); missing fields use defaults
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Path to the matting model (ONNX file), overrides the settings file
    #[arg(long, global = true)]
    matting_model: Option<String>,

    /// Path to the YuNet face detection model (ONNX file), overrides the settings file
    #[arg(long, global = true)]
    face_model: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct SizeArgs {
    /// ISO country code, e.g. sg
    #[arg(long)]
    country: Option<String>,

    /// Named template, e.g. "ID Card"
    #[arg(long)]
    template: Option<String>,

    /// Custom canvas width in pixels
    #[arg(long, allow_negative_numbers = true)]
    width: Option<i64>,

    /// Custom canvas height in pixels
    #[arg(long, allow_negative_numbers = true)]
    height: Option<i64>,
}

impl From<SizeArgs> for SizeRequest {
    fn from(args: SizeArgs) -> Self {
        SizeRequest {
            country: args.country,
            template: args.template,
            width: args.width,
            height: args.height,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit an image onto a country, template or custom canvas
    Resize {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        size: SizeArgs,
    },
    /// Replace the background behind the subject
    RemoveBg {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Hex colour, image path or data URL
        #[arg(long)]
        background: Option<String>,
    },
    /// Shift the image so the eyes sit at the centre
    Center {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Cut out a rectangle
    Crop {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
        #[arg(long)]
        crop_width: u32,
        #[arg(long)]
        crop_height: u32,
    },
    /// Resize, center and replace the background in one pass
    Automate {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        size: SizeArgs,
        /// Hex colour, image path or data URL
        #[arg(long)]
        background: Option<String>,
    },
    /// Run the automated flow over several images; stops at the first failure
    Batch {
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output_dir: PathBuf,
        #[command(flatten)]
        size: SizeArgs,
        /// Hex colour, image path or data URL
        #[arg(long)]
        background: Option<String>,
    },
    /// List built-in country and template sizes
    Sizes,
    /// Write the default settings to a file
    InitSettings { path: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let mut settings = match &args.settings {
        Some(path) => NormalizerSettings::load_from_path(path)?,
        None => NormalizerSettings::default(),
    };
    if args.matting_model.is_some() {
        settings.matting_model_path = args.matting_model.clone();
    }
    if args.face_model.is_some() {
        settings.face_model_path = args.face_model.clone();
    }

    let started = Instant::now();
    run(args.command, settings)?;
    tracing::debug!("Finished in {:.1?}", started.elapsed());

    Ok(())
}

fn run(command: Command, settings: NormalizerSettings) -> Result<()> {
    match command {
        Command::Resize {
            input,
            output,
            size,
        } => {
            let image = read_image(&input)?;
            let dimensions = load_dimensions(&settings)?;
            let target = dimensions.resolve_request(&size.into())?;

            let ops = Arc::new(RasterOps::new());
            let fitted = ResizeStrategy::new(ops.clone()).fit(&image, target)?;
            let (canvas, margin) =
                CanvasCompositor::new(ops, &settings.canvas).fit_with_report(&fitted, target)?;
            tracing::info!("Canvas {} ({:?})", target, margin);

            write_image(&canvas, &input, output, "resized", &settings)
        }
        Command::Crop {
            input,
            output,
            x,
            y,
            crop_width,
            crop_height,
        } => {
            let image = read_image(&input)?;
            let cropped = image.crop(Rect::new(x, y, crop_width, crop_height))?;
            write_image(&cropped, &input, output, "cropped", &settings)
        }
        Command::RemoveBg {
            input,
            output,
            background,
        } => {
            let background = parse_background(background.as_deref())?;
            let normalizer = load_normalizer(&settings)?;
            let image = read_image(&input)?;
            let result = normalizer.remove_background(&image, &background)?;
            write_image(&result, &input, output, "nobg", &settings)
        }
        Command::Center { input, output } => {
            let normalizer = load_normalizer(&settings)?;
            let image = read_image(&input)?;
            let result = normalizer.center(&image)?;
            write_image(&result, &input, output, "centered", &settings)
        }
        Command::Automate {
            input,
            output,
            size,
            background,
        } => {
            let background = parse_background(background.as_deref())?;
            let normalizer = load_normalizer(&settings)?;
            let image = read_image(&input)?;
            let photo = normalizer.normalize(&image, &size.into(), &background)?;
            tracing::info!(
                "Eyes at ({:.1}, {:.1}) and ({:.1}, {:.1})",
                photo.eyes.left.x,
                photo.eyes.left.y,
                photo.eyes.right.x,
                photo.eyes.right.y
            );
            write_image(&photo.image, &input, output, "idphoto", &settings)
        }
        Command::Batch {
            inputs,
            output_dir,
            size,
            background,
        } => {
            let background = parse_background(background.as_deref())?;
            let normalizer = load_normalizer(&settings)?;
            let images = inputs
                .iter()
                .map(|path| read_image(path))
                .collect::<Result<Vec<_>>>()?;

            let photos = normalizer.normalize_batch(&images, &size.into(), &background)?;

            fs::create_dir_all(&output_dir).with_context(|| {
                format!("Failed to create output directory {}", output_dir.display())
            })?;
            let names = batch_output_names(&inputs);
            for ((input, photo), name) in inputs.iter().zip(&photos).zip(names) {
                write_image(
                    &photo.image,
                    input,
                    Some(output_dir.join(name)),
                    "idphoto",
                    &settings,
                )?;
            }
            tracing::info!("Processed {} image(s)", photos.len());
            Ok(())
        }
        Command::Sizes => {
            println!("Countries:");
            for preset in builtin_countries() {
                println!("  {:<4} {:>4}x{:<4} {}", preset.name, preset.width, preset.height, preset.description);
            }
            println!("Templates:");
            for preset in builtin_templates() {
                println!("  {:<16} {:>4}x{:<4} {}", preset.name, preset.width, preset.height, preset.description);
            }
            Ok(())
        }
        Command::InitSettings { path } => {
            settings.save_to_path(&path)?;
            tracing::info!("Wrote settings to {}", path.display());
            Ok(())
        }
    }
}

fn load_normalizer(settings: &NormalizerSettings) -> Result<PhotoNormalizer> {
    tracing::info!("Loading models");
    let normalizer = PhotoNormalizer::from_settings(settings.clone())
        .context("Failed to initialize photo normalizer")?;
    tracing::info!("Models loaded successfully");
    Ok(normalizer)
}

fn load_dimensions(settings: &NormalizerSettings) -> Result<DimensionResolver> {
    match settings.dimensions_path.as_deref() {
        Some(path) => DimensionResolver::from_json_path(path),
        None => Ok(DimensionResolver::default()),
    }
}

fn read_image(path: &Path) -> Result<PixelBuffer> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    codec::decode(&bytes).with_context(|| format!("Failed to decode {}", path.display()))
}

/// Hex colour, `data:` URL, or path to an image file.
fn parse_background(input: Option<&str>) -> Result<BackgroundSpec> {
    let Some(input) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(BackgroundSpec::default());
    };
    if input.starts_with("data:") {
        return Ok(BackgroundSpec::Image(codec::decode_data_url(input)?));
    }
    let path = Path::new(input);
    if path.is_file() {
        return Ok(BackgroundSpec::Image(read_image(path)?));
    }
    Ok(BackgroundSpec::from_hex(input)?)
}

fn write_image(
    image: &PixelBuffer,
    input: &Path,
    output: Option<PathBuf>,
    suffix: &str,
    settings: &NormalizerSettings,
) -> Result<()> {
    let (bytes, format) = codec::encode(image, settings.output.jpeg_quality)?;
    let path = output_path(input, output, suffix, format);
    fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(
        "Wrote {}x{} {} to {}",
        image.width(),
        image.height(),
        format.mime_type(),
        path.display()
    );
    Ok(())
}

/// Output file names for a batch; a stem seen earlier gets the input's index as prefix.
///
/// Names keep the input extension, which `write_image` swaps for the encoded format.
fn batch_output_names(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let name = input
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "photo".to_string());
            let stem = Path::new(&name).with_extension("");
            if seen.insert(stem) {
                PathBuf::from(name)
            } else {
                let renamed = format!("{index}_{name}");
                seen.insert(Path::new(&renamed).with_extension(""));
                PathBuf::from(renamed)
            }
        })
        .collect()
}

/// Explicit output keeps its name with the extension matching the encoded format.
fn output_path(input: &Path, output: Option<PathBuf>, suffix: &str, format: OutputFormat) -> PathBuf {
    match output {
        Some(path) => path.with_extension(format.extension()),
        None => {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "photo".to_string());
            input.with_file_name(format!("{stem}_{suffix}.{}", format.extension()))
        }
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scanfield_imaging::{
    CancelFlag, EnhanceError, ImageBuffer, ImageFileRenderer, PixelFormat, Recipe, RenderPreset,
};
use scanfield_ocr::{
    open_engine, AnchorLocation, ExtractError, ExtractionReport, ExtractionSession,
    ExtractorConfig, ReceiptFieldExtractor,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scanfield", version)]
#[command(about = "Read the field under an anchor line on scanned receipts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Locate the anchor on each page and read the field band below it.
    Extract {
        #[arg(required = true)]
        pages: Vec<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Save each cleaned band at preview scale as `<page>.preview.png`.
        #[arg(long)]
        preview_dir: Option<PathBuf>,
        /// Print one JSON array instead of plain text.
        #[arg(long)]
        json: bool,
        #[arg(long, value_enum)]
        render: Option<RenderArg>,
    },
    /// Run only the anchor search and print where the anchor sits.
    Locate {
        page: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum)]
        render: Option<RenderArg>,
    },
    /// Run a recipe over a page and save the result.
    Enhance {
        page: PathBuf,
        /// `localization`, `cleanup`, or a path to a recipe TOML file.
        #[arg(long)]
        recipe: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum)]
        render: Option<RenderArg>,
    },
    /// Print a built-in recipe.
    Recipe {
        name: String,
        #[arg(long, value_enum, default_value_t = RecipeFormat::Toml)]
        format: RecipeFormat,
    },
    /// Process every page image dropped into a folder until ctrl-c.
    Watch {
        dir: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RecipeFormat {
    Toml,
    Json,
}

/// Page view, overriding the config file's `render` setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RenderArg {
    /// Native size over white
    Actual,
    /// Half size over beige
    Half,
    /// Middle of the page at native size
    Center,
}

impl From<RenderArg> for RenderPreset {
    fn from(arg: RenderArg) -> Self {
        match arg {
            RenderArg::Actual => RenderPreset::ActualSize,
            RenderArg::Half => RenderPreset::HalfSize,
            RenderArg::Center => RenderPreset::CenterCrop,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Extract { pages, config, preview_dir, json, render } => {
            let config = with_render(load_config(config.as_deref())?, render);
            extract(&pages, config, preview_dir.as_deref(), json).await
        }
        Command::Locate { page, config, render } => {
            locate(&page, with_render(load_config(config.as_deref())?, render))
        }
        Command::Enhance { page, recipe, out, config, render } => {
            let config = with_render(load_config(config.as_deref())?, render);
            enhance(&page, &resolve_recipe(&recipe, &config)?, &out, config.render)
        }
        Command::Recipe { name, format } => {
            let Some(recipe) = Recipe::builtin(&name) else {
                bail!("Unknown recipe '{name}' (expected localization or cleanup)");
            };
            println!("{}", render_recipe(&recipe, format)?);
            Ok(())
        }
        Command::Watch { dir, config } => watch(dir, load_config(config.as_deref())?).await,
    }
}

/// `<config dir>/scanfield/scanfield.toml`, if the platform has a config dir.
fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("scanfield").join("scanfield.toml"))
}

fn load_config(explicit: Option<&Path>) -> Result<ExtractorConfig> {
    if let Some(path) = explicit {
        return ExtractorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }
    match default_config_path().filter(|p| p.is_file()) {
        Some(path) => {
            info!(path = %path.display(), "Using config file");
            ExtractorConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => Ok(ExtractorConfig::default()),
    }
}

fn with_render(mut config: ExtractorConfig, render: Option<RenderArg>) -> ExtractorConfig {
    if let Some(arg) = render {
        config.render = arg.into();
    }
    config
}

fn resolve_recipe(arg: &str, config: &ExtractorConfig) -> Result<Recipe> {
    match arg {
        Recipe::LOCALIZATION => Ok(config.localization.clone()),
        Recipe::FIELD_CLEANUP => Ok(config.cleanup.clone()),
        path => Recipe::load(Path::new(path))
            .with_context(|| format!("Failed to load recipe {path}")),
    }
}

fn render_recipe(recipe: &Recipe, format: RecipeFormat) -> Result<String> {
    Ok(match format {
        RecipeFormat::Toml => recipe.to_toml_string().context("Failed to serialize recipe")?,
        RecipeFormat::Json => {
            serde_json::to_string_pretty(recipe).context("Failed to serialize recipe")?
        }
    })
}

fn open_page(path: &Path, preset: RenderPreset) -> Result<ImageBuffer> {
    let renderer = ImageFileRenderer::open(path, PixelFormat::Bgra8)
        .with_context(|| format!("Failed to open page {}", path.display()))?;
    Ok(preset.render(&renderer, 0)?)
}

fn save_preview(report: &ExtractionReport, page: &Path, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let stem = page.file_stem().and_then(|s| s.to_str()).unwrap_or("page");
    let dest = dir.join(format!("{stem}.preview.png"));
    report
        .extraction
        .preview
        .to_rgba_image()
        .save(&dest)
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(dest)
}

async fn extract(
    pages: &[PathBuf],
    config: ExtractorConfig,
    preview_dir: Option<&Path>,
    json: bool,
) -> Result<()> {
    let engine = open_engine(&config.engine).context("Failed to start the recognition engine")?;
    let mut session = ExtractionSession::new(engine, config);
    let mut summaries = Vec::new();

    for page in pages {
        let report = session
            .process_file(page)
            .await
            .with_context(|| format!("Failed to process {}", page.display()))?;
        if let Some(dir) = preview_dir {
            let dest = save_preview(&report, page, dir)?;
            info!(preview = %dest.display(), "Preview saved");
        }
        if json {
            summaries.push(report.summary());
        } else {
            println!("== {} ==", page.display());
            println!("{}", report.extraction.text.trim_end());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }
    Ok(())
}

fn locate(page: &Path, config: ExtractorConfig) -> Result<()> {
    let page_buf = open_page(page, config.render)?;
    let mut engine = open_engine(&config.engine).context("Failed to start the recognition engine")?;
    let extractor = ReceiptFieldExtractor::new(config);
    let found = extractor
        .locator()
        .locate(&mut engine, &page_buf, &CancelFlag::new())
        .with_context(|| format!("Anchor search failed on {}", page.display()))?;
    match &found {
        AnchorLocation::Found(m) => {
            println!("{}: '{}' at {}", page.display(), m.line.text.trim(), m.page_bounds)
        }
        AnchorLocation::NotFound => println!(
            "{}: anchor '{}' not found",
            page.display(),
            extractor.config().calibration.anchor_text
        ),
    }
    let (band, fallback) = extractor.field_band(&page_buf, found.rect());
    println!("field band {band}{}", if fallback { " (fallback height)" } else { "" });
    Ok(())
}

fn enhance(page: &Path, recipe: &Recipe, out: &Path, preset: RenderPreset) -> Result<()> {
    let enhanced = recipe
        .apply(open_page(page, preset)?)
        .with_context(|| format!("Recipe '{}' failed", recipe.name))?;
    enhanced
        .to_rgba_image()
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!(
        recipe = %recipe.name,
        out = %out.display(),
        width = enhanced.width(),
        height = enhanced.height(),
        "Enhanced page saved"
    );
    Ok(())
}

async fn watch(dir: PathBuf, config: ExtractorConfig) -> Result<()> {
    // The channel bridges the notify watcher thread and the extraction worker.
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    let watcher = scanfield_ocr::spawn_intake_watcher(&dir, tx)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;
    info!(dir = %dir.display(), "Watching for pages");

    let cancel = CancelFlag::new();
    let worker_cancel = cancel.clone();
    let mut worker = tokio::task::spawn_blocking(move || -> Result<()> {
        let engine =
            open_engine(&config.engine).context("Failed to start the recognition engine")?;
        let mut session =
            ExtractionSession::new(engine, config).with_cancel_flag(worker_cancel.clone());
        while let Some(path) = rx.blocking_recv() {
            if worker_cancel.is_cancelled() {
                break;
            }
            info!(page = %path.display(), "Processing page");
            match session.process_path(&path) {
                Ok(report) => {
                    println!("{}\t{}", path.display(), report.extraction.text.trim_end())
                }
                Err(ExtractError::Enhance(EnhanceError::Cancelled { .. })) => break,
                Err(e) => warn!(page = %path.display(), error = %e, "Page failed"),
            }
        }
        Ok(())
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            info!("Stopping intake");
            cancel.cancel();
            drop(watcher);
        }
        res = &mut worker => return res.context("Intake worker panicked")?,
    }
    worker.await.context("Intake worker panicked")?
}

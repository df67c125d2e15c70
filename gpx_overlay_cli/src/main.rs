use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use gpx_overlay::{
    default_floor, load_track, merge, page_size, rasterize, FontResource, OverlayWorkspace,
    ProfileRenderer, ProfileSeries, StyleConfig, TrackSample,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Elevation profile overlays for PDF posters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a GPX profile, stamp it onto a background PDF and write a preview
    Render(RenderArgs),
    /// Stamp an existing overlay PDF onto a background PDF
    Merge(MergeArgs),
    /// Rasterize the first page of a PDF to PNG
    Preview(PreviewArgs),
    /// Print the default y-axis floor of a GPX track
    Floor(FloorArgs),
    /// Print the first-page size of a PDF in inches
    PageSize(PageSizeArgs),
}

impl Command {
    fn verbose(&self) -> bool {
        match self {
            Command::Render(args) => args.verbose,
            Command::Merge(args) => args.verbose,
            Command::Preview(args) => args.verbose,
            Command::Floor(args) => args.verbose,
            Command::PageSize(args) => args.verbose,
        }
    }
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// GPX file with a single track and segment
    #[arg(value_hint = ValueHint::FilePath)]
    track: PathBuf,

    /// Background PDF; the overlay goes onto its first page
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    background: PathBuf,

    /// TrueType/OpenType font used for all text
    #[arg(long, value_hint = ValueHint::FilePath)]
    font: PathBuf,

    /// Where to write the transparent overlay PDF
    #[arg(long, default_value = "plot.pdf", value_hint = ValueHint::FilePath)]
    overlay: PathBuf,

    /// Merged output PDF
    #[arg(short, long, default_value = "merged.pdf", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Skip writing `pdf_snip.png` next to the merged PDF
    #[arg(long, action = ArgAction::SetTrue)]
    no_preview: bool,

    /// Style JSON; flags below override its fields
    #[arg(long, value_hint = ValueHint::FilePath)]
    style: Option<PathBuf>,

    #[command(flatten)]
    overrides: StyleArgs,

    /// Also write the drawn profile as CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    profile_csv: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Args, Debug, Default)]
struct StyleArgs {
    /// Y-axis floor in metres (default: 0.95 x lowest elevation)
    #[arg(long)]
    zero_level: Option<f64>,

    /// Gaussian smoothing sigma in samples (0 disables)
    #[arg(long)]
    sigma: Option<f64>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    subtitle: Option<String>,

    /// Information block, `\n` separates lines
    #[arg(long)]
    information: Option<String>,

    #[arg(long)]
    x_label: Option<String>,

    #[arg(long)]
    y_label: Option<String>,

    #[arg(long)]
    label_font_size: Option<f64>,

    #[arg(long)]
    ticks_font_size: Option<f64>,

    /// Grid line width in points
    #[arg(long)]
    grid_line_width: Option<f64>,

    /// Maximum number of x-axis tick intervals
    #[arg(long)]
    bins_x: Option<u32>,

    /// Maximum number of y-axis tick intervals
    #[arg(long)]
    bins_y: Option<u32>,

    /// Data rectangle as `left,bottom,width,height` page fractions
    #[arg(long, value_delimiter = ',')]
    plot_box: Option<Vec<f64>>,

    #[arg(long)]
    title_font_size: Option<f64>,

    /// Title anchor as `x,y` page fractions
    #[arg(long, value_delimiter = ',')]
    title_pos: Option<Vec<f64>>,

    #[arg(long)]
    subtitle_font_size: Option<f64>,

    /// Subtitle anchor as `x,y` page fractions
    #[arg(long, value_delimiter = ',')]
    subtitle_pos: Option<Vec<f64>>,

    #[arg(long)]
    information_font_size: Option<f64>,

    /// Information block anchor as `x,y` page fractions
    #[arg(long, value_delimiter = ',')]
    information_pos: Option<Vec<f64>>,
}

impl StyleArgs {
    fn apply(&self, style: &mut StyleConfig) -> Result<()> {
        if let Some(level) = self.zero_level {
            style.zero_level = Some(level);
        }
        if let Some(sigma) = self.sigma {
            style.smoothing_sigma = sigma;
        }
        if let Some(text) = &self.title {
            style.title_text = unescape(text);
        }
        if let Some(text) = &self.subtitle {
            style.subtitle_text = unescape(text);
        }
        if let Some(text) = &self.information {
            style.information_text = unescape(text);
        }
        if let Some(text) = &self.x_label {
            style.x_label_text = text.clone();
        }
        if let Some(text) = &self.y_label {
            style.y_label_text = text.clone();
        }
        if let Some(size) = self.label_font_size {
            style.label_font_size = size;
        }
        if let Some(size) = self.ticks_font_size {
            style.ticks_font_size = size;
        }
        if let Some(width) = self.grid_line_width {
            style.grid_line_width = width;
        }
        if let Some(bins) = self.bins_x {
            style.bins_x_axis = bins;
        }
        if let Some(bins) = self.bins_y {
            style.bins_y_axis = bins;
        }
        if let Some(plot_box) = self.plot_box.as_deref() {
            let &[left, bottom, width, height] = plot_box else {
                bail!("--plot-box takes four values, got {}", plot_box.len());
            };
            style.plot_left = left;
            style.plot_bottom = bottom;
            style.plot_width = width;
            style.plot_height = height;
        }
        if let Some(size) = self.title_font_size {
            style.title_font_size = size;
        }
        if let Some(pos) = self.title_pos.as_deref() {
            (style.title_x, style.title_y) = anchor(pos, "--title-pos")?;
        }
        if let Some(size) = self.subtitle_font_size {
            style.subtitle_font_size = size;
        }
        if let Some(pos) = self.subtitle_pos.as_deref() {
            (style.subtitle_x, style.subtitle_y) = anchor(pos, "--subtitle-pos")?;
        }
        if let Some(size) = self.information_font_size {
            style.information_font_size = size;
        }
        if let Some(pos) = self.information_pos.as_deref() {
            (style.information_x, style.information_y) = anchor(pos, "--information-pos")?;
        }
        Ok(())
    }
}

fn anchor(values: &[f64], flag: &str) -> Result<(f64, f64)> {
    match *values {
        [x, y] => Ok((x, y)),
        _ => bail!("{} takes two values, got {}", flag, values.len()),
    }
}

#[derive(Parser, Debug)]
struct MergeArgs {
    /// Background PDF
    #[arg(value_hint = ValueHint::FilePath)]
    background: PathBuf,

    /// Overlay PDF, its first page is stamped on top
    #[arg(value_hint = ValueHint::FilePath)]
    overlay: PathBuf,

    /// Merged output PDF
    #[arg(short, long, default_value = "merged.pdf", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct PreviewArgs {
    /// Any PDF
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output PNG
    #[arg(short, long, default_value = "pdf_snip.png", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct FloorArgs {
    /// GPX file with a single track and segment
    #[arg(value_hint = ValueHint::FilePath)]
    track: PathBuf,

    /// Print JSON instead of plain text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct PageSizeArgs {
    /// Any PDF
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Print JSON instead of plain text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.command.verbose() {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Render(args) => handle_render(args),
        Command::Merge(args) => handle_merge(args),
        Command::Preview(args) => handle_preview(args),
        Command::Floor(args) => handle_floor(args),
        Command::PageSize(args) => handle_page_size(args),
    }
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let mut style = load_style(args.style.as_deref())?;
    args.overrides.apply(&mut style)?;
    style.validate().context("invalid style")?;

    let font = FontResource::from_file(&args.font)
        .with_context(|| format!("failed to load font {}", args.font.display()))?;
    let renderer = ProfileRenderer::new(font);

    let mut workspace = OverlayWorkspace::new(&args.background, &args.overlay, &args.output);
    if !workspace.inputs_available(&args.track) {
        warn!(
            background = %args.background.display(),
            track = %args.track.display(),
            "an input file is missing"
        );
    }

    let sample = workspace
        .load_track(&args.track)
        .with_context(|| format!("failed to load {}", args.track.display()))?;
    let overlay = workspace
        .render_overlay(&renderer, &sample, &style)
        .context("failed to render the profile")?;
    let merged = workspace
        .merge()
        .with_context(|| format!("failed to merge onto {}", args.background.display()))?;
    info!(
        scale = merged.placement.scale,
        output = %args.output.display(),
        "merged overlay"
    );

    if let Some(path) = &args.profile_csv {
        write_profile_csv(&sample, &overlay.series, path)?;
    }
    if !args.no_preview {
        let image = workspace.write_preview().context("failed to write preview")?;
        info!(
            width = image.width,
            height = image.height,
            path = %workspace.preview_path().display(),
            "preview ready"
        );
    }
    Ok(())
}

fn handle_merge(args: MergeArgs) -> Result<()> {
    let background = read(&args.background)?;
    let overlay = read(&args.overlay)?;
    let merged = merge(&background, &overlay)
        .with_context(|| format!("failed to merge onto {}", args.background.display()))?;
    fs::write(&args.output, &merged.bytes)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(
        x = merged.placement.x,
        y = merged.placement.y,
        scale = merged.placement.scale,
        output = %args.output.display(),
        "merged overlay"
    );
    Ok(())
}

fn handle_preview(args: PreviewArgs) -> Result<()> {
    let data = read(&args.input)?;
    let image = rasterize(&data)
        .with_context(|| format!("failed to rasterize {}", args.input.display()))?;
    image
        .write_to(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!(
        width = image.width,
        height = image.height,
        output = %args.output.display(),
        "wrote preview"
    );
    Ok(())
}

fn handle_floor(args: FloorArgs) -> Result<()> {
    let sample = load_track(&args.track)
        .with_context(|| format!("failed to load {}", args.track.display()))?;
    let floor = default_floor(&sample);
    let mut stdout = io::stdout().lock();
    if args.json {
        let report = json!({
            "floor_m": floor,
            "min_elevation_m": sample.min_elevation(),
            "max_elevation_m": sample.max_elevation(),
            "distance_km": sample.total_distance_km(),
            "points": sample.len(),
        });
        writeln!(stdout, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        match floor {
            Some(floor) => writeln!(stdout, "{:.2}", floor)?,
            None => writeln!(stdout, "track has no points")?,
        }
    }
    Ok(())
}

fn handle_page_size(args: PageSizeArgs) -> Result<()> {
    let data = read(&args.input)?;
    let size = page_size(&data)
        .with_context(|| format!("failed to read page size of {}", args.input.display()))?;
    let mut stdout = io::stdout().lock();
    if args.json {
        writeln!(stdout, "{}", serde_json::to_string(&size)?)?;
    } else {
        writeln!(stdout, "{:.2} x {:.2} in", size.width_in, size.height_in)?;
    }
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load_style(path: Option<&Path>) -> Result<StyleConfig> {
    let Some(path) = path else {
        return Ok(StyleConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read style {}", path.display()))?;
    StyleConfig::from_json(&text).with_context(|| format!("{} is not a valid style", path.display()))
}

/// Shells rarely pass real newlines, so accept a literal `\n` as well.
fn unescape(text: &str) -> String {
    text.replace("\\n", "\n")
}

fn write_profile_csv(sample: &TrackSample, series: &ProfileSeries, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_profile_rows(sample, series, &mut writer)?;
    info!(path = %path.display(), rows = series.points.len(), "wrote profile CSV");
    Ok(())
}

fn write_profile_rows<W: Write>(
    sample: &TrackSample,
    series: &ProfileSeries,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record(["distance_km", "elevation_m", "drawn_elevation_m", "floor_m"])?;
    for ((distance, drawn), raw) in series.points.iter().zip(sample.elevation_m()) {
        writer.write_record([
            format!("{:.5}", distance),
            format!("{:.2}", raw),
            format!("{:.2}", drawn),
            format!("{:.2}", series.floor),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

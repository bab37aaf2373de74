use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use reporthanter_rs::config::{load_overrides, resolve};
use reporthanter_rs::{collect_coverage_images, RawSource, ReportInputs, ReportPipeline, SourceKind, TextRenderer};

#[derive(Parser, Debug)]
#[command(name = "reporthanter-rs", version, about = "Compose one report from a sample's classifier, aligner and QC outputs")]
struct Cli {
    /// Directory holding the sample's tool outputs; files are recognised by name
    sample_dir: Option<PathBuf>,

    #[arg(long)]
    kraken_file: Option<PathBuf>,

    #[arg(long)]
    kaiju_table: Option<PathBuf>,

    #[arg(long)]
    blastn_file: Option<PathBuf>,

    #[arg(long)]
    fastp_json: Option<PathBuf>,

    /// Alignment statistics against the primary (human) host
    #[arg(long)]
    flagstat_file: Option<PathBuf>,

    #[arg(long, requires = "secondary_host")]
    secondary_flagstat_file: Option<PathBuf>,

    #[arg(long)]
    secondary_host: Option<String>,

    /// Folder of SVG coverage plots
    #[arg(long)]
    coverage_folder: Option<PathBuf>,

    #[arg(long)]
    sample_name: Option<String>,

    /// JSON document overriding the default configuration
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory the report files are written to
    #[arg(long, short, default_value = ".")]
    output: PathBuf,

    /// Abort on any malformed input instead of leaving its section empty
    #[arg(long, default_value_t = false)]
    strict: bool,
}

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&format!("{{spinner:.{}}} {{msg}}", color))
            .expect("Invalid spinner template"),
    );
    spinner.set_message(msg.to_string());
    spinner
}

/// Which source a file in the sample directory holds, judged by its name.
fn classify_file(path: &Path) -> Option<SourceKind> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    if name.contains("flagstat") {
        Some(SourceKind::AlignmentStatistics)
    } else if name.contains("fastp") && name.ends_with(".json") {
        Some(SourceKind::QualityControl)
    } else if name.contains("kraken") {
        Some(SourceKind::ClassifierA)
    } else if name.contains("kaiju") {
        Some(SourceKind::ClassifierB)
    } else if name.contains("blast") || name.ends_with(".csv") {
        Some(SourceKind::AlignmentResults)
    } else {
        None
    }
}

/// Host named by a flagstat file: `mouse.flagstat` -> "mouse".
fn host_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().split('.').next().unwrap_or_default().to_string())
        .unwrap_or_default()
}

/// Primary and secondary flagstat among `paths` (sorted). A file naming the
/// human host is the primary one; otherwise the first file is.
fn pick_flagstats(mut paths: Vec<PathBuf>) -> (Option<PathBuf>, Option<PathBuf>) {
    let human = paths
        .iter()
        .position(|p| host_of(p).to_lowercase().contains("human"))
        .unwrap_or(0);
    if paths.is_empty() {
        return (None, None);
    }
    let primary = paths.remove(human);
    let mut rest = paths.into_iter();
    let secondary = rest.next();
    for extra in rest {
        log::warn!("Ignoring additional flagstat file {}", extra.display());
    }
    (Some(primary), secondary)
}

/// Inputs found by name under `sample_dir`.
fn discover(sample_dir: &Path) -> Result<ReportInputs, Box<dyn std::error::Error>> {
    let mut files: Vec<PathBuf> = fs::read_dir(sample_dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.is_file() {
                Some(path)
            } else {
                None
            }
        })
        .collect();
    files.sort();

    let mut inputs = ReportInputs::new();
    let mut flagstats = Vec::new();
    for path in files {
        match classify_file(&path) {
            Some(SourceKind::AlignmentStatistics) => flagstats.push(path),
            Some(kind) => {
                log::info!("Using {} as {} input", path.display(), kind);
                inputs = inputs.with_source(RawSource::from_path(kind, path));
            }
            None => log::debug!("Ignoring {}", path.display()),
        }
    }

    let (primary, secondary) = pick_flagstats(flagstats);
    if let Some(primary) = primary {
        inputs = inputs.with_source(RawSource::from_path(SourceKind::AlignmentStatistics, primary));
    }
    if let Some(secondary) = secondary {
        let host = host_of(&secondary);
        inputs = inputs.with_secondary_host(&host, RawSource::from_path(SourceKind::AlignmentStatistics, secondary));
    }

    let coverage_dir = sample_dir.join("coverage");
    let coverage_dir = if coverage_dir.is_dir() { coverage_dir } else { sample_dir.to_path_buf() };
    inputs = inputs.with_coverage_images(collect_coverage_images(&coverage_dir)?);
    Ok(inputs)
}

/// Discovered inputs with every explicitly named file taking precedence.
fn gather_inputs(cli: &Cli) -> Result<ReportInputs, Box<dyn std::error::Error>> {
    let mut inputs = match &cli.sample_dir {
        Some(dir) => discover(dir)?,
        None => ReportInputs::new(),
    };

    let explicit = [
        (SourceKind::ClassifierA, &cli.kraken_file),
        (SourceKind::ClassifierB, &cli.kaiju_table),
        (SourceKind::AlignmentResults, &cli.blastn_file),
        (SourceKind::QualityControl, &cli.fastp_json),
        (SourceKind::AlignmentStatistics, &cli.flagstat_file),
    ];
    for (kind, path) in explicit {
        if let Some(path) = path {
            inputs = inputs.with_source(RawSource::from_path(kind, path));
        }
    }
    if let (Some(path), Some(host)) = (&cli.secondary_flagstat_file, &cli.secondary_host) {
        inputs = inputs.with_secondary_host(host, RawSource::from_path(SourceKind::AlignmentStatistics, path));
    }
    if let Some(folder) = &cli.coverage_folder {
        inputs = inputs.with_coverage_images(collect_coverage_images(folder)?);
    }
    Ok(inputs)
}

fn sample_name(cli: &Cli) -> String {
    cli.sample_name
        .clone()
        .or_else(|| {
            cli.sample_dir
                .as_ref()
                .and_then(|d| d.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| String::from("sample"))
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let sample_name = sample_name(cli);

    // 1. Configuration
    let overrides = match &cli.config {
        Some(path) => Some(load_overrides(path)?),
        None => None,
    };
    let config = resolve(overrides.as_ref())?;

    // 2. Inputs
    let spinner1 = spinner("blue", &format!("Gathering tool outputs for '{}'...", sample_name));
    let inputs = gather_inputs(cli)?;
    spinner1.finish_with_message("Tool outputs gathered.");

    // 3. Pipeline
    let spinner2 = spinner("green", "Building report...");
    let artifact = ReportPipeline::new(config)
        .partial_failure(!cli.strict)
        .parallel(true)
        .run(&sample_name, &inputs)?;
    let absent = artifact.sections().iter().filter(|s| s.is_absent()).count();
    spinner2.finish_with_message(format!(
        "Report built: {} section(s), {} without data.",
        artifact.sections().len(),
        absent
    ));

    // 4. Outputs
    let spinner3 = spinner("yellow", "Writing report files...");
    fs::create_dir_all(&cli.output)?;
    let json_path = cli.output.join(format!("{}_report.json", sample_name));
    let text_path = cli.output.join(format!("{}_report.txt", sample_name));
    fs::write(&json_path, artifact.to_json()?)?;
    fs::write(&text_path, TextRenderer.render_report(&artifact))?;
    spinner3.finish_with_message(format!("Wrote {} and {}.", json_path.display(), text_path.display()));

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

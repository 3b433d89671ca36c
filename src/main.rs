//! tmalign: align TMA core annotations to the tissue in a slide image.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use tmalign::align::{BatchReport, CoreStatus, align_cores, align_tma_grid};
use tmalign::cancel::CancellationToken;
use tmalign::config::AlignConfig;
use tmalign::data::{ImageServer, InMemoryImageServer, PixelCalibration};
use tmalign::format::ProjectFile;
use tmalign::model::{ObjectHierarchy, ObjectId, ObjectKind};
use tmalign::synthetic::{SlideLayout, tma_slide};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "tmalign")]
#[command(about = "Align annotations inside tissue microarray cores to the visible tissue")]
#[command(version)]
struct Cli {
    /// Raise log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align the annotations of a project against its slide image.
    Align(AlignArgs),

    /// Generate a synthetic slide and project, then align it.
    Demo(DemoArgs),

    /// Write the default configuration file.
    Config {
        /// Where to write it (defaults to the user config directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct AlignArgs {
    /// Project file (JSON).
    #[arg(long)]
    project: PathBuf,

    /// Slide image. Defaults to the image named in the project.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Where to write the aligned project. Defaults to overwriting the input.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Pixel size in microns, overriding the project calibration.
    #[arg(long)]
    pixel_size: Option<f64>,

    /// Only align these cores (repeatable).
    #[arg(long = "core")]
    cores: Vec<ObjectId>,
}

#[derive(Debug, Clone, Args)]
struct DemoArgs {
    /// Output directory for the slide and project files.
    #[arg(long)]
    out_dir: PathBuf,

    /// Tissue displacement in x, pixels.
    #[arg(long, default_value = "12.0", allow_hyphen_values = true)]
    shift_x: f64,

    /// Tissue displacement in y, pixels.
    #[arg(long, default_value = "-8.0", allow_hyphen_values = true)]
    shift_y: f64,

    /// Tissue rotation about each core centre, degrees.
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    rotation: f64,

    /// Use the background worker thread instead of aligning inline.
    #[arg(long)]
    worker: bool,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AlignConfig::load(path)?,
        None => AlignConfig::load_from_default_path().unwrap_or_default(),
    };

    env_logger::Builder::new()
        .filter_level(config.log_level.more_verbose(cli.verbose).to_level_filter())
        .parse_default_env()
        .init();

    config.validate()?;

    match cli.command {
        Commands::Align(args) => run_align(&args, &config),
        Commands::Demo(args) => run_demo(&args, &config),
        Commands::Config { out } => run_config(out, &config),
    }
}

fn run_align(args: &AlignArgs, config: &AlignConfig) -> CliResult<()> {
    let mut project = ProjectFile::load(&args.project)?;
    let image_path = match &args.image {
        Some(path) => path.clone(),
        None => project.resolve_image(&args.project).ok_or_else(|| -> CliError {
            "no --image given and the project names no image".into()
        })?,
    };

    let calibration = match args.pixel_size {
        Some(size) => PixelCalibration::microns(size),
        None => project.calibration.unwrap_or_default(),
    };
    let server = InMemoryImageServer::open(&image_path, calibration)?;
    let (w, h) = server.dimensions();
    log::info!("Image size: {}x{}", w, h);

    let mut hierarchy = project.to_hierarchy()?;
    let cancel = CancellationToken::new();
    let report = if args.cores.is_empty() {
        align_tma_grid(&server, &mut hierarchy, config, &cancel)?
    } else {
        align_cores(&server, &mut hierarchy, &args.cores, config, &cancel)?
    };
    print_report(&report);

    project.update_objects(&hierarchy);
    let out = args.out.as_deref().unwrap_or(args.project.as_path());
    project.save(out)?;
    println!("Wrote {}", out.display());
    Ok(())
}

fn run_demo(args: &DemoArgs, config: &AlignConfig) -> CliResult<()> {
    std::fs::create_dir_all(&args.out_dir)?;
    let layout = SlideLayout {
        tissue_shift: (args.shift_x, args.shift_y),
        tissue_rotation: args.rotation.to_radians(),
        missing: vec![(1, 2)],
        ..SlideLayout::default()
    };
    let mut slide = tma_slide(&layout);

    let image_path = args.out_dir.join("slide.png");
    slide.image.save(&image_path)?;
    let mut project = ProjectFile::from_hierarchy(&slide.hierarchy);
    project.image = Some(PathBuf::from("slide.png"));
    project.calibration = Some(slide.calibration);
    project.save(&args.out_dir.join("project-original.json"))?;

    let server = slide.server();
    let report = if args.worker {
        align_with_worker(Arc::new(server), &mut slide.hierarchy, config)?
    } else {
        align_tma_grid(&server, &mut slide.hierarchy, config, &CancellationToken::new())?
    };
    print_report(&report);

    project.update_objects(&slide.hierarchy);
    let aligned_path = args.out_dir.join("project.json");
    project.save(&aligned_path)?;
    println!(
        "Wrote {}, {} and {}",
        image_path.display(),
        args.out_dir.join("project-original.json").display(),
        aligned_path.display()
    );
    Ok(())
}

/// Run every core through the background worker and apply results as they
/// arrive.
fn align_with_worker(
    server: Arc<dyn ImageServer>,
    hierarchy: &mut ObjectHierarchy,
    config: &AlignConfig,
) -> CliResult<BatchReport> {
    use tmalign::align::{AlignmentInput, CoreReport, apply_outcome};
    use tmalign::error::AlignError;
    use tmalign::worker::AlignmentWorker;

    let mut worker = AlignmentWorker::spawn(server)?;
    let mut report = BatchReport::default();
    for core in hierarchy.tma_cores() {
        let missing = matches!(
            hierarchy.get(core).map(|o| &o.kind),
            Some(ObjectKind::TmaCore { missing: true, .. })
        );
        if missing {
            report.cores.push(CoreReport {
                core,
                name: core_name(hierarchy, core),
                status: CoreStatus::Skipped {
                    reason: "core is marked missing".to_string(),
                },
            });
            continue;
        }
        match AlignmentInput::for_core(hierarchy, core) {
            Ok(input) => {
                worker.submit(input, config.clone())?;
            }
            Err(AlignError::NoEligibleAnnotations { .. }) => report.cores.push(CoreReport {
                core,
                name: core_name(hierarchy, core),
                status: CoreStatus::Skipped {
                    reason: "no annotations".to_string(),
                },
            }),
            Err(error) => return Err(error.into()),
        }
    }

    while worker.pending_count() > 0 {
        let result = worker.recv()?;
        let status = match result.outcome {
            Ok(outcome) => {
                let updated = apply_outcome(hierarchy, &outcome)?;
                CoreStatus::Aligned {
                    updated,
                    failed_rois: outcome.failures.len(),
                    correlation: outcome.registration.correlation,
                    warnings: outcome.warnings,
                }
            }
            Err(error) => CoreStatus::Failed { error },
        };
        report.cores.push(CoreReport {
            core: result.parent,
            name: core_name(hierarchy, result.parent),
            status,
        });
    }
    Ok(report)
}

fn core_name(hierarchy: &ObjectHierarchy, id: ObjectId) -> String {
    match hierarchy.get(id).map(|o| &o.kind) {
        Some(ObjectKind::TmaCore { name, .. }) => name.clone(),
        _ => id.to_string(),
    }
}

fn run_config(out: Option<PathBuf>, config: &AlignConfig) -> CliResult<()> {
    let path = match out {
        Some(path) => path,
        None => AlignConfig::default_path()
            .ok_or_else(|| -> CliError { "could not determine a config directory".into() })?,
    };
    config.save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn print_report(report: &BatchReport) {
    for core in &report.cores {
        let label = if core.name.is_empty() {
            core.core.to_string()
        } else {
            core.name.clone()
        };
        match &core.status {
            CoreStatus::Aligned {
                updated,
                failed_rois,
                correlation,
                warnings,
            } => {
                println!(
                    "  {:<8} aligned {} annotations (rho {:.3}){}",
                    label,
                    updated,
                    correlation,
                    if *failed_rois > 0 {
                        format!(", {} skipped", failed_rois)
                    } else {
                        String::new()
                    }
                );
                for warning in warnings {
                    println!("  {:<8}   warning: {}", "", warning);
                }
            }
            CoreStatus::Skipped { reason } => println!("  {:<8} skipped: {}", label, reason),
            CoreStatus::Failed { error } => println!("  {:<8} failed: {}", label, error),
        }
    }
    println!(
        "{} aligned, {} skipped, {} failed, {} annotations updated{}",
        report.aligned_count(),
        report.skipped_count(),
        report.failed_count(),
        report.updated_annotations(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dwi_prep::{
    Orientation, PipelineConfig, PipelineRunner, StepSelection, ToolchainOps, VolumeLoader,
    montage::Montage, stats,
};

#[derive(Parser)]
#[command(name = "dwi-prep", version)]
#[command(about = "Resumable DWI preprocessing pipeline")]
struct Cli {
    /// Log skipped steps and external commands
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for every configured subject
    Run {
        /// Pipeline configuration (JSON)
        #[arg(short, long, default_value = "args.json")]
        config: PathBuf,
        /// Steps to recompute, overriding `steps_to_run` (comma-separated)
        #[arg(long, value_delimiter = ',')]
        steps: Option<Vec<String>>,
        /// Process subjects concurrently
        #[arg(long)]
        parallel: bool,
    },
    /// Show which steps would run, without running anything
    Plan {
        /// Pipeline configuration (JSON)
        #[arg(short, long, default_value = "args.json")]
        config: PathBuf,
        /// Steps to recompute, overriding `steps_to_run` (comma-separated)
        #[arg(long, value_delimiter = ',')]
        steps: Option<Vec<String>>,
    },
    /// Save the temporal SNR map of a 4D volume
    Tsnr {
        #[arg(short, long)]
        input: PathBuf,
        /// Repetition time in seconds
        #[arg(long)]
        tr: f32,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Save a PNG grid of every axial slice
    Montage {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Frame to show for 4D volumes
        #[arg(short, long, default_value_t = 15)]
        time: usize,
        #[arg(long, default_value_t = 2)]
        rows: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "dwi_prep=debug" } else { "dwi_prep=info" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = default_level.parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(
    path: &PathBuf,
    steps: Option<Vec<String>>,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = PipelineConfig::from_file(path)?;
    if let Some(steps) = steps {
        config = config.with_steps(StepSelection::from_names(&steps)?);
    }
    Ok(config)
}

fn execute(command: Commands) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Run {
            config,
            steps,
            parallel,
        } => {
            let mut config = load_config(&config, steps)?;
            if parallel {
                config = config.with_parallel(true);
            }
            let ops = ToolchainOps::new(&config);
            let report = PipelineRunner::new(config, ops).run();
            report.log_summary();
            Ok(ExitCode::from(report.exit_status()))
        }
        Commands::Plan { config, steps } => {
            let config = load_config(&config, steps)?;
            let ops = ToolchainOps::new(&config);
            for plan in PipelineRunner::new(config, ops).plan() {
                for planned in plan.steps {
                    let action = if planned.will_run { "run" } else { "skip" };
                    println!(
                        "{}\t{}\t{}\t{}",
                        plan.subject,
                        planned.record.step,
                        action,
                        planned.record.output.display()
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tsnr { input, tr, output } => {
            let volume = VolumeLoader::load(&input)?;
            let tsnr = stats::temporal_snr(stats::as_timeseries(&volume)?, tr)?;
            VolumeLoader::save(&tsnr, &output, &volume.affine, None)?;
            tracing::info!(output = %output.display(), "saved tSNR map");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Montage {
            input,
            output,
            time,
            rows,
        } => {
            let volume = VolumeLoader::load(&input)?;
            let montage = Montage {
                orientation: Orientation::Axial,
                rows,
                time,
            };
            montage.save(&volume, &output)?;
            tracing::info!(output = %output.display(), "saved overview");
            Ok(ExitCode::SUCCESS)
        }
    }
}

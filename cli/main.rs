#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use lagscale::config::ExperimentConfig;
use lagscale::data::{LoadRequest, SampleSource, ShardedFiles};
use lagscale::experiment::{ConfigRecord, EvaluationResult, ExperimentReport};
use lagscale::progress::{ExperimentProgress, NoopProgress};
use lagscale::report::{ReportFile, save_summary_tsv};
use lagscale::{
    ConfigKey, RankWindow, SplitOrientation, SplitPlan, SplitSize, evaluate_configuration,
    run_experiment,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum OrientationCli {
    PrefixTrain,
    SuffixTrain,
}

impl From<OrientationCli> for SplitOrientation {
    fn from(value: OrientationCli) -> Self {
        match value {
            OrientationCli::PrefixTrain => SplitOrientation::PrefixTrain,
            OrientationCli::SuffixTrain => SplitOrientation::SuffixTrain,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the TOML experiment configuration
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Where to write the TOML report (defaults to <CONFIG>.report.toml)
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Where to write the tab-separated summary (defaults to <CONFIG>.summary.tsv)
    #[arg(long, value_name = "PATH")]
    pub summary: Option<PathBuf>,

    /// Number of worker threads (defaults to one per logical core)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args)]
pub struct FitArgs {
    /// Sample shard files or directories, concatenated in the order given
    #[arg(long = "shard", value_name = "PATH", required = true, num_args = 1..)]
    pub shards: Vec<PathBuf>,

    /// Number of eigenvalues per draw
    #[arg(long, value_name = "N")]
    pub ensemble_size: usize,

    /// Moment exponent s, typically negative
    #[arg(long, value_name = "S", allow_negative_numbers = true)]
    pub exponent: f64,

    /// First column of the rank window (0-based)
    #[arg(long, default_value = "0")]
    pub window_start: usize,

    /// Number of consecutive ranks in the window
    #[arg(long)]
    pub window_len: usize,

    /// Fraction of samples used for training; omit to fit and score on all samples
    #[arg(long, value_name = "P", conflicts_with = "train_count")]
    pub split_fraction: Option<f64>,

    /// Absolute number of samples used for training
    #[arg(long, value_name = "K")]
    pub train_count: Option<usize>,

    /// Which end of the sample order is used for training
    #[arg(long, value_enum, default_value_t = OrientationCli::PrefixTrain)]
    pub orientation: OrientationCli,

    /// Use at most this many samples
    #[arg(long, value_name = "M")]
    pub num_samples_cap: Option<usize>,

    /// Attach standard errors, p-values and confidence intervals at this level
    #[arg(long, value_name = "LEVEL")]
    pub confidence_level: Option<f64>,

    /// Ensemble shape parameter, recorded in the report
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    pub alpha: f64,

    /// Optional path for a TOML report of this fit
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "lagscale",
    about = "Rank-scaling estimation of inverse eigenvalue moments",
    long_about = "Estimates how E[λ_i^s] of sorted random-matrix eigenvalues scales with the rank i \
                 by regressing log-moments on log-ranks, and validates the fit on held-out samples."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configuration of an experiment file
    #[command(about = "Run a configured experiment (outputs: report.toml, summary.tsv)")]
    Run(RunArgs),

    /// Fit a single configuration given on the command line
    #[command(about = "Fit one rank window of one ensemble size")]
    Fit(FitArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Version) => {
            println!("lagscale {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Drives an indicatif bar from experiment notifications.
struct BarProgress {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl BarProgress {
    fn new() -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(0), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        Self {
            bar,
            failures: AtomicUsize::new(0),
        }
    }
}

impl ExperimentProgress for BarProgress {
    fn on_experiment_start(&self, total_configurations: usize) {
        self.bar.set_length(total_configurations as u64);
    }

    fn on_load_start(&self, ensemble_size: usize) {
        self.bar.set_message(format!("loading N={ensemble_size}"));
    }

    fn on_load_finish(&self, ensemble_size: usize, num_samples: Option<usize>) {
        match num_samples {
            Some(rows) => self
                .bar
                .set_message(format!("fitting N={ensemble_size} ({rows} samples)")),
            None => self
                .bar
                .set_message(format!("N={ensemble_size} unavailable")),
        }
    }

    fn on_configuration_done(&self, key: &ConfigKey, succeeded: bool) {
        if !succeeded {
            let failed = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            self.bar
                .set_message(format!("{failed} failed, last: {key}"));
        }
        self.bar.inc(1);
    }

    fn on_experiment_finish(&self) {
        let failed = self.failures.load(Ordering::Relaxed);
        self.bar
            .finish_with_message(format!("done, {failed} configuration(s) failed"));
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let config = ExperimentConfig::load(&args.config)?;
    let base_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let source = config.source(&base_dir);
    let plan = config.plan();

    println!(
        "Running {} configuration(s) from {}",
        plan.configurations().len(),
        args.config.display()
    );

    let report = if args.no_progress {
        run_experiment(&plan, &source, &NoopProgress)
    } else {
        run_experiment(&plan, &source, &BarProgress::new())
    };

    let output = args
        .output
        .unwrap_or_else(|| args.config.with_extension("report.toml"));
    let summary = args
        .summary
        .unwrap_or_else(|| args.config.with_extension("summary.tsv"));
    ReportFile::from(&report).save(&output)?;
    save_summary_tsv(&report, &summary)?;

    let failed = report.failures().count();
    println!(
        "{} succeeded, {failed} failed. Report written to {}, summary to {}",
        report.successes().count(),
        output.display(),
        summary.display()
    );
    for (key, failure) in report.failures() {
        eprintln!("  {key}: {failure}");
    }
    Ok(())
}

fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let window = RankWindow::new(args.window_start, args.window_len)?;
    window.check_within(args.ensemble_size)?;

    let orientation = SplitOrientation::from(args.orientation);
    let split = match (args.split_fraction, args.train_count) {
        (Some(fraction), _) => SplitPlan::holdout_fraction(fraction, orientation),
        (None, Some(count)) => SplitPlan::Holdout {
            size: SplitSize::Count(count),
            orientation,
        },
        (None, None) => SplitPlan::Full,
    };
    let key = ConfigKey {
        ensemble_size: args.ensemble_size,
        window,
        split,
    };

    let source = ShardedFiles::new().with_dataset(args.ensemble_size, args.shards);
    let matrix = source.load(&LoadRequest {
        ensemble_size: args.ensemble_size,
        columns: window.columns(),
        num_samples_cap: args.num_samples_cap,
    })?;
    log::info!("Loaded {} samples for N={}", matrix.num_samples(), args.ensemble_size);

    let result = evaluate_configuration(&matrix, &key, args.exponent, args.confidence_level)?;
    print_result(&result);

    if let Some(output) = args.output {
        let report = ExperimentReport {
            alpha: args.alpha,
            exponent: args.exponent,
            records: vec![ConfigRecord {
                key,
                outcome: Ok(result),
            }],
        };
        ReportFile::from(&report).save(&output)?;
        println!("Report written to {}", output.display());
    }
    Ok(())
}

fn print_result(result: &EvaluationResult) {
    println!("{}", result.key);
    println!("  intercept  {:.6}", result.intercept());
    println!("  slope      {:.6}", result.slope());
    println!(
        "  R² train   {:.6} ({} samples)",
        result.r2_train,
        result.partition.train.len()
    );
    println!(
        "  R² eval    {:.6} ({} samples)",
        result.r2_eval,
        result.partition.eval.len()
    );
    if let Some(inference) = &result.model.inference {
        let percent = inference.confidence_level * 100.0;
        for (name, coefficient) in [("intercept", &inference.intercept), ("slope", &inference.slope)] {
            let (lo, hi) = coefficient.confidence_interval;
            let p_value = coefficient
                .p_value
                .map_or_else(|| "NA".to_string(), |p| format!("{p:.3e}"));
            println!(
                "  {name:<9}  se {:.6}, {percent}% CI [{lo:.6}, {hi:.6}], p = {p_value}",
                coefficient.standard_error
            );
        }
    }
}

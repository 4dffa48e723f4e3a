//! mutaflow command-line interface
//!
//! Every subcommand except `parse` loads the YAML configuration and works
//! against the job store it names, so separate invocations share jobs.
//! Results are printed as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use mutaflow::annotate::{FilterCriteria, Preset};
use mutaflow::config::Config;
use mutaflow::watch::run_poller;
use mutaflow::{JobId, JobStatus, Orchestrator};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Somatic variant-calling job orchestration, VCF ingestion and annotation
#[derive(Parser, Debug)]
#[command(name = "mutaflow")]
#[command(version)]
#[command(about = "Run somatic variant calling jobs, ingest their VCFs and annotate variants")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, default_value = "mutaflow.yaml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a calling job for a tumor sample (optionally tumor/normal)
    Submit(SubmitArgs),

    /// Poll and print the status of a job
    Status { job_id: String },

    /// List jobs, optionally by tumor sample or status
    Jobs {
        #[arg(long)]
        sample: Option<String>,

        #[arg(long)]
        status: Option<String>,
    },

    /// Request cancellation of a job
    Cancel { job_id: String },

    /// Ingest and annotate the variants of a completed job
    Ingest { job_id: String },

    /// Re-derive annotations for an ingested job
    Annotate { job_id: String },

    /// Print the annotations of a job, filtered
    Filter(FilterArgs),

    /// Orthogonal verification bookkeeping
    Verify {
        #[command(subcommand)]
        action: VerifyAction,
    },

    /// Poll active jobs on an interval
    Watch {
        /// Seconds between polls (default: options.poll_interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// Exit once no job is left to poll
        #[arg(long)]
        until_idle: bool,
    },

    /// Parse a VCF and print its records (no configuration needed)
    Parse {
        vcf: PathBuf,

        /// Job id stamped on the records
        #[arg(long, default_value = "0")]
        job_id: String,
    },
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    /// Tumor sample id
    #[arg(long)]
    tumor: String,

    /// Matched normal sample id
    #[arg(long)]
    normal: Option<String>,

    #[arg(long, default_value = "4.4.0")]
    pipeline_version: String,

    /// Calling method passed to the pipeline
    #[arg(long, default_value = "Mutect2")]
    method: String,

    /// Wait for the job to finish, showing progress
    #[arg(long)]
    wait: bool,
}

#[derive(Parser, Debug)]
struct FilterArgs {
    job_id: String,

    /// Criterion as key=value, e.g. -f clinicalSignificance=pathogenic,likely_pathogenic
    #[arg(short = 'f', long = "criterion")]
    criteria: Vec<String>,

    /// Canned query: pathogenic, clinically-relevant, actionable
    #[arg(long)]
    preset: Option<String>,

    /// Only annotations with this verification status
    #[arg(long)]
    verification: Option<String>,
}

#[derive(Subcommand, Debug)]
enum VerifyAction {
    /// Ask for orthogonal verification of a variant
    Request {
        job_id: String,
        variant_id: u64,

        /// Assay, e.g. Sanger or ddPCR
        #[arg(long)]
        method: String,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Record a verification outcome
    Update {
        job_id: String,
        variant_id: u64,

        #[arg(long)]
        status: String,

        #[arg(long)]
        notes: Option<String>,
    },
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if let Commands::Parse { vcf, job_id } = &cli.command {
        let batch = mutaflow::vcf::parse_vcf(vcf, &JobId::new(job_id.as_str()))?;
        info!("{}: {} variants, {} PASS", vcf.display(), batch.total, batch.passed);
        return print_json(&batch.records);
    }

    info!("mutaflow v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration: {}", cli.config.display());
    let config = Config::from_yaml(&cli.config)?;
    info!(
        "Configuration loaded: {} samples, {:?} mode",
        config.all_sample_ids().len(),
        config.pipeline.mode
    );
    let orchestrator = Orchestrator::from_config(&config)
        .with_context(|| format!("Failed to initialize from {}", cli.config.display()))?;

    run_command(cli.command, &config, &orchestrator)?;

    // let background submissions and ingestions finish before exiting
    orchestrator.wait_for_idle();
    Ok(())
}

fn run_command(command: Commands, config: &Config, orchestrator: &Orchestrator) -> Result<()> {
    match command {
        Commands::Submit(args) => run_submit(args, config, orchestrator),
        Commands::Status { job_id } => {
            print_json(&orchestrator.get_job_status(&JobId::new(job_id))?)
        }
        Commands::Jobs { sample, status } => {
            let jobs = match (sample, status) {
                (Some(sample), _) => orchestrator.jobs_by_tumor_sample(&sample)?,
                (None, Some(status)) => orchestrator.jobs_by_status(status.parse::<JobStatus>()?)?,
                (None, None) => orchestrator.list_jobs()?,
            };
            print_json(&jobs)
        }
        Commands::Cancel { job_id } => {
            let id = JobId::new(job_id);
            let cancelled = orchestrator.cancel_job(&id)?;
            print_json(&serde_json::json!({ "job_id": id, "cancelled": cancelled }))
        }
        Commands::Ingest { job_id } => {
            let summary = orchestrator.ingest_completed_job(&JobId::new(job_id.as_str()))?;
            info!(
                "Job {}: {} variants ingested, {} PASS, {} annotated",
                job_id, summary.total, summary.passed, summary.annotated
            );
            print_json(&serde_json::json!({
                "job_id": job_id,
                "total_variants_called": summary.total,
                "variants_passed_filter": summary.passed,
                "annotated": summary.annotated,
            }))
        }
        Commands::Annotate { job_id } => {
            print_json(&orchestrator.annotate_job(&JobId::new(job_id))?)
        }
        Commands::Filter(args) => run_filter(args, orchestrator),
        Commands::Verify { action } => {
            let annotation = match action {
                VerifyAction::Request {
                    job_id,
                    variant_id,
                    method,
                    notes,
                } => orchestrator.request_verification(
                    &JobId::new(job_id),
                    variant_id,
                    &method,
                    notes.as_deref(),
                )?,
                VerifyAction::Update {
                    job_id,
                    variant_id,
                    status,
                    notes,
                } => orchestrator.update_verification_status(
                    &JobId::new(job_id),
                    variant_id,
                    &status,
                    notes.as_deref(),
                )?,
            };
            print_json(&annotation)
        }
        Commands::Watch {
            interval,
            until_idle,
        } => {
            let secs = interval.unwrap_or(config.options.poll_interval_secs);
            info!("Polling active jobs every {}s", secs);
            let stop = AtomicBool::new(false);
            let rounds = run_poller(orchestrator, Duration::from_secs(secs), &stop, until_idle)?;
            info!("Poller finished after {} rounds", rounds);
            Ok(())
        }
        Commands::Parse { .. } => Ok(()),
    }
}

fn run_submit(args: SubmitArgs, config: &Config, orchestrator: &Orchestrator) -> Result<()> {
    let job = orchestrator.submit_job(
        &args.tumor,
        args.normal.as_deref(),
        &args.pipeline_version,
        &args.method,
    )?;
    info!("Job {} created for tumor sample {}", job.id, args.tumor);

    if !args.wait {
        return print_json(&job);
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));

    let interval = Duration::from_secs(config.options.poll_interval_secs.max(1));
    let last = orchestrator.wait_for_terminal(&job.id, interval, |snapshot| {
        let progress = snapshot.progress_log.as_deref().unwrap_or("");
        pb.set_message(format!("job {} {} {}", snapshot.id, snapshot.status, progress));
    })?;
    pb.finish_with_message(format!("job {} {}", last.id, last.status));

    // the ingestion scheduled on completion updates the counters
    orchestrator.wait_for_idle();
    print_json(&orchestrator.get_job_status(&job.id)?)
}

fn run_filter(args: FilterArgs, orchestrator: &Orchestrator) -> Result<()> {
    let id = JobId::new(args.job_id);

    let pairs = args
        .criteria
        .iter()
        .map(|c| {
            c.split_once('=')
                .with_context(|| format!("Criterion must be key=value: '{}'", c))
        })
        .collect::<Result<Vec<_>>>()?;
    let criteria = FilterCriteria::from_pairs(pairs)?;

    let mut annotations = orchestrator.filter_annotations(&id, &criteria)?;
    if let Some(preset) = args.preset {
        let preset: Preset = preset.parse()?;
        annotations.retain(|a| preset.matches(a));
    }
    if let Some(status) = args.verification {
        annotations.retain(|a| a.verification.status == status);
    }
    info!("Job {}: {} matching annotations", id, annotations.len());
    print_json(&annotations)
}

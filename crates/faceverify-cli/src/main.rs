mod checkin;
mod config;
mod engine;
mod gallery;
mod roster;

use anyhow::{bail, Result};
use checkin::CheckIn;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use config::Config;
use engine::{EngineError, EngineHandle};
use faceverify_audit::{EvidenceStore, SqliteAuditStore};
use faceverify_core::{Capability, Decision, ImageSource, VerificationOutcome, VerifyError};
use gallery::GalleryEntry;
use roster::Roster;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;

/// Exit status for bad caller input (undecodable image, invalid threshold).
const EXIT_INVALID_INPUT: u8 = 64;
/// How long shutdown waits for inference abandoned after a timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "faceverify", version, about = "Face verification and attendance audit CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a probe photo against a reference photo
    Verify {
        reference: PathBuf,
        probe: PathBuf,
        /// Maximum embedding distance accepted as a match
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Verify a staff member against their roster photo and record the attempt
    Check {
        /// Staff identifier from the roster
        #[arg(short, long)]
        staff: String,
        probe: PathBuf,
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Caller description stored with the attempt (address, device)
        #[arg(long)]
        client: Option<String>,
    },
    /// Compare a probe photo against every entry of an embedding gallery
    Batch {
        probe: PathBuf,
        #[arg(short, long)]
        gallery: PathBuf,
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Build an embedding gallery from the active roster members
    Gallery {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List face regions found in an image
    Locate { image: PathBuf },
    /// Show recent verification attempts
    History {
        #[arg(short, long)]
        staff: Option<String>,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Show attempt counts per status
    Stats {
        #[arg(short, long, default_value_t = 30)]
        days: i64,
    },
    /// Show whether the face models are loaded
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let result = match block_on_with_grace(run(cli.command, config)) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            if is_caller_fault(&err) {
                ExitCode::from(EXIT_INVALID_INPUT)
            } else {
                ExitCode::from(2)
            }
        }
    }
}

/// Drive `future` on a fresh runtime, then give blocking work at most
/// `SHUTDOWN_GRACE` to finish. A timed-out inference keeps its blocking
/// thread, and a plain runtime drop would wait for it.
fn block_on_with_grace<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(output)
}

async fn run(command: Commands, config: Config) -> Result<ExitCode> {
    match command {
        Commands::Verify { reference, probe, threshold } => {
            let engine = start_engine(&config)?;
            let threshold = threshold.unwrap_or(config.threshold);
            let outcome = engine
                .verify_one(ImageSource::from(reference), ImageSource::from(probe), threshold)
                .await?;
            print_json(&outcome)?;
            Ok(exit_code(&outcome))
        }
        Commands::Check { staff, probe, threshold, client } => {
            let threshold = threshold.unwrap_or(config.threshold);
            let roster = Roster::load(&config.roster_path)?;
            let engine = start_engine(&config)?;
            let store = SqliteAuditStore::open(&config.db_path)?;
            let evidence = EvidenceStore::new(&config.evidence_dir);
            let check_in = CheckIn {
                roster: &roster,
                engine: &engine,
                recorder: &store,
                evidence: &evidence,
                max_photo_bytes: config.max_photo_bytes,
            };
            let report = check_in.run(&staff, &probe, threshold, client).await?;
            print_json(&report)?;
            Ok(exit_code(&report.outcome))
        }
        Commands::Batch { probe, gallery, threshold } => {
            let engine = start_engine(&config)?;
            let threshold = threshold.unwrap_or(config.threshold);
            let known = gallery::comparable(gallery::load(&gallery)?, engine.model_version());
            let entries = engine.verify_many(ImageSource::from(probe), known, threshold).await?;
            print_json(&entries)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gallery { output } => {
            let engine = start_engine(&config)?;
            build_gallery(&config, &engine, &output).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Locate { image } => {
            let engine = start_engine(&config)?;
            let regions = engine.locate(ImageSource::from(image)).await?;
            print_json(&regions)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { staff, limit } => {
            let store = SqliteAuditStore::open(&config.db_path)?;
            print_json(&store.recent(staff.as_deref(), limit)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stats { days } => {
            let store = SqliteAuditStore::open(&config.db_path)?;
            let since = Utc::now() - ChronoDuration::days(days.clamp(0, 36_500));
            print_json(&store.stats(since)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            #[derive(Serialize)]
            struct Status {
                version: &'static str,
                #[serde(flatten)]
                capability: faceverify_core::CapabilityStatus,
                model_dir: PathBuf,
                threshold: f32,
                metric: faceverify_core::Metric,
            }
            let capability = Capability::probe(&config.backend());
            print_json(&Status {
                version: env!("CARGO_PKG_VERSION"),
                capability: capability.status(),
                model_dir: config.model_dir.clone(),
                threshold: config.threshold,
                metric: config.metric,
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load the models once and wrap the pipeline in an engine handle.
fn start_engine(config: &Config) -> Result<EngineHandle> {
    match Capability::probe(&config.backend()) {
        Capability::Ready(verifier) => Ok(EngineHandle::new(
            verifier,
            Duration::from_secs(config.verify_timeout_secs),
        )),
        Capability::Unavailable { reason } => {
            bail!("face recognition is not available: {reason}")
        }
    }
}

async fn build_gallery(config: &Config, engine: &EngineHandle, output: &Path) -> Result<()> {
    let roster = Roster::load(&config.roster_path)?;
    let mut entries = Vec::new();

    for member in roster.active() {
        let Some(photo) = &member.photo else {
            tracing::warn!(staff_id = %member.staff_id, "no reference photo; skipping");
            continue;
        };
        match engine.embed(ImageSource::from(photo.as_path())).await {
            Ok(Some(embedding)) => entries.push(GalleryEntry {
                id: member.staff_id.clone(),
                name: Some(member.name.clone()),
                embedding,
            }),
            Ok(None) => tracing::warn!(staff_id = %member.staff_id, "no face in reference photo; skipping"),
            Err(e) => tracing::warn!(staff_id = %member.staff_id, error = %e, "failed to embed reference photo; skipping"),
        }
    }

    gallery::save(output, &entries)?;
    tracing::info!(path = %output.display(), entries = entries.len(), "gallery written");
    println!("{} entries written to {}", entries.len(), output.display());
    Ok(())
}

/// True when the error chain carries a pipeline error caused by the input.
fn is_caller_fault(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<VerifyError>() {
            return e.is_caller_fault();
        }
        matches!(cause.downcast_ref::<EngineError>(), Some(EngineError::Verify(e)) if e.is_caller_fault())
    })
}

fn exit_code(outcome: &VerificationOutcome) -> ExitCode {
    ExitCode::from(exit_status(outcome))
}

/// 0 on match, 1 on any other decision, 2 on processing errors.
fn exit_status(outcome: &VerificationOutcome) -> u8 {
    match outcome.decision {
        Decision::Matched => 0,
        Decision::ProcessingError => 2,
        _ => 1,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_exit_status_per_decision() {
        assert_eq!(exit_status(&VerificationOutcome::matched(0.7, String::new())), 0);
        assert_eq!(exit_status(&VerificationOutcome::not_matched(0.2, String::new())), 1);
        let no_face = VerificationOutcome::no_face(Decision::NoFaceProbe, "probe image: no face detected");
        assert_eq!(exit_status(&no_face), 1);
        assert_eq!(exit_status(&VerificationOutcome::processing_error("boom")), 2);
    }

    #[test]
    fn test_caller_faults_are_recognized_through_context() {
        let decode = anyhow::Error::new(EngineError::Verify(VerifyError::Decode("bad png".into())));
        assert!(is_caller_fault(&decode.context("locate failed")));

        let threshold = anyhow::Error::new(VerifyError::InvalidInput("threshold".into()));
        assert!(is_caller_fault(&threshold));

        let processing = anyhow::Error::new(EngineError::Verify(VerifyError::Processing("ort".into())));
        assert!(!is_caller_fault(&processing));
        assert!(!is_caller_fault(&anyhow::anyhow!("roster missing")));
    }

    #[test]
    fn test_exit_not_held_by_timed_out_inference() {
        let started = Instant::now();
        let outcome = block_on_with_grace(async {
            let engine = engine::tests::engine(Duration::from_secs(3), Duration::from_millis(20));
            let image = ImageSource::Bytes(engine::tests::png_bytes([10, 200, 30]));
            engine.verify_one(image.clone(), image, 0.6).await
        })
        .unwrap()
        .unwrap();

        assert_eq!(outcome.decision, Decision::ProcessingError);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn test_cli_parses_check() {
        let cli = Cli::try_parse_from([
            "faceverify", "check", "--staff", "EMP001", "probe.jpg", "--client", "kiosk-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Check { staff, probe, threshold, client } => {
                assert_eq!(staff, "EMP001");
                assert_eq!(probe, PathBuf::from("probe.jpg"));
                assert_eq!(threshold, None);
                assert_eq!(client.as_deref(), Some("kiosk-1"));
            }
            _ => panic!("expected check"),
        }
    }
}

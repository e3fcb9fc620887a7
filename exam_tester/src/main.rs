use anyhow::{Context, bail};
use exam_vision::pipeline::DashboardRow;
use exam_vision::{ExamConfig, ExamPipeline, ParallelPipeline, UploadOutcome, telemetry};
use std::env;
use std::path::PathBuf;
use tracing::{error, info};

struct Args {
    config: Option<PathBuf>,
    json: bool,
    images: Vec<PathBuf>,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut config = None;
    let mut json = false;
    let mut images = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--json" => json = true,
            "-h" | "--help" => return Ok(None),
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            _ => images.push(PathBuf::from(arg)),
        }
    }
    Ok(Some(Args {
        config,
        json,
        images,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    // --- 1. Argument Parsing & Setup ---
    let Some(args) = parse_args()? else {
        println!("Usage: exam_tester [--config <exam.toml>] [--json] <image>...");
        return Ok(());
    };
    let config = match &args.config {
        Some(path) => ExamConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ExamConfig::default(),
    };

    // --- 2. Pipeline Initialization ---
    let pipeline = ParallelPipeline::new(ExamPipeline::open(config)?);
    info!(workers = pipeline.worker_count(), images = args.images.len(), "exam tester started");

    // --- 3. Submission ---
    let mut pending = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not read image");
                continue;
            }
        };
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        match pipeline.submit(&bytes, &filename) {
            Ok(ticket) => pending.push((path.clone(), ticket)),
            Err(e) => error!(path = %path.display(), error = %e, "upload rejected"),
        }
    }

    // --- 4. Await Analyses ---
    let (paths, tickets): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
    let outcomes = futures::future::join_all(tickets.into_iter().map(|t| t.wait())).await;
    let mut failures = 0usize;
    for (path, outcome) in paths.iter().zip(outcomes) {
        match outcome {
            Ok(UploadOutcome::Stored(record)) => {
                info!(path = %path.display(), exam_id = record.id, "exam recorded")
            }
            Ok(UploadOutcome::Discarded) => info!(path = %path.display(), "upload discarded"),
            Err(e) => {
                failures += 1;
                error!(path = %path.display(), error = %e, "analysis failed");
            }
        }
    }

    // --- 5. Dashboard ---
    let rows = pipeline.dashboard();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_table(&rows);
    }

    pipeline.shutdown().await;
    if failures > 0 {
        bail!("{failures} upload(s) failed");
    }
    Ok(())
}

fn print_table(rows: &[DashboardRow]) {
    if rows.is_empty() {
        println!("No exams recorded.");
        return;
    }
    println!(
        "{:>4}  {:<24}  {:<15}  {:>10}  {:<32}  {}",
        "ID", "PATIENT", "STATUS", "CONFIDENCE", "ORIGINAL", "RESULT"
    );
    for row in rows {
        println!(
            "{:>4}  {:<24}  {:<15}  {:>10}  {:<32}  {}",
            row.id,
            row.patient_alias,
            row.status.to_string(),
            row.confidence.to_string(),
            row.original_asset.to_string(),
            row.result_asset
        );
    }
}

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use lct::demo::{CommitBarrierDemoResult, run_commit_barrier_demo};
use lct::tracker::parse_tracker_kind;
use lct::workload::{WorkloadConfig, WorkloadReport, run_workload};
use lct::{LctError, LidCommitTracker, TrackerConfig, TrackerKind};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// On-disk configuration for `simulate`. Command line flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CliConfig {
    tracker: TrackerConfig,
    workload: WorkloadConfig,
}

impl CliConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(LctError::from)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| LctError::InvalidConfig(e.to_string()))
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,lct=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            let errno = error
                .downcast_ref::<LctError>()
                .map_or(1, LctError::to_errno);
            ExitCode::from(u8::try_from(errno).unwrap_or(1))
        }
    }
}

fn run() -> Result<ExitCode> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    };
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "demo" => demo_cmd(&rest),
        "simulate" => simulate_cmd(&rest),
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("lct-cli\n");
    println!("USAGE:");
    println!("  lct-cli demo [--kind single-phase|two-phase] [--json]");
    println!(
        "  lct-cli simulate [--config <path>] [--kind <kind>] [--writers N] [--lids N] \
         [--ops N] [--flushes N] [--seed N] [--json]"
    );
}

/// Value following `flag`, if the flag is present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(idx) => args
            .get(idx + 1)
            .map(|v| Some(v.as_str()))
            .with_context(|| format!("{flag} requires a value")),
    }
}

fn flag_number<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    flag_value(args, flag)?
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{flag} expects a number, got {raw:?}"))
        })
        .transpose()
}

fn demo_cmd(args: &[String]) -> Result<ExitCode> {
    let json = args.iter().any(|a| a == "--json");
    let kinds = match flag_value(args, "--kind")? {
        Some(name) => vec![parse_tracker_kind(name)?],
        None => vec![TrackerKind::SinglePhase, TrackerKind::TwoPhase],
    };

    let results: Vec<CommitBarrierDemoResult> =
        kinds.into_iter().map(run_commit_barrier_demo).collect();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).context("failed to serialize demo output")?
        );
    } else {
        for result in &results {
            for line in result.output_lines() {
                println!("{line}");
            }
        }
    }

    if results.iter().all(|r| r.passed) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn simulate_cmd(args: &[String]) -> Result<ExitCode> {
    let json = args.iter().any(|a| a == "--json");
    let mut config = match flag_value(args, "--config")? {
        Some(path) => CliConfig::load(Path::new(path))?,
        None => CliConfig::default(),
    };
    if let Some(name) = flag_value(args, "--kind")? {
        config.tracker.kind = parse_tracker_kind(name)?;
    }
    if let Some(writers) = flag_number(args, "--writers")? {
        config.workload.writers = writers;
    }
    if let Some(lids) = flag_number(args, "--lids")? {
        config.workload.lid_count = lids;
    }
    if let Some(ops) = flag_number(args, "--ops")? {
        config.workload.ops_per_writer = ops;
    }
    if let Some(flushes) = flag_number(args, "--flushes")? {
        config.workload.flush_cycles = flushes;
    }
    if let Some(seed) = flag_number(args, "--seed")? {
        config.workload.seed = seed;
    }

    let tracker = LidCommitTracker::from_config(&config.tracker);
    let report = run_workload(&tracker, &config.workload)?;
    info!(
        target: "lct::cli",
        kind = %report.kind,
        elapsed_ms = report.elapsed_ms,
        "simulate_done"
    );
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        print_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &WorkloadReport) {
    println!("tracker:          {}", report.kind);
    println!("writers:          {}", report.config.writers);
    println!("lids:             {}", report.config.lid_count);
    println!("tokens produced:  {}", report.tokens_produced);
    println!("snapshots:        {}", report.snapshots_produced);
    println!(
        "sampled states:   need_commit={} waiting={} completed={}",
        report.samples.need_commit, report.samples.waiting, report.samples.completed
    );
    println!("final state:      {}", report.final_state);
    println!("elapsed:          {} ms", report.elapsed_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn flag_value_reads_following_argument() {
        let argv = args(&["--kind", "two-phase", "--json"]);
        assert_eq!(flag_value(&argv, "--kind").expect("kind"), Some("two-phase"));
        assert_eq!(flag_value(&argv, "--seed").expect("seed"), None);
        assert!(flag_value(&args(&["--kind"]), "--kind").is_err());
    }

    #[test]
    fn flag_number_rejects_garbage() {
        let argv = args(&["--writers", "three"]);
        assert!(flag_number::<u32>(&argv, "--writers").is_err());
        let argv = args(&["--writers", "3"]);
        assert_eq!(flag_number::<u32>(&argv, "--writers").expect("n"), Some(3));
    }

    #[test]
    fn cli_config_accepts_partial_documents() {
        let raw = r#"{"tracker": {"kind": "single-phase"}, "workload": {"writers": 2}}"#;
        let config: CliConfig = serde_json::from_str(raw).expect("config");
        assert_eq!(config.tracker.kind, TrackerKind::SinglePhase);
        assert_eq!(config.workload.writers, 2);
        assert_eq!(config.workload.lid_count, WorkloadConfig::default().lid_count);
    }

    #[test]
    fn missing_config_exits_with_enoent() {
        let err = CliConfig::load(Path::new("/nonexistent/lct-cli/config.json"))
            .expect_err("missing file");
        let errno = err.downcast_ref::<LctError>().map(LctError::to_errno);
        assert_eq!(errno, Some(libc::ENOENT));
    }

    #[test]
    fn malformed_config_exits_with_einval() {
        let path = std::env::temp_dir().join(format!("lct-cli-bad-{}.json", std::process::id()));
        fs::write(&path, "{\"tracker\": {\"kind\": \"three-phase\"}}").expect("write config");
        let err = CliConfig::load(&path).expect_err("unknown kind");
        fs::remove_file(&path).expect("remove config");
        let errno = err.downcast_ref::<LctError>().map(LctError::to_errno);
        assert_eq!(errno, Some(libc::EINVAL));
    }
}

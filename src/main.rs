mod config;
mod dv;
mod fallback;
mod heuristics;
mod pipeline;
mod recognition;
mod report;
mod session;
mod upload;
mod valuation;

use config::{Config, KeyedService};
use session::{Session, UsState};
use std::env;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use upload::Upload;

const USAGE: &str = "usage:
  dv_report report <estimate-file> [--vin VIN] [--state MO|TX|IN] [--loss-range N] [--out PATH]
  dv_report set-key <recognition|valuation|dv> <key>";

fn config_path() -> PathBuf {
    env::var("DV_REPORT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".config/dv_report.toml"))
}

/// Options for the `report` command; unset ones come from the config.
#[derive(Default)]
struct ReportArgs {
    estimate: Option<PathBuf>,
    vin: Option<String>,
    state: Option<UsState>,
    loss_range: Option<f64>,
    out: Option<PathBuf>,
}

fn parse_report_args(args: &[String]) -> Result<ReportArgs, Box<dyn std::error::Error>> {
    let mut parsed = ReportArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut flag_value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{arg} needs a value"))
        };
        match arg.as_str() {
            "--vin" => parsed.vin = Some(flag_value()?),
            "--state" => parsed.state = Some(flag_value()?.parse()?),
            "--loss-range" => parsed.loss_range = Some(flag_value()?.parse()?),
            "--out" => parsed.out = Some(PathBuf::from(flag_value()?)),
            other if parsed.estimate.is_none() && !other.starts_with("--") => {
                parsed.estimate = Some(PathBuf::from(other));
            }
            other => return Err(format!("unexpected argument {other:?}\n{USAGE}").into()),
        }
    }
    Ok(parsed)
}

async fn run_report(cfg: &Config, args: ReportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let estimate = args.estimate.ok_or(USAGE)?;

    let mut session = Session::new(
        args.state.unwrap_or(cfg.session.default_state),
        cfg.api_keys(),
    );
    let username = env::var("DV_USERNAME").unwrap_or_default();
    let password = env::var("DV_PASSWORD").unwrap_or_default();
    session.login(&cfg.session.credentials, &username, &password)?;
    if env::var("DV_CONSENT").is_ok_and(|v| v == "1") {
        session.grant_consent();
    }
    session.ensure_ready()?;

    let services = pipeline::Services::from_config(cfg)?;
    let mut upload = Upload::from_path(&estimate)?;
    let fields = pipeline::parse_estimate(&session, &services.recognizer, &mut upload).await?;
    println!("Parsed: {}", serde_json::to_string_pretty(&fields)?);

    let vin = args.vin.unwrap_or_else(|| cfg.claim.vin.clone());
    let loss_range = args.loss_range.unwrap_or(cfg.claim.loss_range);
    let report = pipeline::build_report(&session, &services, fields, &vin, loss_range).await?;
    println!(
        "DV: ${:.2} | Post: ${:.2} | Pre-loss: ${:.2} | Confidence: {:.1}",
        report.figures.dv,
        report.figures.post_repair,
        report.pre_loss_acv,
        report.fields.confidence
    );

    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(&cfg.report.file_name));
    std::fs::write(&out, &report.pdf)?;
    info!(path = %out.display(), bytes = report.pdf.len(), "Report written");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Install crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    let args: Vec<String> = env::args().skip(1).collect();
    let path = config_path();

    match args.first().map(String::as_str) {
        Some("report") => {
            let cfg = Config::load_or_default(&path)?;
            let report_args = parse_report_args(&args[1..])?;
            if let Err(e) = run_report(&cfg, report_args).await {
                error!(error = %e, "Report generation failed");
                return Err(e);
            }
        }
        Some("set-key") => {
            let (Some(service), Some(key)) = (args.get(1), args.get(2)) else {
                return Err(USAGE.into());
            };
            let service = KeyedService::parse(service)
                .ok_or_else(|| format!("unknown service {service:?}\n{USAGE}"))?;
            Config::update_api_key(&path, service, key)?;
            info!(path = %path.display(), service = ?service, "Stored API key");
        }
        _ => {
            eprintln!("{USAGE}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_report_args() {
        let parsed = parse_report_args(&strings(&[
            "estimate.pdf",
            "--state",
            "tx",
            "--loss-range",
            "12500",
            "--out",
            "out.pdf",
        ]))
        .unwrap();
        assert_eq!(parsed.estimate, Some(PathBuf::from("estimate.pdf")));
        assert_eq!(parsed.state, Some(UsState::TX));
        assert_eq!(parsed.loss_range, Some(12_500.0));
        assert_eq!(parsed.out, Some(PathBuf::from("out.pdf")));
        assert!(parsed.vin.is_none());
    }

    #[test]
    fn test_parse_report_args_rejects_bad_input() {
        assert!(parse_report_args(&strings(&["a.pdf", "--state", "CA"])).is_err());
        assert!(parse_report_args(&strings(&["a.pdf", "--vin"])).is_err());
        assert!(parse_report_args(&strings(&["a.pdf", "b.pdf"])).is_err());
    }
}

//! CropSync advisory receipt printer.
//!
//! Decodes an advisory page URL into an [`advisory::AdvisoryReceipt`],
//! renders it for 80mm paper (HTML for the browser, ESC/POS for thermal
//! printers) and drives the one-shot print lifecycle against a print host.

use std::io::IsTerminal as _;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod advisory;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod escpos;
pub mod print_lifecycle;
pub mod printers;
pub mod query;
pub mod receipt_renderer;

use config::{OutputKind, PrintConfig};
use print_lifecycle::{PrintHost, PrintLifecycleController, PrintState};
use printers::{ThermalHost, ThermalTarget};
use receipt_renderer::LayoutConfig;

#[derive(Debug, Parser)]
#[command(name = "advisory-print", version, about = "Print a CropSync advisory receipt")]
pub struct Cli {
    /// Advisory page URL (or bare query string) carrying the receipt fields.
    pub page_url: String,

    /// JSON configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output kind: `browser` or `thermal`.
    #[arg(long)]
    pub output: Option<String>,

    /// Thermal printer device node.
    #[arg(long)]
    pub device: Option<PathBuf>,

    /// Raw CUPS queue for thermal output.
    #[arg(long)]
    pub queue: Option<String>,

    /// Directory for generated HTML receipts.
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Do not navigate back to the stage page after printing.
    #[arg(long)]
    pub no_redirect: bool,
}

/// Defaults, then the config file, then command-line overrides.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<PrintConfig> {
    let mut config = match &cli.config {
        Some(path) => PrintConfig::load(path)?,
        None => PrintConfig::default(),
    };
    if let Some(raw) = cli.output.as_deref() {
        config.output = OutputKind::from_value(Some(raw))
            .with_context(|| format!("unknown output kind {raw:?}"))?;
    }
    if let Some(device) = &cli.device {
        config.printer_device = Some(device.clone());
    }
    if let Some(queue) = &cli.queue {
        config.printer_queue = Some(queue.clone());
    }
    if let Some(dir) = &cli.out_dir {
        config.output_dir = Some(dir.clone());
    }
    if cli.no_redirect {
        config.redirect_after_print = false;
    }
    config.validate()?;
    Ok(config)
}

pub fn thermal_target(config: &PrintConfig) -> anyhow::Result<ThermalTarget> {
    if let Some(device) = &config.printer_device {
        return Ok(ThermalTarget::Device(device.clone()));
    }
    if let Some(queue) = config
        .printer_queue
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
    {
        return Ok(ThermalTarget::Queue(queue.to_string()));
    }
    anyhow::bail!("thermal output needs a printer device or queue")
}

/// Run the lifecycle, then offer the manual retry on stdin while blocked.
async fn drive<H: PrintHost>(
    mut controller: PrintLifecycleController<H>,
    interactive: bool,
) -> PrintState {
    let mut state = controller.run_automatic().await;
    if state != PrintState::Blocked || !interactive {
        return state;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while state == PrintState::Blocked {
        eprintln!(
            "Automatic print was blocked ({}). Press Enter to print, or q to quit.",
            controller.last_error().unwrap_or("unknown reason")
        );
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => break,
            Ok(Some(_)) => state = controller.trigger_manual().await,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read manual print request");
                break;
            }
        }
    }
    state
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The receipt page is open in the browser, which prints and redirects.
    PageOpened(PathBuf),
    /// The thermal lifecycle stopped in this state.
    Thermal(PrintState),
}

fn execute(cli: &Cli) -> anyhow::Result<RunOutcome> {
    let config = resolve_config(cli)?;
    let receipt = query::decode_receipt(&cli.page_url);
    let layout = LayoutConfig::from_print_config(&config);
    info!(
        receipt_id = %receipt.receipt_id,
        stage_id = %receipt.stage_id,
        components = receipt.components.len(),
        output = ?config.output,
        "Advisory decoded"
    );

    if config.output == OutputKind::Browser {
        let html = receipt_renderer::render_html(&receipt, &layout);
        let path = printers::open_receipt_page(
            &config.output_dir_or_default(),
            &receipt.receipt_id,
            &html,
        )?;
        return Ok(RunOutcome::PageOpened(path));
    }

    let target = thermal_target(&config)?;
    let mut render = receipt_renderer::render_escpos(&receipt, &layout);
    // Blocking logo fetch stays outside the runtime.
    printers::attach_logo(&mut render, &layout);
    let host = ThermalHost::new(target, render);
    let controller = PrintLifecycleController::new(host, &receipt, &config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build async runtime")?;
    let interactive = std::io::stdin().is_terminal();
    let state = runtime.block_on(drive(controller, interactive));
    Ok(RunOutcome::Thermal(state))
}

fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,advisory_print_lib=debug"));

    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();
    diagnostics::prune_old_logs(&log_dir, diagnostics::MAX_LOG_FILES);

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // One JSON object per event keeps the structured fields in the file log.
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    guard
}

/// Process entry point. Returns the exit code: 0 printed or page opened,
/// 2 blocked, 1 error.
pub fn run() -> i32 {
    let cli = Cli::parse();
    // Dropping the guard flushes the file log.
    let _guard = init_logging();

    let about = diagnostics::get_about_info();
    info!(
        version = about["version"].as_str().unwrap_or("unknown"),
        git_sha = about["gitSha"].as_str().unwrap_or("unknown"),
        built = about["buildTimestamp"].as_str().unwrap_or("unknown"),
        "Starting CropSync advisory print"
    );

    match execute(&cli) {
        Ok(RunOutcome::PageOpened(path)) => {
            info!(path = %path.display(), "Receipt page opened, browser prints it");
            0
        }
        Ok(RunOutcome::Thermal(PrintState::Completed)) => 0,
        Ok(RunOutcome::Thermal(state)) => {
            warn!(state = ?state, "Receipt was not printed");
            2
        }
        Err(e) => {
            error!("{e:#}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["advisory-print"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("valid arguments")
    }

    #[test]
    fn cli_overrides_defaults() {
        let parsed = cli(&[
            "https://p.test/?stage_id=4",
            "--output",
            "thermal",
            "--device",
            "/dev/usb/lp0",
            "--no-redirect",
        ]);
        let config = resolve_config(&parsed).expect("config");
        assert_eq!(config.output, OutputKind::Thermal);
        assert!(!config.redirect_after_print);
        assert_eq!(
            thermal_target(&config).expect("target"),
            ThermalTarget::Device(PathBuf::from("/dev/usb/lp0"))
        );
    }

    #[test]
    fn unknown_output_kind_is_rejected() {
        let parsed = cli(&["https://p.test/", "--output", "fax"]);
        assert!(resolve_config(&parsed).is_err());
    }

    #[test]
    fn thermal_needs_a_target() {
        let config = PrintConfig {
            output: OutputKind::Thermal,
            ..PrintConfig::default()
        };
        assert!(thermal_target(&config).is_err());
        let config = PrintConfig {
            printer_queue: Some(" receipts ".to_string()),
            ..config
        };
        assert_eq!(
            thermal_target(&config).expect("target"),
            ThermalTarget::Queue("receipts".to_string())
        );
    }
}

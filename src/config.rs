//! Print configuration.
//!
//! Resolved once at startup (defaults, then an optional JSON file, then CLI
//! overrides) and passed explicitly into the renderer and the print
//! lifecycle. Nothing downstream reads the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::advisory::DEFAULT_REDIRECT_BASE;
use crate::error::{PrintError, PrintResult};
use crate::escpos::PaperWidth;

pub const DEFAULT_LOGO_URL: &str = "https://app.cropsync.in/logo_v.jpeg";
const DEFAULT_PRINT_DELAY_MS: u64 = 800;
const DEFAULT_FONT_READY_TIMEOUT_MS: u64 = 3_000;
const MAX_PRINT_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// HTML page opened in the system browser.
    #[default]
    Browser,
    /// Raw ESC/POS to a thermal printer.
    Thermal,
}

impl OutputKind {
    pub fn from_value(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("browser") | Some("html") => Some(Self::Browser),
            Some("thermal") | Some("escpos") => Some(Self::Thermal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintConfig {
    pub print_delay_ms: u64,
    pub font_ready_timeout_ms: u64,
    pub redirect_after_print: bool,
    pub redirect_base_url: String,
    pub output: OutputKind,
    pub paper_width_mm: u32,
    /// Printer device node for thermal output, e.g. `/dev/usb/lp0`.
    pub printer_device: Option<PathBuf>,
    /// CUPS queue for thermal output, used when no device is set.
    pub printer_queue: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub show_logo: bool,
    pub logo_url: Option<String>,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            print_delay_ms: DEFAULT_PRINT_DELAY_MS,
            font_ready_timeout_ms: DEFAULT_FONT_READY_TIMEOUT_MS,
            redirect_after_print: true,
            redirect_base_url: DEFAULT_REDIRECT_BASE.to_string(),
            output: OutputKind::Browser,
            paper_width_mm: 80,
            printer_device: None,
            printer_queue: None,
            output_dir: None,
            show_logo: true,
            logo_url: Some(DEFAULT_LOGO_URL.to_string()),
        }
    }
}

impl PrintConfig {
    pub fn load(path: &Path) -> PrintResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PrintError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> PrintResult<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| PrintError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PrintResult<()> {
        if self.print_delay_ms > MAX_PRINT_DELAY_MS {
            return Err(PrintError::Config(format!(
                "print_delay_ms must be at most {MAX_PRINT_DELAY_MS}"
            )));
        }
        if self.redirect_after_print && self.redirect_base_url.trim().is_empty() {
            return Err(PrintError::Config(
                "redirect_base_url cannot be empty when redirect_after_print is set".into(),
            ));
        }
        Ok(())
    }

    pub fn print_delay(&self) -> Duration {
        Duration::from_millis(self.print_delay_ms)
    }

    pub fn font_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.font_ready_timeout_ms)
    }

    pub fn paper_width(&self) -> PaperWidth {
        PaperWidth::from_mm(self.paper_width_mm)
    }

    pub fn output_dir_or_default(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cropsync-receipts"))
    }
}

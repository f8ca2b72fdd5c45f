//! Print hosts for rendered advisory receipts.
//!
//! [`open_receipt_page`] writes the HTML receipt to an artifact file and
//! opens it in the system browser; the page then runs its own font wait,
//! delayed print and post-print redirect. [`ThermalHost`] pushes the ESC/POS
//! byte stream straight to a printer device node or a raw CUPS queue and
//! navigates through the system browser for the redirect.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use base64::Engine as _;
use chrono::Utc;
use image::imageops::FilterType;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{PrintError, PrintResult};
use crate::escpos::{EscPosBuilder, PaperWidth};
use crate::print_lifecycle::{PrintHost, PrintOutcome};
use crate::receipt_renderer::{EscPosRender, LayoutConfig, RenderWarning};

const LOGO_FETCH_TIMEOUT: Duration = Duration::from_secs(8);
const LOGO_MAX_HEIGHT_DOTS: u32 = 220;
const LOGO_LUMA_THRESHOLD: u8 = 160;

// ---------------------------------------------------------------------------
// HTML artifacts
// ---------------------------------------------------------------------------

fn sanitize_file_component(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "receipt".to_string()
    } else {
        cleaned
    }
}

/// Write the receipt HTML under `output_dir` and return its path.
pub fn write_receipt_html_file(
    output_dir: &Path,
    receipt_id: &str,
    html: &str,
) -> PrintResult<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let filename = format!(
        "advisory_{}_{timestamp}.html",
        sanitize_file_component(receipt_id)
    );
    let file_path = output_dir.join(filename);
    fs::write(&file_path, html)?;
    Ok(file_path)
}

async fn open_in_browser(target: String) -> PrintResult<()> {
    tokio::task::spawn_blocking(move || webbrowser::open(&target))
        .await
        .map_err(|e| PrintError::Browser(format!("browser task failed: {e}")))?
        .map_err(|e| PrintError::Browser(e.to_string()))
}

// ---------------------------------------------------------------------------
// Browser page
// ---------------------------------------------------------------------------

/// Write the receipt page and hand it to the system browser. Printing and the
/// redirect happen inside the page, so success here only means it opened.
pub fn open_receipt_page(output_dir: &Path, receipt_id: &str, html: &str) -> PrintResult<PathBuf> {
    let path = write_receipt_html_file(output_dir, receipt_id, html)?;
    info!(path = %path.display(), "Receipt HTML written");
    webbrowser::open(&path.to_string_lossy()).map_err(|e| PrintError::Browser(e.to_string()))?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Thermal host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThermalTarget {
    /// Device node or file, e.g. `/dev/usb/lp0`.
    Device(PathBuf),
    /// Raw CUPS queue, submitted with `lp -o raw`.
    Queue(String),
}

#[derive(Debug, Clone)]
pub struct RawPrintResult {
    pub bytes_requested: usize,
    pub bytes_written: usize,
    pub target: String,
}

pub struct ThermalHost {
    target: ThermalTarget,
    bytes: Vec<u8>,
}

impl ThermalHost {
    pub fn new(target: ThermalTarget, render: EscPosRender) -> Self {
        for warning in &render.warnings {
            warn!(code = %warning.code, "{}", warning.message);
        }
        Self {
            target,
            bytes: render.bytes,
        }
    }

    async fn write_device(&self, path: &Path) -> PrintResult<RawPrintResult> {
        let mut device = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        device.write_all(&self.bytes).await?;
        device.flush().await?;
        Ok(RawPrintResult {
            bytes_requested: self.bytes.len(),
            bytes_written: self.bytes.len(),
            target: path.display().to_string(),
        })
    }

    /// Returns `None` when `lp` accepted the data without issuing a job id.
    async fn submit_queue(&self, queue: &str) -> PrintResult<Option<RawPrintResult>> {
        let mut child = tokio::process::Command::new("lp")
            .args(["-d", queue, "-o", "raw", "-t", "CropSync Advisory"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PrintError::Spooler(format!("spawn lp: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&self.bytes).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(PrintError::Spooler(format!(
                "lp exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.contains("request id") {
            return Ok(None);
        }
        Ok(Some(RawPrintResult {
            bytes_requested: self.bytes.len(),
            bytes_written: self.bytes.len(),
            target: queue.to_string(),
        }))
    }
}

impl PrintHost for ThermalHost {
    async fn print(&self) -> PrintResult<PrintOutcome> {
        let result = match &self.target {
            ThermalTarget::Device(path) => self.write_device(path).await?,
            ThermalTarget::Queue(queue) => match self.submit_queue(queue).await? {
                Some(result) => result,
                None => return Ok(PrintOutcome::Suppressed),
            },
        };
        info!(
            printer = %result.target,
            bytes = result.bytes_written,
            requested = result.bytes_requested,
            "Sent raw ESC/POS data to printer"
        );
        Ok(PrintOutcome::Completed)
    }

    async fn navigate(&self, url: &str) -> PrintResult<()> {
        open_in_browser(url.to_string()).await
    }
}

// ---------------------------------------------------------------------------
// Logo rasterization
// ---------------------------------------------------------------------------

fn parse_data_url_image(source: &str) -> Option<Vec<u8>> {
    let trimmed = source.trim();
    if !trimmed.starts_with("data:image/") {
        return None;
    }
    let (_, payload) = trimmed.split_once(',')?;
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .ok()
}

/// Load logo bytes from a data URL, an http(s) URL, or a local path.
///
/// Uses the blocking HTTP client; call it before entering the async runtime.
fn read_logo_source_bytes(source: &str) -> PrintResult<Vec<u8>> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(PrintError::Logo("logo source is empty".into()));
    }

    if let Some(bytes) = parse_data_url_image(trimmed) {
        return Ok(bytes);
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        let client = reqwest::blocking::Client::builder()
            .timeout(LOGO_FETCH_TIMEOUT)
            .build()
            .map_err(|e| PrintError::Logo(format!("logo HTTP client: {e}")))?;
        let response = client
            .get(trimmed)
            .send()
            .map_err(|e| PrintError::Logo(format!("logo fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PrintError::Logo(format!(
                "logo fetch failed with HTTP {}",
                response.status()
            )));
        }
        return response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|e| PrintError::Logo(format!("logo fetch bytes failed: {e}")));
    }

    let path_value = trimmed.trim_start_matches("file://");
    fs::read(path_value)
        .map_err(|e| PrintError::Logo(format!("logo file read failed ({path_value}): {e}")))
}

/// Threshold a logo to 1-bit and wrap it in a centred raster command.
pub fn rasterize_logo_to_escpos(image_bytes: &[u8], paper: PaperWidth) -> PrintResult<Vec<u8>> {
    let decoded =
        image::load_from_memory(image_bytes).map_err(|e| PrintError::Logo(format!("decode: {e}")))?;
    let gray = decoded.to_luma8();
    let (src_w, src_h) = gray.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(PrintError::Logo("image has invalid dimensions".into()));
    }

    let mut target_w = src_w.min(paper.dots()).max(1);
    let mut target_h = ((src_h as f32 * (target_w as f32 / src_w as f32)).round() as u32).max(1);
    if target_h > LOGO_MAX_HEIGHT_DOTS {
        target_h = LOGO_MAX_HEIGHT_DOTS;
        target_w = ((src_w as f32 * (target_h as f32 / src_h as f32)).round() as u32).max(1);
    }

    let resized = if target_w != src_w || target_h != src_h {
        image::imageops::resize(&gray, target_w, target_h, FilterType::Triangle)
    } else {
        gray
    };

    let width = resized.width();
    let height = resized.height();
    let width_bytes = width.div_ceil(8);
    let mut packed = Vec::with_capacity((width_bytes * height) as usize);
    for y in 0..height {
        for xb in 0..width_bytes {
            let mut byte = 0u8;
            for bit in 0..8u32 {
                let x = xb * 8 + bit;
                if x < width && resized.get_pixel(x, y).0[0] < LOGO_LUMA_THRESHOLD {
                    byte |= 0x80 >> bit;
                }
            }
            packed.push(byte);
        }
    }

    let mut builder = EscPosBuilder::new().with_paper(paper);
    builder
        .center()
        .raster_image(width_bytes as u16, height as u16, &packed)
        .lf()
        .left();
    Ok(builder.build())
}

/// Splice the configured logo in after the ESC @ reset. A logo that cannot
/// be loaded leaves the text header and records a warning.
pub fn attach_logo(render: &mut EscPosRender, layout: &LayoutConfig) {
    if !layout.show_logo {
        return;
    }
    let Some(source) = layout
        .logo_url
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return;
    };

    let prefix = read_logo_source_bytes(source)
        .and_then(|bytes| rasterize_logo_to_escpos(&bytes, layout.paper_width));
    match prefix {
        Ok(prefix) => {
            let split = if render.bytes.starts_with(&[0x1B, 0x40]) {
                2
            } else {
                0
            };
            let mut combined = Vec::with_capacity(render.bytes.len() + prefix.len());
            combined.extend_from_slice(&render.bytes[..split]);
            combined.extend_from_slice(&prefix);
            combined.extend_from_slice(&render.bytes[split..]);
            render.bytes = combined;
        }
        Err(error) => {
            render.warnings.push(RenderWarning {
                code: "logo_text_fallback".to_string(),
                message: format!("Logo rendering failed; using text header ({error})"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, _| Luma([if x % 2 == 0 { 0 } else { 255 }]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).expect("encode png");
        out.into_inner()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "advisory-print-test-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn plain_render() -> EscPosRender {
        EscPosRender {
            bytes: vec![0x1B, 0x40, b'A'],
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_parse_data_url_image_png() {
        let png = png_bytes(2, 2);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let parsed = parse_data_url_image(&format!("data:image/png;base64,{encoded}"));
        assert_eq!(parsed, Some(png));
        assert_eq!(parse_data_url_image("https://example.com/logo.png"), None);
    }

    #[test]
    fn test_rasterize_packs_alternating_columns() {
        let bytes = rasterize_logo_to_escpos(&png_bytes(8, 2), PaperWidth::Mm80).expect("raster");
        // ESC a 1, GS v 0 header (8 bytes), 2 rows of 1 byte, LF, ESC a 0
        let header_at = 3;
        assert_eq!(&bytes[header_at..header_at + 4], &[0x1D, 0x76, 0x30, 0x00]);
        assert_eq!(&bytes[header_at + 4..header_at + 8], &[1, 0, 2, 0]);
        assert_eq!(&bytes[header_at + 8..header_at + 10], &[0xAA, 0xAA]);
    }

    #[test]
    fn test_rasterize_scales_to_paper_width() {
        let bytes = rasterize_logo_to_escpos(&png_bytes(1000, 10), PaperWidth::Mm58).expect("raster");
        // 384 dots wide -> 48 bytes per row
        assert_eq!(&bytes[7..9], &[48, 0]);
    }

    #[test]
    fn test_attach_logo_inserts_after_reset() {
        let png = png_bytes(8, 1);
        let layout = LayoutConfig {
            logo_url: Some(format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(&png)
            )),
            ..LayoutConfig::default()
        };
        let mut render = plain_render();
        attach_logo(&mut render, &layout);
        assert!(render.warnings.is_empty());
        assert_eq!(&render.bytes[..2], &[0x1B, 0x40]);
        assert_eq!(&render.bytes[2..5], &[0x1B, 0x61, 1]);
        assert_eq!(render.bytes.last(), Some(&b'A'));
    }

    #[test]
    fn test_attach_logo_failure_warns_and_keeps_bytes() {
        let layout = LayoutConfig {
            logo_url: Some("/nonexistent/cropsync/logo.png".to_string()),
            ..LayoutConfig::default()
        };
        let mut render = plain_render();
        attach_logo(&mut render, &layout);
        assert_eq!(render.bytes, vec![0x1B, 0x40, b'A']);
        assert!(render
            .warnings
            .iter()
            .any(|w| w.code == "logo_text_fallback"));
    }

    #[test]
    fn test_write_receipt_html_file_sanitizes_name() {
        let dir = scratch_dir("html");
        let path = write_receipt_html_file(&dir, "ADV-1/../x", "<html></html>").expect("write");
        let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
        assert!(name.starts_with("advisory_ADV-1____x_"));
        assert!(name.ends_with(".html"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "<html></html>");
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_thermal_host_writes_device_file() {
        let dir = scratch_dir("device");
        fs::create_dir_all(&dir).expect("create dir");
        let device = dir.join("lp0");
        let host = ThermalHost::new(ThermalTarget::Device(device.clone()), plain_render());
        let outcome = host.print().await.expect("print");
        assert_eq!(outcome, PrintOutcome::Completed);
        assert_eq!(fs::read(&device).expect("read device"), vec![0x1B, 0x40, b'A']);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_thermal_host_missing_device_is_error() {
        let host = ThermalHost::new(
            ThermalTarget::Device(PathBuf::from("/nonexistent/cropsync/lp0")),
            plain_render(),
        );
        assert!(host.print().await.is_err());
    }
}

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::advisory::{AdvisoryReceipt, TreatmentComponent};
use crate::config::{OutputKind, PrintConfig};
use crate::escpos::{self, EscPosBuilder, PaperWidth};

/// Asia/Kolkata, no daylight saving.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub paper_width: PaperWidth,
    pub organization_name: String,
    pub tagline: String,
    pub contact_line: String,
    pub footer_text: String,
    pub show_logo: bool,
    pub logo_url: Option<String>,
    pub show_manual_print_control: bool,
    /// Embed the print lifecycle in the page so the browser prints on its own.
    pub page_print: Option<PagePrintLifecycle>,
}

/// Timings and redirect target for the print lifecycle the HTML page runs
/// itself: bounded font wait, settle delay, one automatic `window.print()`,
/// then a single redirect once the browser reports `afterprint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePrintLifecycle {
    pub font_ready_timeout_ms: u64,
    pub print_delay_ms: u64,
    /// `None` disables the post-print redirect.
    pub redirect_base_url: Option<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            paper_width: PaperWidth::Mm80,
            organization_name: "CropSync".to_string(),
            tagline: "Smart Agricultural Solutions".to_string(),
            contact_line: "www.cropsync.in | Tel: +91-9182867605".to_string(),
            footer_text: "Thank You for Using CropSync".to_string(),
            show_logo: true,
            logo_url: Some(crate::config::DEFAULT_LOGO_URL.to_string()),
            show_manual_print_control: true,
            page_print: None,
        }
    }
}

impl LayoutConfig {
    pub fn from_print_config(config: &PrintConfig) -> Self {
        Self {
            paper_width: config.paper_width(),
            show_logo: config.show_logo,
            logo_url: config.logo_url.clone(),
            page_print: (config.output == OutputKind::Browser).then(|| PagePrintLifecycle {
                font_ready_timeout_ms: config.font_ready_timeout_ms,
                print_delay_ms: config.print_delay_ms,
                redirect_base_url: config
                    .redirect_after_print
                    .then(|| config.redirect_base_url.clone()),
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderWarning {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct EscPosRender {
    pub bytes: Vec<u8>,
    pub warnings: Vec<RenderWarning>,
}

/// `dd/mm/yyyy, h:mm:ss am` in Indian Standard Time.
pub fn format_ist(timestamp: DateTime<Utc>) -> String {
    let ist = FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    timestamp
        .with_timezone(&ist)
        .format("%d/%m/%Y, %-I:%M:%S %P")
        .to_string()
}

fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut line = String::new();
    for token in text.split_whitespace() {
        if line.is_empty() {
            line.push_str(token);
            continue;
        }
        let next_len = line.chars().count() + 1 + token.chars().count();
        if next_len > width.max(8) {
            out.push(line);
            line = token.to_string();
        } else {
            line.push(' ');
            line.push_str(token);
        }
    }
    if !line.is_empty() {
        out.push(line);
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

fn html_shell(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="te">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<title>{}</title>
<style>
@page {{ size: 80mm auto; margin: 0; }}
body {{ margin: 0; background: #fff; color: #000; }}
.receipt {{ width: 80mm; box-sizing: border-box; padding: 4mm 3mm; font-family: Arial, sans-serif; font-size: 12px; }}
.center {{ text-align: center; }}
.logo {{ width: 40mm; max-width: 100%; }}
header h2 {{ margin: 2px 0; font-size: 16px; }}
.tag {{ margin: 0; font-size: 11px; }}
.title {{ text-align: center; margin: 8px 0; font-size: 15px; border-top: 1px dashed #000; border-bottom: 1px dashed #000; padding: 4px 0; }}
.row {{ margin: 2px 0; }}
h4 {{ margin: 8px 0 2px 0; font-size: 13px; border-bottom: 1px solid #000; }}
.te {{ font-family: "Noto Sans Telugu", "Gautami", sans-serif; }}
.block {{ margin: 4px 0; padding-bottom: 4px; border-bottom: 1px dotted #000; }}
footer {{ margin-top: 10px; text-align: center; border-top: 1px dashed #000; padding-top: 4px; }}
.print-btn {{ display: block; margin: 12px auto; padding: 6px 16px; }}
@media print {{ .no-print {{ display: none; }} }}
</style>
</head>
<body>{}</body>
</html>"#,
        esc(title),
        body
    )
}

/// JSON string literal that is safe inside a `<script>` element.
fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

fn page_print_script(receipt: &AdvisoryReceipt, lifecycle: &PagePrintLifecycle) -> String {
    let redirect = lifecycle
        .redirect_base_url
        .as_deref()
        .map(|base| js_string(&receipt.redirect_url(base)))
        .unwrap_or_else(|| "null".to_string());
    format!(
        r#"<script>
(function () {{
  var fontCeilingMs = {font_ms};
  var printDelayMs = {delay_ms};
  var redirectUrl = {redirect};
  var started = false;
  var redirected = false;
  function fontsReady() {{
    var ready = document.fonts && document.fonts.ready ? document.fonts.ready : Promise.resolve();
    var ceiling = new Promise(function (resolve) {{ setTimeout(resolve, fontCeilingMs); }});
    return Promise.race([ready, ceiling]);
  }}
  function invokePrint() {{
    try {{ window.print(); }} catch (e) {{ console.warn("automatic print blocked", e); }}
  }}
  window.addEventListener("afterprint", function () {{
    if (!redirectUrl || redirected) return;
    redirected = true;
    window.location.href = redirectUrl;
  }});
  window.addEventListener("load", function () {{
    if (started) return;
    started = true;
    fontsReady().then(function () {{ setTimeout(invokePrint, printDelayMs); }});
  }});
}})();
</script>"#,
        font_ms = lifecycle.font_ready_timeout_ms,
        delay_ms = lifecycle.print_delay_ms,
    )
}

fn push_lines_html(body: &mut String, heading: &str, lines: &[&str]) {
    if lines.is_empty() {
        return;
    }
    body.push_str(&format!("<h4>{}</h4><div class=\"te\">", esc(heading)));
    for line in lines {
        body.push_str(&format!("<div>{}</div>", esc(line)));
    }
    body.push_str("</div>");
}

fn push_component_html(body: &mut String, component: &TreatmentComponent) {
    body.push_str("<div class=\"block\">");
    body.push_str(&format!("<div><b>{}</b></div>", esc(component.type_label())));
    body.push_str(&format!(
        "<div><b>Name:</b> <span class=\"te\">{}</span></div>",
        esc(&component.component_name_te)
    ));
    for (label, value) in [
        ("Dose", component.dose()),
        ("Method", component.application_method()),
        ("Note", component.note()),
    ] {
        if let Some(value) = value {
            body.push_str(&format!(
                "<div><b>{label}:</b> <span class=\"te\">{}</span></div>",
                esc(value)
            ));
        }
    }
    body.push_str("</div>");
}

/// Render the 80mm HTML receipt. The footer is stamped with
/// `receipt.generated_at`.
pub fn render_html(receipt: &AdvisoryReceipt, cfg: &LayoutConfig) -> String {
    let mut body = String::from("<div class=\"receipt\"><header class=\"center\">");
    if cfg.show_logo {
        if let Some(logo) = cfg
            .logo_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            body.push_str(&format!(
                "<img alt=\"{} Logo\" src=\"{}\" class=\"logo\"/>",
                esc(&cfg.organization_name),
                esc(logo)
            ));
        }
    }
    body.push_str(&format!(
        "<h2>{}</h2><p class=\"tag\">{}</p><small>{}</small></header>",
        esc(&cfg.organization_name),
        esc(&cfg.tagline),
        esc(&cfg.contact_line)
    ));

    body.push_str(&format!(
        "<h3 class=\"title te\">{}</h3>",
        esc(receipt.title())
    ));
    body.push_str(&format!(
        "<p class=\"row\"><strong>Category:</strong> {}</p>\
         <p class=\"row\"><strong>Stage:</strong> {}</p>",
        esc(&receipt.category),
        esc(&receipt.stage)
    ));

    push_lines_html(&mut body, "Symptoms", &receipt.symptom_lines());
    push_lines_html(&mut body, "Advisory", &receipt.advisory_lines());

    if !receipt.components.is_empty() {
        body.push_str("<h4>Treatment</h4>");
        for component in &receipt.components {
            push_component_html(&mut body, component);
        }
    }

    body.push_str(&format!(
        "<footer><small>Receipt ID: {}</small><br/><small>Date: {} IST</small><br/>\
         <small>{}</small></footer>",
        esc(&receipt.receipt_id),
        format_ist(receipt.generated_at),
        esc(&cfg.footer_text)
    ));
    if cfg.show_manual_print_control {
        body.push_str(
            "<button type=\"button\" class=\"print-btn no-print\" \
             onclick=\"window.print()\">Print</button>",
        );
    }
    body.push_str("</div>");
    if let Some(lifecycle) = &cfg.page_print {
        body.push_str(&page_print_script(receipt, lifecycle));
    }
    html_shell(receipt.title(), &body)
}

fn emit_pair(builder: &mut EscPosBuilder, label: &str, value: &str, width: usize) {
    let label_len = label.chars().count();
    let value_len = value.chars().count();
    if label_len + value_len < width {
        builder.line_pair(label, value);
        return;
    }
    builder.text(label).lf();
    builder.right();
    emit_wrapped(builder, value, width);
    builder.left();
}

fn emit_wrapped(builder: &mut EscPosBuilder, text: &str, width: usize) {
    for line in wrap(text, width) {
        builder.text(&line).lf();
    }
}

fn emit_labeled(builder: &mut EscPosBuilder, label: &str, value: &str, width: usize) {
    emit_wrapped(builder, &format!("{label}: {value}"), width);
}

fn emit_section_header(builder: &mut EscPosBuilder, title: &str) {
    builder.separator();
    builder.bold(true).text(title).lf().bold(false);
}

/// Title for a code page that cannot carry Telugu: fall back to English.
fn printable_title(receipt: &AdvisoryReceipt) -> &str {
    let title = receipt.title();
    if escpos::is_printable(title) {
        return title;
    }
    let english = receipt.problem_name_en.trim();
    if !english.is_empty() && escpos::is_printable(english) {
        english
    } else {
        title
    }
}

/// Render the receipt as an ESC/POS byte stream for a thermal printer.
pub fn render_escpos(receipt: &AdvisoryReceipt, cfg: &LayoutConfig) -> EscPosRender {
    let width = cfg.paper_width.chars();
    let mut warnings = Vec::new();
    let mut builder = EscPosBuilder::new().with_paper(cfg.paper_width);
    builder.init().code_page(0);

    builder
        .center()
        .bold(true)
        .double_height()
        .text(&cfg.organization_name)
        .lf()
        .normal_size()
        .bold(false);
    emit_wrapped(&mut builder, &cfg.tagline, width);
    emit_wrapped(&mut builder, &cfg.contact_line, width);
    builder.left().separator();

    builder.center().bold(true);
    emit_wrapped(&mut builder, printable_title(receipt), width);
    builder.bold(false).left();
    builder.separator();

    emit_pair(&mut builder, "Category", &receipt.category, width);
    emit_pair(&mut builder, "Stage", &receipt.stage, width);

    for (heading, lines) in [
        ("SYMPTOMS", receipt.symptom_lines()),
        ("ADVISORY", receipt.advisory_lines()),
    ] {
        if lines.is_empty() {
            continue;
        }
        emit_section_header(&mut builder, heading);
        for line in lines {
            emit_wrapped(&mut builder, line, width);
        }
    }

    if !receipt.components.is_empty() {
        emit_section_header(&mut builder, "TREATMENT");
        for (index, component) in receipt.components.iter().enumerate() {
            if index > 0 {
                builder.lf();
            }
            builder.bold(true);
            emit_wrapped(&mut builder, component.type_label(), width);
            builder.bold(false);
            emit_labeled(&mut builder, "Name", &component.component_name_te, width);
            if let Some(dose) = component.dose() {
                emit_labeled(&mut builder, "Dose", dose, width);
            }
            if let Some(method) = component.application_method() {
                emit_labeled(&mut builder, "Method", method, width);
            }
            if let Some(note) = component.note() {
                emit_labeled(&mut builder, "Note", note, width);
            }
        }
    }

    builder.separator().center();
    emit_wrapped(&mut builder, &format!("Receipt ID: {}", receipt.receipt_id), width);
    emit_wrapped(
        &mut builder,
        &format!("Date: {} IST", format_ist(receipt.generated_at)),
        width,
    );
    emit_wrapped(&mut builder, &cfg.footer_text, width);
    builder.left().feed(4).cut();

    let substituted = builder.substitutions();
    if substituted > 0 {
        warnings.push(RenderWarning {
            code: "non_ascii_text".to_string(),
            message: format!(
                "{substituted} characters cannot be printed in the printer code page"
            ),
        });
    }

    EscPosRender {
        bytes: builder.build(),
        warnings,
    }
}

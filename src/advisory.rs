use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PROBLEM_NAME_EN: &str = "Advisory";
pub const DEFAULT_CATEGORY: &str = "-";
pub const DEFAULT_STAGE: &str = "-";
pub const DEFAULT_STAGE_ID: &str = "3";
pub const RECEIPT_ID_PREFIX: &str = "ADV-";
pub const DEFAULT_REDIRECT_BASE: &str = "https://app.cropsync.in/view_problems_by_stage.php";

/// Missing and `null` both land on `T::default()`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One recommended input (fungicide, fertilizer, ...) in the treatment list.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TreatmentComponent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub component_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub component_name_te: String,
    #[serde(default)]
    pub dose_te: Option<String>,
    #[serde(default)]
    pub application_method_te: Option<String>,
    #[serde(default)]
    pub notes_te: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl TreatmentComponent {
    /// Type label, `-` when the record carries none.
    pub fn type_label(&self) -> &str {
        if self.component_type.is_empty() {
            "-"
        } else {
            &self.component_type
        }
    }

    pub fn dose(&self) -> Option<&str> {
        non_empty(self.dose_te.as_deref())
    }

    pub fn application_method(&self) -> Option<&str> {
        non_empty(self.application_method_te.as_deref())
    }

    pub fn note(&self) -> Option<&str> {
        non_empty(self.notes_te.as_deref())
    }
}

/// Advisory decoded from a page URL. Built once, read-only afterwards.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdvisoryReceipt {
    pub problem_name_te: String,
    pub problem_name_en: String,
    pub category: String,
    pub stage: String,
    pub symptoms_te: String,
    pub notes_te: String,
    pub components: Vec<TreatmentComponent>,
    pub receipt_id: String,
    pub stage_id: String,
    pub generated_at: DateTime<Utc>,
}

impl AdvisoryReceipt {
    /// Receipt with every field at its default, stamped at `now`.
    pub fn empty_at(now: DateTime<Utc>) -> Self {
        Self {
            problem_name_te: String::new(),
            problem_name_en: DEFAULT_PROBLEM_NAME_EN.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            stage: DEFAULT_STAGE.to_string(),
            symptoms_te: String::new(),
            notes_te: String::new(),
            components: Vec::new(),
            receipt_id: generated_receipt_id(now),
            stage_id: DEFAULT_STAGE_ID.to_string(),
            generated_at: now,
        }
    }

    /// Display title: Telugu name when present, English otherwise.
    pub fn title(&self) -> &str {
        if self.problem_name_te.is_empty() {
            &self.problem_name_en
        } else {
            &self.problem_name_te
        }
    }

    pub fn symptom_lines(&self) -> Vec<&str> {
        split_lines(&self.symptoms_te)
    }

    pub fn advisory_lines(&self) -> Vec<&str> {
        split_lines(&self.notes_te)
    }

    /// Post-print navigation target for this receipt's stage.
    pub fn redirect_url(&self, base: &str) -> String {
        let separator = if base.contains('?') { '&' } else { '?' };
        format!(
            "{base}{separator}stage_id={}",
            urlencoding::encode(&self.stage_id)
        )
    }
}

/// `ADV-<epoch millis>`.
pub fn generated_receipt_id(now: DateTime<Utc>) -> String {
    format!("{RECEIPT_ID_PREFIX}{}", now.timestamp_millis().max(0))
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n').collect()
}

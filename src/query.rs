//! Page-URL decoding for advisory links.
//!
//! Every key is read the way a browser's `URLSearchParams.get` would, then
//! percent-decoded a second time because the advisory links are generated
//! with double encoding. Nothing here fails: malformed input degrades to the
//! raw value, an empty component list, or the field default.

use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::debug;

use crate::advisory::{
    generated_receipt_id, AdvisoryReceipt, TreatmentComponent, DEFAULT_CATEGORY,
    DEFAULT_PROBLEM_NAME_EN, DEFAULT_STAGE, DEFAULT_STAGE_ID,
};

pub const KEY_PROBLEM_NAME_TE: &str = "problem_name_te";
pub const KEY_PROBLEM_NAME_EN: &str = "problem_name_en";
pub const KEY_CATEGORY: &str = "category";
pub const KEY_STAGE: &str = "stage";
pub const KEY_SYMPTOMS_TE: &str = "symptoms_te";
pub const KEY_NOTES_TE: &str = "notes_te";
pub const KEY_COMPONENTS: &str = "components";
pub const KEY_RECEIPT_ID: &str = "receipt_id";
pub const KEY_STAGE_ID: &str = "stage_id";

/// Form-decoded query pairs of one page URL, in document order.
#[derive(Debug, Clone, Default)]
pub struct QueryParameterDecoder {
    pairs: Vec<(String, String)>,
}

impl QueryParameterDecoder {
    /// Accepts an absolute URL, `?a=b`, or a bare `a=b` query string.
    pub fn from_page_url(page_url: &str) -> Self {
        let trimmed = page_url.trim();
        let parsed = Url::parse(trimmed).or_else(|_| {
            let query = trimmed.trim_start_matches('?');
            Url::parse(&format!("http://localhost/?{query}"))
        });
        let pairs = match parsed {
            Ok(url) => url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            Err(error) => {
                debug!(error = %error, "Page URL has no readable query string");
                Vec::new()
            }
        };
        Self { pairs }
    }

    /// First value for `key`, if the key is present at all.
    pub fn read_query(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn text_or(&self, key: &str, default: &str) -> String {
        let decoded = safe_decode(self.read_query(key));
        if decoded.is_empty() {
            default.to_string()
        } else {
            decoded
        }
    }

    /// Build the receipt, stamping generated values with `now`.
    pub fn decode_receipt_at(&self, now: DateTime<Utc>) -> AdvisoryReceipt {
        let receipt_id = safe_decode(self.read_query(KEY_RECEIPT_ID));
        AdvisoryReceipt {
            problem_name_te: self.text_or(KEY_PROBLEM_NAME_TE, ""),
            problem_name_en: self.text_or(KEY_PROBLEM_NAME_EN, DEFAULT_PROBLEM_NAME_EN),
            category: self.text_or(KEY_CATEGORY, DEFAULT_CATEGORY),
            stage: self.text_or(KEY_STAGE, DEFAULT_STAGE),
            symptoms_te: self.text_or(KEY_SYMPTOMS_TE, ""),
            notes_te: self.text_or(KEY_NOTES_TE, ""),
            components: parse_components(self.read_query(KEY_COMPONENTS)),
            receipt_id: if receipt_id.is_empty() {
                generated_receipt_id(now)
            } else {
                receipt_id
            },
            stage_id: self.text_or(KEY_STAGE_ID, DEFAULT_STAGE_ID),
            generated_at: now,
        }
    }
}

/// Decode an advisory page URL into a receipt stamped with the current time.
pub fn decode_receipt(page_url: &str) -> AdvisoryReceipt {
    QueryParameterDecoder::from_page_url(page_url).decode_receipt_at(Utc::now())
}

/// Percent-decode `value`; on any decoding error return it unchanged.
pub fn safe_decode(value: Option<&str>) -> String {
    let Some(raw) = value else {
        return String::new();
    };
    if has_malformed_escape(raw) {
        return raw.to_string();
    }
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// `%` must always be followed by two hex digits.
fn has_malformed_escape(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return true;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    false
}

/// Decode the `components` JSON array. Any failure yields an empty list.
pub fn parse_components(value: Option<&str>) -> Vec<TreatmentComponent> {
    let Some(raw) = value.filter(|v| !v.is_empty()) else {
        return Vec::new();
    };
    let decoded = safe_decode(Some(raw));
    match serde_json::from_str::<Vec<TreatmentComponent>>(&decoded) {
        Ok(components) => components,
        Err(error) => {
            debug!(error = %error, "Ignoring unreadable components parameter");
            Vec::new()
        }
    }
}

//! Decoding of a full Gmail message into the record the pipeline works with.
//!
//! The google_gmail1 types already decode base64url, so part bodies arrive
//! as raw bytes.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use google_gmail1::api::{Message, MessagePart};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::util::sha256_hex;

const HTML_TEXT_WIDTH: usize = 400;

lazy_static! {
    static ref STYLE_OR_SCRIPT: Regex =
        Regex::new(r"(?is)<(style|script)\b[^>]*>.*?</(style|script)\s*>").unwrap();
    static ref TRAILING_COMMENT: Regex = Regex::new(r"\s*\([^)]*\)\s*$").unwrap();
    static ref BLANK_LINES: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// One inbound email after decoding. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMessage {
    pub gmail_id: String,
    pub thread_id: String,
    /// RFC822 `Message-ID`, absent when the header is missing or blank.
    pub rfc822_message_id: Option<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub body_text: String,
    pub internal_date_ms: i64,
    pub labels: Vec<String>,
}

impl FetchedMessage {
    pub fn from_gmail_message(
        message: &Message,
        label_names: &HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let gmail_id = message
            .id
            .clone()
            .ok_or_else(|| anyhow!("Message has no id"))?;
        let payload = message
            .payload
            .as_ref()
            .ok_or_else(|| anyhow!("Message {} has no payload", gmail_id))?;

        let internal_date_ms = message.internal_date.unwrap_or_default();
        let header = |name: &str| get_header(payload, name).unwrap_or_default();

        let labels = message
            .label_ids
            .as_ref()
            .map(|ids| {
                ids.iter()
                    .map(|id| label_names.get(id).cloned().unwrap_or_else(|| id.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(FetchedMessage {
            thread_id: message.thread_id.clone().unwrap_or_default(),
            rfc822_message_id: get_header(payload, "Message-ID").filter(|id| !id.is_empty()),
            from: header("From"),
            to: header("To"),
            subject: header("Subject"),
            sent_at: resolve_sent_at(get_header(payload, "Date").as_deref(), internal_date_ms),
            body_text: extract_body_text(payload).trim().to_string(),
            internal_date_ms,
            labels,
            gmail_id,
        })
    }

    /// The stable identity string: the RFC822 id when present, else the provider id.
    pub fn identity(&self) -> &str {
        self.rfc822_message_id.as_deref().unwrap_or(&self.gmail_id)
    }

    pub fn identity_hash(&self) -> String {
        sha256_hex(self.identity())
    }

    pub fn raw_label(&self) -> String {
        self.labels.join(",")
    }
}

fn get_header(part: &MessagePart, name: &str) -> Option<String> {
    part.headers.as_ref().and_then(|headers| {
        headers
            .iter()
            .find(|h| {
                h.name
                    .as_ref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|h| h.value.as_ref())
            .map(|v| v.trim().to_string())
    })
}

/// Parses the `Date` header, falling back to the provider's internal clock.
fn resolve_sent_at(date_header: Option<&str>, internal_date_ms: i64) -> Option<DateTime<Utc>> {
    date_header
        .and_then(parse_date_header)
        .or_else(|| {
            if internal_date_ms > 0 {
                DateTime::from_timestamp_millis(internal_date_ms)
            } else {
                None
            }
        })
}

fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc2822(&TRAILING_COMMENT.replace(value, "")))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn mime_type(part: &MessagePart) -> String {
    part.mime_type
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn is_attachment(part: &MessagePart) -> bool {
    part.filename.as_ref().is_some_and(|f| !f.is_empty())
}

fn decoded_body(part: &MessagePart) -> String {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_ref())
        .map(|data| String::from_utf8_lossy(data).to_string())
        .unwrap_or_default()
}

fn child_parts(part: &MessagePart) -> &[MessagePart] {
    part.parts.as_deref().unwrap_or_default()
}

/// Walks the MIME tree. Plain text wins inside `multipart/alternative`,
/// HTML is stripped when it is the only rendition, and the parts of any
/// other multipart are joined with newlines.
fn extract_body_text(part: &MessagePart) -> String {
    if is_attachment(part) {
        return String::new();
    }

    let mime = mime_type(part);
    match mime.as_str() {
        "text/plain" => decoded_body(part),
        "text/html" => strip_html(&decoded_body(part)),
        "multipart/alternative" => {
            let children = child_parts(part);
            let preferred = children
                .iter()
                .find(|p| mime_type(p) == "text/plain" && !is_attachment(p))
                .map(decoded_body)
                .filter(|text| !text.trim().is_empty());

            preferred.unwrap_or_else(|| {
                children
                    .iter()
                    .map(extract_body_text)
                    .find(|text| !text.trim().is_empty())
                    .unwrap_or_default()
            })
        }
        _ => {
            let children = child_parts(part);
            if children.is_empty() {
                return String::new();
            }
            children
                .iter()
                .map(extract_body_text)
                .filter(|text| !text.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

pub fn strip_html(html: &str) -> String {
    let without_blocks = STYLE_OR_SCRIPT.replace_all(html, "");
    let text = html2text::from_read(without_blocks.as_bytes(), HTML_TEXT_WIDTH);
    BLANK_LINES.replace_all(text.trim(), "\n\n").to_string()
}

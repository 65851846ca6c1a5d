use indoc::indoc;
use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{
    db_core::prelude::*,
    normalize::{is_unknown, or_unknown},
    util::truncate_chars,
};

use super::chat_completions::{ExtractionEngine, ExtractionRequest};

pub const SYSTEM_PROMPT: &str = indoc! {r#"
    You are an assistant that reads one email and reports the state of the recipient's own job application.
    Respond with exactly one minified JSON object and nothing else, with these keys:
    {"is_application":boolean,"company":string,"role_title":string,"location":string,"status":"applied"|"assessment"|"interview"|"offer"|"rejected"|"other","next_action":string,"notes":string,"normalized_company":string,"normalized_role_title":string}

    Classification:
    - is_application is true only when the email is about the recipient's own candidacy: an application receipt, an assessment or coding test invitation, interview scheduling, an offer, or a rejection.
    - Newsletters, job alerts, event invitations, referral requests, marketing and general recruiting outreach are not applications.

    Status:
    - applied: the application was received or is under review.
    - assessment: the candidate must take a test, online assessment, take-home or coding challenge.
    - interview: an interview is requested, scheduled or confirmed.
    - offer: an offer is extended.
    - rejected: the candidate will not move forward.
    - other: anything else about the application.

    Extraction:
    - Prefer the company and role named in the subject line.
    - Ignore job titles that only appear in a sender's signature.
    - location is the job's location, not the sender's office. Use "Remote" for remote roles.
    - next_action is the single next thing the candidate should do, in a short phrase.
    - notes is one short sentence with any detail worth keeping (dates, links to portals, deadlines).
    - Every string must be non-empty. Use "(unknown)" when a value is missing.

    Normalization:
    - normalized_company: lowercase company name without legal suffixes, e.g. "Google LLC" becomes "google".
    - normalized_role_title: lowercase role title without seasons, years or program wording, e.g. "Software Engineering Intern, Summer 2026" becomes "software engineer intern".

    When is_application is false, set every string to "(unknown)" and status to "other"."#};

lazy_static! {
    pub static ref APPLICATION_JSON_SCHEMA: serde_json::Value = json!({
        "type": "json_schema",
        "json_schema": {
            "name": "application_extraction",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "is_application": { "type": "boolean" },
                    "company": { "type": "string" },
                    "role_title": { "type": "string" },
                    "location": { "type": "string" },
                    "status": {
                        "type": "string",
                        "enum": ["applied", "assessment", "interview", "offer", "rejected", "other"]
                    },
                    "next_action": { "type": "string" },
                    "notes": { "type": "string" },
                    "normalized_company": { "type": "string" },
                    "normalized_role_title": { "type": "string" }
                },
                "required": [
                    "is_application", "company", "role_title", "location", "status",
                    "next_action", "notes", "normalized_company", "normalized_role_title"
                ],
                "additionalProperties": false
            }
        }
    });
}

pub fn user_prompt(subject: &str, from: &str, body: &str) -> String {
    format!(
        r#"Report the job application state described by the following email.
                <subject>{}</subject>
                <from>{}</from>
                <body>{}</body>"#,
        subject, from, body
    )
}

fn unknown_if_blank<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(or_unknown(&value))
}

fn absent_if_unknown<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| !is_unknown(v))
        .map(|v| v.trim().to_string()))
}

/// Validated engine output for one email. String fields are never empty;
/// missing data is carried as `(unknown)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionResult {
    pub is_application: bool,
    #[serde(deserialize_with = "unknown_if_blank")]
    pub company: String,
    #[serde(deserialize_with = "unknown_if_blank")]
    pub role_title: String,
    #[serde(deserialize_with = "unknown_if_blank")]
    pub location: String,
    pub status: ApplicationStatus,
    #[serde(deserialize_with = "unknown_if_blank")]
    pub next_action: String,
    #[serde(deserialize_with = "unknown_if_blank")]
    pub notes: String,
    #[serde(default, deserialize_with = "absent_if_unknown")]
    pub normalized_company: Option<String>,
    #[serde(default, deserialize_with = "absent_if_unknown")]
    pub normalized_role_title: Option<String>,
}

/// Removes a Markdown code fence the model sometimes wraps around the object.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

pub fn parse_extraction(content: &str) -> Result<ExtractionResult, serde_json::Error> {
    serde_json::from_str::<ExtractionResult>(strip_code_fence(content))
}

/// Adapter around an [`ExtractionEngine`]. Every failure becomes `None`.
#[derive(Clone)]
pub struct Extractor {
    engine: Arc<dyn ExtractionEngine>,
    max_body_chars: usize,
    strict_schema: bool,
}

impl Extractor {
    pub fn new(
        engine: Arc<dyn ExtractionEngine>,
        max_body_chars: usize,
        strict_schema: bool,
    ) -> Self {
        Self {
            engine,
            max_body_chars,
            strict_schema,
        }
    }

    pub fn request_for(&self, email: &email::Model) -> ExtractionRequest {
        let body = truncate_chars(&email.body_text, self.max_body_chars);
        ExtractionRequest {
            system: SYSTEM_PROMPT.to_string(),
            user_content: user_prompt(&email.subject, &email.from_addr, body),
            response_format: self
                .strict_schema
                .then(|| APPLICATION_JSON_SCHEMA.clone()),
        }
    }

    pub async fn extract(&self, email: &email::Model) -> Option<ExtractionResult> {
        let request = self.request_for(email);
        let content = match self.engine.generate(&request).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Extraction call failed for email {}: {}", email.id, e);
                return None;
            }
        };

        match parse_extraction(&content) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(
                    "Rejected extraction for email {}: {} (content: {})",
                    email.id,
                    e,
                    truncate_chars(&content, 200)
                );
                None
            }
        }
    }
}

//! Canonicalization of human-written company, role and location strings.
//!
//! The normalized company/role pair is the merge key for an application, so
//! every function here is total and deterministic: no input fails, and the
//! result is never empty (`(unknown)` stands in for nothing usable).

use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

pub const UNKNOWN: &str = "(unknown)";

const ROLE_STOPWORDS: &[&str] = &[
    "internship",
    "program",
    "summer",
    "fall",
    "autumn",
    "spring",
    "winter",
    "season",
    "seasonal",
];

const ROLE_SYNONYMS: &[(&str, &str)] = &[
    ("internship", "intern"),
    ("internships", "intern"),
    ("interns", "intern"),
    ("swe", "software engineer"),
    ("engineering", "engineer"),
];

const REMOTE_SYNONYMS: &[&str] = &[
    "remote",
    "virtual",
    "us remote",
    "remote us",
    "remote - us",
    "remote, us",
    "remote (us)",
    "us (remote)",
    "usa (remote)",
    "united states (remote)",
    "remote - united states",
    "remote (united states)",
    "fully remote",
];

lazy_static! {
    static ref LEGAL_SUFFIX: Regex =
        Regex::new(r"\b(inc|llc|corp|co|ltd|plc|corporation|company)\b\.?").unwrap();
    static ref NON_COMPANY_CHARS: Regex = Regex::new(r"[^a-z0-9&\s]").unwrap();
    static ref NON_ALNUM: Regex = Regex::new(r"[^a-z0-9\s]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

fn or_unknown_if_empty(s: String) -> String {
    if s.is_empty() {
        UNKNOWN.to_string()
    } else {
        s
    }
}

/// Trimmed display value, or the sentinel when there is nothing to show.
pub fn or_unknown(raw: &str) -> String {
    or_unknown_if_empty(raw.trim().to_string())
}

/// True for blank strings and the sentinel itself.
pub fn is_unknown(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN)
}

pub fn norm_company(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let without_suffix = LEGAL_SUFFIX.replace_all(&lowered, " ");
    let cleaned = NON_COMPANY_CHARS.replace_all(&without_suffix, " ");
    or_unknown_if_empty(collapse_whitespace(&cleaned))
}

fn is_year_token(token: &str) -> bool {
    token.len() == 4 && token.starts_with("20") && token.bytes().all(|b| b.is_ascii_digit())
}

pub fn norm_role(raw: &str) -> String {
    let folded: String = raw
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    let cleaned = NON_ALNUM.replace_all(&folded, " ");

    let mut words: Vec<&str> = cleaned
        .split_whitespace()
        .flat_map(|token| {
            ROLE_SYNONYMS
                .iter()
                .find(|(from, _)| *from == token)
                .map_or(token, |(_, to)| *to)
                .split(' ')
        })
        .filter(|word| !is_year_token(word) && !ROLE_STOPWORDS.contains(word))
        .collect();

    words.sort_unstable();
    words.dedup();

    or_unknown_if_empty(words.join(" "))
}

pub fn norm_location(raw: &str) -> String {
    let collapsed = collapse_whitespace(&raw.to_lowercase());
    if collapsed.is_empty() || collapsed == UNKNOWN {
        return UNKNOWN.to_string();
    }
    if REMOTE_SYNONYMS.contains(&collapsed.as_str()) {
        return "remote".to_string();
    }
    collapsed
}

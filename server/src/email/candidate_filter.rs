//! Cheap pre-filter deciding which stored emails are worth an extraction call.

use crate::db_core::prelude::*;

const KEYWORDS: &[&str] = &[
    "application",
    "applied",
    "assessment",
    "coding challenge",
    "interview",
    "status update",
    "thank you for applying",
    "we received your application",
    "oa",
    "take-home",
    "hackerrank",
];

/// Applicant tracking systems that send on behalf of employers.
const ATS_DOMAINS: &[&str] = &[
    "greenhouse",
    "lever",
    "workday",
    "smartrecruiters",
    "icims",
    "brassring",
];

pub fn is_candidate(email: &email::Model) -> bool {
    looks_like_candidate(&email.subject, &email.body_text, &email.from_addr)
}

pub fn looks_like_candidate(subject: &str, body: &str, from: &str) -> bool {
    let text = format!("{} {}", subject, body).to_lowercase();
    if KEYWORDS.iter().any(|keyword| text.contains(keyword)) {
        return true;
    }

    let domain = sender_domain(from).to_lowercase();
    ATS_DOMAINS.iter().any(|ats| domain.contains(ats))
}

/// Domain part of a `From` value such as `Jobs <no-reply@hire.lever.co>`.
/// Falls back to the whole value when no address can be found.
fn sender_domain(from: &str) -> &str {
    let address = match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from,
    };
    match address.rsplit_once('@') {
        Some((_, domain)) => domain.trim(),
        None => address.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_in_subject_or_body() {
        assert!(looks_like_candidate(
            "Thank you for applying to Software Engineer Intern at Google Inc.",
            "",
            "careers@google.com"
        ));
        assert!(looks_like_candidate(
            "Next steps",
            "Please complete the HackerRank by Friday",
            "talent@example.com"
        ));
        assert!(!looks_like_candidate(
            "Weekly digest",
            "Your top stories this week",
            "news@medium.com"
        ));
    }

    #[test]
    fn test_ats_sender_domain() {
        assert!(looks_like_candidate(
            "Hello from Acme",
            "Thanks!",
            "Acme Recruiting <no-reply@us.greenhouse-mail.io>"
        ));
        assert!(looks_like_candidate("Hi", "Thanks", "acme@myworkday.com"));
        assert!(!looks_like_candidate("Hi", "Thanks", "Lever Fan <fan@example.com>"));
    }

    #[test]
    fn test_sender_domain_extraction() {
        assert_eq!(sender_domain("Jobs <no-reply@hire.lever.co>"), "hire.lever.co");
        assert_eq!(sender_domain("plain@icims.com"), "icims.com");
        assert_eq!(sender_domain("no address"), "no address");
    }
}

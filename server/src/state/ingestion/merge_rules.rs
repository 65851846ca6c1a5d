//! Field-level merge rules for folding an extraction into an application row.

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db_core::prelude::*,
    normalize::{is_unknown, norm_company, norm_location, norm_role, or_unknown, UNKNOWN},
    prompt::application_extraction::ExtractionResult,
};

/// Whether the display company/role of an existing application may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Company and role keep the values of the first extraction.
    #[default]
    InsertOnly,
    /// Company and role follow any later non-blank value that differs.
    RefreshOnChange,
}

pub fn rank(status: ApplicationStatus) -> u8 {
    match status {
        ApplicationStatus::Other => 0,
        ApplicationStatus::Applied => 1,
        ApplicationStatus::Assessment => 2,
        ApplicationStatus::Interview => 3,
        ApplicationStatus::Offer => 4,
        ApplicationStatus::Rejected => 4,
    }
}

pub fn is_terminal(status: ApplicationStatus) -> bool {
    matches!(status, ApplicationStatus::Offer | ApplicationStatus::Rejected)
}

/// Status promotion lattice. Terminal signals always win, a terminal state is
/// never demoted by a non-terminal one, otherwise the higher rank wins and
/// ties keep the old value.
pub fn promote(old: Option<ApplicationStatus>, new: ApplicationStatus) -> ApplicationStatus {
    let Some(old) = old else {
        return new;
    };
    if is_terminal(new) {
        return new;
    }
    if is_terminal(old) {
        return old;
    }
    if rank(new) > rank(old) {
        new
    } else {
        old
    }
}

pub fn merge_notes(existing: &str, incoming: &str) -> String {
    if is_unknown(incoming) {
        return existing.to_string();
    }
    let incoming = incoming.trim();
    if is_unknown(existing) {
        return incoming.to_string();
    }
    if existing.contains(incoming) {
        return existing.to_string();
    }
    format!("{}\n{}", existing, incoming)
}

pub fn merge_location(existing: &str, incoming: &str) -> String {
    if norm_location(existing) == UNKNOWN && !is_unknown(incoming) {
        incoming.trim().to_string()
    } else {
        existing.to_string()
    }
}

/// The canonical key of an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationKey {
    pub user_id: Uuid,
    pub normalized_company: String,
    pub normalized_role_title: String,
}

impl ApplicationKey {
    /// Engine-supplied normalized values are preferred but always re-canonicalized.
    pub fn for_extraction(user_id: Uuid, result: &ExtractionResult) -> Self {
        let company = result
            .normalized_company
            .as_deref()
            .unwrap_or(&result.company);
        let role = result
            .normalized_role_title
            .as_deref()
            .unwrap_or(&result.role_title);
        Self {
            user_id,
            normalized_company: norm_company(company),
            normalized_role_title: norm_role(role),
        }
    }
}

pub fn new_application(
    key: &ApplicationKey,
    source_email_id: Uuid,
    result: &ExtractionResult,
    now: DateTime<FixedOffset>,
) -> application::ActiveModel {
    application::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(key.user_id),
        company: Set(or_unknown(&result.company)),
        role_title: Set(or_unknown(&result.role_title)),
        location: Set(or_unknown(&result.location)),
        normalized_company: Set(key.normalized_company.clone()),
        normalized_role_title: Set(key.normalized_role_title.clone()),
        status: Set(result.status),
        next_step: Set(or_unknown(&result.next_action)),
        notes: Set(or_unknown(&result.notes)),
        source_email_id: Set(Some(source_email_id)),
        is_application: Set(true),
        first_seen_at: Set(now),
        last_updated_at: Set(now),
    }
}

fn refreshed_identity(existing: &str, incoming: &str) -> Option<String> {
    let incoming = incoming.trim();
    if is_unknown(incoming) || incoming == existing {
        None
    } else {
        Some(incoming.to_string())
    }
}

/// Applies the merge rules to an existing row. Returns the changes to persist,
/// or `None` when nothing changed.
pub fn merge_into(
    existing: &application::Model,
    source_email_id: Uuid,
    result: &ExtractionResult,
    policy: IdentityPolicy,
    now: DateTime<FixedOffset>,
) -> Option<application::ActiveModel> {
    let mut active: application::ActiveModel = existing.clone().into();
    let mut dirty = false;

    let status = promote(Some(existing.status), result.status);
    if status != existing.status {
        active.status = Set(status);
        dirty = true;
    }

    if policy == IdentityPolicy::RefreshOnChange {
        if let Some(company) = refreshed_identity(&existing.company, &result.company) {
            active.company = Set(company);
            dirty = true;
        }
        if let Some(role_title) = refreshed_identity(&existing.role_title, &result.role_title) {
            active.role_title = Set(role_title);
            dirty = true;
        }
    }

    let location = merge_location(&existing.location, &result.location);
    if location != existing.location {
        active.location = Set(location);
        dirty = true;
    }

    let notes = merge_notes(&existing.notes, &result.notes);
    if notes != existing.notes {
        active.notes = Set(notes);
        dirty = true;
    }

    if !is_unknown(&result.next_action) {
        let next_step = result.next_action.trim();
        if next_step != existing.next_step {
            active.next_step = Set(next_step.to_string());
            dirty = true;
        }
    }

    if existing.source_email_id.is_none() {
        active.source_email_id = Set(Some(source_email_id));
        dirty = true;
    }

    if !existing.is_application {
        active.is_application = Set(true);
        dirty = true;
    }

    if !dirty {
        return None;
    }
    active.last_updated_at = Set(now);
    Some(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::extraction;
    use ApplicationStatus::*;

    const ALL: [ApplicationStatus; 6] = [Other, Applied, Assessment, Interview, Offer, Rejected];

    #[test]
    fn test_promote_table() {
        assert_eq!(promote(None, Other), Other);
        assert_eq!(promote(Some(Applied), Interview), Interview);
        assert_eq!(promote(Some(Interview), Applied), Interview);
        assert_eq!(promote(Some(Interview), Offer), Offer);
        assert_eq!(promote(Some(Offer), Interview), Offer);
        assert_eq!(promote(Some(Rejected), Applied), Rejected);
        assert_eq!(promote(Some(Offer), Rejected), Rejected);
        assert_eq!(promote(Some(Rejected), Offer), Offer);
        assert_eq!(promote(Some(Assessment), Assessment), Assessment);
        assert_eq!(promote(Some(Applied), Other), Applied);
    }

    #[test]
    fn test_promote_is_monotonic_over_sequences() {
        // Every sequence of length 4 over the six statuses.
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    for d in ALL {
                        let sequence = [a, b, c, d];
                        let mut current = None;
                        for status in sequence {
                            let next = promote(current, status);
                            if let Some(prev) = current {
                                if is_terminal(prev) && !is_terminal(status) {
                                    assert_eq!(next, prev, "terminal demoted in {sequence:?}");
                                }
                            }
                            current = Some(next);
                        }
                        let last = current.unwrap();
                        if !is_terminal(last) {
                            for status in sequence {
                                assert!(rank(last) >= rank(status), "regressed in {sequence:?}");
                            }
                        } else {
                            let last_terminal = sequence.iter().rev().find(|s| is_terminal(**s));
                            assert_eq!(Some(&last), last_terminal, "in {sequence:?}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_merge_notes() {
        assert_eq!(merge_notes("Applied via portal", ""), "Applied via portal");
        assert_eq!(merge_notes("Applied via portal", UNKNOWN), "Applied via portal");
        assert_eq!(merge_notes(UNKNOWN, "Interview Tuesday"), "Interview Tuesday");
        assert_eq!(merge_notes("Applied via portal", "via portal"), "Applied via portal");
        assert_eq!(
            merge_notes("Applied via portal", "Interview Tuesday"),
            "Applied via portal\nInterview Tuesday"
        );
    }

    #[test]
    fn test_merge_location_keeps_known_value() {
        assert_eq!(merge_location("New York, NY", "Remote"), "New York, NY");
        assert_eq!(merge_location(UNKNOWN, "Remote"), "Remote");
        assert_eq!(merge_location("", "Austin, TX"), "Austin, TX");
        assert_eq!(merge_location(UNKNOWN, UNKNOWN), UNKNOWN);
    }

    #[test]
    fn test_key_prefers_engine_normalization_but_recanonicalizes() {
        let user_id = Uuid::new_v4();
        let mut result = extraction("Google Inc.", "Software Engineer Intern", Applied);
        result.normalized_company = Some("Google, LLC".to_string());
        result.normalized_role_title = Some("intern software engineer".to_string());

        let key = ApplicationKey::for_extraction(user_id, &result);
        assert_eq!(key.normalized_company, "google");
        assert_eq!(key.normalized_role_title, "engineer intern software");

        result.normalized_company = None;
        result.normalized_role_title = None;
        assert_eq!(ApplicationKey::for_extraction(user_id, &result), key);
    }

    fn existing_row(status: ApplicationStatus) -> application::Model {
        let now = crate::util::now_fixed();
        application::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            company: "Google Inc.".to_string(),
            role_title: "Software Engineer Intern".to_string(),
            location: "Mountain View, CA".to_string(),
            normalized_company: "google".to_string(),
            normalized_role_title: "engineer intern software".to_string(),
            status,
            next_step: "Wait for recruiter".to_string(),
            notes: "Application received".to_string(),
            source_email_id: Some(Uuid::new_v4()),
            is_application: true,
            first_seen_at: now,
            last_updated_at: now,
        }
    }

    fn same_as_row(row: &application::Model) -> ExtractionResult {
        let mut result = extraction(&row.company, &row.role_title, row.status);
        result.location = row.location.clone();
        result.next_action = row.next_step.clone();
        result.notes = row.notes.clone();
        result
    }

    #[test]
    fn test_identical_extraction_is_not_dirty() {
        let row = existing_row(Interview);
        let result = same_as_row(&row);
        let now = crate::util::now_fixed();
        for policy in [IdentityPolicy::InsertOnly, IdentityPolicy::RefreshOnChange] {
            assert!(merge_into(&row, Uuid::new_v4(), &result, policy, now).is_none());
        }
    }

    #[test]
    fn test_stale_status_does_not_regress() {
        let row = existing_row(Interview);
        let mut result = same_as_row(&row);
        result.status = Applied;
        let now = crate::util::now_fixed();
        let merged = merge_into(&row, Uuid::new_v4(), &result, IdentityPolicy::InsertOnly, now);
        assert!(merged.is_none());
    }

    #[test]
    fn test_identity_fields_follow_policy() {
        let row = existing_row(Applied);
        let mut result = same_as_row(&row);
        result.company = "Google".to_string();
        result.role_title = "SWE Intern".to_string();
        let now = crate::util::now_fixed();

        let merged = merge_into(&row, Uuid::new_v4(), &result, IdentityPolicy::InsertOnly, now);
        assert!(merged.is_none());

        let merged =
            merge_into(&row, Uuid::new_v4(), &result, IdentityPolicy::RefreshOnChange, now)
                .unwrap();
        assert_eq!(merged.company, Set("Google".to_string()));
        assert_eq!(merged.role_title, Set("SWE Intern".to_string()));
        assert_eq!(merged.last_updated_at, Set(now));
    }

    #[test]
    fn test_unknown_next_action_does_not_clobber() {
        let row = existing_row(Applied);
        let mut result = same_as_row(&row);
        result.next_action = UNKNOWN.to_string();
        result.notes = UNKNOWN.to_string();
        let now = crate::util::now_fixed();
        let merged = merge_into(&row, Uuid::new_v4(), &result, IdentityPolicy::InsertOnly, now);
        assert!(merged.is_none());
    }

    #[test]
    fn test_source_email_is_backfilled() {
        let mut row = existing_row(Applied);
        row.source_email_id = None;
        let result = same_as_row(&row);
        let source = Uuid::new_v4();
        let now = crate::util::now_fixed();
        let merged = merge_into(&row, source, &result, IdentityPolicy::InsertOnly, now).unwrap();
        assert_eq!(merged.source_email_id, Set(Some(source)));
    }
}

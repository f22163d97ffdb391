//! Structural lint over tailored documents.
//!
//! Schema-compliance and safety checks that run alongside the metric
//! evaluation during VALIDATE. Issues are recorded with the run but do not
//! gate the pipeline — the thresholds in the evaluation report do.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use tailor_shared::{ChangeLogEntry, ResumeDocument};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\+?\d{1,3})?[\s-]?\(?\d{3}\)?[\s-]?\d{3}[\s-]?\d{4}\b")
        .expect("phone regex")
});

/// Maximum characters allowed in one achievement bullet.
const MAX_BULLET_LEN: usize = 500;

/// One lint finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub code: String,
    pub message: String,
}

impl LintIssue {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Run all structural checks over a tailored document and its change log.
pub fn check_document(
    document: &ResumeDocument,
    change_log: &[ChangeLogEntry],
    banned_claims: &[String],
) -> Vec<LintIssue> {
    let mut issues = Vec::new();

    if document.summary.is_empty() && document.experience.is_empty() && document.skills.is_empty() {
        issues.push(LintIssue::new(
            "EMPTY_RESUME",
            "tailored document has no content",
        ));
        return issues;
    }

    if document.summary.is_empty() {
        issues.push(LintIssue::new(
            "MISSING_SECTION",
            "required section 'summary' is missing",
        ));
    }
    if document.experience.is_empty() {
        issues.push(LintIssue::new(
            "MISSING_SECTION",
            "required section 'experience' is missing",
        ));
    }

    for (idx, role) in document.experience.iter().enumerate() {
        if role.achievements.is_empty() {
            issues.push(LintIssue::new(
                "EMPTY_ACHIEVEMENTS",
                format!("experience item {idx} has no achievements"),
            ));
        }
        for bullet in &role.achievements {
            if bullet.chars().count() > MAX_BULLET_LEN {
                issues.push(LintIssue::new(
                    "BULLET_TOO_LONG",
                    format!("achievement exceeds {MAX_BULLET_LEN} characters: {}", truncate(bullet)),
                ));
            }
            if !bullet.chars().any(|c| c.is_ascii_digit()) {
                issues.push(LintIssue::new(
                    "NO_METRIC",
                    format!("achievement lacks a metric: {}", truncate(bullet)),
                ));
            }
        }
    }

    if document.skills.is_empty() {
        issues.push(LintIssue::new("NO_SKILLS", "skills section is empty"));
    } else {
        let mut duplicates: Vec<String> = document
            .skills
            .iter()
            .filter(|skill| {
                document
                    .skills
                    .iter()
                    .filter(|other| other.eq_ignore_ascii_case(skill))
                    .count()
                    > 1
            })
            .map(|skill| skill.to_lowercase())
            .collect();
        duplicates.sort_unstable();
        duplicates.dedup();
        if !duplicates.is_empty() {
            issues.push(LintIssue::new(
                "DUPLICATE_SKILL",
                format!("duplicate skills detected: {duplicates:?}"),
            ));
        }
    }

    let textual = serde_json::to_string(document).unwrap_or_default();
    if EMAIL_RE.is_match(&textual) {
        issues.push(LintIssue::new(
            "PII_EMAIL",
            "email address detected in tailored document",
        ));
    }
    if PHONE_RE.is_match(&textual) {
        issues.push(LintIssue::new(
            "PII_PHONE",
            "phone number detected in tailored document",
        ));
    }

    for (idx, entry) in change_log.iter().enumerate() {
        if entry.kind.is_empty() || entry.detail.is_empty() {
            issues.push(LintIssue::new(
                "CHANGE_LOG_FORMAT",
                format!("change log entry {idx} missing type/detail"),
            ));
        }
        if entry.rationale.is_none() {
            issues.push(LintIssue::new(
                "CHANGE_LOG_RATIONALE",
                format!("change log entry {idx} missing rationale"),
            ));
        }
    }

    let lowered = textual.to_lowercase();
    for claim in banned_claims {
        if !claim.is_empty() && lowered.contains(&claim.to_lowercase()) {
            issues.push(LintIssue::new(
                "BANNED_CLAIM",
                format!("banned claim present: {claim}"),
            ));
        }
    }

    issues
}

fn truncate(bullet: &str) -> String {
    bullet.chars().take(50).collect()
}

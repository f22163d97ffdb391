//! Document schemas flowing between pipeline stages.
//!
//! These are the canonical shapes produced by the Parse capability and
//! consumed by embedding, retrieval, generation, and the evaluation engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Job description
// ---------------------------------------------------------------------------

/// Metadata extracted alongside a parsed job description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JdMeta {
    pub title: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub source: String,
}

/// A competency with the evidence phrases that would demonstrate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competency {
    pub name: String,
    #[serde(default)]
    pub evidence_indicators: Vec<String>,
}

/// Structured job description produced by the Parse stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescription {
    #[serde(default)]
    pub meta: JdMeta,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub competencies: Vec<Competency>,
    #[serde(default)]
    pub raw_text: String,
}

impl JobDescription {
    /// Coverage targets in original JD order: requirements, responsibilities,
    /// skills, then competency names and their evidence indicators.
    pub fn coverage_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        targets.extend(self.requirements.iter().map(String::as_str));
        targets.extend(self.responsibilities.iter().map(String::as_str));
        targets.extend(self.skills.iter().map(String::as_str));
        for competency in &self.competencies {
            if !competency.name.is_empty() {
                targets.push(&competency.name);
            }
            targets.extend(
                competency
                    .evidence_indicators
                    .iter()
                    .filter(|ind| !ind.is_empty())
                    .map(String::as_str),
            );
        }
        targets
    }
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

/// Metadata carried with a parsed resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// One role in the experience section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceRole {
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub achievements: Vec<String>,
}

/// A named project with a short description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Structured resume — both the parsed base resume and the tailored output
/// of the Generate stage use this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeDocument {
    #[serde(default)]
    pub meta: ResumeMeta,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub experience: Vec<ExperienceRole>,
    #[serde(default)]
    pub education: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub raw_text: String,
}

impl ResumeDocument {
    /// All experience bullets in document order.
    pub fn bullets(&self) -> impl Iterator<Item = &str> {
        self.experience
            .iter()
            .flat_map(|role| role.achievements.iter())
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Evidence / change log / skills
// ---------------------------------------------------------------------------

/// One ranked evidence snippet from the Retrieve stage.
///
/// Metadata is a `BTreeMap` so serialized chunks have a stable field order —
/// evaluation inputs must serialize deterministically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceChunk {
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One entry of the change log emitted by generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// A skill aggregated across input documents by the Parse stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMention {
    pub skill: String,
    /// Which documents mentioned it ("job", "base", validated-resume keys).
    pub sources: Vec<String>,
    pub frequency: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_jd() -> JobDescription {
        JobDescription {
            requirements: vec!["5+ years of data engineering".into()],
            responsibilities: vec!["Own the ingestion pipelines".into()],
            skills: vec!["Airflow".into()],
            competencies: vec![Competency {
                name: "Data governance".into(),
                evidence_indicators: vec!["Built governance dashboards".into()],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn coverage_targets_preserve_jd_order() {
        let jd = sample_jd();
        assert_eq!(
            jd.coverage_targets(),
            vec![
                "5+ years of data engineering",
                "Own the ingestion pipelines",
                "Airflow",
                "Data governance",
                "Built governance dashboards",
            ]
        );
    }

    #[test]
    fn bullets_flatten_in_document_order() {
        let resume = ResumeDocument {
            experience: vec![
                ExperienceRole {
                    title: "Engineer".into(),
                    achievements: vec!["Shipped A".into(), "Shipped B".into()],
                    ..Default::default()
                },
                ExperienceRole {
                    title: "Analyst".into(),
                    achievements: vec!["Modeled C".into()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let bullets: Vec<&str> = resume.bullets().collect();
        assert_eq!(bullets, vec!["Shipped A", "Shipped B", "Modeled C"]);
    }

    #[test]
    fn change_log_entry_uses_type_field_on_wire() {
        let entry = ChangeLogEntry {
            kind: "rewrite".into(),
            detail: "tightened summary".into(),
            rationale: Some("align with JD".into()),
        };
        let json = serde_json::to_string(&entry).expect("serialize");
        assert!(json.contains("\"type\":\"rewrite\""));
    }
}

//! Deterministic quality evaluation over tailored documents.
//!
//! [`evaluate`] is a pure function of (job description, document, evidence):
//! no I/O, no randomness, no clocks. Identical inputs produce byte-identical
//! reports — the orchestrator relies on that for gap-fill convergence checks
//! and the test suite for reproducibility.

pub mod lint;
pub mod text;

use std::collections::BTreeSet;

use tailor_shared::{
    EvaluationConfig, EvaluationReport, EvidenceChunk, JobDescription, ResumeDocument,
};

use crate::text::{approx_syllables, overlap_ratio, round2, round3, tokenize, tokenize_all};

/// Readability grade reported for documents with no scoreable text.
const EMPTY_TEXT_GRADE: f64 = 12.0;

/// Compute the quality report for a tailored document.
pub fn evaluate(
    jd: &JobDescription,
    document: &ResumeDocument,
    evidence: &[EvidenceChunk],
    config: &EvaluationConfig,
) -> EvaluationReport {
    let document_tokens = collect_document_tokens(document);

    let (jd_coverage, missing_coverage_targets) = coverage_score(jd, &document_tokens, config);
    let (ats_keyword_score, missing_ats_keywords) =
        ats_keyword_score(jd, &document_tokens, config);
    let hallucinations = hallucination_flags(jd, document, evidence, config);
    let consistency = consistency_score(document);
    let readability_grade_level = readability_grade(document);

    EvaluationReport {
        jd_coverage,
        missing_coverage_targets,
        ats_keyword_score,
        missing_ats_keywords,
        hallucinations,
        consistency,
        readability_grade_level,
    }
}

/// All salient document text as one token set: summary, experience bullets,
/// skills, and project names/descriptions.
fn collect_document_tokens(document: &ResumeDocument) -> BTreeSet<String> {
    let mut segments: Vec<&str> = vec![&document.summary];
    segments.extend(document.bullets());
    segments.extend(document.skills.iter().map(String::as_str));
    for project in &document.projects {
        segments.push(&project.name);
        segments.push(&project.description);
    }
    tokenize_all(&segments)
}

/// JD coverage: a target counts as covered when enough of its stemmed tokens
/// appear in the document. Missing targets keep original JD order.
fn coverage_score(
    jd: &JobDescription,
    document_tokens: &BTreeSet<String>,
    config: &EvaluationConfig,
) -> (f64, Vec<String>) {
    let targets = jd.coverage_targets();
    if targets.is_empty() {
        return (1.0, Vec::new());
    }

    let mut missing = Vec::new();
    let mut hits = 0usize;

    for target in &targets {
        let tokens = tokenize(target);
        if !tokens.is_empty()
            && overlap_ratio(&tokens, document_tokens) >= config.coverage_overlap_threshold
        {
            hits += 1;
        } else {
            missing.push((*target).to_string());
        }
    }

    (round3(hits as f64 / targets.len() as f64), missing)
}

/// ATS keyword score over JD skills, configured keywords, and competency
/// evidence indicators, in input order.
fn ats_keyword_score(
    jd: &JobDescription,
    document_tokens: &BTreeSet<String>,
    config: &EvaluationConfig,
) -> (f64, Vec<String>) {
    let mut keywords: Vec<&str> = Vec::new();
    keywords.extend(jd.skills.iter().map(String::as_str));
    keywords.extend(config.ats_keywords.iter().map(String::as_str));
    for competency in &jd.competencies {
        keywords.extend(competency.evidence_indicators.iter().map(String::as_str));
    }
    keywords.retain(|kw| !kw.trim().is_empty());

    if keywords.is_empty() {
        return (1.0, Vec::new());
    }

    let mut missing = Vec::new();
    let mut hits = 0usize;

    for keyword in &keywords {
        let tokens = tokenize(keyword);
        if !tokens.is_empty() && tokens.iter().all(|t| document_tokens.contains(t)) {
            hits += 1;
        } else {
            missing.push((*keyword).to_string());
        }
    }

    (round3(hits as f64 / keywords.len() as f64), missing)
}

/// Flag statements with no attributable evidence in the JD or the retrieval
/// context. A statement is attributable when its lowercased prefix appears
/// verbatim in some evidence text, or its token overlap with a single
/// evidence text clears the configured threshold.
fn hallucination_flags(
    jd: &JobDescription,
    document: &ResumeDocument,
    evidence: &[EvidenceChunk],
    config: &EvaluationConfig,
) -> Vec<String> {
    let mut evidence_texts: Vec<String> =
        evidence.iter().map(|chunk| chunk.text.to_lowercase()).collect();
    // The whole JD counts as evidence: claims restating the JD are not invented.
    evidence_texts.push(
        serde_json::to_string(jd)
            .unwrap_or_default()
            .to_lowercase(),
    );

    let evidence_tokens: Vec<BTreeSet<String>> =
        evidence_texts.iter().map(|text| tokenize(text)).collect();

    let mut flagged = Vec::new();
    for bullet in document.bullets() {
        let normalized = bullet.to_lowercase();
        let prefix: String = normalized.chars().take(config.evidence_prefix_len).collect();

        let by_prefix = evidence_texts.iter().any(|text| text.contains(&prefix));
        let attributable = by_prefix || {
            let bullet_tokens = tokenize(bullet);
            evidence_tokens.iter().any(|tokens| {
                overlap_ratio(&bullet_tokens, tokens) >= config.evidence_overlap_threshold
            })
        };

        if !attributable {
            flagged.push(bullet.to_string());
        }
    }
    flagged
}

/// Consistency of experience bullet lengths: 1 − coefficient of variation
/// over token counts, clamped to [0, 1]. Uniform lengths score 1.0.
fn consistency_score(document: &ResumeDocument) -> f64 {
    let lengths: Vec<usize> = document
        .bullets()
        .map(|bullet| bullet.split_whitespace().count())
        .collect();
    if lengths.is_empty() {
        return 0.0;
    }

    let mean = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }

    let variance = lengths
        .iter()
        .map(|&len| {
            let delta = len as f64 - mean;
            delta * delta
        })
        .sum::<f64>()
        / lengths.len() as f64;
    let cv = variance.sqrt() / mean;

    round3((1.0 - cv).clamp(0.0, 1.0))
}

/// Flesch–Kincaid grade level over summary + experience bullets.
fn readability_grade(document: &ResumeDocument) -> f64 {
    let mut text = document.summary.clone();
    for bullet in document.bullets() {
        text.push(' ');
        text.push_str(bullet);
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return EMPTY_TEXT_GRADE;
    }

    let sentences = text.matches('.').count().max(1);
    let syllables: usize = words.iter().map(|word| approx_syllables(word)).sum();

    let grade = 0.39 * (words.len() as f64 / sentences as f64)
        + 11.8 * (syllables as f64 / words.len() as f64)
        - 15.59;

    round2(grade.max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailor_shared::{Competency, ExperienceRole};

    fn resume_with_bullets(bullets: &[&str]) -> ResumeDocument {
        ResumeDocument {
            summary: "Data engineer focused on reliable pipelines.".into(),
            experience: vec![ExperienceRole {
                title: "Data Engineer".into(),
                company: "Acme".into(),
                achievements: bullets.iter().map(|b| b.to_string()).collect(),
                ..Default::default()
            }],
            skills: vec!["dbt".into(), "Python".into(), "SQL".into()],
            ..Default::default()
        }
    }

    #[test]
    fn coverage_zero_when_both_targets_missing() {
        let jd = JobDescription {
            requirements: vec![
                "Build data governance dashboards".into(),
                "Define stakeholder communication cadences".into(),
            ],
            ..Default::default()
        };
        let document = resume_with_bullets(&["Optimized query latency by 40%."]);

        let report = evaluate(&jd, &document, &[], &EvaluationConfig::default());

        assert_eq!(report.jd_coverage, 0.0);
        assert_eq!(
            report.missing_coverage_targets,
            vec![
                "Build data governance dashboards".to_string(),
                "Define stakeholder communication cadences".to_string(),
            ]
        );
    }

    #[test]
    fn covered_targets_raise_the_score() {
        let jd = JobDescription {
            requirements: vec!["Build reliable pipelines".into(), "Lead quarterly planning".into()],
            ..Default::default()
        };
        let document = resume_with_bullets(&["Build and run reliable pipelines for billing data."]);

        let report = evaluate(&jd, &document, &[], &EvaluationConfig::default());
        assert_eq!(report.jd_coverage, 0.5);
        assert_eq!(
            report.missing_coverage_targets,
            vec!["Lead quarterly planning".to_string()]
        );
    }

    #[test]
    fn ats_score_with_exactly_two_of_five_missing() {
        let jd = JobDescription {
            skills: vec![
                "Snowflake".into(),
                "Airflow".into(),
                "dbt".into(),
                "Python".into(),
                "SQL".into(),
            ],
            ..Default::default()
        };
        let document = resume_with_bullets(&["Modeled marts in dbt with Python and SQL."]);

        let report = evaluate(&jd, &document, &[], &EvaluationConfig::default());
        assert_eq!(report.ats_keyword_score, 0.6);
        assert_eq!(
            report.missing_ats_keywords,
            vec!["Snowflake".to_string(), "Airflow".to_string()]
        );
    }

    #[test]
    fn configured_keywords_join_the_ats_pool() {
        let jd = JobDescription::default();
        let config = EvaluationConfig {
            ats_keywords: vec!["Terraform".into()],
            ..Default::default()
        };
        let document = resume_with_bullets(&["Provisioned infra."]);

        let report = evaluate(&jd, &document, &[], &config);
        assert_eq!(report.ats_keyword_score, 0.0);
        assert_eq!(report.missing_ats_keywords, vec!["Terraform".to_string()]);
    }

    #[test]
    fn unsupported_bullets_are_flagged() {
        let jd = JobDescription {
            summary: "Own ingestion for the analytics platform.".into(),
            ..Default::default()
        };
        let evidence = vec![EvidenceChunk {
            text: "Rebuilt the ingestion service and cut incident volume in half.".into(),
            score: 0.9,
            ..Default::default()
        }];
        let document = resume_with_bullets(&[
            "Rebuilt the ingestion service and cut incident volume in half.",
            "Won a national chess championship.",
        ]);

        let report = evaluate(&jd, &document, &evidence, &EvaluationConfig::default());
        assert_eq!(
            report.hallucinations,
            vec!["Won a national chess championship.".to_string()]
        );
    }

    #[test]
    fn uniform_bullets_score_full_consistency() {
        let document = resume_with_bullets(&[
            "Shipped the billing pipeline rewrite end to end",
            "Halved the warehouse spend across all data teams",
        ]);
        // Both bullets have 8 tokens.
        let report = evaluate(
            &JobDescription::default(),
            &document,
            &[],
            &EvaluationConfig::default(),
        );
        assert_eq!(report.consistency, 1.0);
    }

    #[test]
    fn no_bullets_scores_zero_consistency() {
        let document = ResumeDocument {
            summary: "A summary.".into(),
            ..Default::default()
        };
        let report = evaluate(
            &JobDescription::default(),
            &document,
            &[],
            &EvaluationConfig::default(),
        );
        assert_eq!(report.consistency, 0.0);
    }

    #[test]
    fn scores_stay_in_range() {
        let jd = JobDescription {
            requirements: vec!["Scale the platform".into()],
            skills: vec!["Kafka".into()],
            competencies: vec![Competency {
                name: "Operational excellence".into(),
                evidence_indicators: vec!["Ran incident reviews".into()],
            }],
            ..Default::default()
        };
        let document = resume_with_bullets(&[
            "Scaled the platform to 5x traffic.",
            "Ran incident reviews every week.",
        ]);

        let report = evaluate(&jd, &document, &[], &EvaluationConfig::default());
        for score in [report.jd_coverage, report.ats_keyword_score, report.consistency] {
            assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
        }
        assert!(report.readability_grade_level >= 0.0);
    }

    #[test]
    fn empty_document_readability_sentinel() {
        let report = evaluate(
            &JobDescription::default(),
            &ResumeDocument::default(),
            &[],
            &EvaluationConfig::default(),
        );
        assert_eq!(report.readability_grade_level, EMPTY_TEXT_GRADE);
    }

    #[test]
    fn engine_is_deterministic() {
        let jd = JobDescription {
            requirements: vec!["Design event schemas".into(), "Mentor junior engineers".into()],
            skills: vec!["Kafka".into(), "Rust".into()],
            ..Default::default()
        };
        let evidence = vec![EvidenceChunk {
            text: "Designed event schemas for the order stream.".into(),
            score: 0.8,
            ..Default::default()
        }];
        let document = resume_with_bullets(&[
            "Designed event schemas for the order stream.",
            "Mentored four junior engineers.",
        ]);
        let config = EvaluationConfig::default();

        let first = serde_json::to_string(&evaluate(&jd, &document, &evidence, &config)).unwrap();
        let second = serde_json::to_string(&evaluate(&jd, &document, &evidence, &config)).unwrap();
        assert_eq!(first, second);
    }
}

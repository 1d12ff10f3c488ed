// src/scoring.rs

//! Scoring engine: a pure derivation from a finalized answer set to a
//! scored result. No I/O and no clock: same input, same output, always.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::question::{Question, QuestionKind, Section};

pub const SECTION_FLOOR: i64 = 200;
pub const SECTION_CEILING: i64 = 800;
pub const COMPOSITE_FLOOR: i64 = 400;
pub const COMPOSITE_CEILING: i64 = 1600;

/// A section whose correct ratio falls below this emits a weakness label.
/// Presentation-level constant; swap it (and the scale below) to retune the
/// report without touching the derivation.
const WEAKNESS_THRESHOLD: f64 = 0.6;

const GENERIC_RECOMMENDATION: &str =
    "Continue practicing with varied question types and explore advanced topics.";

fn weakness_label(section: Section) -> &'static str {
    match section {
        Section::Math => "Math Concepts",
        Section::ReadingWriting => "Reading & Writing Skills",
    }
}

fn recommendation_for(section: Section) -> &'static str {
    match section {
        Section::Math => "Review foundational math topics and practice regularly.",
        Section::ReadingWriting => {
            "Focus on grammar rules, vocabulary, and passage analysis techniques."
        }
    }
}

/// Per-question record carried in every finalized result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub question_id: String,
    pub section: Section,
    pub topic: String,
    pub user_answer: Option<String>,
    pub correct_answer: String,
    pub correct: bool,
}

/// Everything the scoring engine derives from one finalized answer set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub total_score: i64,
    pub math_score: i64,
    pub rw_score: i64,
    pub correct_count: usize,
    pub total_answered: usize,
    pub outcomes: Vec<QuestionOutcome>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Whether `given` matches the recorded correct answer.
fn is_correct(question: &Question, given: &str) -> bool {
    match question.kind {
        QuestionKind::MultipleChoice { .. } => given == question.answer,
        QuestionKind::FreeResponse => {
            given.trim().eq_ignore_ascii_case(question.answer.trim())
        }
    }
}

/// Map a raw correct count onto the 200-800 section scale.
///
/// Linear and monotonic: zero correct scores the floor, a perfect section
/// the ceiling. A section with no questions also scores the floor.
fn scale_section(correct: usize, total: usize) -> i64 {
    if total == 0 {
        return SECTION_FLOOR;
    }
    let span = (SECTION_CEILING - SECTION_FLOOR) as f64;
    let scaled = SECTION_FLOOR + ((correct as f64 / total as f64) * span).round() as i64;
    scaled.clamp(SECTION_FLOOR, SECTION_CEILING)
}

/// Score a finalized answer set against the fixed question sequence.
///
/// Unanswered (or blank) questions count as incorrect but not as answered.
pub fn score(questions: &[Question], answers: &HashMap<String, String>) -> ScoreBreakdown {
    let mut correct_count = 0;
    let mut total_answered = 0;
    let mut math = (0usize, 0usize);
    let mut rw = (0usize, 0usize);
    let mut outcomes = Vec::with_capacity(questions.len());

    for question in questions {
        let user_answer = answers
            .get(&question.id)
            .filter(|a| !a.trim().is_empty())
            .cloned();
        if user_answer.is_some() {
            total_answered += 1;
        }

        let correct = user_answer
            .as_deref()
            .is_some_and(|a| is_correct(question, a));

        let tally = match question.section {
            Section::Math => &mut math,
            Section::ReadingWriting => &mut rw,
        };
        tally.1 += 1;
        if correct {
            tally.0 += 1;
            correct_count += 1;
        }

        outcomes.push(QuestionOutcome {
            question_id: question.id.clone(),
            section: question.section,
            topic: question.topic.clone(),
            user_answer,
            correct_answer: question.answer.clone(),
            correct,
        });
    }

    let math_score = scale_section(math.0, math.1);
    let rw_score = scale_section(rw.0, rw.1);
    let total_score = (math_score + rw_score).clamp(COMPOSITE_FLOOR, COMPOSITE_CEILING);

    let mut weaknesses = Vec::new();
    let mut recommendations = Vec::new();
    for (section, (correct, total)) in
        [(Section::Math, math), (Section::ReadingWriting, rw)]
    {
        if total > 0 && (correct as f64 / total as f64) < WEAKNESS_THRESHOLD {
            weaknesses.push(weakness_label(section).to_string());
            recommendations.push(recommendation_for(section).to_string());
        }
    }
    if weaknesses.is_empty() {
        recommendations.push(GENERIC_RECOMMENDATION.to_string());
    }

    ScoreBreakdown {
        total_score,
        math_score,
        rw_score,
        correct_count,
        total_answered,
        outcomes,
        weaknesses,
        recommendations,
    }
}

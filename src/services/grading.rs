//! Deterministic grading of heterogeneous question types. Every
//! function here is a pure function of (question, submitted answer);
//! finalize and manual grading call into this module and persist the
//! result atomically.

use std::collections::HashSet;

use crate::models::{
    AnswerDetail, AnswerValue, Correctness, Question, QuestionKind, Quiz, SubmissionStatus,
};

/// Outcome of grading a full answer set on finalize.
#[derive(Debug, Clone)]
pub struct GradeOutcome {
    pub answers: Vec<AnswerDetail>,
    pub score: i32,
    pub status: SubmissionStatus,
}

/// Grade a single answer against its question.
///
/// - multiple-choice: full points iff the submitted text matches the
///   canonical answer, else 0.
/// - checkboxes: full points iff the submitted set equals the canonical
///   set (order- and duplicate-independent); no partial credit.
/// - short-answer: Pending with 0 points until a manual grade lands.
pub fn grade_answer(question: &Question, answer: &AnswerValue) -> (Correctness, i32) {
    match question.kind {
        QuestionKind::MultipleChoice => {
            let correct = matches!(
                (answer, question.correct_answer.as_deref()),
                (AnswerValue::Text(submitted), Some(canonical)) if submitted == canonical
            );
            if correct {
                (Correctness::Correct, question.points)
            } else {
                (Correctness::Incorrect, 0)
            }
        }
        QuestionKind::Checkboxes => {
            let canonical: HashSet<&str> = question
                .correct_answers
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(String::as_str)
                .collect();
            let submitted: HashSet<&str> = match answer {
                AnswerValue::Selection(values) => values.iter().map(String::as_str).collect(),
                AnswerValue::Text(_) => HashSet::new(),
            };
            if !canonical.is_empty() && submitted == canonical {
                (Correctness::Correct, question.points)
            } else {
                (Correctness::Incorrect, 0)
            }
        }
        QuestionKind::ShortAnswer => (Correctness::Pending, 0),
    }
}

pub fn score(answers: &[AnswerDetail]) -> i32 {
    answers.iter().map(|a| a.points_awarded).sum()
}

/// Status a finalized attempt lands in: Submitted while any short-answer
/// question awaits manual grading, Graded otherwise.
fn finalize_status(answers: &[AnswerDetail]) -> SubmissionStatus {
    if answers.iter().any(|a| a.correctness == Correctness::Pending) {
        SubmissionStatus::Submitted
    } else {
        SubmissionStatus::Graded
    }
}

/// Grade the full question set on finalize. Questions the student never
/// answered are materialized with an empty answer so they grade the
/// same as an explicit empty submission: zero for choice questions,
/// Pending for short-answer, and the owner can still grade them later.
pub fn grade_submission(quiz: &Quiz, answers: &[AnswerDetail]) -> GradeOutcome {
    let graded: Vec<AnswerDetail> = quiz
        .questions
        .iter()
        .map(|question| {
            let submitted = answers
                .iter()
                .find(|detail| detail.question_id == question.id)
                .map(|detail| detail.answer.clone())
                .unwrap_or_else(|| empty_answer(question.kind));
            let (correctness, points_awarded) = grade_answer(question, &submitted);
            AnswerDetail {
                question_id: question.id.clone(),
                answer: submitted,
                correctness,
                points_awarded,
            }
        })
        .collect();

    let score = score(&graded);
    let status = finalize_status(&graded);
    GradeOutcome {
        answers: graded,
        score,
        status,
    }
}

fn empty_answer(kind: QuestionKind) -> AnswerValue {
    match kind {
        QuestionKind::Checkboxes => AnswerValue::Selection(vec![]),
        _ => AnswerValue::Text(String::new()),
    }
}

/// Apply one manual grade. Points are clamped to [0, question.points];
/// correctness flips on any positive award. Returns the new status:
/// Graded once nothing is Pending any more.
pub fn apply_manual_grade(
    answers: &mut [AnswerDetail],
    question: &Question,
    awarded_points: i32,
) -> SubmissionStatus {
    let clamped = awarded_points.clamp(0, question.points);
    if let Some(detail) = answers.iter_mut().find(|a| a.question_id == question.id) {
        detail.points_awarded = clamped;
        detail.correctness = if clamped > 0 {
            Correctness::Correct
        } else {
            Correctness::Incorrect
        };
    }

    if answers.iter().any(|a| a.correctness == Correctness::Pending) {
        SubmissionStatus::Submitted
    } else {
        SubmissionStatus::Graded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Targeting;
    use chrono::Utc;

    fn multiple_choice(id: &str, points: i32, correct: &str) -> Question {
        Question {
            id: id.to_string(),
            prompt: "pick one".into(),
            kind: QuestionKind::MultipleChoice,
            points,
            options: vec!["A".into(), "B".into(), "C".into()],
            correct_answer: Some(correct.to_string()),
            correct_answers: None,
        }
    }

    fn checkboxes(id: &str, points: i32, correct: &[&str]) -> Question {
        Question {
            id: id.to_string(),
            prompt: "pick all".into(),
            kind: QuestionKind::Checkboxes,
            points,
            options: vec!["A".into(), "B".into(), "C".into()],
            correct_answer: None,
            correct_answers: Some(correct.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn short_answer(id: &str, points: i32) -> Question {
        Question {
            id: id.to_string(),
            prompt: "explain".into(),
            kind: QuestionKind::ShortAnswer,
            points,
            options: vec![],
            correct_answer: None,
            correct_answers: None,
        }
    }

    fn detail(question_id: &str, answer: AnswerValue) -> AnswerDetail {
        AnswerDetail {
            question_id: question_id.to_string(),
            answer,
            correctness: Correctness::Pending,
            points_awarded: 0,
        }
    }

    fn quiz(questions: Vec<Question>) -> Quiz {
        Quiz {
            id: "quiz".into(),
            owner_id: "owner".into(),
            title: "Quiz".into(),
            due_date: Utc::now(),
            time_limit_minutes: None,
            questions,
            targeting: Targeting {
                grades: vec![7],
                ..Targeting::default()
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn multiple_choice_full_points_on_match() {
        let q = multiple_choice("q1", 2, "B");
        assert_eq!(
            grade_answer(&q, &AnswerValue::Text("B".into())),
            (Correctness::Correct, 2)
        );
        assert_eq!(
            grade_answer(&q, &AnswerValue::Text("A".into())),
            (Correctness::Incorrect, 0)
        );
    }

    #[test]
    fn checkboxes_set_equality_ignores_order_and_duplicates() {
        let q = checkboxes("q1", 3, &["A", "C"]);
        let reordered = AnswerValue::Selection(vec!["C".into(), "A".into()]);
        assert_eq!(grade_answer(&q, &reordered), (Correctness::Correct, 3));

        let duplicated = AnswerValue::Selection(vec!["A".into(), "C".into(), "A".into()]);
        assert_eq!(grade_answer(&q, &duplicated), (Correctness::Correct, 3));
    }

    #[test]
    fn checkboxes_subset_gets_no_partial_credit() {
        let q = checkboxes("q1", 3, &["A", "C"]);
        let subset = AnswerValue::Selection(vec!["A".into()]);
        assert_eq!(grade_answer(&q, &subset), (Correctness::Incorrect, 0));

        let superset = AnswerValue::Selection(vec!["A".into(), "B".into(), "C".into()]);
        assert_eq!(grade_answer(&q, &superset), (Correctness::Incorrect, 0));
    }

    #[test]
    fn short_answer_is_pending_until_manual_grade() {
        let q = short_answer("q1", 3);
        assert_eq!(
            grade_answer(&q, &AnswerValue::Text("because".into())),
            (Correctness::Pending, 0)
        );
    }

    #[test]
    fn finalize_status_submitted_when_short_answer_present() {
        let quiz = quiz(vec![multiple_choice("mc", 2, "B"), short_answer("sa", 3)]);
        let answers = vec![
            detail("mc", AnswerValue::Text("B".into())),
            detail("sa", AnswerValue::Text("some text".into())),
        ];

        let outcome = grade_submission(&quiz, &answers);
        assert_eq!(outcome.status, SubmissionStatus::Submitted);
        assert_eq!(outcome.score, 2);
        assert_eq!(outcome.answers[1].correctness, Correctness::Pending);
    }

    #[test]
    fn finalize_status_graded_for_auto_gradable_set() {
        let quiz = quiz(vec![
            multiple_choice("mc", 2, "B"),
            checkboxes("cb", 3, &["A", "C"]),
        ]);
        let answers = vec![
            detail("mc", AnswerValue::Text("B".into())),
            detail("cb", AnswerValue::Selection(vec!["C".into(), "A".into()])),
        ];

        let outcome = grade_submission(&quiz, &answers);
        assert_eq!(outcome.status, SubmissionStatus::Graded);
        assert_eq!(outcome.score, 5);
    }

    #[test]
    fn unanswered_questions_grade_as_empty() {
        let quiz = quiz(vec![
            multiple_choice("mc", 2, "B"),
            checkboxes("cb", 3, &["A", "C"]),
            short_answer("sa", 3),
        ]);
        // Only the multiple-choice question was ever autosaved.
        let outcome = grade_submission(&quiz, &[detail("mc", AnswerValue::Text("B".into()))]);

        assert_eq!(outcome.answers.len(), 3);
        assert_eq!(outcome.score, 2);
        // the untouched short answer still awaits a manual grade
        assert_eq!(outcome.status, SubmissionStatus::Submitted);
        assert_eq!(outcome.answers[1].correctness, Correctness::Incorrect);
        assert_eq!(outcome.answers[2].correctness, Correctness::Pending);
    }

    #[test]
    fn manual_grade_clamps_and_transitions_to_graded() {
        let quiz = quiz(vec![multiple_choice("mc", 2, "B"), short_answer("sa", 3)]);
        let mut answers = grade_submission(
            &quiz,
            &[
                detail("mc", AnswerValue::Text("B".into())),
                detail("sa", AnswerValue::Text("essay".into())),
            ],
        )
        .answers;

        let status = apply_manual_grade(&mut answers, &short_answer("sa", 3), 10);
        assert_eq!(status, SubmissionStatus::Graded);
        assert_eq!(answers[1].points_awarded, 3); // clamped to the question max
        assert_eq!(answers[1].correctness, Correctness::Correct);
        assert_eq!(score(&answers), 5);
    }

    #[test]
    fn manual_grade_of_zero_marks_incorrect() {
        let quiz = quiz(vec![short_answer("sa", 3)]);
        let mut answers =
            grade_submission(&quiz, &[detail("sa", AnswerValue::Text("essay".into()))]).answers;

        let status = apply_manual_grade(&mut answers, &short_answer("sa", 3), 0);
        assert_eq!(status, SubmissionStatus::Graded);
        assert_eq!(answers[0].correctness, Correctness::Incorrect);
        assert_eq!(score(&answers), 0);
    }

    #[test]
    fn status_stays_submitted_while_other_pending_grades_remain() {
        let quiz = quiz(vec![short_answer("sa1", 3), short_answer("sa2", 2)]);
        let mut answers = grade_submission(
            &quiz,
            &[
                detail("sa1", AnswerValue::Text("one".into())),
                detail("sa2", AnswerValue::Text("two".into())),
            ],
        )
        .answers;

        let status = apply_manual_grade(&mut answers, &short_answer("sa1", 3), 2);
        assert_eq!(status, SubmissionStatus::Submitted);
    }
}

//! Quiz visibility. A student can attempt a quiz when they match any
//! one of the five targeting dimensions. No side effects here; listing
//! eligible quizzes never starts an attempt clock.

use crate::middlewares::auth::JwtClaims;
use crate::models::{Quiz, QuizView};

pub struct EligibilityResolver;

impl EligibilityResolver {
    /// OR over the five dimensions: user id, grade, other-grade,
    /// program, school. A quiz with all sets empty matches nobody
    /// (rejected at creation, but double-checked here).
    pub fn is_eligible(student: &JwtClaims, quiz: &Quiz) -> bool {
        let targeting = &quiz.targeting;

        targeting.user_ids.iter().any(|id| *id == student.sub)
            || student
                .grade
                .is_some_and(|grade| targeting.grades.contains(&grade))
            || student
                .other_grade
                .is_some_and(|grade| targeting.other_grades.contains(&grade))
            || student
                .program
                .as_ref()
                .is_some_and(|program| targeting.programs.contains(program))
            || student
                .school_id
                .as_ref()
                .is_some_and(|school| targeting.school_ids.contains(school))
    }

    /// Sanitized views of the quizzes visible to this student, in the
    /// order the input slice provides.
    pub fn eligible_quizzes<'a>(
        student: &'a JwtClaims,
        quizzes: &'a [Quiz],
    ) -> impl Iterator<Item = QuizView> + 'a {
        quizzes
            .iter()
            .filter(move |quiz| Self::is_eligible(student, quiz))
            .map(QuizView::sanitized)
    }
}

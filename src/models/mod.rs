pub mod quiz;
pub mod submission;

pub use quiz::{Question, QuestionKind, QuestionView, Quiz, QuizOwnerView, QuizView, Targeting};
pub use submission::{
    AnswerDetail, AnswerValue, Correctness, FinalizeTrigger, FinalizeUpdate, GradeUpdate,
    Submission, SubmissionStatus, SubmissionView,
};

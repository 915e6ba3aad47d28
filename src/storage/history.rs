//! Per-student visit and answer history.
//!
//! One pretty-printed JSON document per student records the registration
//! info plus one visit per calendar day, each visit holding the answers
//! given that day. Documents are rewritten in full on every mutating call.

use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

use crate::networking::protocol::{Question, QuizAnswer};
use crate::storage::files::{StorageError, TextStore};
use crate::student::StudentInfo;

/// Prefix of every per-student document file name.
pub const DATA_FILE_PREFIX: &str = "student_session_data_";

/// Durable copy of an answer, denormalized at submission time so history
/// stays readable after the live quiz is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAnswer {
    pub id: String,
    pub quiz_id: String,
    pub question_id: String,
    pub question_text: String,
    pub student_id: String,
    pub student_name: String,
    pub answer: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

/// One calendar day of quiz activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub student_id: String,
    /// Calendar day, `YYYY-MM-DD` in local time.
    pub visit_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_title: Option<String>,
    #[serde(default)]
    pub answers: Vec<PersistedAnswer>,
}

/// Root document, one per student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub student_info: StudentInfo,
    /// Registration time, epoch milliseconds.
    pub registration_timestamp: i64,
    #[serde(default)]
    pub visits: Vec<VisitRecord>,
}

/// Visit/answer persistence over a [`TextStore`].
///
/// Mutating calls run load-mutate-save under one internal lock, because the
/// submit path and the receive loop both write the same document.
pub struct VisitHistory {
    store: Arc<dyn TextStore>,
    write_lock: Mutex<()>,
}

impl VisitHistory {
    /// Create a history service over `store`.
    pub fn new(store: Arc<dyn TextStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Load a student's document. Absent or undecodable documents both
    /// read as `None`.
    pub fn load_student(&self, student_id: &str) -> Option<StudentRecord> {
        if student_id.trim().is_empty() {
            tracing::warn!("Cannot load history for a blank student id");
            return None;
        }

        let file_name = file_name(student_id);
        let content = match self.store.read_text(&file_name) {
            Ok(content) => content?,
            Err(e) => {
                tracing::warn!("Failed to read student document '{}': {}", file_name, e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    "Failed to decode student document '{}', treating as absent: {}",
                    file_name,
                    e
                );
                None
            }
        }
    }

    /// Find or create today's visit for `student`, backfilling the quiz
    /// title when one becomes known. Safe to call repeatedly per day.
    pub fn ensure_visit_today(
        &self,
        student: &StudentInfo,
        quiz_title: Option<&str>,
    ) -> Result<StudentRecord, HistoryError> {
        if student.id.trim().is_empty() {
            return Err(HistoryError::EmptyStudentId);
        }

        let _guard = self.write_lock.lock().unwrap();

        let today = today();
        let mut record = self.load_student(&student.id).unwrap_or_else(|| StudentRecord {
            student_info: student.clone(),
            registration_timestamp: Utc::now().timestamp_millis(),
            visits: Vec::new(),
        });

        let index = find_or_create_visit(&mut record, &student.id, &today, quiz_title);
        backfill_title(&mut record.visits[index], quiz_title);

        self.save_student(&record)?;
        Ok(record)
    }

    /// Append `answer` to today's visit, denormalizing question details.
    ///
    /// Requires an existing document (see [`Self::ensure_visit_today`]);
    /// any earlier answer with the same id is replaced.
    pub fn record_answer(
        &self,
        student_id: &str,
        question: &Question,
        answer: &QuizAnswer,
        quiz_title: Option<&str>,
    ) -> Result<StudentRecord, HistoryError> {
        if student_id.trim().is_empty() {
            return Err(HistoryError::EmptyStudentId);
        }

        let _guard = self.write_lock.lock().unwrap();

        let today = today();
        let mut record = self
            .load_student(student_id)
            .ok_or_else(|| HistoryError::NoStudentData(student_id.to_string()))?;

        let index = find_or_create_visit(&mut record, student_id, &today, quiz_title);
        backfill_title(&mut record.visits[index], quiz_title);

        let persisted = PersistedAnswer {
            id: answer.id.clone(),
            quiz_id: answer.quiz_id.clone(),
            question_id: answer.question_id.clone(),
            question_text: question.text.clone(),
            student_id: answer.student_id.clone(),
            student_name: answer.student_name.clone(),
            answer: answer.answer.clone(),
            options: question.options.clone(),
            correct_answer_text: question.correct_answer.clone(),
            is_correct: answer.is_correct,
        };

        let visit = &mut record.visits[index];
        visit.answers.retain(|a| a.id != persisted.id);
        visit.answers.push(persisted);

        self.save_student(&record)?;
        Ok(record)
    }

    /// Replace the correctness of today's answer for the evaluated
    /// question. Fails without mutating anything when no matching visit or
    /// answer exists.
    pub fn apply_evaluation(
        &self,
        student_id: &str,
        evaluated: &QuizAnswer,
    ) -> Result<StudentRecord, HistoryError> {
        if student_id.trim().is_empty() {
            return Err(HistoryError::EmptyStudentId);
        }

        let _guard = self.write_lock.lock().unwrap();

        let today = today();
        let mut record = self
            .load_student(student_id)
            .ok_or_else(|| HistoryError::NoStudentData(student_id.to_string()))?;

        let index = visit_index(&record, student_id, &today)
            .ok_or_else(|| HistoryError::NoVisitToday(student_id.to_string()))?;

        let answer = record.visits[index]
            .answers
            .iter_mut()
            .find(|a| a.question_id == evaluated.question_id)
            .ok_or_else(|| HistoryError::AnswerNotFound(evaluated.question_id.clone()))?;

        answer.is_correct = evaluated.is_correct;

        self.save_student(&record)?;
        Ok(record)
    }

    fn save_student(&self, record: &StudentRecord) -> Result<(), HistoryError> {
        let file_name = file_name(&record.student_info.id);
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| HistoryError::EncodeFailed(e.to_string()))?;

        self.store.write_text(&file_name, &content)?;
        tracing::debug!(
            "Saved history for student '{}' to '{}'",
            record.student_info.id,
            file_name
        );
        Ok(())
    }
}

/// Document file name for a student id, with every character outside
/// `[A-Za-z0-9._-]` replaced so ids cannot name a path.
fn file_name(student_id: &str) -> String {
    let safe_id: String = student_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{DATA_FILE_PREFIX}{safe_id}.json")
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

fn new_visit(student_id: &str, date: &str, quiz_title: Option<&str>) -> VisitRecord {
    VisitRecord {
        student_id: student_id.to_string(),
        visit_date: date.to_string(),
        quiz_title: quiz_title.map(|t| t.to_string()),
        answers: Vec::new(),
    }
}

fn visit_index(record: &StudentRecord, student_id: &str, date: &str) -> Option<usize> {
    record
        .visits
        .iter()
        .position(|v| v.visit_date == date && v.student_id == student_id)
}

fn find_or_create_visit(
    record: &mut StudentRecord,
    student_id: &str,
    date: &str,
    quiz_title: Option<&str>,
) -> usize {
    match visit_index(record, student_id, date) {
        Some(index) => index,
        None => {
            record.visits.push(new_visit(student_id, date, quiz_title));
            record.visits.len() - 1
        }
    }
}

fn backfill_title(visit: &mut VisitRecord, quiz_title: Option<&str>) {
    if visit.quiz_title.is_none()
        || (quiz_title.is_some() && visit.quiz_title.as_deref() != quiz_title)
    {
        visit.quiz_title = quiz_title.map(|t| t.to_string());
    }
}

/// History errors.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Student id must not be empty")]
    EmptyStudentId,

    #[error("No stored data for student '{0}'")]
    NoStudentData(String),

    #[error("No visit recorded today for student '{0}'")]
    NoVisitToday(String),

    #[error("No answer for question '{0}' in today's visit")]
    AnswerNotFound(String),

    #[error("Failed to encode student record: {0}")]
    EncodeFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::files::MemoryStore;
    use crate::student::SchoolFocus;

    fn student() -> StudentInfo {
        StudentInfo {
            id: "s1".to_string(),
            name: "Ann".to_string(),
            city: "Bologna".to_string(),
            school_focus: SchoolFocus::Informatica,
        }
    }

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            text: "Pick one".to_string(),
            options: vec!["A".to_string(), "B".to_string()],
            correct_answer: Some("A".to_string()),
            correct_option_index: Some(0),
            points: 1,
        }
    }

    fn answer(id: &str) -> QuizAnswer {
        QuizAnswer {
            id: id.to_string(),
            quiz_id: "quiz-1".to_string(),
            question_id: "q1".to_string(),
            student_id: "s1".to_string(),
            student_name: "Ann".to_string(),
            answer: "A".to_string(),
            is_correct: None,
        }
    }

    fn history() -> VisitHistory {
        VisitHistory::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_ensure_visit_is_idempotent_per_day() {
        let history = history();

        let first = history.ensure_visit_today(&student(), None).unwrap();
        assert_eq!(first.visits.len(), 1);
        assert_eq!(first.visits[0].quiz_title, None);

        let second = history
            .ensure_visit_today(&student(), Some("Orientation"))
            .unwrap();
        assert_eq!(second.visits.len(), 1);
        assert_eq!(second.visits[0].quiz_title.as_deref(), Some("Orientation"));
    }

    #[test]
    fn test_record_answer_requires_prior_document() {
        let history = history();

        let result = history.record_answer("s1", &question(), &answer("ans-1"), None);
        assert!(matches!(result, Err(HistoryError::NoStudentData(_))));
    }

    #[test]
    fn test_record_answer_denormalizes_question() {
        let history = history();
        history.ensure_visit_today(&student(), None).unwrap();

        let record = history
            .record_answer("s1", &question(), &answer("ans-1"), Some("Orientation"))
            .unwrap();

        let persisted = &record.visits[0].answers[0];
        assert_eq!(persisted.question_text, "Pick one");
        assert_eq!(persisted.options, vec!["A", "B"]);
        assert_eq!(persisted.correct_answer_text.as_deref(), Some("A"));
        assert_eq!(persisted.is_correct, None);
        assert_eq!(record.visits[0].quiz_title.as_deref(), Some("Orientation"));
    }

    #[test]
    fn test_record_answer_overwrites_same_id() {
        let history = history();
        history.ensure_visit_today(&student(), None).unwrap();

        history
            .record_answer("s1", &question(), &answer("ans-1"), None)
            .unwrap();

        let mut changed = answer("ans-1");
        changed.answer = "B".to_string();
        let record = history
            .record_answer("s1", &question(), &changed, None)
            .unwrap();

        assert_eq!(record.visits[0].answers.len(), 1);
        assert_eq!(record.visits[0].answers[0].answer, "B");
    }

    #[test]
    fn test_record_answer_keeps_distinct_ids() {
        let history = history();
        history.ensure_visit_today(&student(), None).unwrap();

        history
            .record_answer("s1", &question(), &answer("ans-1"), None)
            .unwrap();
        let record = history
            .record_answer("s1", &question(), &answer("ans-2"), None)
            .unwrap();

        assert_eq!(record.visits[0].answers.len(), 2);
    }

    #[test]
    fn test_apply_evaluation_updates_only_correctness() {
        let history = history();
        history.ensure_visit_today(&student(), None).unwrap();
        history
            .record_answer("s1", &question(), &answer("ans-1"), None)
            .unwrap();

        let mut evaluated = answer("ans-evaluated");
        evaluated.is_correct = Some(true);
        let record = history.apply_evaluation("s1", &evaluated).unwrap();

        let persisted = &record.visits[0].answers[0];
        assert_eq!(persisted.is_correct, Some(true));
        assert_eq!(persisted.id, "ans-1");
        assert_eq!(persisted.answer, "A");
    }

    #[test]
    fn test_apply_evaluation_without_visit_fails_cleanly() {
        let history = history();
        history.ensure_visit_today(&student(), None).unwrap();

        let mut evaluated = answer("ans-1");
        evaluated.is_correct = Some(false);
        evaluated.question_id = "q-unknown".to_string();

        let result = history.apply_evaluation("s1", &evaluated);
        assert!(matches!(result, Err(HistoryError::AnswerNotFound(_))));

        let record = history.load_student("s1").unwrap();
        assert!(record.visits[0].answers.is_empty());
    }

    #[test]
    fn test_corrupt_document_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store
            .write_text(&file_name("s1"), "not valid json {")
            .unwrap();

        let history = VisitHistory::new(store);
        assert!(history.load_student("s1").is_none());
    }

    #[test]
    fn test_file_name_sanitization() {
        assert_eq!(
            file_name("user@host/../x"),
            "student_session_data_user_host_.._x.json"
        );
        assert_eq!(file_name("plain-id_1.2"), "student_session_data_plain-id_1.2.json");
    }

    #[test]
    fn test_document_is_pretty_printed() {
        let store = Arc::new(MemoryStore::new());
        let history = VisitHistory::new(store.clone());
        history.ensure_visit_today(&student(), None).unwrap();

        let content = store.read_text(&file_name("s1")).unwrap().unwrap();
        assert!(content.contains('\n'));
        assert!(content.contains("\"studentInfo\""));
    }
}

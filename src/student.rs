//! Student registration record.
//!
//! Captured once when the student registers on the device; reused as the
//! protocol identity for every session and as the persistence key.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::networking::protocol::StudentConnection;

/// Track of study the visiting student is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchoolFocus {
    Informatica,
    Logistica,
    Robotica,
}

impl std::fmt::Display for SchoolFocus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchoolFocus::Informatica => write!(f, "Informatica"),
            SchoolFocus::Logistica => write!(f, "Logistica"),
            SchoolFocus::Robotica => write!(f, "Robotica"),
        }
    }
}

/// Registered student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    /// Unique identifier, generated at registration.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Home city.
    pub city: String,
    /// Chosen track of study.
    pub school_focus: SchoolFocus,
}

impl StudentInfo {
    /// Register a new student with a generated id.
    pub fn register(name: String, city: String, school_focus: SchoolFocus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            city,
            school_focus,
        }
    }

    /// The identity announced to the server when a session opens.
    pub fn connection(&self) -> StudentConnection {
        StudentConnection {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_generates_unique_ids() {
        let a = StudentInfo::register("Ann".to_string(), "Bologna".to_string(), SchoolFocus::Informatica);
        let b = StudentInfo::register("Ben".to_string(), "Bologna".to_string(), SchoolFocus::Robotica);

        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serde_wire_names() {
        let student = StudentInfo {
            id: "s1".to_string(),
            name: "Ann".to_string(),
            city: "Modena".to_string(),
            school_focus: SchoolFocus::Logistica,
        };

        let value = serde_json::to_value(&student).unwrap();
        assert_eq!(value["schoolFocus"], "LOGISTICA");
        assert_eq!(value["city"], "Modena");

        let roundtrip: StudentInfo = serde_json::from_value(value).unwrap();
        assert_eq!(roundtrip, student);
    }

    #[test]
    fn test_connection_projects_identity() {
        let student = StudentInfo {
            id: "s1".to_string(),
            name: "Ann".to_string(),
            city: "Modena".to_string(),
            school_focus: SchoolFocus::Informatica,
        };

        let connection = student.connection();
        assert_eq!(connection.id, "s1");
        assert_eq!(connection.name, "Ann");
    }
}

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_staff: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " <{}> {}", self.username, self.last_name)
    }
}

/// Account data ready to be stored; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub is_staff: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSession {
    pub ssid: String,
    pub belongs_to: i64,
    pub expires_at: DateTime<Utc>,
}

impl UserSession {
    pub fn expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub user_id: Option<i64>,
    pub user_label: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: NaiveDate,
    pub active: bool,
    pub group_ids: Vec<i64>,
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EducationGroup {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub student_ids: Vec<i64>,
}

impl fmt::Display for EducationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Teacher {
    pub id: i64,
    pub user_id: Option<i64>,
    pub user_label: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: NaiveDate,
    pub active: bool,
}

impl fmt::Display for Teacher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: String,
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lecture {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub course_id: i64,
    pub course_title: String,
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub teacher_ids: Vec<i64>,
    pub group_ids: Vec<i64>,
}

impl fmt::Display for Lecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Exam {
    pub id: i64,
    pub course_id: i64,
}

/// Shows the bare course reference rather than a label, unlike every other
/// record kind.
impl fmt::Display for Exam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.course_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_labels() {
        let user = User {
            id: 1,
            username: "jsmith".into(),
            first_name: "John".into(),
            last_name: "Smith".into(),
            email: String::new(),
            password_hash: String::new(),
            is_staff: false,
            is_active: true,
            date_joined: Utc::now(),
        };
        assert_eq!(user.to_string(), " <jsmith> Smith");

        let student = Student {
            id: 1,
            user_id: None,
            user_label: None,
            last_name: "Smith".into(),
            first_name: "John".into(),
            birth_date: NaiveDate::from_ymd_opt(2001, 2, 3).unwrap(),
            active: true,
            group_ids: vec![],
        };
        assert_eq!(student.to_string(), "John Smith");
    }

    #[test]
    fn exam_shows_course_reference() {
        let exam = Exam { id: 9, course_id: 4 };
        assert_eq!(exam.to_string(), "4");
    }

    #[test]
    fn password_hash_never_serialized() {
        let user = User {
            id: 1,
            username: "root".into(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            password_hash: "secret".into(),
            is_staff: true,
            is_active: true,
            date_joined: Utc::now(),
        };
        let v = serde_json::to_value(&user).unwrap();
        assert!(v.get("password_hash").is_none());
    }
}

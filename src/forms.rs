/*!
Submitted forms for each record kind and their validation.

A form deserializes from a JSON body with every field optional, then
`clean` checks field constraints and `check_choices` checks that every
referenced record exists. Failures are collected per field.
*/
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::err::{Error, FieldErrors};
use crate::listing::as_id;
use crate::models::{Course, EducationGroup, Lecture, Student, Teacher};
use crate::store::{Accounts, Store};

const REQUIRED: &str = "This field is required.";
const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";

#[async_trait]
pub trait ModelForm: DeserializeOwned + Serialize + Default + Clone + Send + Sync + 'static {
    type Record;
    type Cleaned: Serialize + Send + Sync + 'static;

    /// The form as it would be shown for editing an existing record.
    fn initial(record: &Self::Record) -> Self;

    fn clean(&self) -> Result<Self::Cleaned, FieldErrors>;

    async fn check_choices(
        cleaned: &Self::Cleaned,
        store: &dyn Store,
        errors: &mut FieldErrors,
    ) -> Result<(), Error>;
}

/// Runs both validation stages. A failure carries the field messages and
/// the submitted data so the client can show the form again.
pub async fn validate<F: ModelForm>(form: &F, store: &dyn Store) -> Result<F::Cleaned, Error> {
    let invalid = |fields: FieldErrors| Error::InvalidForm {
        message: "Please correct the errors below.".to_string(),
        fields,
        data: serde_json::to_value(form).ok(),
    };
    let cleaned = form.clean().map_err(invalid)?;
    let mut errors = FieldErrors::new();
    F::check_choices(&cleaned, store, &mut errors).await?;
    if !errors.is_empty() {
        return Err(invalid(errors));
    }
    Ok(cleaned)
}

/// A picked record as submitted. Pickers send ids as strings, so both
/// numbers and numeric strings name a record; anything else is kept as sent
/// and rejected during cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Choice {
    Id(i64),
    Raw(Value),
}

impl Choice {
    fn id(&self) -> Option<i64> {
        match self {
            Choice::Id(id) => Some(*id),
            Choice::Raw(value) => as_id(value),
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Choice::Raw(Value::Null) => true,
            Choice::Raw(Value::String(s)) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<i64> for Choice {
    fn from(id: i64) -> Self {
        Choice::Id(id)
    }
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Choice::Id(id) => write!(f, "{}", id),
            Choice::Raw(Value::String(s)) => f.write_str(s),
            Choice::Raw(value) => write!(f, "{}", value),
        }
    }
}

fn picked(ids: &[i64]) -> Vec<Choice> {
    ids.iter().copied().map(Choice::from).collect()
}

#[derive(Default)]
struct Cleaner {
    errors: FieldErrors,
}

impl Cleaner {
    fn reject(&mut self, field: &'static str, message: String) {
        self.errors.entry(field).or_default().push(message);
    }

    fn text(&mut self, field: &'static str, value: &str, max: Option<usize>, required: bool) -> String {
        let value = value.trim();
        if required && value.is_empty() {
            self.reject(field, REQUIRED.to_string());
        }
        if let Some(max) = max {
            let len = value.chars().count();
            if len > max {
                self.reject(
                    field,
                    format!(
                        "Ensure this value has at most {} characters (it has {}).",
                        max, len
                    ),
                );
            }
        }
        value.to_string()
    }

    fn date(&mut self, field: &'static str, value: &str) -> Option<NaiveDate> {
        let value = value.trim();
        if value.is_empty() {
            self.reject(field, REQUIRED.to_string());
            return None;
        }
        let parsed = parse_date(value);
        if parsed.is_none() {
            self.reject(field, "Enter a valid date.".to_string());
        }
        parsed
    }

    fn datetime(&mut self, field: &'static str, value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if value.is_empty() {
            self.reject(field, REQUIRED.to_string());
            return None;
        }
        let parsed = parse_datetime(value);
        if parsed.is_none() {
            self.reject(field, "Enter a valid date/time.".to_string());
        }
        parsed
    }

    fn choice(&mut self, field: &'static str, value: Option<&Choice>, required: bool) -> Option<i64> {
        match value.filter(|choice| !choice.is_blank()) {
            None => {
                if required {
                    self.reject(field, REQUIRED.to_string());
                }
                None
            }
            Some(choice) => {
                let id = choice.id();
                if id.is_none() {
                    self.reject(field, INVALID_CHOICE.to_string());
                }
                id
            }
        }
    }

    fn choices(&mut self, field: &'static str, values: &[Choice], required: bool) -> Vec<i64> {
        let mut ids = Vec::new();
        let mut blank = true;
        for choice in values.iter().filter(|choice| !choice.is_blank()) {
            blank = false;
            match choice.id() {
                Some(id) => ids.push(id),
                None => self.reject(field, format!("\"{}\" is not a valid value.", choice)),
            }
        }
        if required && blank {
            self.reject(field, REQUIRED.to_string());
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    .or_else(|| parse_date(value).and_then(|d| d.and_hms_opt(0, 0, 0)))?;
    Some(Utc.from_utc_datetime(&naive))
}

fn show_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn show_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Records the choices among `ids` that name no existing record.
fn reject_missing(errors: &mut FieldErrors, field: &'static str, missing: Vec<i64>) {
    for id in missing {
        errors.entry(field).or_default().push(format!(
            "Select a valid choice. {} is not one of the available choices.",
            id
        ));
    }
}

async fn check_user(
    store: &dyn Store,
    user_id: Option<i64>,
    errors: &mut FieldErrors,
) -> Result<(), Error> {
    if let Some(id) = user_id {
        if store.user(id).await?.is_none() {
            errors.entry("user").or_default().push(INVALID_CHOICE.to_string());
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentForm {
    pub user: Option<Choice>,
    pub original_user: Option<Choice>,
    pub education_groups: Vec<Choice>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: String,
    pub active: bool,
}

impl Default for StudentForm {
    fn default() -> Self {
        StudentForm {
            user: None,
            original_user: None,
            education_groups: Vec::new(),
            last_name: String::new(),
            first_name: String::new(),
            birth_date: String::new(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentInput {
    pub user_id: Option<i64>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: NaiveDate,
    pub active: bool,
    pub group_ids: Vec<i64>,
}

#[async_trait]
impl ModelForm for StudentForm {
    type Record = Student;
    type Cleaned = StudentInput;

    fn initial(record: &Student) -> Self {
        StudentForm {
            user: record.user_id.map(Choice::from),
            original_user: record.user_id.map(Choice::from),
            education_groups: picked(&record.group_ids),
            last_name: record.last_name.clone(),
            first_name: record.first_name.clone(),
            birth_date: show_date(&record.birth_date),
            active: record.active,
        }
    }

    fn clean(&self) -> Result<StudentInput, FieldErrors> {
        let mut c = Cleaner::default();
        let last_name = c.text("last_name", &self.last_name, Some(200), true);
        let first_name = c.text("first_name", &self.first_name, Some(200), true);
        let birth_date = c.date("birth_date", &self.birth_date);
        let user_id = c.choice("user", self.user.as_ref(), false);
        let group_ids = c.choices("education_groups", &self.education_groups, false);
        match birth_date {
            Some(birth_date) if c.errors.is_empty() => Ok(StudentInput {
                user_id,
                last_name,
                first_name,
                birth_date,
                active: self.active,
                group_ids,
            }),
            _ => Err(c.errors),
        }
    }

    async fn check_choices(
        cleaned: &StudentInput,
        store: &dyn Store,
        errors: &mut FieldErrors,
    ) -> Result<(), Error> {
        check_user(store, cleaned.user_id, errors).await?;
        let missing = store.groups().missing(&cleaned.group_ids).await?;
        reject_missing(errors, "education_groups", missing);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EducationGroupForm {
    pub users: Vec<Choice>,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EducationGroupInput {
    pub name: String,
    pub description: String,
    pub student_ids: Vec<i64>,
}

#[async_trait]
impl ModelForm for EducationGroupForm {
    type Record = EducationGroup;
    type Cleaned = EducationGroupInput;

    fn initial(record: &EducationGroup) -> Self {
        EducationGroupForm {
            users: picked(&record.student_ids),
            name: record.name.clone(),
            description: record.description.clone(),
        }
    }

    fn clean(&self) -> Result<EducationGroupInput, FieldErrors> {
        let mut c = Cleaner::default();
        let name = c.text("name", &self.name, Some(200), true);
        let description = c.text("description", &self.description, None, false);
        let student_ids = c.choices("users", &self.users, true);
        if !c.errors.is_empty() {
            return Err(c.errors);
        }
        Ok(EducationGroupInput {
            name,
            description,
            student_ids,
        })
    }

    async fn check_choices(
        cleaned: &EducationGroupInput,
        store: &dyn Store,
        errors: &mut FieldErrors,
    ) -> Result<(), Error> {
        let missing = store.students().missing(&cleaned.student_ids).await?;
        reject_missing(errors, "users", missing);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeacherForm {
    pub user: Option<Choice>,
    pub original_user: Option<Choice>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: String,
    pub active: bool,
}

impl Default for TeacherForm {
    fn default() -> Self {
        TeacherForm {
            user: None,
            original_user: None,
            last_name: String::new(),
            first_name: String::new(),
            birth_date: String::new(),
            active: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TeacherInput {
    pub user_id: Option<i64>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: NaiveDate,
    pub active: bool,
}

#[async_trait]
impl ModelForm for TeacherForm {
    type Record = Teacher;
    type Cleaned = TeacherInput;

    fn initial(record: &Teacher) -> Self {
        TeacherForm {
            user: record.user_id.map(Choice::from),
            original_user: record.user_id.map(Choice::from),
            last_name: record.last_name.clone(),
            first_name: record.first_name.clone(),
            birth_date: show_date(&record.birth_date),
            active: record.active,
        }
    }

    fn clean(&self) -> Result<TeacherInput, FieldErrors> {
        let mut c = Cleaner::default();
        let last_name = c.text("last_name", &self.last_name, Some(255), true);
        let first_name = c.text("first_name", &self.first_name, Some(255), true);
        let birth_date = c.date("birth_date", &self.birth_date);
        let user_id = c.choice("user", self.user.as_ref(), false);
        match birth_date {
            Some(birth_date) if c.errors.is_empty() => Ok(TeacherInput {
                user_id,
                last_name,
                first_name,
                birth_date,
                active: self.active,
            }),
            _ => Err(c.errors),
        }
    }

    async fn check_choices(
        cleaned: &TeacherInput,
        store: &dyn Store,
        errors: &mut FieldErrors,
    ) -> Result<(), Error> {
        check_user(store, cleaned.user_id, errors).await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseForm {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseInput {
    pub title: String,
    pub description: String,
}

#[async_trait]
impl ModelForm for CourseForm {
    type Record = Course;
    type Cleaned = CourseInput;

    fn initial(record: &Course) -> Self {
        CourseForm {
            title: record.title.clone(),
            description: record.description.clone(),
        }
    }

    fn clean(&self) -> Result<CourseInput, FieldErrors> {
        let mut c = Cleaner::default();
        let title = c.text("title", &self.title, Some(127), true);
        let description = c.text("description", &self.description, None, false);
        if !c.errors.is_empty() {
            return Err(c.errors);
        }
        Ok(CourseInput { title, description })
    }

    async fn check_choices(
        _cleaned: &CourseInput,
        _store: &dyn Store,
        _errors: &mut FieldErrors,
    ) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LectureForm {
    pub title: String,
    pub description: String,
    pub course: Option<Choice>,
    pub start: String,
    pub finish: String,
    pub teachers: Vec<Choice>,
    pub groups: Vec<Choice>,
}

/// Lecture data as stored. `start` is not required to precede `finish`.
#[derive(Debug, Clone, Serialize)]
pub struct LectureInput {
    pub title: String,
    pub description: String,
    pub course_id: i64,
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub teacher_ids: Vec<i64>,
    pub group_ids: Vec<i64>,
}

#[async_trait]
impl ModelForm for LectureForm {
    type Record = Lecture;
    type Cleaned = LectureInput;

    fn initial(record: &Lecture) -> Self {
        LectureForm {
            title: record.title.clone(),
            description: record.description.clone(),
            course: Some(Choice::Id(record.course_id)),
            start: show_datetime(&record.start),
            finish: show_datetime(&record.finish),
            teachers: picked(&record.teacher_ids),
            groups: picked(&record.group_ids),
        }
    }

    fn clean(&self) -> Result<LectureInput, FieldErrors> {
        let mut c = Cleaner::default();
        let title = c.text("title", &self.title, Some(200), true);
        let description = c.text("description", &self.description, None, false);
        let course_id = c.choice("course", self.course.as_ref(), true);
        let start = c.datetime("start", &self.start);
        let finish = c.datetime("finish", &self.finish);
        let teacher_ids = c.choices("teachers", &self.teachers, true);
        let group_ids = c.choices("groups", &self.groups, false);
        match (course_id, start, finish) {
            (Some(course_id), Some(start), Some(finish)) if c.errors.is_empty() => {
                Ok(LectureInput {
                    title,
                    description,
                    course_id,
                    start,
                    finish,
                    teacher_ids,
                    group_ids,
                })
            }
            _ => Err(c.errors),
        }
    }

    async fn check_choices(
        cleaned: &LectureInput,
        store: &dyn Store,
        errors: &mut FieldErrors,
    ) -> Result<(), Error> {
        if store.courses().get(cleaned.course_id).await?.is_none() {
            errors.entry("course").or_default().push(INVALID_CHOICE.to_string());
        }
        let missing = store.teachers().missing(&cleaned.teacher_ids).await?;
        reject_missing(errors, "teachers", missing);
        let missing = store.groups().missing(&cleaned.group_ids).await?;
        reject_missing(errors, "groups", missing);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_requires_names_and_birth_date() {
        let errors = StudentForm::default().clean().unwrap_err();
        assert_eq!(errors["last_name"], vec![REQUIRED.to_string()]);
        assert_eq!(errors["first_name"], vec![REQUIRED.to_string()]);
        assert_eq!(errors["birth_date"], vec![REQUIRED.to_string()]);
        assert!(!errors.contains_key("education_groups"));
    }

    #[test]
    fn student_values_are_trimmed() {
        let form = StudentForm {
            last_name: "  Smith ".into(),
            first_name: "John".into(),
            birth_date: "2004-05-06".into(),
            education_groups: picked(&[3, 1, 3]),
            ..StudentForm::default()
        };
        let input = form.clean().unwrap();
        assert_eq!(input.last_name, "Smith");
        assert_eq!(input.birth_date, NaiveDate::from_ymd_opt(2004, 5, 6).unwrap());
        assert_eq!(input.group_ids, vec![1, 3]);
        assert!(input.active);
    }

    #[test]
    fn max_length_is_reported() {
        let form = CourseForm {
            title: "x".repeat(128),
            description: String::new(),
        };
        let errors = form.clean().unwrap_err();
        assert_eq!(
            errors["title"],
            vec!["Ensure this value has at most 127 characters (it has 128).".to_string()]
        );
    }

    #[test]
    fn bad_dates_are_rejected() {
        let form = TeacherForm {
            last_name: "Jones".into(),
            first_name: "Amy".into(),
            birth_date: "31/31/2000".into(),
            ..TeacherForm::default()
        };
        let errors = form.clean().unwrap_err();
        assert_eq!(errors["birth_date"], vec!["Enter a valid date.".to_string()]);
    }

    #[test]
    fn group_needs_members() {
        let form = EducationGroupForm {
            name: "A1".into(),
            ..EducationGroupForm::default()
        };
        let errors = form.clean().unwrap_err();
        assert_eq!(errors["users"], vec![REQUIRED.to_string()]);
    }

    #[test]
    fn lecture_accepts_start_after_finish() {
        let form = LectureForm {
            title: "Intro".into(),
            course: Some(Choice::Id(1)),
            start: "2024-03-02T10:00:00Z".into(),
            finish: "2024-03-01".into(),
            teachers: picked(&[1]),
            ..LectureForm::default()
        };
        let input = form.clean().unwrap();
        assert!(input.start > input.finish);
        assert_eq!(input.finish, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn lecture_requires_course_and_teachers() {
        let form = LectureForm {
            title: "Intro".into(),
            start: "2024-03-01 09:30".into(),
            finish: "soon".into(),
            ..LectureForm::default()
        };
        let errors = form.clean().unwrap_err();
        assert_eq!(errors["course"], vec![REQUIRED.to_string()]);
        assert_eq!(errors["teachers"], vec![REQUIRED.to_string()]);
        assert_eq!(errors["finish"], vec!["Enter a valid date/time.".to_string()]);
        assert!(!errors.contains_key("start"));
    }

    #[test]
    fn initial_round_trips_through_clean() {
        let lecture = Lecture {
            id: 1,
            title: "Intro".into(),
            description: String::new(),
            course_id: 2,
            course_title: "Rust".into(),
            start: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            finish: Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap(),
            teacher_ids: vec![4],
            group_ids: vec![],
        };
        let input = LectureForm::initial(&lecture).clean().unwrap();
        assert_eq!(input.start, lecture.start);
        assert_eq!(input.finish, lecture.finish);
        assert_eq!(input.course_id, 2);
    }

    #[test]
    fn missing_json_fields_take_defaults() {
        let form: StudentForm = serde_json::from_str(r#"{"last_name": "Smith"}"#).unwrap();
        assert!(form.active);
        assert!(form.education_groups.is_empty());
    }

    #[test]
    fn picker_ids_may_arrive_as_strings() {
        let form: LectureForm = serde_json::from_value(serde_json::json!({
            "title": "Intro",
            "course": "2",
            "start": "2024-03-01",
            "finish": "2024-03-01",
            "teachers": ["1", 3],
            "groups": ["", null],
        }))
        .unwrap();
        let input = form.clean().unwrap();
        assert_eq!(input.course_id, 2);
        assert_eq!(input.teacher_ids, vec![1, 3]);
        assert!(input.group_ids.is_empty());
    }

    #[test]
    fn malformed_picks_are_field_errors() {
        let form: StudentForm = serde_json::from_value(serde_json::json!({
            "user": "someone",
            "last_name": "Smith",
            "first_name": "John",
            "birth_date": "2004-05-06",
            "education_groups": ["x", 2],
        }))
        .unwrap();
        let errors = form.clean().unwrap_err();
        assert_eq!(errors["user"], vec![INVALID_CHOICE.to_string()]);
        assert_eq!(
            errors["education_groups"],
            vec!["\"x\" is not a valid value.".to_string()]
        );
    }

    #[test]
    fn blank_user_means_unlinked() {
        let form = TeacherForm {
            user: Some(Choice::Raw(Value::String(String::new()))),
            last_name: "Jones".into(),
            first_name: "Amy".into(),
            birth_date: "1980-01-01".into(),
            ..TeacherForm::default()
        };
        assert_eq!(form.clean().unwrap().user_id, None);
    }
}

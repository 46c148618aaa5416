/*!
In-memory store with the same semantics as the Postgres one: cascading
membership removal, unlinking on account deletion, and protected courses.
*/
use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::err::Error;
use crate::forms::{CourseInput, EducationGroupInput, LectureInput, StudentInput, TeacherInput};
use crate::listing::{select, Found, ListQuery};
use crate::models::{
    Course, EducationGroup, Exam, Lecture, NewUser, Student, Teacher, User, UserSession,
};
use crate::store::{Accounts, Repository, Store};

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    users: BTreeMap<i64, User>,
    sessions: HashMap<String, UserSession>,
    students: BTreeMap<i64, Student>,
    groups: BTreeMap<i64, EducationGroup>,
    /// (group, student)
    members: BTreeSet<(i64, i64)>,
    teachers: BTreeMap<i64, Teacher>,
    courses: BTreeMap<i64, Course>,
    lectures: BTreeMap<i64, Lecture>,
    /// (lecture, teacher)
    lecture_teachers: BTreeSet<(i64, i64)>,
    /// (lecture, group)
    lecture_groups: BTreeSet<(i64, i64)>,
    exams: BTreeMap<i64, Exam>,
}

fn linked(set: &BTreeSet<(i64, i64)>, left: i64) -> Vec<i64> {
    set.range((left, i64::MIN)..=(left, i64::MAX))
        .map(|(_, right)| *right)
        .collect()
}

fn linking(set: &BTreeSet<(i64, i64)>, right: i64) -> Vec<i64> {
    set.iter()
        .filter(|(_, r)| *r == right)
        .map(|(left, _)| *left)
        .collect()
}

fn relink(set: &mut BTreeSet<(i64, i64)>, left: i64, rights: &[i64]) {
    set.retain(|(l, _)| *l != left);
    set.extend(rights.iter().map(|right| (left, *right)));
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn user_label(&self, user_id: Option<i64>) -> Option<String> {
        user_id
            .and_then(|id| self.users.get(&id))
            .map(|user| user.to_string())
    }

    fn student(&self, s: &Student) -> Student {
        Student {
            user_label: self.user_label(s.user_id),
            group_ids: linking(&self.members, s.id),
            ..s.clone()
        }
    }

    fn group(&self, g: &EducationGroup) -> EducationGroup {
        EducationGroup {
            student_ids: linked(&self.members, g.id),
            ..g.clone()
        }
    }

    fn teacher(&self, t: &Teacher) -> Teacher {
        Teacher {
            user_label: self.user_label(t.user_id),
            ..t.clone()
        }
    }

    fn lecture(&self, l: &Lecture) -> Lecture {
        Lecture {
            course_title: self
                .courses
                .get(&l.course_id)
                .map(|c| c.title.clone())
                .unwrap_or_default(),
            teacher_ids: linked(&self.lecture_teachers, l.id),
            group_ids: linked(&self.lecture_groups, l.id),
            ..l.clone()
        }
    }

    fn course_dependents(&self, course_id: i64) -> Vec<String> {
        let mut lectures: Vec<&Lecture> = self
            .lectures
            .values()
            .filter(|l| l.course_id == course_id)
            .collect();
        lectures.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        lectures
            .into_iter()
            .map(|l| format!("Lecture: {}", l.title))
            .chain(
                self.exams
                    .values()
                    .filter(|e| e.course_id == course_id)
                    .map(|e| format!("Exam: {}", e)),
            )
            .collect()
    }
}

/// Records held in process memory, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl Repository<Student> for MemoryStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<Student>, Error> {
        let t = self.tables.read().await;
        let all = t.students.values().map(|s| t.student(s)).collect();
        Ok(select(all, query, |s: &Student| (s.id, s.last_name.as_str())))
    }

    async fn get(&self, id: i64) -> Result<Option<Student>, Error> {
        let t = self.tables.read().await;
        Ok(t.students.get(&id).map(|s| t.student(s)))
    }

    async fn create(&self, input: &StudentInput) -> Result<Student, Error> {
        let mut t = self.tables.write().await;
        let id = t.next_id();
        t.students.insert(
            id,
            Student {
                id,
                user_id: input.user_id,
                user_label: None,
                last_name: input.last_name.clone(),
                first_name: input.first_name.clone(),
                birth_date: input.birth_date,
                active: input.active,
                group_ids: Vec::new(),
            },
        );
        t.members.retain(|(_, student)| *student != id);
        t.members
            .extend(input.group_ids.iter().map(|group| (*group, id)));
        Ok(t.student(&t.students[&id]))
    }

    async fn update(&self, id: i64, input: &StudentInput) -> Result<Option<Student>, Error> {
        let mut t = self.tables.write().await;
        match t.students.get_mut(&id) {
            None => return Ok(None),
            Some(s) => {
                s.user_id = input.user_id;
                s.last_name = input.last_name.clone();
                s.first_name = input.first_name.clone();
                s.birth_date = input.birth_date;
                s.active = input.active;
            }
        }
        t.members.retain(|(_, student)| *student != id);
        t.members
            .extend(input.group_ids.iter().map(|group| (*group, id)));
        Ok(t.students.get(&id).map(|s| t.student(s)))
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let mut t = self.tables.write().await;
        if t.students.remove(&id).is_none() {
            return Ok(false);
        }
        t.members.retain(|(_, student)| *student != id);
        Ok(true)
    }
}

#[async_trait]
impl Repository<EducationGroup> for MemoryStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<EducationGroup>, Error> {
        let t = self.tables.read().await;
        let all = t.groups.values().map(|g| t.group(g)).collect();
        Ok(select(all, query, |g: &EducationGroup| (g.id, g.name.as_str())))
    }

    async fn get(&self, id: i64) -> Result<Option<EducationGroup>, Error> {
        let t = self.tables.read().await;
        Ok(t.groups.get(&id).map(|g| t.group(g)))
    }

    async fn create(&self, input: &EducationGroupInput) -> Result<EducationGroup, Error> {
        let mut t = self.tables.write().await;
        let id = t.next_id();
        t.groups.insert(
            id,
            EducationGroup {
                id,
                name: input.name.clone(),
                description: input.description.clone(),
                student_ids: Vec::new(),
            },
        );
        relink(&mut t.members, id, &input.student_ids);
        Ok(t.group(&t.groups[&id]))
    }

    async fn update(
        &self,
        id: i64,
        input: &EducationGroupInput,
    ) -> Result<Option<EducationGroup>, Error> {
        let mut t = self.tables.write().await;
        match t.groups.get_mut(&id) {
            None => return Ok(None),
            Some(g) => {
                g.name = input.name.clone();
                g.description = input.description.clone();
            }
        }
        relink(&mut t.members, id, &input.student_ids);
        Ok(t.groups.get(&id).map(|g| t.group(g)))
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let mut t = self.tables.write().await;
        if t.groups.remove(&id).is_none() {
            return Ok(false);
        }
        t.members.retain(|(group, _)| *group != id);
        t.lecture_groups.retain(|(_, group)| *group != id);
        Ok(true)
    }
}

#[async_trait]
impl Repository<Teacher> for MemoryStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<Teacher>, Error> {
        let t = self.tables.read().await;
        let all = t.teachers.values().map(|r| t.teacher(r)).collect();
        Ok(select(all, query, |r: &Teacher| (r.id, r.last_name.as_str())))
    }

    async fn get(&self, id: i64) -> Result<Option<Teacher>, Error> {
        let t = self.tables.read().await;
        Ok(t.teachers.get(&id).map(|r| t.teacher(r)))
    }

    async fn create(&self, input: &TeacherInput) -> Result<Teacher, Error> {
        let mut t = self.tables.write().await;
        let id = t.next_id();
        t.teachers.insert(
            id,
            Teacher {
                id,
                user_id: input.user_id,
                user_label: None,
                last_name: input.last_name.clone(),
                first_name: input.first_name.clone(),
                birth_date: input.birth_date,
                active: input.active,
            },
        );
        Ok(t.teacher(&t.teachers[&id]))
    }

    async fn update(&self, id: i64, input: &TeacherInput) -> Result<Option<Teacher>, Error> {
        let mut t = self.tables.write().await;
        match t.teachers.get_mut(&id) {
            None => return Ok(None),
            Some(r) => {
                r.user_id = input.user_id;
                r.last_name = input.last_name.clone();
                r.first_name = input.first_name.clone();
                r.birth_date = input.birth_date;
                r.active = input.active;
            }
        }
        Ok(t.teachers.get(&id).map(|r| t.teacher(r)))
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let mut t = self.tables.write().await;
        if t.teachers.remove(&id).is_none() {
            return Ok(false);
        }
        t.lecture_teachers.retain(|(_, teacher)| *teacher != id);
        Ok(true)
    }
}

#[async_trait]
impl Repository<Course> for MemoryStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<Course>, Error> {
        let t = self.tables.read().await;
        let all = t.courses.values().cloned().collect();
        Ok(select(all, query, |c: &Course| (c.id, c.title.as_str())))
    }

    async fn get(&self, id: i64) -> Result<Option<Course>, Error> {
        let t = self.tables.read().await;
        Ok(t.courses.get(&id).cloned())
    }

    async fn create(&self, input: &CourseInput) -> Result<Course, Error> {
        let mut t = self.tables.write().await;
        let id = t.next_id();
        let course = Course {
            id,
            title: input.title.clone(),
            description: input.description.clone(),
        };
        t.courses.insert(id, course.clone());
        Ok(course)
    }

    async fn update(&self, id: i64, input: &CourseInput) -> Result<Option<Course>, Error> {
        let mut t = self.tables.write().await;
        Ok(t.courses.get_mut(&id).map(|c| {
            c.title = input.title.clone();
            c.description = input.description.clone();
            c.clone()
        }))
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let mut t = self.tables.write().await;
        if !t.courses.contains_key(&id) {
            return Ok(false);
        }
        if !t.course_dependents(id).is_empty() {
            return Err(Error::Protected {
                message: format!("Course {} is still referenced by lectures or exams", id),
            });
        }
        t.courses.remove(&id);
        Ok(true)
    }

    async fn protected_by(&self, id: i64) -> Result<Vec<String>, Error> {
        let t = self.tables.read().await;
        Ok(t.course_dependents(id))
    }
}

#[async_trait]
impl Repository<Lecture> for MemoryStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<Lecture>, Error> {
        let t = self.tables.read().await;
        let all = t.lectures.values().map(|l| t.lecture(l)).collect();
        Ok(select(all, query, |l: &Lecture| (l.id, l.title.as_str())))
    }

    async fn get(&self, id: i64) -> Result<Option<Lecture>, Error> {
        let t = self.tables.read().await;
        Ok(t.lectures.get(&id).map(|l| t.lecture(l)))
    }

    async fn create(&self, input: &LectureInput) -> Result<Lecture, Error> {
        let mut t = self.tables.write().await;
        if !t.courses.contains_key(&input.course_id) {
            return Err(Error::Protected {
                message: format!("Course {} does not exist", input.course_id),
            });
        }
        let id = t.next_id();
        t.lectures.insert(
            id,
            Lecture {
                id,
                title: input.title.clone(),
                description: input.description.clone(),
                course_id: input.course_id,
                course_title: String::new(),
                start: input.start,
                finish: input.finish,
                teacher_ids: Vec::new(),
                group_ids: Vec::new(),
            },
        );
        relink(&mut t.lecture_teachers, id, &input.teacher_ids);
        relink(&mut t.lecture_groups, id, &input.group_ids);
        Ok(t.lecture(&t.lectures[&id]))
    }

    async fn update(&self, id: i64, input: &LectureInput) -> Result<Option<Lecture>, Error> {
        let mut t = self.tables.write().await;
        if !t.courses.contains_key(&input.course_id) {
            return Err(Error::Protected {
                message: format!("Course {} does not exist", input.course_id),
            });
        }
        match t.lectures.get_mut(&id) {
            None => return Ok(None),
            Some(l) => {
                l.title = input.title.clone();
                l.description = input.description.clone();
                l.course_id = input.course_id;
                l.start = input.start;
                l.finish = input.finish;
            }
        }
        relink(&mut t.lecture_teachers, id, &input.teacher_ids);
        relink(&mut t.lecture_groups, id, &input.group_ids);
        Ok(t.lectures.get(&id).map(|l| t.lecture(l)))
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let mut t = self.tables.write().await;
        if t.lectures.remove(&id).is_none() {
            return Ok(false);
        }
        t.lecture_teachers.retain(|(lecture, _)| *lecture != id);
        t.lecture_groups.retain(|(lecture, _)| *lecture != id);
        Ok(true)
    }
}

#[async_trait]
impl Accounts for MemoryStore {
    async fn user(&self, id: i64) -> Result<Option<User>, Error> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.username == username).cloned())
    }

    async fn insert_user(&self, user: &NewUser) -> Result<User, Error> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.username == user.username) {
            return Err(Error::Conflict {
                message: format!("A user with username `{}` already exists", user.username),
            });
        }
        let id = t.next_id();
        let user = User {
            id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            is_staff: user.is_staff,
            is_active: user.is_active,
            date_joined: Utc::now(),
        };
        t.users.insert(id, user.clone());
        Ok(user)
    }

    async fn delete_user(&self, id: i64) -> Result<bool, Error> {
        let mut t = self.tables.write().await;
        if t.users.remove(&id).is_none() {
            return Ok(false);
        }
        t.sessions.retain(|_, s| s.belongs_to != id);
        for s in t.students.values_mut().filter(|s| s.user_id == Some(id)) {
            s.user_id = None;
        }
        for r in t.teachers.values_mut().filter(|r| r.user_id == Some(id)) {
            r.user_id = None;
        }
        Ok(true)
    }

    async fn pickable_users(&self, query: &ListQuery) -> Result<Found<User>, Error> {
        let t = self.tables.read().await;
        let all = t.users.values().filter(|u| !u.is_staff).cloned().collect();
        Ok(select(all, query, |u: &User| (u.id, u.username.as_str())))
    }

    async fn session(&self, ssid: &str) -> Result<Option<UserSession>, Error> {
        Ok(self.tables.read().await.sessions.get(ssid).cloned())
    }

    async fn session_of(&self, user_id: i64) -> Result<Option<UserSession>, Error> {
        let t = self.tables.read().await;
        Ok(t.sessions
            .values()
            .filter(|s| s.belongs_to == user_id)
            .max_by_key(|s| s.expires_at)
            .cloned())
    }

    async fn insert_session(&self, session: &UserSession) -> Result<(), Error> {
        let mut t = self.tables.write().await;
        t.sessions.insert(session.ssid.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, ssid: &str) -> Result<bool, Error> {
        Ok(self.tables.write().await.sessions.remove(ssid).is_some())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn students(&self) -> &dyn Repository<Student> {
        self
    }

    fn groups(&self) -> &dyn Repository<EducationGroup> {
        self
    }

    fn teachers(&self) -> &dyn Repository<Teacher> {
        self
    }

    fn courses(&self) -> &dyn Repository<Course> {
        self
    }

    fn lectures(&self) -> &dyn Repository<Lecture> {
        self
    }

    async fn insert_exam(&self, course_id: i64) -> Result<Exam, Error> {
        let mut t = self.tables.write().await;
        if !t.courses.contains_key(&course_id) {
            return Err(Error::not_found(format!("No course with id {}", course_id)));
        }
        let id = t.next_id();
        let exam = Exam { id, course_id };
        t.exams.insert(id, exam.clone());
        Ok(exam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Match;
    use chrono::{NaiveDate, TimeZone};

    fn everything() -> ListQuery {
        ListQuery {
            search: None,
            exclude: vec![],
            offset: 0,
            limit: 100,
        }
    }

    fn student(last_name: &str, group_ids: Vec<i64>) -> StudentInput {
        StudentInput {
            user_id: None,
            last_name: last_name.to_string(),
            first_name: "Test".to_string(),
            birth_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            active: true,
            group_ids,
        }
    }

    async fn course(store: &MemoryStore, title: &str) -> Course {
        store
            .courses()
            .create(&CourseInput {
                title: title.to_string(),
                description: String::new(),
            })
            .await
            .unwrap()
    }

    fn lecture(course_id: i64) -> LectureInput {
        LectureInput {
            title: "Intro".to_string(),
            description: String::new(),
            course_id,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            finish: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            teacher_ids: vec![],
            group_ids: vec![],
        }
    }

    #[tokio::test]
    async fn search_is_case_insensitive_substring() {
        let store = MemoryStore::new();
        store.students().create(&student("Smith", vec![])).await.unwrap();
        store.students().create(&student("Jones", vec![])).await.unwrap();

        let mut query = everything();
        query.search = Some(Match::Contains("SM".into()));
        let found = store.students().list(&query).await.unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.items[0].last_name, "Smith");

        let found = store.students().list(&everything()).await.unwrap();
        let names: Vec<&str> = found.items.iter().map(|s| s.last_name.as_str()).collect();
        assert_eq!(names, vec!["Jones", "Smith"]);
    }

    #[tokio::test]
    async fn memberships_show_on_both_sides() {
        let store = MemoryStore::new();
        let s = store.students().create(&student("Smith", vec![])).await.unwrap();
        let g = store
            .groups()
            .create(&EducationGroupInput {
                name: "A1".into(),
                description: String::new(),
                student_ids: vec![s.id],
            })
            .await
            .unwrap();
        assert_eq!(g.student_ids, vec![s.id]);
        let s = store.students().get(s.id).await.unwrap().unwrap();
        assert_eq!(s.group_ids, vec![g.id]);

        assert!(store.students().delete(s.id).await.unwrap());
        let g = store.groups().get(g.id).await.unwrap().unwrap();
        assert!(g.student_ids.is_empty());
    }

    #[tokio::test]
    async fn course_with_lectures_is_protected() {
        let store = MemoryStore::new();
        let used = course(&store, "Rust").await;
        let unused = course(&store, "Go").await;
        store.lectures().create(&lecture(used.id)).await.unwrap();

        let err = store.courses().delete(used.id).await.unwrap_err();
        assert!(matches!(err, Error::Protected { .. }));
        assert_eq!(
            store.courses().protected_by(used.id).await.unwrap(),
            vec!["Lecture: Intro".to_string()]
        );
        assert!(store.courses().delete(unused.id).await.unwrap());
        assert!(!store.courses().delete(unused.id).await.unwrap());
    }

    #[tokio::test]
    async fn course_with_exam_is_protected() {
        let store = MemoryStore::new();
        let c = course(&store, "Rust").await;
        let exam = store.insert_exam(c.id).await.unwrap();
        assert_eq!(
            store.courses().protected_by(c.id).await.unwrap(),
            vec![format!("Exam: {}", c.id)]
        );
        assert_eq!(exam.course_id, c.id);
        assert!(store.courses().delete(c.id).await.is_err());
    }

    #[tokio::test]
    async fn deleting_user_unlinks_records() {
        let store = MemoryStore::new();
        let user = store
            .insert_user(&NewUser {
                username: "jsmith".into(),
                first_name: "John".into(),
                last_name: "Smith".into(),
                email: String::new(),
                password_hash: String::new(),
                is_staff: false,
                is_active: true,
            })
            .await
            .unwrap();
        let mut input = student("Smith", vec![]);
        input.user_id = Some(user.id);
        let s = store.students().create(&input).await.unwrap();
        assert_eq!(s.user_label.as_deref(), Some(" <jsmith> Smith"));

        assert!(store.delete_user(user.id).await.unwrap());
        let s = store.students().get(s.id).await.unwrap().unwrap();
        assert_eq!(s.user_id, None);
        assert_eq!(s.user_label, None);
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let store = MemoryStore::new();
        let new = NewUser {
            username: "root".into(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            password_hash: String::new(),
            is_staff: true,
            is_active: true,
        };
        store.insert_user(&new).await.unwrap();
        assert!(matches!(
            store.insert_user(&new).await,
            Err(Error::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn update_of_missing_record_is_none() {
        let store = MemoryStore::new();
        let res = store
            .courses()
            .update(
                42,
                &CourseInput {
                    title: "x".into(),
                    description: String::new(),
                },
            )
            .await
            .unwrap();
        assert!(res.is_none());
    }
}

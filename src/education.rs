//! The five record kinds of the education dashboard and the pickers that
//! offer them.
use async_trait::async_trait;

use crate::err::Error;
use crate::forms::{CourseForm, EducationGroupForm, LectureForm, StudentForm, TeacherForm};
use crate::listing::{Choices, Found, ListQuery, Resource};
use crate::models::{Course, EducationGroup, Lecture, Student, Teacher, User};
use crate::store::{Accounts, Repository, Store};

impl Resource for Student {
    type Form = StudentForm;

    const NOUN: &'static str = "student";
    const MESSAGE_NAME: &'static str = "Student";
    const CAPTION: (&'static str, &'static str) = ("Student", "Students");
    const ROUTE: &'static str = "students";
    const SEARCH_FIELD: &'static str = "last_name";

    fn id(&self) -> i64 {
        self.id
    }

    fn search_key(&self) -> &str {
        &self.last_name
    }

    fn repository(store: &dyn Store) -> &dyn Repository<Self> {
        store.students()
    }
}

impl Resource for EducationGroup {
    type Form = EducationGroupForm;

    const NOUN: &'static str = "group";
    const MESSAGE_NAME: &'static str = "Education Group";
    const CAPTION: (&'static str, &'static str) = ("Group", "Groups");
    const ROUTE: &'static str = "education-groups";
    const SEARCH_FIELD: &'static str = "name";

    fn id(&self) -> i64 {
        self.id
    }

    fn search_key(&self) -> &str {
        &self.name
    }

    fn repository(store: &dyn Store) -> &dyn Repository<Self> {
        store.groups()
    }
}

impl Resource for Teacher {
    type Form = TeacherForm;

    const NOUN: &'static str = "teacher";
    const MESSAGE_NAME: &'static str = "Teacher";
    const CAPTION: (&'static str, &'static str) = ("Teacher", "Teachers");
    const ROUTE: &'static str = "teachers";
    const SEARCH_FIELD: &'static str = "last_name";

    fn id(&self) -> i64 {
        self.id
    }

    fn search_key(&self) -> &str {
        &self.last_name
    }

    fn repository(store: &dyn Store) -> &dyn Repository<Self> {
        store.teachers()
    }
}

impl Resource for Course {
    type Form = CourseForm;

    const NOUN: &'static str = "course";
    const MESSAGE_NAME: &'static str = "Course";
    const CAPTION: (&'static str, &'static str) = ("Course", "Courses");
    const ROUTE: &'static str = "courses";
    const SEARCH_FIELD: &'static str = "title";

    fn id(&self) -> i64 {
        self.id
    }

    fn search_key(&self) -> &str {
        &self.title
    }

    fn repository(store: &dyn Store) -> &dyn Repository<Self> {
        store.courses()
    }
}

impl Resource for Lecture {
    type Form = LectureForm;

    const NOUN: &'static str = "lecture";
    const MESSAGE_NAME: &'static str = "Lecture";
    const CAPTION: (&'static str, &'static str) = ("Lecture", "Lectures");
    const ROUTE: &'static str = "lectures";
    const SEARCH_FIELD: &'static str = "title";

    fn id(&self) -> i64 {
        self.id
    }

    fn search_key(&self) -> &str {
        &self.title
    }

    fn repository(store: &dyn Store) -> &dyn Repository<Self> {
        store.lectures()
    }
}

#[async_trait]
impl Choices for User {
    const FORWARD: &'static [&'static str] = &["user"];

    fn choice_id(&self) -> i64 {
        self.id
    }

    async fn candidates(store: &dyn Store, query: &ListQuery) -> Result<Found<Self>, Error> {
        store.pickable_users(query).await
    }
}

#[async_trait]
impl Choices for EducationGroup {
    const FORWARD: &'static [&'static str] = &["education_groups", "groups"];

    fn choice_id(&self) -> i64 {
        self.id
    }

    async fn candidates(store: &dyn Store, query: &ListQuery) -> Result<Found<Self>, Error> {
        store.groups().list(query).await
    }
}

#[async_trait]
impl Choices for Teacher {
    const FORWARD: &'static [&'static str] = &["teachers"];

    fn choice_id(&self) -> i64 {
        self.id
    }

    async fn candidates(store: &dyn Store, query: &ListQuery) -> Result<Found<Self>, Error> {
        store.teachers().list(query).await
    }
}

#[async_trait]
impl Choices for Course {
    const FORWARD: &'static [&'static str] = &["courses", "course"];

    fn choice_id(&self) -> i64 {
        self.id
    }

    async fn candidates(store: &dyn Store, query: &ListQuery) -> Result<Found<Self>, Error> {
        store.courses().list(query).await
    }
}

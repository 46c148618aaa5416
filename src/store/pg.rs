/*!
Postgres-backed store.
*/
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, QueryBuilder, Row};

use crate::err::Error;
use crate::forms::{CourseInput, EducationGroupInput, LectureInput, StudentInput, TeacherInput};
use crate::listing::{Found, ListQuery};
use crate::models::{
    Course, EducationGroup, Exam, Lecture, NewUser, Student, Teacher, User, UserSession,
};
use crate::store::{Accounts, Repository, Store};

static SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(150) NOT NULL UNIQUE,
        first_name VARCHAR(150) NOT NULL DEFAULT '',
        last_name VARCHAR(150) NOT NULL DEFAULT '',
        email VARCHAR(254) NOT NULL DEFAULT '',
        password_hash TEXT NOT NULL,
        is_staff BOOLEAN NOT NULL DEFAULT FALSE,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        date_joined TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS user_sessions (
        ssid TEXT PRIMARY KEY,
        belongs_to BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS students (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT REFERENCES users (id) ON DELETE SET NULL,
        last_name VARCHAR(200) NOT NULL,
        first_name VARCHAR(200) NOT NULL,
        birth_date DATE NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS education_groups (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(200) NOT NULL,
        description TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS education_groups_name_idx ON education_groups (name)",
    "CREATE TABLE IF NOT EXISTS education_group_users (
        group_id BIGINT NOT NULL REFERENCES education_groups (id) ON DELETE CASCADE,
        student_id BIGINT NOT NULL REFERENCES students (id) ON DELETE CASCADE,
        PRIMARY KEY (group_id, student_id)
    )",
    "CREATE TABLE IF NOT EXISTS teachers (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT REFERENCES users (id) ON DELETE SET NULL,
        last_name VARCHAR(255) NOT NULL,
        first_name VARCHAR(255) NOT NULL,
        birth_date DATE NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS courses (
        id BIGSERIAL PRIMARY KEY,
        title VARCHAR(127) NOT NULL,
        description TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS lectures (
        id BIGSERIAL PRIMARY KEY,
        title VARCHAR(200) NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        course_id BIGINT NOT NULL REFERENCES courses (id) ON DELETE RESTRICT,
        start TIMESTAMPTZ NOT NULL,
        finish TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS lecture_teachers (
        lecture_id BIGINT NOT NULL REFERENCES lectures (id) ON DELETE CASCADE,
        teacher_id BIGINT NOT NULL REFERENCES teachers (id) ON DELETE CASCADE,
        PRIMARY KEY (lecture_id, teacher_id)
    )",
    "CREATE TABLE IF NOT EXISTS lecture_groups (
        lecture_id BIGINT NOT NULL REFERENCES lectures (id) ON DELETE CASCADE,
        group_id BIGINT NOT NULL REFERENCES education_groups (id) ON DELETE CASCADE,
        PRIMARY KEY (lecture_id, group_id)
    )",
    "CREATE TABLE IF NOT EXISTS exams (
        id BIGSERIAL PRIMARY KEY,
        course_id BIGINT NOT NULL REFERENCES courses (id) ON DELETE RESTRICT
    )",
];

/// How a record kind is read from its table(s).
pub trait PgTable: for<'r> FromRow<'r, PgRow> + Send + Unpin {
    const FROM: &'static str;
    const COLUMNS: &'static str;
    const ID: &'static str;
    /// Column matched by searches and used for default ordering.
    const SEARCH: &'static str;
    /// Condition every listed row must meet.
    const SCOPE: &'static str = "TRUE";
}

impl PgTable for User {
    const FROM: &'static str = "users u";
    const COLUMNS: &'static str = "u.id, u.username, u.first_name, u.last_name, u.email, \
        u.password_hash, u.is_staff, u.is_active, u.date_joined";
    const ID: &'static str = "u.id";
    const SEARCH: &'static str = "u.username";
    const SCOPE: &'static str = "NOT u.is_staff";
}

impl PgTable for Student {
    const FROM: &'static str = "students s";
    const COLUMNS: &'static str = "s.id, s.user_id, \
        (SELECT ' <' || u.username || '> ' || u.last_name FROM users u WHERE u.id = s.user_id) AS user_label, \
        s.last_name, s.first_name, s.birth_date, s.active, \
        ARRAY(SELECT m.group_id FROM education_group_users m WHERE m.student_id = s.id ORDER BY m.group_id) AS group_ids";
    const ID: &'static str = "s.id";
    const SEARCH: &'static str = "s.last_name";
}

impl PgTable for EducationGroup {
    const FROM: &'static str = "education_groups g";
    const COLUMNS: &'static str = "g.id, g.name, g.description, \
        ARRAY(SELECT m.student_id FROM education_group_users m WHERE m.group_id = g.id ORDER BY m.student_id) AS student_ids";
    const ID: &'static str = "g.id";
    const SEARCH: &'static str = "g.name";
}

impl PgTable for Teacher {
    const FROM: &'static str = "teachers t";
    const COLUMNS: &'static str = "t.id, t.user_id, \
        (SELECT ' <' || u.username || '> ' || u.last_name FROM users u WHERE u.id = t.user_id) AS user_label, \
        t.last_name, t.first_name, t.birth_date, t.active";
    const ID: &'static str = "t.id";
    const SEARCH: &'static str = "t.last_name";
}

impl PgTable for Course {
    const FROM: &'static str = "courses c";
    const COLUMNS: &'static str = "c.id, c.title, c.description";
    const ID: &'static str = "c.id";
    const SEARCH: &'static str = "c.title";
}

impl PgTable for Lecture {
    const FROM: &'static str = "lectures l JOIN courses c ON c.id = l.course_id";
    const COLUMNS: &'static str = "l.id, l.title, l.description, l.course_id, c.title AS course_title, \
        l.start, l.finish, \
        ARRAY(SELECT x.teacher_id FROM lecture_teachers x WHERE x.lecture_id = l.id ORDER BY x.teacher_id) AS teacher_ids, \
        ARRAY(SELECT x.group_id FROM lecture_groups x WHERE x.lecture_id = l.id ORDER BY x.group_id) AS group_ids";
    const ID: &'static str = "l.id";
    const SEARCH: &'static str = "l.title";
}

fn push_filters<T: PgTable>(qb: &mut QueryBuilder<'static, Postgres>, query: &ListQuery) {
    qb.push(" WHERE ").push(T::SCOPE);
    if let Some(m) = &query.search {
        qb.push(" AND ")
            .push(T::SEARCH)
            .push(" ILIKE ")
            .push_bind(m.pattern());
    }
    if !query.exclude.is_empty() {
        qb.push(" AND NOT (")
            .push(T::ID)
            .push(" = ANY(")
            .push_bind(query.exclude.clone())
            .push("))");
    }
}

fn count_builder<T: PgTable>(query: &ListQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", T::FROM));
    push_filters::<T>(&mut qb, query);
    qb
}

fn select_builder<T: PgTable>(query: &ListQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM {}", T::COLUMNS, T::FROM));
    push_filters::<T>(&mut qb, query);
    qb.push(" ORDER BY LOWER(")
        .push(T::SEARCH)
        .push("), ")
        .push(T::ID)
        .push(" LIMIT ")
        .push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
        .push(" OFFSET ")
        .push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
    qb
}

async fn list<T: PgTable>(pool: &PgPool, query: &ListQuery) -> Result<Found<T>, Error> {
    let total: i64 = count_builder::<T>(query)
        .build()
        .fetch_one(pool)
        .await?
        .try_get(0)?;
    let rows = select_builder::<T>(query).build().fetch_all(pool).await?;
    let items = rows
        .iter()
        .map(T::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Found {
        total: total as u64,
        items,
    })
}

async fn get<T: PgTable>(pool: &PgPool, id: i64) -> Result<Option<T>, Error> {
    let sql = format!("SELECT {} FROM {} WHERE {} = $1", T::COLUMNS, T::FROM, T::ID);
    let row = sqlx::query_as::<_, T>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

async fn reread<T: PgTable>(pool: &PgPool, id: i64) -> Result<T, Error> {
    get::<T>(pool, id)
        .await?
        .ok_or_else(|| Error::internal("DatabaseError", format!("Record {} vanished after saving", id)))
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(PgStore::new(pool))
    }

    pub async fn ensure_db_schema(&self) -> Result<(), Error> {
        log::trace!("Ensuring database schema ({} statements)...", SCHEMA.len());
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        log::trace!("...schema okay.");
        Ok(())
    }
}

#[async_trait]
impl Repository<Student> for PgStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<Student>, Error> {
        list(&self.pool, query).await
    }

    async fn get(&self, id: i64) -> Result<Option<Student>, Error> {
        get(&self.pool, id).await
    }

    async fn create(&self, input: &StudentInput) -> Result<Student, Error> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO students (user_id, last_name, first_name, birth_date, active) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(input.user_id)
        .bind(&input.last_name)
        .bind(&input.first_name)
        .bind(input.birth_date)
        .bind(input.active)
        .fetch_one(&mut tx)
        .await?;
        sqlx::query(
            "INSERT INTO education_group_users (group_id, student_id) \
             SELECT g, $2 FROM UNNEST($1::BIGINT[]) AS g",
        )
        .bind(&input.group_ids)
        .bind(id)
        .execute(&mut tx)
        .await?;
        tx.commit().await?;
        reread(&self.pool, id).await
    }

    async fn update(&self, id: i64, input: &StudentInput) -> Result<Option<Student>, Error> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "UPDATE students SET user_id = $1, last_name = $2, first_name = $3, \
             birth_date = $4, active = $5 WHERE id = $6",
        )
        .bind(input.user_id)
        .bind(&input.last_name)
        .bind(&input.first_name)
        .bind(input.birth_date)
        .bind(input.active)
        .bind(id)
        .execute(&mut tx)
        .await?;
        if res.rows_affected() < 1 {
            return Ok(None);
        }
        sqlx::query("DELETE FROM education_group_users WHERE student_id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;
        sqlx::query(
            "INSERT INTO education_group_users (group_id, student_id) \
             SELECT g, $2 FROM UNNEST($1::BIGINT[]) AS g",
        )
        .bind(&input.group_ids)
        .bind(id)
        .execute(&mut tx)
        .await?;
        tx.commit().await?;
        get(&self.pool, id).await
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let res = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }
}

#[async_trait]
impl Repository<EducationGroup> for PgStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<EducationGroup>, Error> {
        list(&self.pool, query).await
    }

    async fn get(&self, id: i64) -> Result<Option<EducationGroup>, Error> {
        get(&self.pool, id).await
    }

    async fn create(&self, input: &EducationGroupInput) -> Result<EducationGroup, Error> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO education_groups (name, description) VALUES ($1, $2) RETURNING id",
        )
        .bind(&input.name)
        .bind(&input.description)
        .fetch_one(&mut tx)
        .await?;
        sqlx::query(
            "INSERT INTO education_group_users (group_id, student_id) \
             SELECT $1, s FROM UNNEST($2::BIGINT[]) AS s",
        )
        .bind(id)
        .bind(&input.student_ids)
        .execute(&mut tx)
        .await?;
        tx.commit().await?;
        reread(&self.pool, id).await
    }

    async fn update(
        &self,
        id: i64,
        input: &EducationGroupInput,
    ) -> Result<Option<EducationGroup>, Error> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query("UPDATE education_groups SET name = $1, description = $2 WHERE id = $3")
            .bind(&input.name)
            .bind(&input.description)
            .bind(id)
            .execute(&mut tx)
            .await?;
        if res.rows_affected() < 1 {
            return Ok(None);
        }
        sqlx::query("DELETE FROM education_group_users WHERE group_id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;
        sqlx::query(
            "INSERT INTO education_group_users (group_id, student_id) \
             SELECT $1, s FROM UNNEST($2::BIGINT[]) AS s",
        )
        .bind(id)
        .bind(&input.student_ids)
        .execute(&mut tx)
        .await?;
        tx.commit().await?;
        get(&self.pool, id).await
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let res = sqlx::query("DELETE FROM education_groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }
}

#[async_trait]
impl Repository<Teacher> for PgStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<Teacher>, Error> {
        list(&self.pool, query).await
    }

    async fn get(&self, id: i64) -> Result<Option<Teacher>, Error> {
        get(&self.pool, id).await
    }

    async fn create(&self, input: &TeacherInput) -> Result<Teacher, Error> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO teachers (user_id, last_name, first_name, birth_date, active) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(input.user_id)
        .bind(&input.last_name)
        .bind(&input.first_name)
        .bind(input.birth_date)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await?;
        reread(&self.pool, id).await
    }

    async fn update(&self, id: i64, input: &TeacherInput) -> Result<Option<Teacher>, Error> {
        let res = sqlx::query(
            "UPDATE teachers SET user_id = $1, last_name = $2, first_name = $3, \
             birth_date = $4, active = $5 WHERE id = $6",
        )
        .bind(input.user_id)
        .bind(&input.last_name)
        .bind(&input.first_name)
        .bind(input.birth_date)
        .bind(input.active)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() < 1 {
            return Ok(None);
        }
        get(&self.pool, id).await
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let res = sqlx::query("DELETE FROM teachers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }
}

#[async_trait]
impl Repository<Course> for PgStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<Course>, Error> {
        list(&self.pool, query).await
    }

    async fn get(&self, id: i64) -> Result<Option<Course>, Error> {
        get(&self.pool, id).await
    }

    async fn create(&self, input: &CourseInput) -> Result<Course, Error> {
        let course = sqlx::query_as::<_, Course>(
            "INSERT INTO courses (title, description) VALUES ($1, $2) \
             RETURNING id, title, description",
        )
        .bind(&input.title)
        .bind(&input.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(course)
    }

    async fn update(&self, id: i64, input: &CourseInput) -> Result<Option<Course>, Error> {
        let course = sqlx::query_as::<_, Course>(
            "UPDATE courses SET title = $1, description = $2 WHERE id = $3 \
             RETURNING id, title, description",
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(course)
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let res = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn protected_by(&self, id: i64) -> Result<Vec<String>, Error> {
        let lectures: Vec<String> =
            sqlx::query_scalar("SELECT title FROM lectures WHERE course_id = $1 ORDER BY title, id")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        let exams = sqlx::query_as::<_, Exam>(
            "SELECT id, course_id FROM exams WHERE course_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lectures
            .into_iter()
            .map(|title| format!("Lecture: {}", title))
            .chain(exams.iter().map(|exam| format!("Exam: {}", exam)))
            .collect())
    }
}

#[async_trait]
impl Repository<Lecture> for PgStore {
    async fn list(&self, query: &ListQuery) -> Result<Found<Lecture>, Error> {
        list(&self.pool, query).await
    }

    async fn get(&self, id: i64) -> Result<Option<Lecture>, Error> {
        get(&self.pool, id).await
    }

    async fn create(&self, input: &LectureInput) -> Result<Lecture, Error> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO lectures (title, description, course_id, start, finish) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.course_id)
        .bind(input.start)
        .bind(input.finish)
        .fetch_one(&mut tx)
        .await?;
        link_lecture(&mut tx, id, input).await?;
        tx.commit().await?;
        reread(&self.pool, id).await
    }

    async fn update(&self, id: i64, input: &LectureInput) -> Result<Option<Lecture>, Error> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "UPDATE lectures SET title = $1, description = $2, course_id = $3, \
             start = $4, finish = $5 WHERE id = $6",
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(input.course_id)
        .bind(input.start)
        .bind(input.finish)
        .bind(id)
        .execute(&mut tx)
        .await?;
        if res.rows_affected() < 1 {
            return Ok(None);
        }
        sqlx::query("DELETE FROM lecture_teachers WHERE lecture_id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;
        sqlx::query("DELETE FROM lecture_groups WHERE lecture_id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;
        link_lecture(&mut tx, id, input).await?;
        tx.commit().await?;
        get(&self.pool, id).await
    }

    async fn delete(&self, id: i64) -> Result<bool, Error> {
        let res = sqlx::query("DELETE FROM lectures WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }
}

async fn link_lecture(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    id: i64,
    input: &LectureInput,
) -> Result<(), Error> {
    sqlx::query(
        "INSERT INTO lecture_teachers (lecture_id, teacher_id) \
         SELECT $1, t FROM UNNEST($2::BIGINT[]) AS t",
    )
    .bind(id)
    .bind(&input.teacher_ids)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO lecture_groups (lecture_id, group_id) \
         SELECT $1, g FROM UNNEST($2::BIGINT[]) AS g",
    )
    .bind(id)
    .bind(&input.group_ids)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

#[async_trait]
impl Accounts for PgStore {
    async fn user(&self, id: i64) -> Result<Option<User>, Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1 LIMIT 1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: &NewUser) -> Result<User, Error> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, first_name, last_name, email, password_hash, is_staff, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_staff)
        .bind(user.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_user(&self, id: i64) -> Result<bool, Error> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn pickable_users(&self, query: &ListQuery) -> Result<Found<User>, Error> {
        list(&self.pool, query).await
    }

    async fn session(&self, ssid: &str) -> Result<Option<UserSession>, Error> {
        let session = sqlx::query_as::<_, UserSession>(
            "SELECT ssid, belongs_to, expires_at FROM user_sessions WHERE ssid = $1 LIMIT 1",
        )
        .bind(ssid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn session_of(&self, user_id: i64) -> Result<Option<UserSession>, Error> {
        let session = sqlx::query_as::<_, UserSession>(
            "SELECT ssid, belongs_to, expires_at FROM user_sessions WHERE belongs_to = $1 \
             ORDER BY expires_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn insert_session(&self, session: &UserSession) -> Result<(), Error> {
        let res = sqlx::query(
            "INSERT INTO user_sessions (ssid, belongs_to, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(&session.ssid)
        .bind(session.belongs_to)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() < 1 {
            return Err(Error::internal("DatabaseError", "Could not save session!"));
        }
        Ok(())
    }

    async fn delete_session(&self, ssid: &str) -> Result<bool, Error> {
        let res = sqlx::query("DELETE FROM user_sessions WHERE ssid = $1")
            .bind(ssid)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() >= 1)
    }
}

#[async_trait]
impl Store for PgStore {
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
        if get::<Course>(&self.pool, course_id).await?.is_none() {
            return Err(Error::not_found(format!("No course with id {}", course_id)));
        }
        let exam = sqlx::query_as::<_, Exam>(
            "INSERT INTO exams (course_id) VALUES ($1) RETURNING id, course_id",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Match;

    #[test]
    fn unfiltered_listing_sql() {
        let query = ListQuery {
            search: None,
            exclude: vec![],
            offset: 25,
            limit: 25,
        };
        let qb = select_builder::<Course>(&query);
        assert_eq!(
            qb.sql(),
            "SELECT c.id, c.title, c.description FROM courses c WHERE TRUE \
             ORDER BY LOWER(c.title), c.id LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn search_and_exclusions_are_bound() {
        let query = ListQuery {
            search: Some(Match::StartsWith("Jo".into())),
            exclude: vec![4, 5],
            offset: 0,
            limit: 10,
        };
        let qb = count_builder::<Teacher>(&query);
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM teachers t WHERE TRUE AND t.last_name ILIKE $1 \
             AND NOT (t.id = ANY($2))"
        );
    }

    #[test]
    fn user_candidates_exclude_staff() {
        let query = ListQuery {
            search: None,
            exclude: vec![],
            offset: 0,
            limit: 10,
        };
        let qb = count_builder::<User>(&query);
        assert_eq!(qb.sql(), "SELECT COUNT(*) FROM users u WHERE NOT u.is_staff");
    }
}

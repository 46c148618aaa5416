/*!
Persistence seams. Each record kind is reached through a `Repository`;
accounts and sessions through `Accounts`. `Store` ties them together and is
implemented by the Postgres store and by the in-memory store.
*/
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Cfg;
use crate::err::Error;
use crate::forms::ModelForm;
use crate::listing::{Found, ListQuery, Resource};
use crate::models::{
    Course, EducationGroup, Exam, Lecture, NewUser, Student, Teacher, User, UserSession,
};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Validated form data for a record of kind `R`.
pub type Input<R> = <<R as Resource>::Form as ModelForm>::Cleaned;

#[async_trait]
pub trait Repository<R: Resource>: Send + Sync {
    async fn list(&self, query: &ListQuery) -> Result<Found<R>, Error>;

    async fn get(&self, id: i64) -> Result<Option<R>, Error>;

    async fn create(&self, input: &Input<R>) -> Result<R, Error>;

    /// `Ok(None)` when no record has this id.
    async fn update(&self, id: i64, input: &Input<R>) -> Result<Option<R>, Error>;

    /// `Ok(false)` when no record has this id; `Error::Protected` when other
    /// records still depend on it.
    async fn delete(&self, id: i64) -> Result<bool, Error>;

    /// Labels of the records that keep this one from being deleted.
    async fn protected_by(&self, _id: i64) -> Result<Vec<String>, Error> {
        Ok(Vec::new())
    }

    /// The ids among `ids` that name no record.
    async fn missing(&self, ids: &[i64]) -> Result<Vec<i64>, Error> {
        let mut missing = Vec::new();
        for id in ids {
            if self.get(*id).await?.is_none() {
                missing.push(*id);
            }
        }
        Ok(missing)
    }
}

#[async_trait]
pub trait Accounts: Send + Sync {
    async fn user(&self, id: i64) -> Result<Option<User>, Error>;

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, Error>;

    async fn insert_user(&self, user: &NewUser) -> Result<User, Error>;

    /// Removes the account. Students and teachers linked to it stay, unlinked.
    async fn delete_user(&self, id: i64) -> Result<bool, Error>;

    /// Non-staff accounts matching `query`, for linking to a student or teacher.
    async fn pickable_users(&self, query: &ListQuery) -> Result<Found<User>, Error>;

    async fn session(&self, ssid: &str) -> Result<Option<UserSession>, Error>;

    async fn session_of(&self, user_id: i64) -> Result<Option<UserSession>, Error>;

    async fn insert_session(&self, session: &UserSession) -> Result<(), Error>;

    async fn delete_session(&self, ssid: &str) -> Result<bool, Error>;
}

#[async_trait]
pub trait Store: Accounts {
    fn students(&self) -> &dyn Repository<Student>;
    fn groups(&self) -> &dyn Repository<EducationGroup>;
    fn teachers(&self) -> &dyn Repository<Teacher>;
    fn courses(&self) -> &dyn Repository<Course>;
    fn lectures(&self) -> &dyn Repository<Lecture>;

    async fn insert_exam(&self, course_id: i64) -> Result<Exam, Error>;
}

/// Opens the configured store: Postgres when a database URL is set,
/// otherwise a fresh in-memory store.
pub async fn connect(cfg: &Cfg) -> anyhow::Result<Arc<dyn Store>> {
    match &cfg.database_url {
        Some(url) => {
            log::info!("Connecting to Postgres ({} connections max)", cfg.max_connections);
            let store = PgStore::connect(url, cfg.max_connections).await?;
            store.ensure_db_schema().await?;
            Ok(Arc::new(store))
        }
        None => {
            log::warn!("No DATABASE_URL configured; records are kept in memory only.");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

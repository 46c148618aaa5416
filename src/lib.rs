pub mod auth;
pub mod config;
pub mod dashboard;
pub mod education;
pub mod err;
pub mod forms;
pub mod listing;
pub mod models;
pub mod store;
pub mod tables;
pub mod urls;

use std::sync::Arc;

use serde::Serialize;

use crate::config::Cfg;
use crate::err::{Fine, Maybe, Nothing};
use crate::store::Store;

pub use crate::dashboard::app;
pub use crate::err::Error;

pub type Payload<T> = Result<Maybe<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Fine(value))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok(Nothing(err))
}

/// Shared by every handler through an `Extension` layer.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cfg: Arc<Cfg>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, cfg: Cfg) -> Self {
        AppState {
            store,
            cfg: Arc::new(cfg),
        }
    }
}

/*!
Dashboard pages. Every listing, form and confirmation page is one generic
handler instantiated per record kind; autocomplete endpoints likewise per
picker kind.
*/
use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::handler::Handler;
use axum::response::Redirect;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{self, Actor, Staff};
use crate::err::handler404;
use crate::forms::{validate, ModelForm};
use crate::listing::{
    clean_search, forwarded_ids, visible, visible_one, Choices, ListQuery, Match, PageRequest,
    Resource, AUTOCOMPLETE_PAGE_SIZE, SEARCH_MAX_LENGTH,
};
use crate::models::{Course, EducationGroup, Lecture, Student, Teacher, User};
use crate::store::Repository;
use crate::tables::Table;
use crate::{breaks, proceeds, urls, AppState, Error, Payload};

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    caption: &'static str,
    url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Home {
    greeting: String,
    sections: Vec<Section>,
    logout: &'static str,
}

fn section<R: Resource>() -> Section {
    Section {
        caption: R::CAPTION.1,
        url: urls::list::<R>(),
    }
}

pub async fn root() -> Redirect {
    Redirect::to(urls::HOME)
}

pub async fn home(Staff(actor): Staff) -> Payload<Home> {
    proceeds(Home {
        greeting: format!("Welcome, {}", actor.username),
        sections: vec![
            section::<Student>(),
            section::<EducationGroup>(),
            section::<Teacher>(),
            section::<Course>(),
            section::<Lecture>(),
        ],
        logout: urls::LOGOUT,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchForm {
    field: &'static str,
    value: Option<String>,
    max_length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    title: &'static str,
    search: SearchForm,
    table: Table,
    create: String,
}

pub async fn list<R: Resource>(
    Staff(actor): Staff,
    Query(params): Query<HashMap<String, String>>,
    Extension(state): Extension<AppState>,
) -> Payload<Listing> {
    let search = clean_search(params.get(R::SEARCH_FIELD).map(String::as_str));
    let request = PageRequest::from_params(&params, state.cfg.page_size, state.cfg.max_page_size)?;
    let query = ListQuery {
        search: search.clone().map(Match::Contains),
        exclude: Vec::new(),
        offset: request.offset(),
        limit: request.per_page,
    };
    let found = visible::<R>(state.store.as_ref(), &actor, &query).await?;
    let page = request.resolve(found.total)?;

    proceeds(Listing {
        title: R::CAPTION.1,
        search: SearchForm {
            field: R::SEARCH_FIELD,
            value: search,
            max_length: SEARCH_MAX_LENGTH,
        },
        table: Table::of(&found.items, page),
        create: urls::create::<R>(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct FormPage<F> {
    title: String,
    action: String,
    form: F,
    cancel: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Saved<R> {
    message: String,
    redirect: String,
    record: R,
}

pub async fn create_form<R: Resource>(Staff(_): Staff) -> Payload<FormPage<R::Form>> {
    proceeds(FormPage {
        title: format!("Add a new {}", R::NOUN),
        action: urls::create::<R>(),
        form: R::Form::default(),
        cancel: urls::list::<R>(),
    })
}

pub async fn create<R: Resource>(
    Staff(actor): Staff,
    Extension(state): Extension<AppState>,
    Json(body): Json<Value>,
) -> Payload<Saved<R>> {
    let store = state.store.as_ref();
    let form: R::Form = serde_json::from_value(body)?;
    let input = validate(&form, store).await?;
    let record = R::repository(store).create(&input).await?;
    log::info!("{} created {} #{}", actor.username, R::NOUN, record.id());

    proceeds(Saved {
        message: format!("{} created successfully", R::MESSAGE_NAME),
        redirect: urls::list::<R>(),
        record,
    })
}

pub async fn update_form<R: Resource>(
    Staff(actor): Staff,
    Path(id): Path<i64>,
    Extension(state): Extension<AppState>,
) -> Payload<FormPage<R::Form>> {
    let record = visible_one::<R>(state.store.as_ref(), &actor, id).await?;
    proceeds(FormPage {
        title: format!("Update {}: {}", R::NOUN, record),
        action: urls::update::<R>(id),
        form: R::Form::initial(&record),
        cancel: urls::list::<R>(),
    })
}

pub async fn update<R: Resource>(
    Staff(actor): Staff,
    Path(id): Path<i64>,
    Extension(state): Extension<AppState>,
    Json(body): Json<Value>,
) -> Payload<Saved<R>> {
    let store = state.store.as_ref();
    visible_one::<R>(store, &actor, id).await?;
    let form: R::Form = serde_json::from_value(body)?;
    let input = validate(&form, store).await?;
    let record = match R::repository(store).update(id, &input).await? {
        Some(record) => record,
        None => {
            return breaks(Error::not_found(format!(
                "No {} found matching the query",
                R::NOUN
            )))
        }
    };
    log::info!("{} updated {} #{}", actor.username, R::NOUN, id);

    proceeds(Saved {
        message: format!("{} updated successfully", R::MESSAGE_NAME),
        redirect: urls::list::<R>(),
        record,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteConfirm<R> {
    title: String,
    action: String,
    record: R,
    /// Records that keep this one from being deleted; empty when deletable.
    protected: Vec<String>,
    cancel: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    message: String,
    redirect: String,
}

pub async fn delete_confirm<R: Resource>(
    Staff(actor): Staff,
    Path(id): Path<i64>,
    Extension(state): Extension<AppState>,
) -> Payload<DeleteConfirm<R>> {
    let store = state.store.as_ref();
    let record = visible_one::<R>(store, &actor, id).await?;
    let protected = R::repository(store).protected_by(id).await?;
    proceeds(DeleteConfirm {
        title: format!("Delete {}: {}", R::NOUN, record),
        action: urls::delete::<R>(id),
        record,
        protected,
        cancel: urls::list::<R>(),
    })
}

pub async fn delete<R: Resource>(
    Staff(actor): Staff,
    Path(id): Path<i64>,
    Extension(state): Extension<AppState>,
) -> Payload<Deleted> {
    let store = state.store.as_ref();
    let record = visible_one::<R>(store, &actor, id).await?;
    let repository = R::repository(store);
    match repository.delete(id).await {
        Ok(true) => {}
        Ok(false) => {
            return breaks(Error::not_found(format!(
                "No {} found matching the query",
                R::NOUN
            )))
        }
        Err(Error::Protected { .. }) => {
            let protected = repository.protected_by(id).await?;
            log::warn!("Refused to delete protected {} #{}", R::NOUN, id);
            return breaks(Error::Protected {
                message: format!(
                    "Cannot delete {} \"{}\" because other records depend on it: {}",
                    R::NOUN,
                    record,
                    protected.join(", ")
                ),
            });
        }
        Err(err) => return Err(err),
    }
    log::info!("{} deleted {} #{}", actor.username, R::NOUN, id);

    proceeds(Deleted {
        message: format!("{} deleted successfully", R::MESSAGE_NAME),
        redirect: urls::list::<R>(),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutocompleteParams {
    q: Option<String>,
    forward: Option<String>,
    page: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    id: String,
    text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct More {
    more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Suggestions {
    results: Vec<Suggestion>,
    pagination: More,
}

impl Suggestions {
    fn none() -> Self {
        Suggestions {
            results: Vec::new(),
            pagination: More { more: false },
        }
    }
}

/// Picker candidates whose designated field starts with `q`, minus the
/// identifiers already chosen in the form. Anonymous visitors get nothing.
pub async fn autocomplete<C: Choices>(
    actor: Option<Actor>,
    Query(params): Query<AutocompleteParams>,
    Extension(state): Extension<AppState>,
) -> Payload<Suggestions> {
    if actor.is_none() {
        return proceeds(Suggestions::none());
    }
    let mut paging = HashMap::new();
    if let Some(page) = params.page {
        paging.insert("page".to_string(), page);
    }
    let request =
        PageRequest::from_params(&paging, AUTOCOMPLETE_PAGE_SIZE, AUTOCOMPLETE_PAGE_SIZE)?;
    let query = ListQuery {
        search: params
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| Match::StartsWith(q.to_string())),
        exclude: forwarded_ids(params.forward.as_deref(), C::FORWARD)?,
        offset: request.offset(),
        limit: request.per_page,
    };
    let found = C::candidates(state.store.as_ref(), &query).await?;
    let page = request.resolve(found.total)?;

    proceeds(Suggestions {
        results: found
            .items
            .iter()
            .map(|c| Suggestion {
                id: c.choice_id().to_string(),
                text: c.to_string(),
            })
            .collect(),
        pagination: More {
            more: page.has_next,
        },
    })
}

fn resource_routes<R: Resource>() -> Router {
    Router::new()
        .route(&urls::list::<R>(), get(list::<R>))
        .route(
            &urls::create::<R>(),
            get(create_form::<R>).post(create::<R>),
        )
        .route(
            &format!("{}/{}/:id/update/", urls::EDUCATION, R::ROUTE),
            get(update_form::<R>).post(update::<R>),
        )
        .route(
            &format!("{}/{}/:id/delete/", urls::EDUCATION, R::ROUTE),
            get(delete_confirm::<R>).post(delete::<R>),
        )
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route(urls::LOGIN, get(auth::login_form).post(auth::login))
        .route(urls::LOGOUT, get(auth::logout).post(auth::logout))
        .route(urls::HOME, get(home))
        .merge(resource_routes::<Student>())
        .merge(resource_routes::<EducationGroup>())
        .merge(resource_routes::<Teacher>())
        .merge(resource_routes::<Course>())
        .merge(resource_routes::<Lecture>())
        .route(urls::USERS_AUTOCOMPLETE, get(autocomplete::<User>))
        .route(urls::GROUPS_AUTOCOMPLETE, get(autocomplete::<EducationGroup>))
        .route(urls::TEACHERS_AUTOCOMPLETE, get(autocomplete::<Teacher>))
        .route(urls::COURSES_AUTOCOMPLETE, get(autocomplete::<Course>))
        .fallback(handler404.into_service())
        .layer(Extension(state))
}

/*!
Searchable listings: the authorisation filter, the search refiner, paging,
and autocomplete candidate lookup shared by every record kind.
*/
use std::collections::HashMap;
use std::fmt::Display;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::err::Error;
use crate::forms::ModelForm;
use crate::models::User;
use crate::store::{Repository, Store};
use crate::tables::Tabular;

/// Longest search term the search form accepts, counted after trimming.
pub const SEARCH_MAX_LENGTH: usize = 16;

/// Candidates returned per autocomplete page.
pub const AUTOCOMPLETE_PAGE_SIZE: u64 = 10;

/// A record kind managed through the dashboard.
pub trait Resource: Tabular + Serialize + Clone + Display + Send + Sync + Unpin + 'static {
    type Form: ModelForm<Record = Self>;

    /// Lowercase noun used in page titles ("Add a new student").
    const NOUN: &'static str;
    /// Name used in flash messages ("Student created successfully").
    const MESSAGE_NAME: &'static str;
    /// Caption nouns, singular then plural.
    const CAPTION: (&'static str, &'static str);
    /// Path segment below the education dashboard.
    const ROUTE: &'static str;
    /// Search form field, also the column the search refiner matches.
    const SEARCH_FIELD: &'static str;

    fn id(&self) -> i64;

    /// Value of the designated field, used for matching and default ordering.
    fn search_key(&self) -> &str;

    fn repository(store: &dyn Store) -> &dyn Repository<Self>;
}

/// A record kind offered by an autocomplete picker.
#[async_trait]
pub trait Choices: Display + Send + Sync + Sized + 'static {
    /// Forwarded form fields holding identifiers already picked.
    const FORWARD: &'static [&'static str];

    fn choice_id(&self) -> i64;

    async fn candidates(store: &dyn Store, query: &ListQuery) -> Result<Found<Self>, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Contains(String),
    StartsWith(String),
}

impl Match {
    pub fn admits(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        match self {
            Match::Contains(needle) => value.contains(&needle.to_lowercase()),
            Match::StartsWith(prefix) => value.starts_with(&prefix.to_lowercase()),
        }
    }

    /// The equivalent `ILIKE` pattern, with wildcards in the input escaped.
    pub fn pattern(&self) -> String {
        match self {
            Match::Contains(needle) => format!("%{}%", escape_like(needle)),
            Match::StartsWith(prefix) => format!("{}%", escape_like(prefix)),
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<Match>,
    pub exclude: Vec<i64>,
    pub offset: u64,
    pub limit: u64,
}

impl ListQuery {
    pub fn admits(&self, id: i64, value: &str) -> bool {
        if self.exclude.contains(&id) {
            return false;
        }
        match &self.search {
            Some(m) => m.admits(value),
            None => true,
        }
    }
}

/// One slice of a filtered record set, plus the size of the whole set.
#[derive(Debug, Clone)]
pub struct Found<R> {
    pub total: u64,
    pub items: Vec<R>,
}

impl<R> Found<R> {
    pub fn empty() -> Self {
        Found {
            total: 0,
            items: Vec::new(),
        }
    }
}

/// Filters, orders and slices records held in memory the same way the
/// database does.
pub fn select<R, F>(mut records: Vec<R>, query: &ListQuery, key: F) -> Found<R>
where
    F: Fn(&R) -> (i64, &str),
{
    records.retain(|r| {
        let (id, value) = key(r);
        query.admits(id, value)
    });
    records.sort_by(|a, b| {
        let (a_id, a_key) = key(a);
        let (b_id, b_key) = key(b);
        a_key
            .to_lowercase()
            .cmp(&b_key.to_lowercase())
            .then(a_id.cmp(&b_id))
    });
    let total = records.len() as u64;
    let items = records
        .into_iter()
        .skip(query.offset as usize)
        .take(query.limit as usize)
        .collect();
    Found { total, items }
}

/// What part of a record set an actor may see or touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Nothing,
}

pub fn scope(actor: &User) -> Scope {
    if actor.is_staff {
        Scope::All
    } else {
        Scope::Nothing
    }
}

/// The records of kind `R` the actor may see, refined by `query`.
pub async fn visible<R: Resource>(
    store: &dyn Store,
    actor: &User,
    query: &ListQuery,
) -> Result<Found<R>, Error> {
    match scope(actor) {
        Scope::Nothing => Ok(Found::empty()),
        Scope::All => R::repository(store).list(query).await,
    }
}

/// A single record the actor may act on. Records outside the actor's scope
/// are reported as missing, never as forbidden.
pub async fn visible_one<R: Resource>(
    store: &dyn Store,
    actor: &User,
    id: i64,
) -> Result<R, Error> {
    let missing = || Error::not_found(format!("No {} found matching the query", R::NOUN));
    match scope(actor) {
        Scope::Nothing => Err(missing()),
        Scope::All => R::repository(store).get(id).await?.ok_or_else(missing),
    }
}

/// Cleans a raw search term. Blank or invalid input means "no filter".
pub fn clean_search(raw: Option<&str>) -> Option<String> {
    let term = raw?.trim();
    if term.is_empty() || term.chars().count() > SEARCH_MAX_LENGTH {
        return None;
    }
    Some(term.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: u64,
    pub per_page: u64,
}

impl PageRequest {
    pub fn from_params(
        params: &HashMap<String, String>,
        default_per_page: u64,
        max_per_page: u64,
    ) -> Result<PageRequest, Error> {
        let number = match params.get("page").map(|s| s.trim()) {
            None | Some("") => 1,
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                Error::not_found("Invalid page: That page number is not an integer")
            })?,
        };
        if number < 1 {
            return Err(Error::not_found("Invalid page: That page number is less than 1"));
        }
        let per_page = params
            .get("per_page")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(|n| n.min(max_per_page))
            .unwrap_or(default_per_page);
        let within_reach = (number - 1)
            .checked_mul(per_page)
            .map_or(false, |offset| i64::try_from(offset).is_ok());
        if !within_reach {
            return Err(Error::not_found(format!(
                "Invalid page ({}): That page contains no results",
                number
            )));
        }
        Ok(PageRequest { number, per_page })
    }

    pub fn offset(&self) -> u64 {
        self.number.saturating_sub(1).saturating_mul(self.per_page)
    }

    /// Checks the requested page against the size of the result set. The
    /// first page always exists, even when empty.
    pub fn resolve(&self, count: u64) -> Result<Page, Error> {
        let num_pages = std::cmp::max(1, (count + self.per_page - 1) / self.per_page);
        if self.number > num_pages {
            return Err(Error::not_found(format!(
                "Invalid page ({}): That page contains no results",
                self.number
            )));
        }
        Ok(Page {
            number: self.number,
            per_page: self.per_page,
            count,
            num_pages,
            has_next: self.number < num_pages,
            has_previous: self.number > 1,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Page {
    pub number: u64,
    pub per_page: u64,
    pub count: u64,
    pub num_pages: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Identifiers the client reports as already picked, read from a select2
/// style `forward` object. Values may be numbers, numeric strings, or lists
/// of either.
pub fn forwarded_ids(forward: Option<&str>, keys: &[&str]) -> Result<Vec<i64>, Error> {
    let raw = match forward.map(str::trim) {
        None | Some("") => return Ok(Vec::new()),
        Some(raw) => raw,
    };
    let forward: serde_json::Map<String, Value> = serde_json::from_str(raw)?;
    let mut ids = Vec::new();
    for key in keys {
        match forward.get(*key) {
            Some(Value::Array(values)) => ids.extend(values.iter().filter_map(as_id)),
            Some(value) => ids.extend(as_id(value)),
            None => {}
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

pub fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::StudentInput;
    use crate::models::Student;
    use crate::store::MemoryStore;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn search_is_trimmed_and_blank_means_unfiltered() {
        assert_eq!(clean_search(Some("  sm ")), Some("sm".to_string()));
        assert_eq!(clean_search(Some("   ")), None);
        assert_eq!(clean_search(None), None);
    }

    #[test]
    fn overlong_search_falls_back_to_unfiltered() {
        assert_eq!(clean_search(Some("abcdefghijklmnopq")), None);
        assert_eq!(
            clean_search(Some(" abcdefghijklmnop ")),
            Some("abcdefghijklmnop".to_string())
        );
    }

    #[test]
    fn contains_is_case_insensitive() {
        let m = Match::Contains("sm".into());
        assert!(m.admits("Smith"));
        assert!(m.admits("Goldsmith"));
        assert!(!m.admits("Jones"));
        let p = Match::StartsWith("SM".into());
        assert!(p.admits("smith"));
        assert!(!p.admits("Goldsmith"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(Match::Contains("50%_a".into()).pattern(), "%50\\%\\_a%");
        assert_eq!(Match::StartsWith("a\\b".into()).pattern(), "a\\\\b%");
    }

    #[test]
    fn select_excludes_filters_and_orders() {
        let rows = vec![(3, "Smith"), (1, "Jones"), (2, "Smithers"), (4, "smart")];
        let query = ListQuery {
            search: Some(Match::Contains("sm".into())),
            exclude: vec![2],
            offset: 0,
            limit: 10,
        };
        let found = select(rows, &query, |r| (r.0, r.1));
        assert_eq!(found.total, 2);
        let ids: Vec<i64> = found.items.iter().map(|r| r.0).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[test]
    fn ordering_ignores_case() {
        let rows = vec![(1, "de Vries"), (2, "Zimmer"), (3, "adams"), (4, "Adams")];
        let query = ListQuery {
            search: None,
            exclude: vec![],
            offset: 0,
            limit: 10,
        };
        let found = select(rows, &query, |r| (r.0, r.1));
        let names: Vec<&str> = found.items.iter().map(|r| r.1).collect();
        assert_eq!(names, vec!["adams", "Adams", "de Vries", "Zimmer"]);
    }

    #[test]
    fn huge_page_numbers_are_not_found() {
        let huge = u64::MAX.to_string();
        let err = PageRequest::from_params(&params(&[("page", huge.as_str())]), 25, 100)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        let req = PageRequest {
            number: u64::MAX,
            per_page: 25,
        };
        assert_eq!(req.offset(), u64::MAX);
    }

    fn member(staff: bool) -> User {
        User {
            id: 100,
            username: "someone".into(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            password_hash: String::new(),
            is_staff: staff,
            is_active: true,
            date_joined: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_outside_scope_are_missing() {
        let store = MemoryStore::new();
        let student = store
            .students()
            .create(&StudentInput {
                user_id: None,
                last_name: "Smith".into(),
                first_name: "John".into(),
                birth_date: chrono::NaiveDate::from_ymd_opt(2003, 4, 5).unwrap(),
                active: true,
                group_ids: vec![],
            })
            .await
            .unwrap();
        let query = ListQuery {
            search: None,
            exclude: vec![],
            offset: 0,
            limit: 25,
        };

        let found = visible::<Student>(&store, &member(false), &query).await.unwrap();
        assert_eq!(found.total, 0);
        assert!(found.items.is_empty());
        let err = visible_one::<Student>(&store, &member(false), student.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let found = visible::<Student>(&store, &member(true), &query).await.unwrap();
        assert_eq!(found.total, 1);
        let seen = visible_one::<Student>(&store, &member(true), student.id)
            .await
            .unwrap();
        assert_eq!(seen.last_name, "Smith");
    }

    #[test]
    fn select_slices_after_counting() {
        let rows: Vec<(i64, &str)> = vec![(1, "a"), (2, "b"), (3, "c")];
        let query = ListQuery {
            search: None,
            exclude: vec![],
            offset: 2,
            limit: 2,
        };
        let found = select(rows, &query, |r| (r.0, r.1));
        assert_eq!(found.total, 3);
        assert_eq!(found.items, vec![(3, "c")]);
    }

    #[test]
    fn paging_defaults_and_caps() {
        let req = PageRequest::from_params(&params(&[]), 25, 100).unwrap();
        assert_eq!(req, PageRequest { number: 1, per_page: 25 });
        let req = PageRequest::from_params(&params(&[("page", "3"), ("per_page", "500")]), 25, 100)
            .unwrap();
        assert_eq!(req.per_page, 100);
        assert_eq!(req.offset(), 200);
        let req = PageRequest::from_params(&params(&[("per_page", "zero")]), 25, 100).unwrap();
        assert_eq!(req.per_page, 25);
    }

    #[test]
    fn bad_page_numbers_are_not_found() {
        assert!(PageRequest::from_params(&params(&[("page", "x")]), 25, 100).is_err());
        assert!(PageRequest::from_params(&params(&[("page", "0")]), 25, 100).is_err());
        let req = PageRequest { number: 2, per_page: 25 };
        assert!(req.resolve(25).is_err());
        assert!(req.resolve(26).is_ok());
    }

    #[test]
    fn first_page_of_nothing_exists() {
        let page = PageRequest { number: 1, per_page: 25 }.resolve(0).unwrap();
        assert_eq!(page.num_pages, 1);
        assert!(!page.has_next);
        assert!(!page.has_previous);
    }

    #[test]
    fn forwarded_values() {
        let ids = forwarded_ids(
            Some(r#"{"teachers": ["3", 1, "x"], "course": "7", "other": 9}"#),
            &["teachers", "course"],
        )
        .unwrap();
        assert_eq!(ids, vec![1, 3, 7]);
        assert!(forwarded_ids(None, &["teachers"]).unwrap().is_empty());
        assert!(forwarded_ids(Some("not json"), &["teachers"]).is_err());
    }
}

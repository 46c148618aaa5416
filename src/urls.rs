//! Paths of the dashboard pages.
use crate::listing::Resource;

pub const LOGIN: &str = "/login/";
pub const LOGOUT: &str = "/logout/";
pub const HOME: &str = "/dashboard/";
pub const EDUCATION: &str = "/dashboard/education";

pub const USERS_AUTOCOMPLETE: &str = "/dashboard/education/users-autocomplete/";
pub const GROUPS_AUTOCOMPLETE: &str = "/dashboard/education/groups-autocomplete/";
pub const TEACHERS_AUTOCOMPLETE: &str = "/dashboard/education/teachers-autocomplete/";
pub const COURSES_AUTOCOMPLETE: &str = "/dashboard/education/courses-autocomplete/";

pub fn list<R: Resource>() -> String {
    format!("{}/{}/", EDUCATION, R::ROUTE)
}

pub fn create<R: Resource>() -> String {
    format!("{}/{}/create/", EDUCATION, R::ROUTE)
}

pub fn update<R: Resource>(id: i64) -> String {
    format!("{}/{}/{}/update/", EDUCATION, R::ROUTE, id)
}

pub fn delete<R: Resource>(id: i64) -> String {
    format!("{}/{}/{}/delete/", EDUCATION, R::ROUTE, id)
}

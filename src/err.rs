#![allow(non_snake_case)]

use std::collections::BTreeMap;

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;

use serde::Serialize;

/// Field name to the messages raised against it.
pub type FieldErrors = BTreeMap<&'static str, Vec<String>>;

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        message: format!("Invalid path: {}", path),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Maybe<T> {
    Nothing(Error),
    Fine(Success<T>),
}

pub fn Fine<V>(v: V) -> Maybe<V>
where
    V: Serialize,
{
    Maybe::Fine(Success::of(v))
}

pub fn Nothing<V>(err: Error) -> Maybe<V> {
    Maybe::Nothing(err)
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<T> IntoResponse for Maybe<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match self {
            Maybe::Nothing(err) => err.into_response(),
            Maybe::Fine(success) => Json::into_response(Json(success)),
        }
    }
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    NotFound {
        message: String,
    },
    Forbidden {
        message: String,
    },
    Unauthenticated {
        login: String,
    },
    AuthenticationFailure {
        message: String,
    },
    InvalidPayload {
        message: String,
    },
    InvalidForm {
        message: String,
        fields: FieldErrors,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Protected {
        message: String,
    },
    Conflict {
        message: String,
    },
    InternalError {
        kind: &'static str,
        message: String,
    },
}

impl Error {
    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound {
            message: msg.into(),
        }
    }

    pub fn forbidden() -> Error {
        Error::Forbidden {
            message: "You do not have permission to access this page.".to_string(),
        }
    }

    /// Where an anonymous visitor gets sent, remembering the page they asked for.
    pub fn unauthenticated(next: &str) -> Error {
        Error::Unauthenticated {
            login: format!("/login/?next={}", next),
        }
    }

    pub fn internal<S: Into<String>>(kind: &'static str, msg: S) -> Error {
        Error::InternalError {
            kind,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::Unauthenticated { .. } => StatusCode::SEE_OTHER,
            Error::AuthenticationFailure { .. } => StatusCode::UNAUTHORIZED,
            Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidForm { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Protected { .. } | Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound { message }
            | Error::Forbidden { message }
            | Error::AuthenticationFailure { message }
            | Error::InvalidPayload { message }
            | Error::InvalidForm { message, .. }
            | Error::Protected { message }
            | Error::Conflict { message } => f.write_str(message),
            Error::Unauthenticated { login } => write!(f, "Login required ({})", login),
            Error::InternalError { kind, message } => write!(f, "{}: {}", kind, message),
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::Unauthenticated { login } = &self {
            return Redirect::to(login).into_response();
        }
        if let Error::InternalError { kind, message } = &self {
            log::error!("{}: {}", kind, message);
        }
        (self.status(), Json(self)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::not_found("No matching record found."),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // foreign_key_violation
                Some("23503") => Error::Protected {
                    message: db.message().to_string(),
                },
                // unique_violation
                Some("23505") => Error::Conflict {
                    message: db.message().to_string(),
                },
                _ => Error::internal("DatabaseError", db.message()),
            },
            other => Error::internal("DatabaseError", other.to_string()),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::InternalError {
            kind: "HashError",
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(Error::forbidden().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::unauthenticated("/dashboard/").status(),
            StatusCode::SEE_OTHER
        );
        assert_eq!(
            Error::Protected {
                message: String::new()
            }
            .status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn unauthenticated_redirects_to_login() {
        let resp = Error::unauthenticated("/dashboard/education/students/").into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            resp.headers()["location"],
            "/login/?next=/dashboard/education/students/"
        );
    }

    #[test]
    fn serialized_with_tag() {
        let v = serde_json::to_value(Error::not_found("gone")).unwrap();
        assert_eq!(v["error"], "NotFound");
        assert_eq!(v["message"], "gone");
    }
}

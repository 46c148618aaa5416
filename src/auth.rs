use axum::extract::{FromRequest, Query, RequestParts};
use axum::headers::Cookie;
use axum::http::header::{HeaderName, SET_COOKIE};
use axum::response::{IntoResponse, Redirect};
use axum::{async_trait, Extension, Json, TypedHeader};
use chrono::{DateTime, Duration, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Cfg;
use crate::err::{Fine, Maybe};
use crate::models::{NewUser, User, UserSession};
use crate::store::{Accounts, Store};
use crate::{proceeds, urls, AppState, Error, Payload};

pub const SESSION_COOKIE: &str = "sessionid";

const INVALID_LOGIN: &str =
    "Please enter a correct username and password. Note that both fields may be case-sensitive.";

#[derive(Debug, Clone)]
pub enum AuthResult {
    Success(User),
    SessionExpired,
    InvalidSession,
}

/// Resolves a session id to its user. Expired sessions are removed on the
/// way, and inactive accounts never authenticate.
pub async fn ensure_authenticated(
    session_id: Option<&str>,
    store: &dyn Store,
) -> Result<AuthResult, Error> {
    let ssid = match session_id {
        Some(ssid) if !ssid.is_empty() => ssid,
        _ => return Ok(AuthResult::InvalidSession),
    };
    let session = match store.session(ssid).await? {
        Some(session) => session,
        None => return Ok(AuthResult::InvalidSession),
    };
    if session.expired() {
        store.delete_session(ssid).await?;
        return Ok(AuthResult::SessionExpired);
    }
    match store.user(session.belongs_to).await? {
        Some(user) if user.is_active => Ok(AuthResult::Success(user)),
        _ => Ok(AuthResult::InvalidSession),
    }
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    Ok(Pbkdf2
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))?
        .to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, Error> {
    let hash = PasswordHash::new(password_hash)?;
    Ok(Pbkdf2.verify_password(password.as_bytes(), &hash).is_ok())
}

pub fn new_ssid() -> String {
    let ssid_bytes: [u8; 32] = thread_rng().gen();
    let mut hasher: Sha256 = Digest::new();
    hasher.update(ssid_bytes);
    hex::encode(hasher.finalize())
}

fn session_cookie(ssid: &str, expires_at: DateTime<Utc>) -> String {
    let max_age = (expires_at - Utc::now()).num_seconds().max(0);
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, ssid, max_age
    )
}

fn cleared_cookie() -> String {
    format!("{}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// Only local paths are followed after login.
fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(next) if next.starts_with('/') && !next[1..].starts_with(['/', '\\']) => {
            next.to_string()
        }
        _ => urls::HOME.to_string(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NextPage {
    next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginForm {
    action: &'static str,
    fields: &'static [&'static str],
    next: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggedIn {
    username: String,
    expires_at: DateTime<Utc>,
    redirect: String,
}

pub async fn login_form(Query(page): Query<NextPage>) -> Payload<LoginForm> {
    proceeds(LoginForm {
        action: urls::LOGIN,
        fields: &["username", "password"],
        next: safe_next(page.next.as_deref()),
    })
}

pub async fn login(
    Query(page): Query<NextPage>,
    Extension(state): Extension<AppState>,
    Json(login): Json<Credentials>,
) -> Result<([(HeaderName, String); 1], Maybe<LoggedIn>), Error> {
    if login.username.trim().is_empty() {
        return Err(Error::InvalidPayload {
            message: "`username` parameter was empty".to_string(),
        });
    }
    if login.password.is_empty() {
        return Err(Error::InvalidPayload {
            message: "`password` parameter was empty".to_string(),
        });
    }
    let failure = || Error::AuthenticationFailure {
        message: INVALID_LOGIN.to_string(),
    };

    let store = state.store.as_ref();
    let user = store
        .user_by_username(login.username.trim())
        .await?
        .ok_or_else(failure)?;
    if !user.is_active || !verify_password(&login.password, &user.password_hash)? {
        log::info!("Rejected login for `{}`", user.username);
        return Err(failure());
    }

    let session = match store.session_of(user.id).await? {
        Some(existing) if !existing.expired() => existing,
        _ => {
            let session = UserSession {
                ssid: new_ssid(),
                belongs_to: user.id,
                expires_at: Utc::now() + Duration::days(state.cfg.session_days),
            };
            store.insert_session(&session).await?;
            session
        }
    };
    log::info!("User `{}` logged in", user.username);

    Ok((
        [(SET_COOKIE, session_cookie(&session.ssid, session.expires_at))],
        Fine(LoggedIn {
            username: user.username,
            expires_at: session.expires_at,
            redirect: safe_next(page.next.as_deref()),
        }),
    ))
}

pub async fn logout(
    cookies: Option<TypedHeader<Cookie>>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, Error> {
    if let Some(ssid) = cookies.as_ref().and_then(|TypedHeader(c)| c.get(SESSION_COOKIE)) {
        if state.store.delete_session(ssid).await? {
            log::info!("Session dropped on logout");
        }
    }
    Ok(([(SET_COOKIE, cleared_cookie())], Redirect::to("/")))
}

/// The logged-in user behind the request's session cookie. Anonymous
/// requests are redirected to the login page.
#[derive(Debug, Clone)]
pub struct Actor(pub User);

/// A logged-in staff member. Other users are refused.
#[derive(Debug, Clone)]
pub struct Staff(pub User);

impl Actor {
    pub fn require_staff(self) -> Result<User, Error> {
        if self.0.is_staff {
            Ok(self.0)
        } else {
            log::warn!("Non-staff user `{}` refused", self.0.username);
            Err(Error::forbidden())
        }
    }
}

#[async_trait]
impl<B: Send> FromRequest<B> for Actor {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Extension(state) = Extension::<AppState>::from_request(req)
            .await
            .map_err(|err| Error::internal("MissingExtension", err.to_string()))?;
        let cookies = Option::<TypedHeader<Cookie>>::from_request(req)
            .await
            .unwrap_or(None);
        let ssid = cookies.as_ref().and_then(|TypedHeader(c)| c.get(SESSION_COOKIE));
        match ensure_authenticated(ssid, state.store.as_ref()).await? {
            AuthResult::Success(user) => Ok(Actor(user)),
            AuthResult::SessionExpired | AuthResult::InvalidSession => {
                let next = req
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");
                Err(Error::unauthenticated(next))
            }
        }
    }
}

#[async_trait]
impl<B: Send> FromRequest<B> for Staff {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        Ok(Staff(Actor::from_request(req).await?.require_staff()?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_staff: bool,
}

pub async fn register(store: &dyn Store, account: Registration) -> Result<User, Error> {
    if account.username.trim().is_empty() {
        return Err(Error::InvalidPayload {
            message: "Provided username was empty!".to_string(),
        });
    }
    if account.password.is_empty() {
        return Err(Error::InvalidPayload {
            message: "Provided password was empty!".to_string(),
        });
    }
    let user = store
        .insert_user(&NewUser {
            username: account.username.trim().to_string(),
            first_name: account.first_name,
            last_name: account.last_name,
            email: account.email,
            password_hash: hash_password(&account.password)?,
            is_staff: account.is_staff,
            is_active: true,
        })
        .await?;
    log::info!("Registered user `{}` (staff: {})", user.username, user.is_staff);
    Ok(user)
}

/// Creates the configured staff account unless it already exists.
pub async fn ensure_default_admin(store: &dyn Store, cfg: &Cfg) -> Result<(), Error> {
    let password = match &cfg.admin_password {
        Some(password) => password.clone(),
        None => return Ok(()),
    };
    if store.user_by_username(&cfg.admin_username).await?.is_some() {
        return Ok(());
    }
    register(
        store,
        Registration {
            username: cfg.admin_username.clone(),
            password,
            is_staff: true,
            ..Registration::default()
        },
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn passwords_verify_against_their_hash() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$pbkdf2"));
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }

    #[test]
    fn ssids_are_hex_sha256() {
        let a = new_ssid();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, new_ssid());
    }

    #[test]
    fn only_local_next_is_followed() {
        assert_eq!(safe_next(Some("/dashboard/education/")), "/dashboard/education/");
        assert_eq!(safe_next(Some("//evil.example")), urls::HOME);
        assert_eq!(safe_next(Some("/\\evil.example")), urls::HOME);
        assert_eq!(safe_next(Some("/")), "/");
        assert_eq!(safe_next(Some("https://evil.example")), urls::HOME);
        assert_eq!(safe_next(None), urls::HOME);
    }

    async fn user(store: &MemoryStore, active: bool) -> User {
        store
            .insert_user(&NewUser {
                username: "jdoe".into(),
                first_name: String::new(),
                last_name: "Doe".into(),
                email: String::new(),
                password_hash: String::new(),
                is_staff: false,
                is_active: active,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn expired_sessions_are_dropped() {
        let store = MemoryStore::new();
        let user = user(&store, true).await;
        let session = UserSession {
            ssid: "old".into(),
            belongs_to: user.id,
            expires_at: Utc::now() - Duration::hours(1),
        };
        store.insert_session(&session).await.unwrap();

        let res = ensure_authenticated(Some("old"), &store).await.unwrap();
        assert!(matches!(res, AuthResult::SessionExpired));
        assert!(store.session("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inactive_users_do_not_authenticate() {
        let store = MemoryStore::new();
        let user = user(&store, false).await;
        store
            .insert_session(&UserSession {
                ssid: "live".into(),
                belongs_to: user.id,
                expires_at: Utc::now() + Duration::days(1),
            })
            .await
            .unwrap();
        let res = ensure_authenticated(Some("live"), &store).await.unwrap();
        assert!(matches!(res, AuthResult::InvalidSession));
        let res = ensure_authenticated(None, &store).await.unwrap();
        assert!(matches!(res, AuthResult::InvalidSession));
    }

    #[tokio::test]
    async fn default_admin_is_created_once() {
        let store = MemoryStore::new();
        let cfg = Cfg {
            admin_password: Some("secret".into()),
            ..Cfg::default()
        };
        ensure_default_admin(&store, &cfg).await.unwrap();
        ensure_default_admin(&store, &cfg).await.unwrap();
        let admin = store.user_by_username("admin").await.unwrap().unwrap();
        assert!(admin.is_staff);
        assert!(verify_password("secret", &admin.password_hash).unwrap());
    }

    #[tokio::test]
    async fn registration_needs_a_password() {
        let store = MemoryStore::new();
        let res = register(
            &store,
            Registration {
                username: "x".into(),
                ..Registration::default()
            },
        )
        .await;
        assert!(matches!(res, Err(Error::InvalidPayload { .. })));
    }
}

//! Caller identity extractors.
//!
//! Authentication itself happens upstream; the gateway trusts the
//! `x-harbor-user-id` / `x-harbor-user-active` headers it is handed.

use crate::{errors::AppError, models::user::AuthUser};
use axum::{extract::FromRequestParts, http::request::Parts};

pub const USER_ID_HEADER: &str = "x-harbor-user-id";
pub const USER_ACTIVE_HEADER: &str = "x-harbor-user-active";

/// The caller, or `None` for anonymous requests. Inactive users are
/// anonymous.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Option<AuthUser>);

/// The caller; rejects anonymous requests with 401.
#[derive(Debug, Clone, Copy)]
pub struct RequireUser(pub AuthUser);

fn user_from_parts(parts: &Parts) -> Result<Option<AuthUser>, AppError> {
    let Some(raw_id) = parts.headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };
    let id = raw_id
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::bad_request(format!("{USER_ID_HEADER} must be an integer")))?;

    let is_active = match parts.headers.get(USER_ACTIVE_HEADER) {
        None => true,
        Some(v) => v
            .to_str()
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false),
    };
    if !is_active {
        return Ok(None);
    }
    Ok(Some(AuthUser { id, is_active }))
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_parts(parts).map(CurrentUser)
    }
}

impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_parts(parts)?
            .map(RequireUser)
            .ok_or_else(|| AppError::unauthorized("authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn anonymous_without_header() {
        let mut p = parts(&[]);
        let CurrentUser(user) = CurrentUser::from_request_parts(&mut p, &()).await.unwrap();
        assert!(user.is_none());

        let err = RequireUser::from_request_parts(&mut p, &()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn reads_user_id() {
        let mut p = parts(&[(USER_ID_HEADER, " 42 ")]);
        let RequireUser(user) = RequireUser::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(user, AuthUser::new(42));
    }

    #[tokio::test]
    async fn inactive_users_are_anonymous() {
        let mut p = parts(&[(USER_ID_HEADER, "42"), (USER_ACTIVE_HEADER, "false")]);
        let CurrentUser(user) = CurrentUser::from_request_parts(&mut p, &()).await.unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn malformed_id_is_rejected() {
        let mut p = parts(&[(USER_ID_HEADER, "abc")]);
        let err = CurrentUser::from_request_parts(&mut p, &()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}

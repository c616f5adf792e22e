// crates/server/src/identity.rs
//! Requestor identity taken from request headers.
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the proxy has set `x-user-id` and, optionally, a comma-separated
//! `x-user-permissions` list.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use sensorhub_types::Requestor;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const PERMISSIONS_HEADER: &str = "x-user-permissions";

/// The authenticated caller of a handler.
#[derive(Debug, Clone)]
pub struct Caller(pub Requestor);

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthenticated)?;

        let permissions = match headers.get(PERMISSIONS_HEADER) {
            Some(value) => {
                let list = value.to_str().map_err(|_| {
                    ApiError::BadRequest(format!("{PERMISSIONS_HEADER} is not valid text"))
                })?;
                Requestor::parse_permissions(list)
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
            }
            None => Default::default(),
        };

        Ok(Self(Requestor {
            user_id: user_id.to_string(),
            permissions,
        }))
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

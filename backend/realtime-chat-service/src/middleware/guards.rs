//! Request extractors that enforce authentication at the type level.
//! A handler that takes [`User`] cannot run for an anonymous caller.

use std::future::{ready, Ready};

use crate::error::AppError;
use crate::models::Actor;
use crate::state::AppState;
use actix_web::{http::header, web, Error, FromRequest, HttpRequest};

/// Authenticated caller resolved from the `Authorization: Bearer` header.
#[derive(Debug, Clone, Copy)]
pub struct User(pub Actor);

impl User {
    pub fn actor(&self) -> &Actor {
        &self.0
    }
}

impl FromRequest for User {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(authenticate(req).map(User).map_err(Error::from))
    }
}

fn authenticate(req: &HttpRequest) -> Result<Actor, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or(AppError::Internal)?;
    let token = bearer_token(req).ok_or(AppError::Unauthorized)?;
    state.jwt.verify(token)
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

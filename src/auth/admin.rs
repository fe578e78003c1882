use std::sync::Arc;

use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use tracing::Instrument;

use crate::error::ErrorResponse;

use super::SessionStore;

/// An authenticated administrator, identified by the bearer token it
/// presented.
#[derive(Debug, Clone)]
pub struct Admin {
    pub token: String,
}

pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Admin {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        authenticate(request)
            .instrument(tracing::info_span!("admin_auth_guard"))
            .await
    }
}

async fn authenticate(request: &Request<'_>) -> Outcome<Admin, ()> {
    let Some(token) = request
        .headers()
        .get_one("Authorization")
        .and_then(bearer_token)
    else {
        tracing::warn!("Admin request without bearer token");
        return Outcome::Error((Status::Unauthorized, ()));
    };

    let store = match request.rocket().state::<Arc<dyn SessionStore>>() {
        Some(store) => store,
        None => {
            tracing::error!("Session store not found in managed state");
            return Outcome::Error((Status::InternalServerError, ()));
        }
    };

    match store.validate(token).await {
        Ok(true) => Outcome::Success(Admin {
            token: token.to_string(),
        }),
        Ok(false) => {
            tracing::warn!("Rejected invalid or expired admin token");
            Outcome::Error((Status::Unauthorized, ()))
        }
        Err(err) => {
            err.log_and_record("Admin session lookup");
            Outcome::Error((Status::InternalServerError, ()))
        }
    }
}

#[catch(401)]
pub fn unauthorized(_req: &Request) -> Custom<Json<ErrorResponse>> {
    Custom(
        Status::Unauthorized,
        Json(ErrorResponse::with_error(
            "authentication",
            "Unauthorized, please log in again",
        )),
    )
}

use rocket::http::{Header, Status};
use rocket::{
    Request, Response,
    fairing::{Fairing, Info, Kind},
};

pub const ALLOWED_HEADERS: &str = "Content-Type,Authorization";
pub const ALLOWED_METHODS: &str = "GET,PUT,POST,DELETE,OPTIONS";

pub struct CorsFairing {
    allowed_origin: String,
}

impl CorsFairing {
    pub fn new(allowed_origin: &str) -> Self {
        Self {
            allowed_origin: allowed_origin.to_string(),
        }
    }
}

#[rocket::async_trait]
impl Fairing for CorsFairing {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new(
            "Access-Control-Allow-Origin",
            self.allowed_origin.clone(),
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", ALLOWED_HEADERS));
        response.set_header(Header::new("Access-Control-Allow-Methods", ALLOWED_METHODS));
    }
}

/// Preflight for any path; the fairing adds the headers.
#[options("/<_..>")]
pub fn preflight() -> Status {
    Status::NoContent
}

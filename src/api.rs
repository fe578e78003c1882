use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{Admin, AdminCredentials, SessionStore};
use crate::config::AppConfig;
use crate::db::{
    delete_course, delete_registration, get_course_availability, get_course_videos,
    get_dashboard, get_registration_by_student_name, get_registration_detail,
    get_registration_settings, list_course_stats, list_courses, list_supplies, create_course,
    set_payment_status, set_registration_settings, update_course,
};
use crate::error::{AppError, ErrorResponse};
use crate::models::{
    Course, CourseChange, CourseStats, Dashboard, LineItem, NewCourse, RegistrationSettings,
    RegistrationSnapshot, Supply,
};
use crate::registration::{
    DependentItemPolicy, RegistrationInput, RegistrationReceipt, RegistrationWindow,
    submit_registration, update_registration,
};
use crate::validation::{JsonValidateExt, LOCAL_DATETIME_RE, not_blank};

pub const UNSPECIFIED_CLASS: &str = "Unspecified";

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

async fn ensure_registration_open(
    db: &Pool<Sqlite>,
    config: &AppConfig,
) -> Result<(), AppError> {
    if !config.enforce_registration_window {
        return Ok(());
    }

    let settings = get_registration_settings(db).await?;
    RegistrationWindow::from_settings(&settings).ensure_open_now()
}

#[post("/submit-registration", data = "<input>")]
pub async fn api_submit_registration(
    input: Json<RegistrationInput>,
    db: &State<Pool<Sqlite>>,
    policy: &State<DependentItemPolicy>,
    config: &State<AppConfig>,
) -> Result<Json<RegistrationReceipt>, AppError> {
    ensure_registration_open(db, config).await?;

    let receipt = submit_registration(db, policy, input.into_inner()).await?;
    Ok(Json(receipt))
}

#[post("/update-registration", data = "<input>")]
pub async fn api_update_registration(
    input: Json<RegistrationInput>,
    db: &State<Pool<Sqlite>>,
    policy: &State<DependentItemPolicy>,
    config: &State<AppConfig>,
) -> Result<Json<RegistrationReceipt>, AppError> {
    ensure_registration_open(db, config).await?;

    let receipt = update_registration(db, policy, input.into_inner()).await?;
    Ok(Json(receipt))
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationQueryResponse {
    pub id: i64,
    pub name: String,
    pub birthday: String,
    pub class: String,
    pub courses: Vec<LineItem>,
    pub supplies: Vec<LineItem>,
    pub total_items: usize,
}

impl From<RegistrationSnapshot> for RegistrationQueryResponse {
    fn from(snapshot: RegistrationSnapshot) -> Self {
        let total_items = snapshot.courses.len() + snapshot.supplies.len();
        Self {
            id: snapshot.id,
            name: snapshot.student_name,
            birthday: snapshot
                .birthday
                .map(|b| b.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            class: snapshot
                .class_name
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| UNSPECIFIED_CLASS.to_string()),
            courses: snapshot.courses,
            supplies: snapshot.supplies,
            total_items,
        }
    }
}

#[get("/query-registration?<name>")]
pub async fn api_query_registration(
    name: Option<String>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<RegistrationQueryResponse>, AppError> {
    let name = name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::Validation("Please provide a name to search".to_string()))?;

    match get_registration_by_student_name(db, name).await? {
        Some(snapshot) => Ok(Json(RegistrationQueryResponse::from(snapshot))),
        None => Err(AppError::NotFound(format!(
            "No registration found for '{}'",
            name
        ))),
    }
}

#[get("/courses/availability")]
pub async fn api_course_availability(
    db: &State<Pool<Sqlite>>,
) -> Result<Json<BTreeMap<String, i64>>, AppError> {
    Ok(Json(get_course_availability(db).await?))
}

#[get("/settings/registration-time")]
pub async fn api_registration_time(
    db: &State<Pool<Sqlite>>,
) -> Result<Json<RegistrationSettings>, AppError> {
    Ok(Json(get_registration_settings(db).await?))
}

#[get("/course-videos")]
pub async fn api_course_videos(
    db: &State<Pool<Sqlite>>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    Ok(Json(get_course_videos(db).await?))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CatalogResponse {
    pub courses: Vec<Course>,
    pub supplies: Vec<Supply>,
}

#[get("/catalog")]
pub async fn api_catalog(db: &State<Pool<Sqlite>>) -> Result<Json<CatalogResponse>, AppError> {
    Ok(Json(CatalogResponse {
        courses: list_courses(db).await?,
        supplies: list_supplies(db).await?,
    }))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[post("/login", data = "<login>")]
pub async fn api_admin_login(
    login: Json<LoginRequest>,
    credentials: &State<AdminCredentials>,
    sessions: &State<Arc<dyn SessionStore>>,
) -> Result<Json<LoginResponse>, AppError> {
    let login = login.validate_custom()?;

    if !credentials.verify(&login.password) {
        return Err(AppError::Authentication("Incorrect password".to_string()));
    }

    let session = sessions.issue().await?;
    info!(session_id = session.id, "Admin logged in");

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        token: session.token,
        expires_at: session.expires_at,
    }))
}

#[post("/logout")]
pub async fn api_admin_logout(
    admin: Admin,
    sessions: &State<Arc<dyn SessionStore>>,
) -> Result<Json<MessageResponse>, AppError> {
    sessions.revoke(&admin.token).await?;
    Ok(MessageResponse::new("Logged out"))
}

#[get("/registrations")]
pub async fn api_admin_registrations(
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Dashboard>, AppError> {
    Ok(Json(get_dashboard(db).await?))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CourseStatsResponse {
    pub courses: Vec<CourseStats>,
}

#[get("/courses")]
pub async fn api_admin_courses(
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseStatsResponse>, AppError> {
    Ok(Json(CourseStatsResponse {
        courses: list_course_stats(db).await?,
    }))
}

#[get("/registration/<id>")]
pub async fn api_admin_registration_detail(
    id: i64,
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<RegistrationSnapshot>, AppError> {
    Ok(Json(get_registration_detail(db, id).await?))
}

#[delete("/registration/<id>")]
pub async fn api_admin_delete_registration(
    id: i64,
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    delete_registration(db, id).await?;
    Ok(MessageResponse::new("Deleted successfully"))
}

#[derive(Deserialize, Debug)]
pub struct PaymentRequest {
    #[serde(default)]
    paid: bool,
}

#[put("/registration/<id>/payment", data = "<payment>")]
pub async fn api_admin_set_payment(
    id: i64,
    payment: Json<PaymentRequest>,
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    set_payment_status(db, id, payment.paid).await?;

    let status = if payment.paid { "paid" } else { "unpaid" };
    Ok(MessageResponse::new(&format!(
        "Payment status updated to {}",
        status
    )))
}

#[derive(Deserialize, Validate, Debug, Default)]
pub struct CourseRequest {
    #[validate(custom(function = "not_blank"))]
    pub name: Option<String>,
    #[validate(range(min = 0, message = "Price must not be negative"))]
    pub price: Option<i64>,
    #[validate(range(min = 1, message = "Sessions must be positive"))]
    pub sessions: Option<i64>,
    pub frequency: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 1, max = 999, message = "Capacity must be between 1 and 999"))]
    pub capacity: Option<i64>,
    pub video_url: Option<String>,
}

impl CourseRequest {
    fn into_new_course(self) -> Result<NewCourse, AppError> {
        match (self.name, self.price) {
            (Some(name), Some(price)) => Ok(NewCourse {
                name: name.trim().to_string(),
                price,
                sessions: self.sessions,
                frequency: self.frequency,
                description: self.description,
                capacity: self.capacity,
                video_url: self.video_url,
            }),
            _ => Err(AppError::Validation(
                "Course name and price are required".to_string(),
            )),
        }
    }

    /// A request naming the course replaces every field; one without a
    /// name only adjusts capacity.
    fn into_change(self) -> Result<CourseChange, AppError> {
        if self.name.is_some() {
            return Ok(CourseChange::Full(self.into_new_course()?));
        }

        self.capacity
            .map(CourseChange::CapacityOnly)
            .ok_or_else(|| AppError::Validation("Missing capacity parameter".to_string()))
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CourseCreatedResponse {
    pub message: String,
    pub course_id: i64,
}

#[post("/course", data = "<course>")]
pub async fn api_admin_create_course(
    course: Json<CourseRequest>,
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseCreatedResponse>, AppError> {
    let course = course.validate_custom()?.into_new_course()?;
    let course_id = create_course(db, &course).await?;

    Ok(Json(CourseCreatedResponse {
        message: "Course created".to_string(),
        course_id,
    }))
}

#[put("/course/<id>", data = "<course>")]
pub async fn api_admin_update_course(
    id: i64,
    course: Json<CourseRequest>,
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let change = course.validate_custom()?.into_change()?;
    update_course(db, id, &change).await?;

    Ok(MessageResponse::new("Update successful"))
}

#[delete("/course/<id>")]
pub async fn api_admin_delete_course(
    id: i64,
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    delete_course(db, id).await?;
    Ok(MessageResponse::new("Course deleted"))
}

#[derive(Deserialize, Validate, Debug)]
pub struct RegistrationTimeRequest {
    #[validate(regex(path = *LOCAL_DATETIME_RE, message = "Expected YYYY-MM-DDTHH:MM"))]
    start: String,
    #[validate(regex(path = *LOCAL_DATETIME_RE, message = "Expected YYYY-MM-DDTHH:MM"))]
    end: String,
}

#[post("/settings/registration-time", data = "<settings>")]
pub async fn api_admin_set_registration_time(
    settings: Json<RegistrationTimeRequest>,
    _admin: Admin,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let settings = settings.validate_custom()?;
    set_registration_settings(db, &settings.start, &settings.end).await?;

    Ok(MessageResponse::new("Registration time updated successfully"))
}

fn catcher_response(status: Status, field: &str, message: &str) -> Custom<Json<ErrorResponse>> {
    Custom(status, Json(ErrorResponse::with_error(field, message)))
}

#[catch(400)]
pub fn bad_request() -> Custom<Json<ErrorResponse>> {
    catcher_response(Status::BadRequest, "request", "Malformed request")
}

#[catch(404)]
pub fn not_found() -> Custom<Json<ErrorResponse>> {
    catcher_response(Status::NotFound, "resource", "Resource not found")
}

#[catch(422)]
pub fn unprocessable_entity() -> Custom<Json<ErrorResponse>> {
    catcher_response(
        Status::UnprocessableEntity,
        "request",
        "Request body could not be parsed",
    )
}

#[catch(500)]
pub fn internal_error() -> Custom<Json<ErrorResponse>> {
    catcher_response(
        Status::InternalServerError,
        "server",
        "Internal server error",
    )
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_COURSE_CAPACITY: i64 = 30;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub birthday: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub sessions: Option<i64>,
    pub frequency: Option<String>,
    pub description: Option<String>,
    pub capacity: i64,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Supply {
    pub id: i64,
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Registration {
    pub id: i64,
    pub student_id: i64,
    pub class_name: Option<String>,
    pub email: Option<String>,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named course or supply as exchanged with clients. The price is carried
/// for display only; matching against the catalog is by exact name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default, deserialize_with = "price_as_string")]
    pub price: String,
}

impl LineItem {
    pub fn new(name: &str, price: &str) -> Self {
        Self {
            name: name.to_string(),
            price: price.to_string(),
        }
    }
}

// Clients send prices both as "1500" and as 1500.
fn price_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

#[derive(sqlx::FromRow)]
pub struct DbLineItem {
    pub name: String,
    pub price: i64,
}

impl From<DbLineItem> for LineItem {
    fn from(row: DbLineItem) -> Self {
        Self {
            name: row.name,
            price: row.price.to_string(),
        }
    }
}

/// A registration with its student and attached catalog items.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSnapshot {
    pub id: i64,
    pub student_name: String,
    pub birthday: Option<NaiveDate>,
    pub class_name: Option<String>,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub courses: Vec<LineItem>,
    pub supplies: Vec<LineItem>,
}

#[derive(sqlx::FromRow)]
pub struct DbRegistrationHeader {
    pub id: i64,
    pub student_name: String,
    pub birthday: Option<NaiveDate>,
    pub class_name: Option<String>,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegistrationSummary {
    pub id: i64,
    pub student_name: String,
    pub class_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub course_count: i64,
    pub supply_count: i64,
    pub is_paid: bool,
    pub birthday: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStatistics {
    pub total_registrations: i64,
    pub total_students: i64,
    pub total_course_enrollments: i64,
    pub total_supply_orders: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub registrations: Vec<RegistrationSummary>,
    pub statistics: DashboardStatistics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseStats {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub sessions: Option<i64>,
    pub frequency: Option<String>,
    pub capacity: i64,
    pub description: String,
    pub video_url: String,
    pub used: i64,
    pub remaining: i64,
}

#[derive(sqlx::FromRow)]
pub struct DbCourseUsage {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub sessions: Option<i64>,
    pub frequency: Option<String>,
    pub capacity: i64,
    pub description: Option<String>,
    pub video_url: Option<String>,
    pub used: i64,
}

impl From<DbCourseUsage> for CourseStats {
    fn from(row: DbCourseUsage) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: row.price,
            sessions: row.sessions,
            frequency: row.frequency,
            capacity: row.capacity,
            description: row.description.unwrap_or_default(),
            video_url: row.video_url.unwrap_or_default(),
            used: row.used,
            remaining: remaining_seats(row.capacity, row.used),
        }
    }
}

/// Seats left on a course. Never negative, even if rows were seeded past
/// capacity.
pub fn remaining_seats(capacity: i64, used: i64) -> i64 {
    (capacity - used).max(0)
}

#[derive(Debug, Clone, Default)]
pub struct NewCourse {
    pub name: String,
    pub price: i64,
    pub sessions: Option<i64>,
    pub frequency: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<i64>,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CourseChange {
    Full(NewCourse),
    CapacityOnly(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistrationSettings {
    pub start: String,
    pub end: String,
}

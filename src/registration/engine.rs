use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{debug, error, info, instrument};

use crate::error::AppError;
use crate::models::LineItem;

use super::DependentItemPolicy;

pub const CREATED_MESSAGE: &str = "Registration successful!";
pub const UPDATED_MESSAGE: &str = "Update successful!";

/// A registration submission as sent by the client. `name` identifies the
/// student on create; `id` identifies the registration on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationInput {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    pub name: Option<String>,
    pub birthday: Option<String>,
    #[serde(rename = "class", alias = "class_name")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub courses: Vec<LineItem>,
    #[serde(default)]
    pub supplies: Vec<LineItem>,
}

// Registration ids arrive as numbers or as numeric strings from form fields.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(id)) => Ok(Some(id)),
        Some(RawId::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawId::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("malformed registration id '{}'", text))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub id: i64,
    pub message: String,
}

#[derive(Debug)]
enum Target {
    Create { name: String },
    Update { id: i64 },
}

#[derive(Debug)]
struct ValidatedRegistration {
    target: Target,
    birthday: Option<NaiveDate>,
    class_name: Option<String>,
    courses: Vec<LineItem>,
    supplies: Vec<LineItem>,
}

impl ValidatedRegistration {
    fn from_input(input: RegistrationInput, mode: SubmissionMode) -> Result<Self, AppError> {
        let target = match mode {
            SubmissionMode::Create => {
                let name = input
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| AppError::Validation("Student name is required".to_string()))?;
                Target::Create {
                    name: name.to_string(),
                }
            }
            SubmissionMode::Update => {
                let id = input
                    .id
                    .ok_or_else(|| AppError::Validation("Missing ID for update".to_string()))?;
                Target::Update { id }
            }
        };

        Ok(Self {
            target,
            birthday: parse_birthday(input.birthday.as_deref())?,
            class_name: input.class_name,
            courses: input.courses,
            supplies: input.supplies,
        })
    }
}

/// Empty means "not supplied"; anything else must be a real `YYYY-MM-DD` date.
pub fn parse_birthday(raw: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                AppError::Validation(format!(
                    "Birthday '{}' is not a valid YYYY-MM-DD date",
                    value
                ))
            }),
    }
}

pub async fn submit_registration(
    pool: &Pool<Sqlite>,
    policy: &DependentItemPolicy,
    input: RegistrationInput,
) -> Result<RegistrationReceipt, AppError> {
    submit_or_update_registration(pool, policy, input, SubmissionMode::Create).await
}

pub async fn update_registration(
    pool: &Pool<Sqlite>,
    policy: &DependentItemPolicy,
    input: RegistrationInput,
) -> Result<RegistrationReceipt, AppError> {
    submit_or_update_registration(pool, policy, input, SubmissionMode::Update).await
}

/// Applies a create or update atomically. Either every requested course with
/// a catalog match is enrolled and every matching supply attached, or nothing
/// is written at all.
///
/// The first statement of the transaction is always a write, so the
/// transaction holds the store's write lock before it reads any course row.
/// Enrollment counts therefore cannot change between the capacity check and
/// the insert, and concurrent submissions queue on the lock (bounded by the
/// connection's busy timeout) instead of both passing the check.
#[instrument(skip(pool, policy, input))]
pub async fn submit_or_update_registration(
    pool: &Pool<Sqlite>,
    policy: &DependentItemPolicy,
    input: RegistrationInput,
    mode: SubmissionMode,
) -> Result<RegistrationReceipt, AppError> {
    let mut request = ValidatedRegistration::from_input(input, mode)?;
    policy.apply(&mut request.courses);

    // Wall-clock time of this host, not the database's.
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let result = apply_registration(&mut tx, &request, now).await;

    match result {
        Ok(receipt) => {
            tx.commit().await?;
            info!(
                registration_id = receipt.id,
                courses = request.courses.len(),
                supplies = request.supplies.len(),
                "Registration committed"
            );
            Ok(receipt)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                error!(error = %rollback_err, "Failed to roll back registration");
            }
            Err(e)
        }
    }
}

async fn apply_registration(
    conn: &mut SqliteConnection,
    request: &ValidatedRegistration,
    now: DateTime<Utc>,
) -> Result<RegistrationReceipt, AppError> {
    let (registration_id, message) = match &request.target {
        Target::Create { name } => {
            let student_id = upsert_student(conn, name, request.birthday, now).await?;
            let id =
                insert_registration(conn, student_id, request.class_name.as_deref(), now).await?;
            (id, CREATED_MESSAGE)
        }
        Target::Update { id } => {
            let student_id = touch_registration(conn, *id, request.class_name.as_deref(), now)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Registration {} not found", id)))?;

            if let Some(birthday) = request.birthday {
                update_student_birthday(conn, student_id, birthday).await?;
            }

            // Releases this registration's own seats before capacity is
            // rechecked below, so keeping a course it already holds never
            // counts against it.
            release_items(conn, *id).await?;
            (*id, UPDATED_MESSAGE)
        }
    };

    enroll_courses(conn, registration_id, &request.courses).await?;
    attach_supplies(conn, registration_id, &request.supplies).await?;

    Ok(RegistrationReceipt {
        id: registration_id,
        message: message.to_string(),
    })
}

async fn upsert_student(
    conn: &mut SqliteConnection,
    name: &str,
    birthday: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<i64, AppError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO students (name, birthday, created_at) VALUES (?, ?, ?)
         ON CONFLICT (name) DO UPDATE SET birthday = COALESCE(excluded.birthday, students.birthday)
         RETURNING id",
    )
    .bind(name)
    .bind(birthday)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

async fn insert_registration(
    conn: &mut SqliteConnection,
    student_id: i64,
    class_name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64, AppError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO registrations (student_id, class_name, created_at, updated_at)
         VALUES (?, ?, ?, ?)
         RETURNING id",
    )
    .bind(student_id)
    .bind(class_name)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Returns the owning student, or `None` if the registration does not exist.
async fn touch_registration(
    conn: &mut SqliteConnection,
    registration_id: i64,
    class_name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<i64>, AppError> {
    let student_id = sqlx::query_scalar::<_, i64>(
        "UPDATE registrations SET class_name = ?, updated_at = ?
         WHERE id = ?
         RETURNING student_id",
    )
    .bind(class_name)
    .bind(now)
    .bind(registration_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(student_id)
}

async fn update_student_birthday(
    conn: &mut SqliteConnection,
    student_id: i64,
    birthday: NaiveDate,
) -> Result<(), AppError> {
    sqlx::query("UPDATE students SET birthday = ? WHERE id = ?")
        .bind(birthday)
        .bind(student_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn release_items(conn: &mut SqliteConnection, registration_id: i64) -> Result<(), AppError> {
    sqlx::query("DELETE FROM registration_courses WHERE registration_id = ?")
        .bind(registration_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM registration_supplies WHERE registration_id = ?")
        .bind(registration_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct CourseSeats {
    id: i64,
    capacity: i64,
}

async fn enroll_courses(
    conn: &mut SqliteConnection,
    registration_id: i64,
    courses: &[LineItem],
) -> Result<(), AppError> {
    let mut seen = HashSet::new();

    for item in courses {
        if !seen.insert(item.name.as_str()) {
            continue;
        }

        // The transaction already holds the write lock, so this read and the
        // count below see no concurrent enrollment.
        let course = sqlx::query_as::<_, CourseSeats>(
            "SELECT id, capacity FROM courses WHERE name = ?",
        )
        .bind(&item.name)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(course) = course else {
            debug!(course = %item.name, "Skipping course missing from catalog");
            continue;
        };

        let enrolled = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM registration_courses WHERE course_id = ?",
        )
        .bind(course.id)
        .fetch_one(&mut *conn)
        .await?;

        if enrolled >= course.capacity {
            return Err(AppError::CapacityExceeded {
                course: item.name.clone(),
            });
        }

        sqlx::query("INSERT INTO registration_courses (registration_id, course_id) VALUES (?, ?)")
            .bind(registration_id)
            .bind(course.id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn attach_supplies(
    conn: &mut SqliteConnection,
    registration_id: i64,
    supplies: &[LineItem],
) -> Result<(), AppError> {
    let mut seen = HashSet::new();

    for item in supplies {
        if !seen.insert(item.name.as_str()) {
            continue;
        }

        let supply_id = sqlx::query_scalar::<_, i64>("SELECT id FROM supplies WHERE name = ?")
            .bind(&item.name)
            .fetch_optional(&mut *conn)
            .await?;

        match supply_id {
            Some(supply_id) => {
                sqlx::query(
                    "INSERT INTO registration_supplies (registration_id, supply_id) VALUES (?, ?)",
                )
                .bind(registration_id)
                .bind(supply_id)
                .execute(&mut *conn)
                .await?;
            }
            None => debug!(supply = %item.name, "Skipping supply missing from catalog"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birthday_parsing() {
        assert_eq!(parse_birthday(None).unwrap(), None);
        assert_eq!(parse_birthday(Some("")).unwrap(), None);
        assert_eq!(
            parse_birthday(Some("2019-04-30")).unwrap(),
            NaiveDate::from_ymd_opt(2019, 4, 30)
        );
        assert!(matches!(
            parse_birthday(Some("2019-02-30")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            parse_birthday(Some("30/04/2019")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn create_requires_a_name() {
        let input = RegistrationInput {
            name: Some("   ".to_string()),
            ..Default::default()
        };

        let result = ValidatedRegistration::from_input(input, SubmissionMode::Create);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn update_requires_an_id() {
        let input = RegistrationInput {
            name: Some("Amy".to_string()),
            ..Default::default()
        };

        let result = ValidatedRegistration::from_input(input, SubmissionMode::Update);
        assert!(matches!(result, Err(AppError::Validation(msg)) if msg == "Missing ID for update"));
    }

    #[test]
    fn input_accepts_client_payload_shapes() {
        let input: RegistrationInput = serde_json::from_str(
            r#"{
                "id": "12",
                "name": "Amy",
                "birthday": "2019-04-30",
                "class": "K2",
                "courses": [{"name": "Soccer", "price": 5000}],
                "supplies": [{"name": "Dance shoes", "price": "250"}]
            }"#,
        )
        .expect("Failed to parse input");

        assert_eq!(input.id, Some(12));
        assert_eq!(input.class_name.as_deref(), Some("K2"));
        assert_eq!(input.courses, vec![LineItem::new("Soccer", "5000")]);
        assert_eq!(input.supplies, vec![LineItem::new("Dance shoes", "250")]);

        let malformed = serde_json::from_str::<RegistrationInput>(r#"{"id": "abc"}"#);
        assert!(malformed.is_err());
    }
}

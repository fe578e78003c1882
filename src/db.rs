use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{AdminSession, DbAdminSession};
use crate::config::DatabaseConfig;
use crate::error::AppError;
use crate::models::{
    Course, CourseChange, CourseStats, Dashboard, DashboardStatistics, DbCourseUsage, DbLineItem,
    DbRegistrationHeader, LineItem, NewCourse, Registration, RegistrationSettings,
    RegistrationSnapshot, RegistrationSummary, Student, Supply, remaining_seats,
};

pub const REGISTRATION_START_KEY: &str = "registration_start";
pub const REGISTRATION_END_KEY: &str = "registration_end";

#[instrument(skip(config), fields(url = %config.url))]
pub async fn connect(config: &DatabaseConfig) -> Result<Pool<Sqlite>, AppError> {
    info!("Connecting to SQLite database");
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn unique_violation(err: sqlx::Error, message: String) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(message)
        }
        _ => AppError::Database(err),
    }
}

// name, price, sessions, frequency, description
const DEFAULT_COURSES: &[(&str, i64, Option<i64>, Option<&str>, Option<&str>)] = &[
    ("幼兒感統 (限小幼班)", 8000, Some(20), Some("每週1次，1次1小時"), None),
    ("兒童舞蹈 (大中小幼班)", 4400, Some(20), Some("每週1次，1次1小時"), None),
    ("足球 (中大班)", 5000, Some(20), Some("每週1次，1次1小時"), None),
    ("足球 (中小班)", 5000, Some(20), Some("每週1次，1次1小時"), None),
    ("3C3Q積木與桌遊 (大中小)", 5200, Some(20), Some("每週1次，1次1小時"), None),
    ("幼兒美術 (大中小幼)", 4400, Some(20), Some("每週1次，1次1小時"), None),
    ("菁英美語 (限大班)", 7000, Some(40), Some("每週2次"), Some("教材費另計$1500")),
    ("菁英美語教材費", 1500, None, None, Some("選修菁英美語者必選")),
];

const DEFAULT_SUPPLIES: &[(&str, i64)] = &[
    ("全套舞蹈服裝", 1400),
    ("舞衣", 700),
    ("舞鞋", 250),
    ("舞襪", 150),
    ("舞袋", 300),
];

const DEFAULT_REGISTRATION_WINDOW: (&str, &str) = ("2026-02-02T16:00", "2026-02-20T23:59");

/// Inserts the standard catalog and registration window. Existing rows are
/// left untouched, so this is safe to run on every start.
#[instrument(skip(pool))]
pub async fn seed_default_catalog(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    info!("Seeding default catalog");
    let mut tx = pool.begin().await?;

    for (name, price, sessions, frequency, description) in DEFAULT_COURSES {
        sqlx::query(
            "INSERT INTO courses (name, price, sessions, frequency, description)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(price)
        .bind(sessions)
        .bind(frequency)
        .bind(description)
        .execute(&mut *tx)
        .await?;
    }

    for (name, price) in DEFAULT_SUPPLIES {
        sqlx::query("INSERT INTO supplies (name, price) VALUES (?, ?) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .bind(price)
            .execute(&mut *tx)
            .await?;
    }

    let (start, end) = DEFAULT_REGISTRATION_WINDOW;
    for (key, value) in [(REGISTRATION_START_KEY, start), (REGISTRATION_END_KEY, end)] {
        sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT (key) DO NOTHING")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_courses(pool: &Pool<Sqlite>) -> Result<Vec<Course>, AppError> {
    info!("Listing courses");
    let rows = sqlx::query_as::<_, Course>(
        "SELECT id, name, price, sessions, frequency, description, capacity, video_url
         FROM courses
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn list_supplies(pool: &Pool<Sqlite>) -> Result<Vec<Supply>, AppError> {
    info!("Listing supplies");
    let rows = sqlx::query_as::<_, Supply>("SELECT id, name, price FROM supplies ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn create_supply(pool: &Pool<Sqlite>, name: &str, price: i64) -> Result<i64, AppError> {
    info!("Creating supply");
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO supplies (name, price) VALUES (?, ?) RETURNING id",
    )
    .bind(name)
    .bind(price)
    .fetch_one(pool)
    .await
    .map_err(|e| unique_violation(e, format!("Supply '{}' already exists", name)))?;

    Ok(id)
}

#[instrument(skip(pool))]
pub async fn create_course(pool: &Pool<Sqlite>, course: &NewCourse) -> Result<i64, AppError> {
    info!("Creating course");
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO courses (name, price, sessions, frequency, description, capacity, video_url)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(&course.name)
    .bind(course.price)
    .bind(course.sessions)
    .bind(&course.frequency)
    .bind(&course.description)
    .bind(course.capacity.unwrap_or(crate::models::DEFAULT_COURSE_CAPACITY))
    .bind(&course.video_url)
    .fetch_one(pool)
    .await
    .map_err(|e| unique_violation(e, format!("Course name '{}' already exists", course.name)))?;

    Ok(id)
}

#[instrument(skip(pool))]
pub async fn update_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
    change: &CourseChange,
) -> Result<(), AppError> {
    info!("Updating course");
    let result = match change {
        CourseChange::Full(course) => sqlx::query(
            "UPDATE courses
             SET name = ?, price = ?, sessions = ?, frequency = ?, description = ?,
                 capacity = ?, video_url = ?
             WHERE id = ?",
        )
        .bind(&course.name)
        .bind(course.price)
        .bind(course.sessions)
        .bind(&course.frequency)
        .bind(&course.description)
        .bind(course.capacity.unwrap_or(crate::models::DEFAULT_COURSE_CAPACITY))
        .bind(&course.video_url)
        .bind(course_id)
        .execute(pool)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                format!("Course name '{}' is used by another course", course.name),
            )
        })?,
        CourseChange::CapacityOnly(capacity) => {
            sqlx::query("UPDATE courses SET capacity = ? WHERE id = ?")
                .bind(capacity)
                .bind(course_id)
                .execute(pool)
                .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Course {} not found", course_id)));
    }

    Ok(())
}

/// Deletes a course that no registration references.
#[instrument(skip(pool))]
pub async fn delete_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<(), AppError> {
    info!("Deleting course");
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query(
        "DELETE FROM courses
         WHERE id = ?
           AND NOT EXISTS (SELECT 1 FROM registration_courses WHERE course_id = ?)",
    )
    .bind(course_id)
    .bind(course_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if deleted == 0 {
        let registrations = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM registration_courses WHERE course_id = ?",
        )
        .bind(course_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.rollback().await?;

        if registrations > 0 {
            return Err(AppError::CourseInUse {
                course_id,
                registrations,
            });
        }
        return Err(AppError::NotFound(format!("Course {} not found", course_id)));
    }

    tx.commit().await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_course_stats(pool: &Pool<Sqlite>) -> Result<Vec<CourseStats>, AppError> {
    info!("Getting course usage");
    let rows = sqlx::query_as::<_, DbCourseUsage>(
        "SELECT c.id, c.name, c.price, c.sessions, c.frequency, c.capacity, c.description,
                c.video_url, COUNT(rc.id) AS used
         FROM courses c
         LEFT JOIN registration_courses rc ON rc.course_id = c.id
         GROUP BY c.id
         ORDER BY c.id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(CourseStats::from).collect())
}

/// Remaining seats per course name. A display snapshot only; registration
/// re-checks capacity inside its own transaction.
#[instrument(skip(pool))]
pub async fn get_course_availability(
    pool: &Pool<Sqlite>,
) -> Result<BTreeMap<String, i64>, AppError> {
    info!("Getting course availability");
    #[derive(sqlx::FromRow)]
    struct Usage {
        name: String,
        capacity: i64,
        used: i64,
    }

    let rows = sqlx::query_as::<_, Usage>(
        "SELECT c.name, c.capacity, COUNT(rc.id) AS used
         FROM courses c
         LEFT JOIN registration_courses rc ON rc.course_id = c.id
         GROUP BY c.id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.name, remaining_seats(row.capacity, row.used)))
        .collect())
}

#[instrument(skip(pool))]
pub async fn get_course_videos(pool: &Pool<Sqlite>) -> Result<BTreeMap<String, String>, AppError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT name, video_url FROM courses WHERE video_url IS NOT NULL AND video_url != ''",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

#[instrument(skip(pool))]
pub async fn get_registration_settings(
    pool: &Pool<Sqlite>,
) -> Result<RegistrationSettings, AppError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT key, value FROM settings WHERE key IN (?, ?)",
    )
    .bind(REGISTRATION_START_KEY)
    .bind(REGISTRATION_END_KEY)
    .fetch_all(pool)
    .await?;

    let mut values: HashMap<String, String> = rows.into_iter().collect();

    Ok(RegistrationSettings {
        start: values.remove(REGISTRATION_START_KEY).unwrap_or_default(),
        end: values.remove(REGISTRATION_END_KEY).unwrap_or_default(),
    })
}

#[instrument(skip(pool))]
pub async fn set_registration_settings(
    pool: &Pool<Sqlite>,
    start: &str,
    end: &str,
) -> Result<(), AppError> {
    info!("Updating registration window");
    let mut tx = pool.begin().await?;

    for (key, value) in [(REGISTRATION_START_KEY, start), (REGISTRATION_END_KEY, end)] {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn find_student_by_name(
    pool: &Pool<Sqlite>,
    name: &str,
) -> Result<Option<Student>, AppError> {
    let row = sqlx::query_as::<_, Student>(
        "SELECT id, name, birthday, created_at FROM students WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

#[instrument(skip(pool))]
pub async fn get_registration(
    pool: &Pool<Sqlite>,
    registration_id: i64,
) -> Result<Registration, AppError> {
    let row = sqlx::query_as::<_, Registration>(
        "SELECT id, student_id, class_name, email, is_paid, created_at, updated_at
         FROM registrations
         WHERE id = ?",
    )
    .bind(registration_id)
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("Registration {} not found", registration_id)))
}

async fn load_snapshot(
    pool: &Pool<Sqlite>,
    header: DbRegistrationHeader,
) -> Result<RegistrationSnapshot, AppError> {
    let courses = sqlx::query_as::<_, DbLineItem>(
        "SELECT c.name, c.price
         FROM registration_courses rc
         JOIN courses c ON rc.course_id = c.id
         WHERE rc.registration_id = ?
         ORDER BY rc.id",
    )
    .bind(header.id)
    .fetch_all(pool)
    .await?;

    let supplies = sqlx::query_as::<_, DbLineItem>(
        "SELECT s.name, s.price
         FROM registration_supplies rs
         JOIN supplies s ON rs.supply_id = s.id
         WHERE rs.registration_id = ?
         ORDER BY rs.id",
    )
    .bind(header.id)
    .fetch_all(pool)
    .await?;

    Ok(RegistrationSnapshot {
        id: header.id,
        student_name: header.student_name,
        birthday: header.birthday,
        class_name: header.class_name,
        is_paid: header.is_paid,
        created_at: header.created_at,
        updated_at: header.updated_at,
        courses: courses.into_iter().map(LineItem::from).collect(),
        supplies: supplies.into_iter().map(LineItem::from).collect(),
    })
}

/// The student's most recent registration.
#[instrument(skip(pool))]
pub async fn get_registration_by_student_name(
    pool: &Pool<Sqlite>,
    name: &str,
) -> Result<Option<RegistrationSnapshot>, AppError> {
    info!("Looking up registration by student name");
    let header = sqlx::query_as::<_, DbRegistrationHeader>(
        "SELECT r.id, s.name AS student_name, s.birthday, r.class_name, r.is_paid,
                r.created_at, r.updated_at
         FROM registrations r
         JOIN students s ON r.student_id = s.id
         WHERE s.name = ?
         ORDER BY r.created_at DESC, r.id DESC
         LIMIT 1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    match header {
        Some(header) => Ok(Some(load_snapshot(pool, header).await?)),
        None => Ok(None),
    }
}

#[instrument(skip(pool))]
pub async fn get_registration_detail(
    pool: &Pool<Sqlite>,
    registration_id: i64,
) -> Result<RegistrationSnapshot, AppError> {
    let header = sqlx::query_as::<_, DbRegistrationHeader>(
        "SELECT r.id, s.name AS student_name, s.birthday, r.class_name, r.is_paid,
                r.created_at, r.updated_at
         FROM registrations r
         JOIN students s ON r.student_id = s.id
         WHERE r.id = ?",
    )
    .bind(registration_id)
    .fetch_optional(pool)
    .await?;

    match header {
        Some(header) => load_snapshot(pool, header).await,
        None => Err(AppError::NotFound(format!(
            "Registration {} not found",
            registration_id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn get_dashboard(pool: &Pool<Sqlite>) -> Result<Dashboard, AppError> {
    info!("Building registration dashboard");
    let registrations = sqlx::query_as::<_, RegistrationSummary>(
        "SELECT r.id, s.name AS student_name, r.class_name, r.created_at, r.updated_at,
                (SELECT COUNT(*) FROM registration_courses rc WHERE rc.registration_id = r.id)
                    AS course_count,
                (SELECT COUNT(*) FROM registration_supplies rs WHERE rs.registration_id = r.id)
                    AS supply_count,
                r.is_paid, s.birthday
         FROM registrations r
         JOIN students s ON r.student_id = s.id
         ORDER BY r.created_at DESC, r.id DESC",
    )
    .fetch_all(pool)
    .await?;

    let statistics = sqlx::query_as::<_, DashboardStatistics>(
        "SELECT (SELECT COUNT(*) FROM registrations) AS total_registrations,
                (SELECT COUNT(DISTINCT student_id) FROM registrations) AS total_students,
                (SELECT COUNT(*) FROM registration_courses) AS total_course_enrollments,
                (SELECT COUNT(*) FROM registration_supplies) AS total_supply_orders",
    )
    .fetch_one(pool)
    .await?;

    Ok(Dashboard {
        registrations,
        statistics,
    })
}

/// Removes the registration; its course and supply rows go with it.
#[instrument(skip(pool))]
pub async fn delete_registration(pool: &Pool<Sqlite>, registration_id: i64) -> Result<(), AppError> {
    info!("Deleting registration");
    let result = sqlx::query("DELETE FROM registrations WHERE id = ?")
        .bind(registration_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Registration {} not found",
            registration_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn set_payment_status(
    pool: &Pool<Sqlite>,
    registration_id: i64,
    paid: bool,
) -> Result<(), AppError> {
    info!("Updating payment status");
    let result = sqlx::query("UPDATE registrations SET is_paid = ?, updated_at = ? WHERE id = ?")
        .bind(paid)
        .bind(Utc::now())
        .bind(registration_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Registration {} not found",
            registration_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn create_admin_session(
    pool: &Pool<Sqlite>,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<i64, AppError> {
    info!("Creating admin session");
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO admin_sessions (token, created_at, expires_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(token)
    .bind(Utc::now())
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

#[instrument(skip(pool, token))]
pub async fn get_admin_session(pool: &Pool<Sqlite>, token: &str) -> Result<AdminSession, AppError> {
    let session = sqlx::query_as::<_, DbAdminSession>(
        "SELECT id, token, created_at, expires_at FROM admin_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(AdminSession::from(session)),
        None => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_admin_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating admin session");
    sqlx::query("DELETE FROM admin_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired admin sessions");
    let result = sqlx::query("DELETE FROM admin_sessions WHERE expires_at < ?")
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

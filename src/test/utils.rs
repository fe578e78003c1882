#[cfg(test)]
pub mod test_db {
    use crate::config::DatabaseConfig;
    use crate::db::{connect, create_course, create_supply, run_migrations, seed_default_catalog};
    use crate::error::AppError;
    use crate::models::{LineItem, NewCourse};
    use crate::registration::{DependentItemPolicy, RegistrationInput, submit_registration};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Once;
    use tempfile::TempDir;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();

    #[derive(Default)]
    pub struct TestDbBuilder {
        default_catalog: bool,
        file_backed: bool,
        courses: Vec<TestCourse>,
        supplies: Vec<TestSupply>,
        registrations: Vec<TestRegistration>,
    }

    pub struct TestCourse {
        pub name: String,
        pub price: i64,
        pub capacity: i64,
    }

    pub struct TestSupply {
        pub name: String,
        pub price: i64,
    }

    pub struct TestRegistration {
        pub student: String,
        pub class_name: Option<String>,
        pub courses: Vec<String>,
        pub supplies: Vec<String>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn default_catalog(mut self) -> Self {
            self.default_catalog = true;
            self
        }

        /// Backs the database with a temporary file so several connections
        /// can share it.
        pub fn file_backed(mut self) -> Self {
            self.file_backed = true;
            self
        }

        pub fn course(mut self, name: &str, price: i64, capacity: i64) -> Self {
            self.courses.push(TestCourse {
                name: name.to_string(),
                price,
                capacity,
            });
            self
        }

        pub fn supply(mut self, name: &str, price: i64) -> Self {
            self.supplies.push(TestSupply {
                name: name.to_string(),
                price,
            });
            self
        }

        pub fn registration(
            mut self,
            student: &str,
            class_name: Option<&str>,
            courses: &[&str],
            supplies: &[&str],
        ) -> Self {
            self.registrations.push(TestRegistration {
                student: student.to_string(),
                class_name: class_name.map(String::from),
                courses: courses.iter().map(|c| c.to_string()).collect(),
                supplies: supplies.iter().map(|s| s.to_string()).collect(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            let (pool, dir) = if self.file_backed {
                let dir = tempfile::tempdir()
                    .map_err(|e| AppError::Internal(format!("Failed to create temp dir: {}", e)))?;
                let url = format!("sqlite://{}", dir.path().join("test.db").display());
                let pool = connect(&DatabaseConfig {
                    url,
                    max_connections: 8,
                    busy_timeout_secs: 30,
                })
                .await?;
                (pool, Some(dir))
            } else {
                // Every in-memory connection is its own database, so keep
                // exactly one alive for the lifetime of the pool.
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?;
                (pool, None)
            };

            run_migrations(&pool).await?;

            if self.default_catalog {
                seed_default_catalog(&pool).await?;
            }

            let mut course_id_map: HashMap<String, i64> = HashMap::new();
            let mut supply_id_map: HashMap<String, i64> = HashMap::new();
            let mut registration_id_map: HashMap<String, i64> = HashMap::new();

            for course in &self.courses {
                let id = create_course(
                    &pool,
                    &NewCourse {
                        name: course.name.clone(),
                        price: course.price,
                        capacity: Some(course.capacity),
                        ..Default::default()
                    },
                )
                .await?;
                course_id_map.insert(course.name.clone(), id);
            }

            for supply in &self.supplies {
                let id = create_supply(&pool, &supply.name, supply.price).await?;
                supply_id_map.insert(supply.name.clone(), id);
            }

            let policy = DependentItemPolicy::default();
            for registration in &self.registrations {
                let input = RegistrationInput {
                    name: Some(registration.student.clone()),
                    class_name: registration.class_name.clone(),
                    courses: registration
                        .courses
                        .iter()
                        .map(|c| LineItem::new(c, ""))
                        .collect(),
                    supplies: registration
                        .supplies
                        .iter()
                        .map(|s| LineItem::new(s, ""))
                        .collect(),
                    ..Default::default()
                };

                let receipt = submit_registration(&pool, &policy, input).await?;
                registration_id_map.insert(registration.student.clone(), receipt.id);
            }

            Ok(TestDb {
                pool,
                course_id_map,
                supply_id_map,
                registration_id_map,
                _dir: dir,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub course_id_map: HashMap<String, i64>,
        pub supply_id_map: HashMap<String, i64>,
        pub registration_id_map: HashMap<String, i64>,
        _dir: Option<TempDir>,
    }

    impl TestDb {
        pub fn course_id(&self, name: &str) -> Option<i64> {
            self.course_id_map.get(name).copied()
        }

        pub fn supply_id(&self, name: &str) -> Option<i64> {
            self.supply_id_map.get(name).copied()
        }

        pub fn registration_id(&self, student: &str) -> Option<i64> {
            self.registration_id_map.get(student).copied()
        }

        pub async fn enrolled(&self, course: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM registration_courses rc
                 JOIN courses c ON rc.course_id = c.id
                 WHERE c.name = ?",
            )
            .bind(course)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count enrollments")
        }

        pub async fn count(&self, table: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await
                .expect("Failed to count rows")
        }

        pub async fn course_names(&self, registration_id: i64) -> Vec<String> {
            sqlx::query_scalar::<_, String>(
                "SELECT c.name FROM registration_courses rc
                 JOIN courses c ON rc.course_id = c.id
                 WHERE rc.registration_id = ?
                 ORDER BY rc.id",
            )
            .bind(registration_id)
            .fetch_all(&self.pool)
            .await
            .expect("Failed to list registration courses")
        }

        pub async fn supply_names(&self, registration_id: i64) -> Vec<String> {
            sqlx::query_scalar::<_, String>(
                "SELECT s.name FROM registration_supplies rs
                 JOIN supplies s ON rs.supply_id = s.id
                 WHERE rs.registration_id = ?
                 ORDER BY rs.id",
            )
            .bind(registration_id)
            .fetch_all(&self.pool)
            .await
            .expect("Failed to list registration supplies")
        }

        /// Writes an enrollment directly, bypassing the capacity check.
        pub async fn force_enroll(&self, registration_id: i64, course: &str) {
            let course_id = self.course_id(course).expect("Course not found");
            sqlx::query("INSERT INTO registration_courses (registration_id, course_id) VALUES (?, ?)")
                .bind(registration_id)
                .bind(course_id)
                .execute(&self.pool)
                .await
                .expect("Failed to insert enrollment");
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use std::sync::Arc;

    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};

    use crate::auth::{AdminCredentials, SessionStore, SqliteSessionStore};
    use crate::config::AppConfig;
    use crate::init_rocket;
    use crate::registration::DependentItemPolicy;

    pub use super::test_db::{TestDb, TestDbBuilder};

    pub const ADMIN_TEST_PASSWORD: &str = "letmein";

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        setup_test_client_with_config(test_db, AppConfig::default()).await
    }

    pub async fn setup_test_client_with_config(
        test_db: TestDb,
        config: AppConfig,
    ) -> (Client, TestDb) {
        let credentials =
            AdminCredentials::from_password(ADMIN_TEST_PASSWORD, 4).expect("Failed to hash password");
        let sessions: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(
            test_db.pool.clone(),
            chrono::Duration::hours(1),
        ));

        let rocket = init_rocket(
            test_db.pool.clone(),
            config,
            DependentItemPolicy::default(),
            credentials,
            sessions,
        );

        let client = Client::tracked(rocket)
            .await
            .expect("Failed to build rocket client");

        (client, test_db)
    }

    pub async fn login_admin(client: &Client) -> String {
        let response = client
            .post("/admin/login")
            .header(ContentType::JSON)
            .body(json!({ "password": ADMIN_TEST_PASSWORD }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("Login body");
        body["token"].as_str().expect("Token in login body").to_string()
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};

    use crate::api::{CatalogResponse, CourseStatsResponse, LoginResponse, RegistrationQueryResponse};
    use crate::config::AppConfig;
    use crate::db::set_registration_settings;
    use crate::error::ErrorResponse;
    use crate::models::Dashboard;
    use crate::registration::{CREATED_MESSAGE, RegistrationReceipt, UPDATED_MESSAGE};
    use crate::test::test_utils::{
        TestDb, TestDbBuilder, bearer, login_admin, setup_test_client,
        setup_test_client_with_config,
    };

    async fn standard_db() -> TestDb {
        TestDbBuilder::new()
            .course("Soccer", 5000, 2)
            .course("Art", 4400, 10)
            .supply("Dance shoes", 250)
            .registration("Amy", Some("K1"), &["Soccer"], &["Dance shoes"])
            .build()
            .await
            .expect("Failed to build test database")
    }

    async fn post_json(client: &Client, path: &str, body: Value) -> (Status, Value) {
        let response = client
            .post(path.to_string())
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;

        let status = response.status();
        let body = response.into_json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    fn error_message(body: &Value) -> String {
        let error: ErrorResponse =
            serde_json::from_value(body.clone()).expect("Body should be an error response");
        assert_eq!(error.status, "error");
        error.message
    }

    #[rocket::async_test]
    async fn test_submit_and_query_registration() {
        let (client, test_db) = setup_test_client(standard_db().await).await;

        let (status, body) = post_json(
            &client,
            "/submit-registration",
            json!({
                "name": "  Ben  ",
                "birthday": "2019-04-01",
                "class": "K2",
                "courses": [{ "name": "Art", "price": 4400 }],
                "supplies": [{ "name": "Dance shoes", "price": "250" }]
            }),
        )
        .await;

        assert_eq!(status, Status::Ok);
        let receipt: RegistrationReceipt = serde_json::from_value(body).expect("Receipt body");
        assert_eq!(receipt.message, CREATED_MESSAGE);
        assert_eq!(test_db.course_names(receipt.id).await, vec!["Art"]);

        let response = client.get("/query-registration?name=Ben").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let found: RegistrationQueryResponse = response.into_json().await.expect("Query body");
        assert_eq!(found.id, receipt.id);
        assert_eq!(found.name, "Ben");
        assert_eq!(found.birthday, "2019-04-01");
        assert_eq!(found.class, "K2");
        assert_eq!(found.courses[0].price, "4400");
        assert_eq!(found.total_items, 2);
    }

    #[rocket::async_test]
    async fn test_query_registration_errors_and_fallbacks() {
        let test_db = TestDbBuilder::new()
            .course("Art", 4400, 10)
            .registration("Cleo", None, &["Art"], &[])
            .build()
            .await
            .expect("Failed to build test database");
        let (client, _test_db) = setup_test_client(test_db).await;

        let response = client.get("/query-registration").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client.get("/query-registration?name=%20%20").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client.get("/query-registration?name=Nobody").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
        let body: Value = response.into_json().await.expect("Error body");
        assert!(error_message(&body).contains("Nobody"));

        let response = client.get("/query-registration?name=Cleo").dispatch().await;
        let found: Value = response.into_json().await.expect("Query body");
        assert_eq!(found["class"], "Unspecified");
        assert_eq!(found["birthday"], "");
        assert_eq!(found["totalItems"], 1);
    }

    #[rocket::async_test]
    async fn test_submit_rejects_missing_name() {
        let (client, test_db) = setup_test_client(standard_db().await).await;

        let (status, body) = post_json(
            &client,
            "/submit-registration",
            json!({ "name": "", "courses": [{ "name": "Art" }] }),
        )
        .await;

        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "Student name is required");
        assert_eq!(test_db.count("registrations").await, 1);
    }

    #[rocket::async_test]
    async fn test_full_course_is_reported_and_rolled_back() {
        let (client, test_db) = setup_test_client(standard_db().await).await;

        let (status, _) = post_json(
            &client,
            "/submit-registration",
            json!({ "name": "Ben", "courses": [{ "name": "Soccer" }] }),
        )
        .await;
        assert_eq!(status, Status::Ok);

        let (status, body) = post_json(
            &client,
            "/submit-registration",
            json!({
                "name": "Cleo",
                "courses": [{ "name": "Art" }, { "name": "Soccer" }]
            }),
        )
        .await;

        assert_eq!(status, Status::BadRequest);
        assert!(error_message(&body).contains("Soccer"));
        assert!(body["errors"]["courses"].is_array());

        assert_eq!(test_db.enrolled("Soccer").await, 2);
        assert_eq!(test_db.enrolled("Art").await, 0);

        let response = client.get("/query-registration?name=Cleo").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_update_registration() {
        let (client, test_db) = setup_test_client(standard_db().await).await;
        let amy = test_db.registration_id("Amy").expect("Registration not found");

        let (status, body) = post_json(
            &client,
            "/update-registration",
            json!({
                "id": amy.to_string(),
                "class": "K3",
                "courses": [{ "name": "Soccer" }, { "name": "Art" }],
                "supplies": []
            }),
        )
        .await;

        assert_eq!(status, Status::Ok);
        assert_eq!(body["message"], UPDATED_MESSAGE);
        assert_eq!(body["id"], amy);
        assert_eq!(test_db.course_names(amy).await, vec!["Soccer", "Art"]);
        assert!(test_db.supply_names(amy).await.is_empty());

        let (status, _) = post_json(
            &client,
            "/update-registration",
            json!({ "id": 9999, "courses": [] }),
        )
        .await;
        assert_eq!(status, Status::NotFound);

        let (status, body) =
            post_json(&client, "/update-registration", json!({ "courses": [] })).await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "Missing ID for update");
    }

    #[rocket::async_test]
    async fn test_public_catalog_endpoints() {
        let (client, test_db) = setup_test_client(standard_db().await).await;

        let response = client.get("/api/courses/availability").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let availability: Value = response.into_json().await.expect("Availability body");
        assert_eq!(availability, json!({ "Art": 10, "Soccer": 1 }));

        let response = client.get("/api/catalog").dispatch().await;
        let catalog: CatalogResponse = response.into_json().await.expect("Catalog body");
        assert_eq!(catalog.courses.len(), 2);
        assert_eq!(catalog.supplies.len(), 1);
        assert_eq!(
            catalog.supplies[0].id,
            test_db.supply_id("Dance shoes").expect("Supply not found")
        );

        let response = client.get("/api/course-videos").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let videos: Value = response.into_json().await.expect("Videos body");
        assert_eq!(videos, json!({}));

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.as_deref(), Some("OK"));

        let response = client.get("/api/no-such-thing").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_cors_headers_and_preflight() {
        let (client, _test_db) = setup_test_client(standard_db().await).await;

        let response = client.options("/submit-registration").dispatch().await;
        assert_eq!(response.status(), Status::NoContent);
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("*")
        );
        let methods = response
            .headers()
            .get_one("Access-Control-Allow-Methods")
            .expect("Allowed methods");
        assert!(methods.contains("POST"));

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("*")
        );
    }

    #[rocket::async_test]
    async fn test_admin_login_and_logout() {
        let (client, _test_db) = setup_test_client(standard_db().await).await;

        let response = client.get("/admin/registrations").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
        let body: Value = response.into_json().await.expect("Error body");
        assert!(body["errors"]["authentication"].is_array());

        let response = client
            .get("/admin/registrations")
            .header(Header::new("Authorization", "Token abc"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        let (status, body) =
            post_json(&client, "/admin/login", json!({ "password": "wrong" })).await;
        assert_eq!(status, Status::Unauthorized);
        assert_eq!(error_message(&body), "Incorrect password");

        let (status, _) = post_json(&client, "/admin/login", json!({ "password": "" })).await;
        assert_eq!(status, Status::BadRequest);

        let token = login_admin(&client).await;

        let response = client
            .get("/admin/registrations")
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .post("/admin/logout")
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get("/admin/registrations")
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_login_response_carries_expiry() {
        let (client, _test_db) = setup_test_client(standard_db().await).await;

        let (status, body) = post_json(
            &client,
            "/admin/login",
            json!({ "password": crate::test::test_utils::ADMIN_TEST_PASSWORD }),
        )
        .await;

        assert_eq!(status, Status::Ok);
        let login: LoginResponse = serde_json::from_value(body).expect("Login body");
        assert_eq!(login.token.len(), crate::auth::TOKEN_LENGTH);
        assert!(login.expires_at > chrono::Utc::now());
    }

    #[rocket::async_test]
    async fn test_admin_dashboard_detail_and_payment() {
        let (client, test_db) = setup_test_client(standard_db().await).await;
        let token = login_admin(&client).await;
        let amy = test_db.registration_id("Amy").expect("Registration not found");

        let response = client
            .get("/admin/registrations")
            .header(bearer(&token))
            .dispatch()
            .await;
        let dashboard: Dashboard = response.into_json().await.expect("Dashboard body");
        assert_eq!(dashboard.statistics.total_registrations, 1);
        assert_eq!(dashboard.statistics.total_supply_orders, 1);
        assert!(!dashboard.registrations[0].is_paid);

        let response = client
            .put(format!("/admin/registration/{}/payment", amy))
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({ "paid": true }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/admin/registration/{}", amy))
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let detail: Value = response.into_json().await.expect("Detail body");
        assert_eq!(detail["is_paid"], true);
        assert_eq!(detail["student_name"], "Amy");
        assert_eq!(detail["supplies"][0]["name"], "Dance shoes");

        let response = client
            .delete(format!("/admin/registration/{}", amy))
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(test_db.count("registrations").await, 0);

        let response = client
            .get(format!("/admin/registration/{}", amy))
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_admin_course_management() {
        let (client, test_db) = setup_test_client(standard_db().await).await;
        let token = login_admin(&client).await;

        let response = client
            .post("/admin/course")
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({ "name": "Chess", "price": 3000, "video_url": "https://v.example/c" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let created: Value = response.into_json().await.expect("Created body");
        let chess = created["course_id"].as_i64().expect("Course id");

        let response = client
            .post("/admin/course")
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({ "name": "Chess" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .post("/admin/course")
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({ "name": "Chess", "price": 1 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .put(format!("/admin/course/{}", chess))
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({ "capacity": 5 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        for bad in [json!({}), json!({ "capacity": 0 }), json!({ "capacity": 1000 })] {
            let response = client
                .put(format!("/admin/course/{}", chess))
                .header(bearer(&token))
                .header(ContentType::JSON)
                .body(bad.to_string())
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::BadRequest, "body {}", bad);
        }

        let response = client
            .get("/admin/courses")
            .header(bearer(&token))
            .dispatch()
            .await;
        let stats: CourseStatsResponse = response.into_json().await.expect("Stats body");
        let chess_stats = stats
            .courses
            .iter()
            .find(|c| c.id == chess)
            .expect("Chess in stats");
        assert_eq!((chess_stats.capacity, chess_stats.remaining), (5, 5));
        assert_eq!(chess_stats.video_url, "https://v.example/c");

        let soccer = test_db.course_id("Soccer").expect("Course not found");
        let response = client
            .delete(format!("/admin/course/{}", soccer))
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);
        let body: Value = response.into_json().await.expect("Error body");
        assert!(error_message(&body).contains("1 registration"));

        let response = client
            .delete(format!("/admin/course/{}", chess))
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .put(format!("/admin/course/{}", chess))
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({ "capacity": 5 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_registration_time_settings() {
        let (client, _test_db) = setup_test_client(standard_db().await).await;
        let token = login_admin(&client).await;

        let response = client
            .post("/admin/settings/registration-time")
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({ "start": "2026-03-01 08:00", "end": "2026-03-10T18:00" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.expect("Error body");
        assert!(error_message(&body).contains("start"));

        let response = client
            .post("/admin/settings/registration-time")
            .header(bearer(&token))
            .header(ContentType::JSON)
            .body(json!({ "start": "2026-03-01T08:00", "end": "2026-03-10T18:00" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.get("/api/settings/registration-time").dispatch().await;
        let settings: Value = response.into_json().await.expect("Settings body");
        assert_eq!(
            settings,
            json!({ "start": "2026-03-01T08:00", "end": "2026-03-10T18:00" })
        );
    }

    #[rocket::async_test]
    async fn test_registration_window_enforcement() {
        let test_db = standard_db().await;
        set_registration_settings(&test_db.pool, "2020-01-01T00:00", "2020-01-31T23:59")
            .await
            .expect("Failed to set window");

        let config = AppConfig {
            enforce_registration_window: true,
            ..Default::default()
        };
        let (client, test_db) = setup_test_client_with_config(test_db, config).await;

        let (status, body) = post_json(
            &client,
            "/submit-registration",
            json!({ "name": "Late", "courses": [{ "name": "Art" }] }),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "Registration has closed");

        set_registration_settings(&test_db.pool, "2999-01-01T00:00", "")
            .await
            .expect("Failed to set window");

        let (status, body) = post_json(
            &client,
            "/update-registration",
            json!({ "id": test_db.registration_id("Amy"), "courses": [] }),
        )
        .await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(error_message(&body), "Registration has not opened yet");

        set_registration_settings(&test_db.pool, "2020-01-01T00:00", "")
            .await
            .expect("Failed to set window");

        let (status, _) = post_json(
            &client,
            "/submit-registration",
            json!({ "name": "Open", "courses": [{ "name": "Art" }] }),
        )
        .await;
        assert_eq!(status, Status::Ok);
        assert_eq!(test_db.enrolled("Art").await, 1);
    }

    #[rocket::async_test]
    async fn test_window_ignored_when_not_enforced() {
        let test_db = standard_db().await;
        set_registration_settings(&test_db.pool, "2020-01-01T00:00", "2020-01-31T23:59")
            .await
            .expect("Failed to set window");
        let (client, _test_db) = setup_test_client(test_db).await;

        let (status, _) = post_json(
            &client,
            "/submit-registration",
            json!({ "name": "Anytime", "courses": [{ "name": "Art" }] }),
        )
        .await;
        assert_eq!(status, Status::Ok);
    }
}

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tempfile::TempDir;
use tokio::sync::OnceCell;
use tower::ServiceExt;

use plaza::config::{AppConfig, StoreBackend};
use plaza::infra::{db::Db, memory::MemoryStore, postgres::PgStore, storage::DiskStorage, store::Store};
use plaza::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// "0123456789abcdef0123456789abcdef" (32 bytes), test-only
const TEST_TOKEN_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
pub const DEFAULT_PASSWORD: &str = "testpassword123";
/// Per-file cap used by the test app; small enough to exceed cheaply.
pub const TEST_MAX_FILE_SIZE: usize = 64 * 1024;

/// A 1x1 transparent PNG.
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Enough of a GIF for format sniffing.
pub const GIF_BYTES: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\x00\x00\x00!\xf9\x04\x01";

// ---------------------------------------------------------------------------
// TestApp: shared, lazily initialized once per test binary
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    upload_dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn data(&self) -> Value {
        self.json()["data"].clone()
    }

    pub fn error_message(&self) -> String {
        self.json()["message"].as_str().unwrap_or("").to_string()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body_bytes
    }
}

pub struct TestUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub token: String,
}

/// One part of a multipart/form-data body.
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

impl<'a> Part<'a> {
    pub fn png(name: &'a str) -> Self {
        Part::File {
            name,
            file_name: "pixel.png",
            content_type: "image/png",
            bytes: PNG_BYTES,
        }
    }
}

const BOUNDARY: &str = "plaza-test-boundary-7d41c2";

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: {}\r\n\r\n",
                        name, file_name, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

static TEST_APP: OnceCell<TestApp> = OnceCell::const_new();

/// Get (or lazily create) the shared TestApp instance.
pub async fn app() -> &'static TestApp {
    TEST_APP
        .get_or_init(|| async { TestApp::setup().await })
        .await
}

impl TestApp {
    // ------------------------------------------------------------------
    // Setup: runs once per test binary
    // ------------------------------------------------------------------
    async fn setup() -> Self {
        assert_eq!(STANDARD.decode(TEST_TOKEN_KEY).unwrap().len(), 32);

        let upload_dir = tempfile::tempdir().expect("cannot create upload dir");

        // Postgres only when explicitly requested; the memory backend otherwise.
        match std::env::var("TEST_DATABASE_URL") {
            Ok(database_url) => {
                prepare_database(&database_url).await;
                std::env::set_var("STORE_BACKEND", "postgres");
                std::env::set_var("DATABASE_URL", &database_url);
            }
            Err(_) => {
                std::env::set_var("STORE_BACKEND", "memory");
            }
        }

        std::env::set_var("APP_ENV", "development");
        std::env::set_var("TOKEN_KEY", TEST_TOKEN_KEY);
        std::env::set_var("TOKEN_TTL_HOURS", "1");
        std::env::set_var("UPLOAD_DIR", upload_dir.path());
        std::env::set_var("MAX_FILE_SIZE", TEST_MAX_FILE_SIZE.to_string());
        std::env::set_var("SEED_DEMO_DATA", "false");
        std::env::set_var("DB_MAX_CONNECTIONS", "10");
        std::env::set_var("DB_CONNECT_TIMEOUT_SECONDS", "30");
        // Each #[tokio::test] runs its own runtime while the pool is shared;
        // idle connections from a dropped runtime must not be reused.
        std::env::set_var("DB_IDLE_TIMEOUT_SECONDS", "0");

        let config = AppConfig::from_env().expect("failed to build AppConfig");

        let store: Store = match config.store_backend {
            StoreBackend::Postgres => {
                let db = Db::connect(&config).await.expect("Db::connect failed");
                Arc::new(PgStore::new(db))
            }
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        let storage = DiskStorage::new(&config.upload_dir, config.max_file_size)
            .await
            .expect("DiskStorage::new failed");

        let state = AppState {
            store,
            storage,
            token_key: config.token_key,
            token_ttl_hours: config.token_ttl_hours,
        };

        let router = plaza::http::router(state.clone());

        TestApp {
            router,
            state,
            upload_dir,
        }
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<(&str, Vec<u8>)>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        for &(key, value) in headers {
            builder = builder.header(key, value);
        }

        let request = match body {
            Some((content_type, bytes)) => builder
                .header("content-type", content_type)
                .body(Body::from(bytes))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse {
            status,
            headers,
            body_bytes,
        }
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<(&str, Vec<u8>)>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(method, path, body, &headers).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.send(Method::GET, path, None, token).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.send(Method::POST, path, None, token).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        let bytes = serde_json::to_vec(&body).unwrap();
        self.send(Method::POST, path, Some(("application/json", bytes)), token)
            .await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        parts: &[Part<'_>],
        token: Option<&str>,
    ) -> TestResponse {
        let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);
        self.send(
            Method::POST,
            path,
            Some((content_type.as_str(), multipart_body(parts))),
            token,
        )
        .await
    }

    pub async fn put_multipart(
        &self,
        path: &str,
        parts: &[Part<'_>],
        token: Option<&str>,
    ) -> TestResponse {
        let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);
        self.send(
            Method::PUT,
            path,
            Some((content_type.as_str(), multipart_body(parts))),
            token,
        )
        .await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.send(Method::DELETE, path, None, token).await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// Registers through the API and keeps the issued token.
    pub async fn create_user(&self, suffix: &str) -> TestUser {
        let username = format!("user_{}", suffix);
        let email = format!("test_{}@example.com", suffix);

        let resp = self
            .post_json(
                "/api/v1/auth/register",
                json!({
                    "email": email,
                    "username": username,
                    "password": DEFAULT_PASSWORD,
                }),
                None,
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "register failed: {:?}", resp.json());

        let data = resp.data();
        TestUser {
            id: data["user"]["id"].as_i64().expect("user id"),
            username,
            email,
            token: data["token"].as_str().expect("token").to_string(),
        }
    }

    /// Creates a text-only post. Returns the post id.
    pub async fn create_post(&self, user: &TestUser, content: &str) -> i64 {
        let resp = self
            .post_multipart("/api/v1/posts", &[Part::Text("content", content)], Some(&user.token))
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "create post failed: {:?}", resp.json());
        resp.data()["id"].as_i64().expect("post id")
    }

    /// Creates a topic. Returns the topic id.
    pub async fn create_topic(&self, user: &TestUser, title: &str, category: &str) -> i64 {
        let resp = self
            .post_json(
                "/api/v1/topics",
                json!({ "title": title, "category": category, "description": "about it" }),
                Some(&user.token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "create topic failed: {:?}", resp.json());
        resp.data()["id"].as_i64().expect("topic id")
    }

    /// Files currently in the upload directory.
    pub fn upload_names(&self) -> Vec<String> {
        std::fs::read_dir(self.upload_dir.path())
            .expect("cannot read upload dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()
    }
}

async fn prepare_database(database_url: &str) {
    let db_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await
        .expect("cannot connect to test database");

    // ---- Run migrations ----
    let mut migration_files: Vec<_> = std::fs::read_dir("migrations")
        .expect("cannot read migrations/")
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "sql"))
        .collect();
    migration_files.sort_by_key(|e| e.file_name());

    for entry in &migration_files {
        let sql = std::fs::read_to_string(entry.path())
            .unwrap_or_else(|_| panic!("cannot read {:?}", entry.path()));
        sqlx::raw_sql(&sql)
            .execute(&db_pool)
            .await
            .unwrap_or_else(|e| panic!("migration {:?} failed: {}", entry.file_name(), e));
    }

    // ---- Truncate all tables for clean test state ----
    sqlx::raw_sql(
        "DO $$ DECLARE r RECORD; BEGIN \
         FOR r IN (SELECT tablename FROM pg_tables WHERE schemaname = 'public') LOOP \
         EXECUTE 'TRUNCATE TABLE ' || quote_ident(r.tablename) || ' RESTART IDENTITY CASCADE'; \
         END LOOP; END $$;",
    )
    .execute(&db_pool)
    .await
    .expect("failed to truncate tables");

    db_pool.close().await;
}

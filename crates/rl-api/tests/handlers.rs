use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::http::header::CONTENT_TYPE;
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::{test, web, App};
use async_trait::async_trait;
use rl_api::{configure_routes, AppState};
use rl_auth_simple::SimpleAuthProvider;
use rl_core::error::{AppError, Result};
use rl_core::models::{Comment, DocId, Post, RecordingReply, User};
use rl_core::traits::DocumentStore;
use rl_db_sqlite::SqliteDocumentStore;
use rl_storage_local::LocalMediaStore;
use serde_json::{json, Value};
use tempfile::TempDir;

const BOUNDARY: &str = "rapline-test-boundary";
const MAX_UPLOAD: u64 = 64;

/// Failures a test can switch on while the app is running.
#[derive(Default)]
struct Faults {
    fail_replies: AtomicBool,
    fail_comments: AtomicBool,
    /// Added before every store call
    delay_ms: AtomicU64,
}

/// Delegates to SQLite, remembers stored replies, and misbehaves on request.
struct SpyStore {
    inner: SqliteDocumentStore,
    replies: Arc<Mutex<Vec<RecordingReply>>>,
    faults: Arc<Faults>,
}

impl SpyStore {
    async fn pause(&self) {
        let delay = self.faults.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl DocumentStore for SpyStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.pause().await;
        self.inner.insert_user(user).await
    }
    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        self.pause().await;
        self.inner.find_user_by_name(name).await
    }
    async fn find_user_by_id(&self, id: DocId) -> Result<Option<User>> {
        self.pause().await;
        self.inner.find_user_by_id(id).await
    }
    async fn insert_post(&self, post: &Post) -> Result<()> {
        self.pause().await;
        self.inner.insert_post(post).await
    }
    async fn find_post_by_id(&self, id: DocId) -> Result<Option<Post>> {
        self.pause().await;
        self.inner.find_post_by_id(id).await
    }
    async fn find_all_posts(&self) -> Result<Vec<Post>> {
        self.pause().await;
        self.inner.find_all_posts().await
    }
    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.pause().await;
        if self.faults.fail_comments.load(Ordering::SeqCst) {
            return Err(AppError::Storage("disk full".into()));
        }
        self.inner.insert_comment(comment).await
    }
    async fn find_comments_by_post(&self, post_id: DocId) -> Result<Vec<Comment>> {
        self.pause().await;
        self.inner.find_comments_by_post(post_id).await
    }
    async fn insert_recording_reply(&self, reply: &RecordingReply) -> Result<()> {
        self.pause().await;
        if self.faults.fail_replies.load(Ordering::SeqCst) {
            return Err(AppError::Storage("connection reset".into()));
        }
        self.inner.insert_recording_reply(reply).await?;
        self.replies.lock().unwrap().push(reply.clone());
        Ok(())
    }
}

struct Harness {
    state: web::Data<AppState>,
    replies: Arc<Mutex<Vec<RecordingReply>>>,
    faults: Arc<Faults>,
    uploads: TempDir,
}

async fn harness_with(store_timeout: Duration) -> Harness {
    let uploads = tempfile::tempdir().unwrap();
    let replies = Arc::new(Mutex::new(Vec::new()));
    let faults = Arc::new(Faults::default());
    let store = SpyStore {
        inner: SqliteDocumentStore::new("sqlite::memory:").await.unwrap(),
        replies: replies.clone(),
        faults: faults.clone(),
    };
    let media = LocalMediaStore::open(uploads.path().to_path_buf(), MAX_UPLOAD)
        .await
        .unwrap();

    let state = web::Data::new(AppState {
        store: Box::new(store),
        media: Box::new(media),
        auth: Box::new(SimpleAuthProvider::new()),
        store_timeout,
    });
    Harness { state, replies, faults, uploads }
}

async fn harness() -> Harness {
    harness_with(Duration::from_secs(5)).await
}

impl Harness {
    fn upload_dir_entries(&self) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(self.uploads.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

macro_rules! app {
    ($h:expr) => {
        test::init_service(App::new().app_data($h.state.clone()).configure(configure_routes)).await
    };
}

/// Sends a request and returns the status and raw body.
macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        (status, body)
    }};
}

fn json_of(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

fn post_json(uri: &str, body: Value) -> test::TestRequest {
    test::TestRequest::post().uri(uri).set_json(body)
}

enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart(parts: &[Part]) -> test::TestRequest {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File(filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}").as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    test::TestRequest::post()
        .uri("/lreply")
        .insert_header((CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}")))
        .set_payload(body)
}

fn user_body(name: &str, password: &str) -> Value {
    json!({ "user_Name": name, "user_Pass": password })
}

#[actix_web::test]
async fn test_register_then_duplicate_is_conflict() {
    let h = harness().await;
    let app = app!(h);

    let (status, body) = call!(app, post_json("/user", user_body("alice", "p1")));
    assert_eq!(status, StatusCode::CREATED);
    let created = json_of(&body);
    let id = created["user_ID"].as_str().unwrap();
    assert!(!id.is_empty());
    assert!(DocId::parse(id).is_ok());
    assert_eq!(created["user_Name"], "alice");
    assert!(created.get("user_Pass").is_none());

    let (status, body) = call!(app, post_json("/user", user_body("alice", "p1")));
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_of(&body)["error"], "conflict");
}

#[actix_web::test]
async fn test_concurrent_registrations_never_both_succeed() {
    let h = harness().await;
    let app = app!(h);

    let first = test::call_service(&app, post_json("/user", user_body("mc", "a")).to_request());
    let second = test::call_service(&app, post_json("/user", user_body("mc", "b")).to_request());
    let (a, b) = futures_util::join!(first, second);

    let mut statuses = [a.status().as_u16(), b.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, [201, 409]);
}

#[actix_web::test]
async fn test_register_requires_name_and_password() {
    let h = harness().await;
    let app = app!(h);

    let (status, body) = call!(app, post_json("/user", json!({ "user_Name": "nopass" })));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["error"], "bad_input");

    let (status, body) = call!(
        app,
        test::TestRequest::post().uri("/user").set_payload("{not json")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["error"], "bad_input");
}

#[actix_web::test]
async fn test_login_matches_only_exact_credentials() {
    let h = harness().await;
    let app = app!(h);

    let (_, body) = call!(app, post_json("/user", user_body("alice", "p1")));
    let registered = json_of(&body);

    let (status, body) = call!(app, post_json("/login", user_body("alice", "p1")));
    assert_eq!(status, StatusCode::OK);
    let logged_in = json_of(&body);
    assert_eq!(logged_in, registered);
    assert!(logged_in.get("user_Pass").is_none());

    let (status, wrong_password) = call!(app, post_json("/login", user_body("alice", "wrong")));
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_of(&wrong_password)["error"], "not_found");

    let (status, unknown_name) = call!(app, post_json("/login", user_body("nobody", "p1")));
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (wrong_password, unknown_name) = (json_of(&wrong_password), json_of(&unknown_name));
    assert_eq!(wrong_password["error"], unknown_name["error"]);
    assert_eq!(
        wrong_password["message"].as_str().unwrap().replace("alice", "nobody"),
        unknown_name["message"]
    );
}

#[actix_web::test]
async fn test_created_post_listed_exactly_once() {
    let h = harness().await;
    let app = app!(h);

    let (_, body) = call!(app, post_json("/user", user_body("producer", "pw")));
    let owner = json_of(&body)["user_ID"].as_str().unwrap().to_string();

    let (status, body) = call!(
        app,
        post_json(
            "/posts",
            json!({
                "user_Id": owner,
                "post_Title": "Late night cypher",
                "soundcloud_URL": "https://soundcloud.com/producer/cypher",
            }),
        )
    );
    assert_eq!(status, StatusCode::CREATED);
    let created = json_of(&body);
    assert!(DocId::parse(created["post_Id"].as_str().unwrap()).is_ok());

    let (status, body) = call!(app, test::TestRequest::get().uri("/posts"));
    assert_eq!(status, StatusCode::OK);
    let listed = json_of(&body);
    let matches: Vec<_> = listed
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["post_Id"] == created["post_Id"])
        .collect();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["post_Title"], "Late night cypher");
    assert_eq!(matches[0]["user_Id"], owner.as_str());
    assert_eq!(
        matches[0]["soundcloud_URL"],
        "https://soundcloud.com/producer/cypher"
    );
}

#[actix_web::test]
async fn test_post_owner_must_exist_and_be_well_formed() {
    let h = harness().await;
    let app = app!(h);

    let unknown = DocId::generate().to_string();
    let (status, _) = call!(
        app,
        post_json("/posts", json!({ "user_Id": unknown, "post_Title": "t" }))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call!(
        app,
        post_json("/posts", json!({ "user_Id": "zzz", "post_Title": "t" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["error"], "bad_input");

    let (_, body) = call!(app, test::TestRequest::get().uri("/posts"));
    assert_eq!(json_of(&body), json!([]));
}

#[actix_web::test]
async fn test_comments_listed_for_their_post_newest_first() {
    let h = harness().await;
    let app = app!(h);

    let (_, body) = call!(app, post_json("/user", user_body("fan", "pw")));
    let user = json_of(&body)["user_ID"].as_str().unwrap().to_string();

    let mut posts = Vec::new();
    for title in ["a", "b"] {
        let (_, body) = call!(
            app,
            post_json("/posts", json!({ "user_Id": user, "post_Title": title }))
        );
        posts.push(json_of(&body)["post_Id"].as_str().unwrap().to_string());
    }

    for (post, text) in [(&posts[0], "first"), (&posts[1], "elsewhere"), (&posts[0], "second")] {
        let (status, body) = call!(
            app,
            post_json(
                "/comments",
                json!({ "PPId": post, "user_Id": user, "text_reply_text": text }),
            )
        );
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json_of(&body)["text_reply_text"], text);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri(&format!("/comments?id={}", posts[0]))
    );
    assert_eq!(status, StatusCode::OK);
    let listed = json_of(&body);
    let listed = listed.as_array().unwrap();
    let texts: Vec<_> = listed.iter().map(|c| c["text_reply_text"].clone()).collect();
    assert_eq!(texts, [json!("second"), json!("first")]);
    assert!(listed.iter().all(|c| c["PPId"] == posts[0].as_str()));
}

#[actix_web::test]
async fn test_comment_references_checked() {
    let h = harness().await;
    let app = app!(h);

    let (_, body) = call!(app, post_json("/user", user_body("fan", "pw")));
    let user = json_of(&body)["user_ID"].as_str().unwrap().to_string();

    let (status, _) = call!(
        app,
        post_json(
            "/comments",
            json!({ "PPId": DocId::generate().to_string(), "user_Id": user, "text_reply_text": "hi" }),
        )
    );
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call!(
        app,
        post_json(
            "/comments",
            json!({ "PPId": "5a1b2c", "user_Id": user, "text_reply_text": "hi" }),
        )
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call!(app, test::TestRequest::get().uri("/comments?id=5a1b2c"));
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call!(app, test::TestRequest::get().uri("/comments"));
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_get_user_distinguishes_malformed_from_missing() {
    let h = harness().await;
    let app = app!(h);

    let (_, body) = call!(app, post_json("/user", user_body("alice", "p1")));
    let id = json_of(&body)["user_ID"].as_str().unwrap().to_string();

    let (status, body) = call!(app, test::TestRequest::get().uri(&format!("/user?id={id}")));
    assert_eq!(status, StatusCode::OK);
    let fetched = json_of(&body);
    assert_eq!(fetched["user_Name"], "alice");
    assert!(fetched.get("user_Pass").is_none());

    let (status, body) = call!(app, test::TestRequest::get().uri("/user?id=not-hex"));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["error"], "bad_input");

    let unknown = DocId::generate();
    let (status, body) = call!(app, test::TestRequest::get().uri(&format!("/user?id={unknown}")));
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_of(&body)["error"], "not_found");
}

#[actix_web::test]
async fn test_upload_reply_stores_identical_bytes() {
    let h = harness().await;
    let app = app!(h);

    let (_, body) = call!(app, post_json("/user", user_body("mc", "pw")));
    let user = json_of(&body)["user_ID"].as_str().unwrap().to_string();
    let (_, body) = call!(
        app,
        post_json("/posts", json!({ "user_Id": user, "post_Title": "beat" }))
    );
    let post = json_of(&body)["post_Id"].as_str().unwrap().to_string();

    let audio: &[u8] = b"\x00\x01fake-m4a\r\n--not-a-boundary\xff";
    let (status, body) = call!(
        app,
        multipart(&[
            Part::Text("user_Id", &user),
            Part::Text("username", "mc"),
            Part::File("verse one.m4a", audio),
            Part::Text("parent_Post_Id", &post),
            Part::Text("comments", "first take"),
        ])
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"200OK"));

    let replies = h.replies.lock().unwrap().clone();
    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert_eq!(reply.user_id, Some(DocId::parse(&user).unwrap()));
    assert_eq!(reply.parent_post_id, Some(DocId::parse(&post).unwrap()));
    assert_eq!(reply.username, "mc");
    assert_eq!(reply.comments, ["first take"]);
    let expected = Path::new(&reply.id.to_string()).join("verse one.m4a");
    assert!(Path::new(&reply.file_path).ends_with(&expected));
    assert_eq!(std::fs::read(&reply.file_path).unwrap(), audio);
    assert_eq!(h.upload_dir_entries(), [reply.id.to_string()]);
}

#[actix_web::test]
async fn test_same_name_upload_keeps_earlier_reply_file() {
    let h = harness().await;
    let app = app!(h);

    let (status, _) = call!(app, multipart(&[Part::File("take.m4a", b"first")]));
    assert_eq!(status, StatusCode::OK);
    let first = h.replies.lock().unwrap()[0].clone();

    // A failed save only cleans up its own file
    h.faults.fail_replies.store(true, Ordering::SeqCst);
    let (status, _) = call!(app, multipart(&[Part::File("take.m4a", b"second")]));
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(std::fs::read(&first.file_path).unwrap(), b"first");

    h.faults.fail_replies.store(false, Ordering::SeqCst);
    let (status, _) = call!(app, multipart(&[Part::File("take.m4a", b"third")]));
    assert_eq!(status, StatusCode::OK);

    let replies = h.replies.lock().unwrap().clone();
    assert_eq!(replies.len(), 2);
    assert_ne!(replies[0].file_path, replies[1].file_path);
    assert_eq!(std::fs::read(&replies[0].file_path).unwrap(), b"first");
    assert_eq!(std::fs::read(&replies[1].file_path).unwrap(), b"third");

    let mut expected = vec![replies[0].id.to_string(), replies[1].id.to_string()];
    expected.sort();
    assert_eq!(h.upload_dir_entries(), expected);
}

#[actix_web::test]
async fn test_upload_failures_leave_no_file() {
    let h = harness().await;
    let app = app!(h);

    let oversize = vec![7u8; MAX_UPLOAD as usize + 1];
    let (status, body) = call!(app, multipart(&[Part::File("huge.wav", &oversize)]));
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_of(&body)["error"], "payload_too_large");

    let missing_post = DocId::generate().to_string();
    let (status, _) = call!(
        app,
        multipart(&[
            Part::File("orphan.m4a", b"abc"),
            Part::Text("parent_Post_Id", &missing_post),
        ])
    );
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call!(app, multipart(&[Part::Text("username", "mc")]));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["error"], "bad_input");

    assert!(h.upload_dir_entries().is_empty());
    assert!(h.replies.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn test_storage_failure_surfaces_and_removes_upload() {
    let h = harness().await;
    h.faults.fail_replies.store(true, Ordering::SeqCst);
    let app = app!(h);

    let (status, body) = call!(app, multipart(&[Part::File("take.m4a", b"abc")]));
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_of(&body)["error"], "storage_failure");
    assert!(h.upload_dir_entries().is_empty());
}

#[actix_web::test]
async fn test_slow_store_answers_storage_failure() {
    let h = harness_with(Duration::from_millis(50)).await;
    h.faults.delay_ms.store(300, Ordering::SeqCst);
    let app = app!(h);

    let (status, body) = call!(app, post_json("/user", user_body("alice", "p1")));
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let err = json_of(&body);
    assert_eq!(err["error"], "storage_failure");
    assert!(err["message"].as_str().unwrap().contains("did not answer within 50ms"));
}

#[actix_web::test]
async fn test_failed_comment_insert_is_reported() {
    let h = harness().await;
    let app = app!(h);

    let (_, body) = call!(app, post_json("/user", user_body("fan", "pw")));
    let user = json_of(&body)["user_ID"].as_str().unwrap().to_string();
    let (_, body) = call!(
        app,
        post_json("/posts", json!({ "user_Id": user, "post_Title": "beat" }))
    );
    let post = json_of(&body)["post_Id"].as_str().unwrap().to_string();

    h.faults.fail_comments.store(true, Ordering::SeqCst);
    let (status, body) = call!(
        app,
        post_json(
            "/comments",
            json!({ "PPId": post, "user_Id": user, "text_reply_text": "lost" }),
        )
    );
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_of(&body)["error"], "storage_failure");

    h.faults.fail_comments.store(false, Ordering::SeqCst);
    let (_, body) = call!(app, test::TestRequest::get().uri(&format!("/comments?id={post}")));
    assert_eq!(json_of(&body), json!([]));
}

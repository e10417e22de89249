//! E2E suite entry point
//!
//! Drives the upload UI through Playwright and the posts API over HTTP.
//! Run with: cargo test --package webcheck-e2e --test e2e -- [OPTIONS]
//!
//! Exits 0 with a skip message when the environment is not configured,
//! 1 when a test fails and 2 on a session-fatal error.

use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use futures::FutureExt;
use image::{Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::TempDir;
use tracing::info;

use webcheck_common::{initialize_logging, ConfigError, Settings, SettingsProvider};
use webcheck_e2e::api::{ApiResponse, PostsClient};
use webcheck_e2e::harness::run_unit_slot;
use webcheck_e2e::schema::{validate_response, Post, PostList};
use webcheck_e2e::upload::UploadPage;
use webcheck_e2e::{
    E2eError, E2eResult, Harness, HarnessOptions, OutcomeRecorder, SuiteReport, TestId, TestReport,
};

#[derive(Parser, Debug)]
#[command(name = "webcheck-e2e")]
#[command(about = "Browser and API end-to-end suite")]
struct Args {
    #[command(flatten)]
    harness: HarnessOptions,

    /// Run only tests whose name contains this string
    #[arg(short, long)]
    name: Option<String>,

    /// Skip the browser tests
    #[arg(long)]
    skip_ui: bool,

    /// Skip the API tests
    #[arg(long)]
    skip_api: bool,
}

fn main() {
    let args = Args::parse();

    let provider = SettingsProvider::from_process_env();
    let settings = match provider.get() {
        Ok(settings) => settings,
        Err(ConfigError::Missing(key)) => {
            println!("Skipping E2E suite: {} is not set", key);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let logs = match initialize_logging(&settings) {
        Ok(logs) => logs,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let result = tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")
        .and_then(|rt| rt.block_on(async_main(args, &settings)));

    for path in logs.paths() {
        info!("Structured log: {}", path.display());
    }

    match result {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args, settings: &Settings) -> anyhow::Result<bool> {
    let start = Instant::now();
    let mut suite = Suite::new(args.name.clone());

    if !args.skip_api {
        let client = PostsClient::from_settings(settings)?;
        api_tests(&mut suite, &client).await;
    }

    if !args.skip_ui {
        let fixtures = Fixtures::create().context("failed to write upload fixtures")?;
        let harness = Harness::start_playwright(&args.harness, settings).await?;
        ui_tests(&mut suite, &harness, &fixtures, &settings.ui_base).await;
        harness.shutdown().await;
    }

    let report = SuiteReport::new(suite.results, start.elapsed());
    info!(
        "Test Results: {} passed, {} failed, {} errors ({} ms)",
        report.passed, report.failed, report.errors, report.duration_ms
    );
    report.write_results(&settings.reports_dir)?;

    Ok(report.success())
}

struct Suite {
    recorder: OutcomeRecorder,
    filter: Option<String>,
    results: Vec<TestReport>,
}

impl Suite {
    fn new(filter: Option<String>) -> Self {
        Self {
            recorder: OutcomeRecorder::new(),
            filter,
            results: Vec::new(),
        }
    }

    fn selected(&self, name: &str) -> bool {
        self.filter.as_deref().map_or(true, |f| name.contains(f))
    }

    async fn unit<F, Fut>(&mut self, name: &str, body: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = E2eResult<()>>,
    {
        if self.selected(name) {
            let report = run_unit_slot(&self.recorder, TestId::new(name), body).await;
            self.results.push(report);
        }
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> E2eResult<()> {
    if condition {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(message()))
    }
}

fn expect_status(resp: &ApiResponse, status: u16) -> E2eResult<()> {
    check(resp.status == status, || {
        format!("expected status {}, got {}", status, resp.status)
    })
}

/// Fail unless validation rejects the body
fn expect_invalid(resp: &ApiResponse) -> E2eResult<()> {
    match validate_response::<Post>(&resp.body()?, false) {
        Err(E2eError::Validation(_)) => Ok(()),
        Err(e) => Err(e),
        Ok(post) => Err(E2eError::AssertionFailed(format!("{:?} passed validation", post))),
    }
}

async fn api_tests(suite: &mut Suite, client: &PostsClient) {
    suite
        .unit("test_get_all_posts", || async move {
            let resp = client.list(&[]).await?;
            expect_status(&resp, 200)?;
            let posts: PostList = validate_response(&resp.body()?, true)?;
            check(posts.0.len() == 100, || format!("expected 100 posts, got {}", posts.0.len()))
        })
        .await;

    for id in [1, 50, 100] {
        let name = format!("test_get_post_valid[valid_id_{}]", id);
        suite
            .unit(&name, || async move {
                let resp = client.get(id).await?;
                expect_status(&resp, 200)?;
                let post: Post = validate_response(&resp.body()?, true)?;
                check(post.id == id, || format!("expected id {}, got {}", id, post.id))
            })
            .await;
    }

    for id in [0, 101, 999] {
        let name = format!("test_get_post_invalid[invalid_id_{}]", id);
        suite
            .unit(&name, || async move {
                let resp = client.get(id).await?;
                expect_status(&resp, 404)?;
                check(resp.text == "{}", || format!("expected empty object, got {}", resp.text))
            })
            .await;
    }

    suite
        .unit("test_response_headers", || async move {
            let resp = client.list(&[]).await?;
            check(resp.is_json(), || format!("content type was {:?}", resp.content_type))
        })
        .await;

    suite
        .unit("test_duplicate_post_ids", || async move {
            let resp = client.list(&[]).await?;
            let posts: PostList = validate_response(&resp.body()?, true)?;
            let mut ids: Vec<i64> = posts.0.iter().map(|p| p.id).collect();
            ids.sort_unstable();
            ids.dedup();
            check(ids.len() == posts.0.len(), || "duplicate post ids".to_string())
        })
        .await;

    suite
        .unit("test_get_posts_with_params_ignored", || async move {
            let resp = client.list(&[("userId", "1")]).await?;
            expect_status(&resp, 200)?;
            validate_response::<PostList>(&resp.body()?, true).map(|_| ())
        })
        .await;

    for user in ["-1", "-99"] {
        let name = format!("test_get_posts_invalid_user_id[neg_user_{}]", user);
        suite
            .unit(&name, || async move {
                let resp = client.list(&[("userId", user)]).await?;
                check([200, 400, 404].contains(&resp.status), || {
                    format!("unexpected status {}", resp.status)
                })?;
                check(resp.body()?.is_array(), || "response is not a JSON list".to_string())
            })
            .await;
    }

    suite
        .unit("test_create_post_valid", || async move {
            let resp = client.create(&json!({"title": "foo", "body": "bar", "userId": 1})).await?;
            expect_status(&resp, 201)?;
            let post: Post = validate_response(&resp.body()?, true)?;
            check(post.title == "foo", || format!("title was {:?}", post.title))
        })
        .await;

    let invalid_creates = [
        ("empty_payload", json!({})),
        ("only_title", json!({"title": "only title"})),
        ("invalid_userId", json!({"userId": "not-an-int"})),
        ("null_title", json!({"title": null, "body": "bar", "userId": 1})),
        ("neg_userId", json!({"title": "valid", "body": "valid", "userId": -5})),
    ];
    for (id, payload) in invalid_creates {
        let name = format!("test_create_post_invalid_schema[{}]", id);
        suite
            .unit(&name, || async move {
                let resp = client.create(&payload).await?;
                expect_status(&resp, 201)?;
                expect_invalid(&resp)
            })
            .await;
    }

    suite
        .unit("test_invalid_post_shape", || async move {
            let malformed = json!({"userId": "not-an-int", "id": 1, "title": "ok", "body": "ok"});
            match validate_response::<Post>(&malformed, false) {
                Err(E2eError::Validation(_)) => Ok(()),
                other => Err(E2eError::AssertionFailed(format!("expected validation error, got {:?}", other))),
            }
        })
        .await;

    for method in ["put", "patch"] {
        let name = format!("test_update_post_valid[method_{}]", method);
        suite
            .unit(&name, || async move {
                let payload = json!({"title": "update", "body": "update", "userId": 1});
                let resp = update(client, method, &payload).await?;
                expect_status(&resp, 200)?;
                let post: Post = validate_response(&resp.body()?, true)?;
                check(post.title == "update", || format!("title was {:?}", post.title))
            })
            .await;
    }

    let invalid_updates = [
        ("bad_userId", json!({"userId": "bad"})),
        ("null_title", json!({"title": null, "body": "x", "userId": 1})),
        ("null_body", json!({"title": "x", "body": null, "userId": 1})),
        ("neg_userId", json!({"title": "x", "body": "y", "userId": -10})),
        ("int_title", json!({"title": 123, "body": "y", "userId": 1})),
        ("int_body", json!({"title": "x", "body": 456, "userId": 1})),
    ];
    for (id, payload) in &invalid_updates {
        for method in ["put", "patch"] {
            let name = format!("test_update_post_invalid_schema[{}-method_{}]", id, method);
            suite
                .unit(&name, || async move {
                    let resp = update(client, method, payload).await?;
                    expect_status(&resp, 200)?;
                    expect_invalid(&resp)
                })
                .await;
        }
    }

    for id in [1, 50, 100, 0, 9999, -10] {
        let kind = if (1..=100).contains(&id) { "valid" } else { "invalid" };
        let name = format!("test_delete_post_{}[{}_{}]", kind, kind, id);
        suite
            .unit(&name, || async move {
                let resp = client.delete(id).await?;
                expect_status(&resp, 200)?;
                let body = resp.body()?;
                check(body == json!({}), || format!("expected empty object, got {}", body))
            })
            .await;
    }
}

async fn update(client: &PostsClient, method: &str, payload: &Value) -> E2eResult<ApiResponse> {
    match method {
        "put" => client.replace(1, payload).await,
        _ => client.patch(1, payload).await,
    }
}

/// Upload files generated for this run
struct Fixtures {
    dir: TempDir,
}

const UPLOAD_CASES: [(&str, &str); 6] = [
    ("sample_min_size.txt", "upload min size file"),
    ("sample_one_mb_size.txt", "upload max size file"),
    ("sample_empty.txt", "upload empty file"),
    ("simple_image.jpeg", "upload image file"),
    ("undefined_file_format", "upload undefined file"),
    ("файл_äüß.txt", "upload special characters"),
];

impl Fixtures {
    fn create() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();

        std::fs::write(root.join("sample_min_size.txt"), b"a")?;
        std::fs::write(root.join("sample_one_mb_size.txt"), vec![b'x'; 1024 * 1024])?;
        std::fs::write(root.join("sample_empty.txt"), b"")?;
        std::fs::write(root.join("undefined_file_format"), b"\x00\x01binary")?;
        std::fs::write(root.join("файл_äüß.txt"), "special characters".as_bytes())?;
        RgbImage::from_pixel(64, 64, Rgb([200, 80, 40]))
            .save(root.join("simple_image.jpeg"))
            .context("failed to encode image fixture")?;

        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

async fn ui_test<F>(suite: &mut Suite, harness: &Harness, name: &str, body: F)
where
    F: for<'p> FnOnce(&'p webcheck_e2e::Page) -> futures::future::BoxFuture<'p, E2eResult<()>>,
{
    if suite.selected(name) {
        suite.results.push(harness.run_test(name, body).await);
    }
}

async fn ui_tests(suite: &mut Suite, harness: &Harness, fixtures: &Fixtures, ui_base: &str) {
    for (file, id) in UPLOAD_CASES {
        let name = format!("test_upload_valid_files[{}]", id);
        let (path, base) = (fixtures.path(file), ui_base.to_string());
        ui_test(suite, harness, &name, move |page| {
            async move {
                let upload = UploadPage::new(page, &base);
                upload.open().await?;
                upload.select_file(&path).await?;
                upload.upload().await?;
                upload.assert_upload_success(file).await
            }
            .boxed()
        })
        .await;
    }

    let base = ui_base.to_string();
    ui_test(suite, harness, "test_upload_without_file", move |page| {
        async move {
            let upload = UploadPage::new(page, &base);
            upload.open().await?;
            upload.upload().await?;
            upload.assert_validation_message("Internal Server Error").await
        }
        .boxed()
    })
    .await;

    let (image, base) = (fixtures.path("simple_image.jpeg"), ui_base.to_string());
    ui_test(suite, harness, "test_drag_and_drop_file", move |page| {
        async move {
            let upload = UploadPage::new(page, &base);
            upload.open().await?;
            upload.drag_and_drop_file(&image).await?;
            upload.assert_upload_success("simple_image.jpeg").await
        }
        .boxed()
    })
    .await;

    let (first, second, base) = (
        fixtures.path("simple_image.jpeg"),
        fixtures.path("sample_min_size.txt"),
        ui_base.to_string(),
    );
    ui_test(suite, harness, "test_change_upload_file", move |page| {
        async move {
            let upload = UploadPage::new(page, &base);
            upload.open().await?;
            upload.select_file(&first).await?;
            upload.select_file(&second).await?;
            upload.upload().await?;
            upload.assert_upload_success("sample_min_size.txt").await
        }
        .boxed()
    })
    .await;
}

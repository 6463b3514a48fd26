//! Integration tests for the retrieval controller against mock HTTP servers.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use fetcher_core::{ExitStatus, FetchError, Options, Outcome, Session};
use tempfile::TempDir;
use wiremock::matchers::{body_string, header, header_exists, method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

const OLD_DATE: &str = "Sun, 06 Nov 1994 08:49:37 GMT";
const NEW_DATE: &str = "Wed, 01 Jan 2020 00:00:00 GMT";

fn options(dir: &Path) -> Options {
    Options {
        tries: 3,
        retry_wait: Duration::ZERO,
        retry_jitter: false,
        read_timeout: Some(Duration::from_secs(10)),
        directory_prefix: dir.to_path_buf(),
        ..Options::default()
    }
}

/// Answers with `first` for the first `failures` requests, then 200.
struct Flaky {
    count: Arc<AtomicUsize>,
    failures: usize,
    first: u16,
}

impl Respond for Flaky {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            ResponseTemplate::new(self.first)
        } else {
            ResponseTemplate::new(200).set_body_bytes(b"recovered".as_slice())
        }
    }
}

fn set_mtime(path: &Path, time: SystemTime) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

// ==================== Plain Retrieval ====================

#[tokio::test]
async fn test_get_saves_document_and_registers_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file.txt"))
        .and(header("Accept-Encoding", "identity"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".as_slice()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(options(dir.path()));
    let url = format!("{}/file.txt", server.uri());
    let outcome = session.retrieve(&url).await.unwrap();

    let saved = dir.path().join("file.txt");
    let Outcome::Retrieved {
        local_file,
        len,
        received,
        status,
        ..
    } = outcome
    else {
        panic!("expected Retrieved, got {outcome:?}");
    };
    assert_eq!(status, 200);
    assert_eq!(len, 11);
    assert_eq!(received, 11);
    assert_eq!(local_file.as_deref(), Some(saved.as_path()));
    assert_eq!(std::fs::read(&saved).unwrap(), b"hello world");
    assert_eq!(session.registry().local_file(&url), Some(saved.as_path()));
}

#[tokio::test]
async fn test_not_found_is_fatal_after_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(options(dir.path()));
    let err = session
        .retrieve(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
    assert_eq!(err.exit_status(), ExitStatus::Server);
}

#[tokio::test]
async fn test_post_sends_form_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string("a=1&b=2"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".as_slice()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        body_data: Some(b"a=1&b=2".to_vec()),
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/form", server.uri()))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Retrieved { status: 200, .. }));
}

// ==================== Redirects ====================

#[tokio::test]
async fn test_redirect_reported_without_writing_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/moved"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "http://other.invalid/x")
                .set_body_bytes(b"see other".as_slice()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        max_redirect: 0,
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/moved", server.uri()))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::NewLocation {
            location: "http://other.invalid/x".to_string(),
            keep_method: false,
        }
    );
    assert!(!dir.path().join("moved").exists());
}

#[tokio::test]
async fn test_redirect_followed_and_registered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new content".as_slice()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(options(dir.path()));
    let old = format!("{}/old", server.uri());
    let new = format!("{}/new", server.uri());
    let outcome = session.retrieve(&old).await.unwrap();

    let saved = dir.path().join("old");
    assert_eq!(outcome.local_file(), Some(saved.as_path()));
    assert_eq!(std::fs::read(&saved).unwrap(), b"new content");
    assert_eq!(session.registry().redirection(&old), Some(new.as_str()));
    assert_eq!(session.registry().local_file(&old), Some(saved.as_path()));
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        max_redirect: 2,
        ..options(dir.path())
    });
    let err = session
        .retrieve(&format!("{}/loop", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TooManyRedirects { limit: 2, .. }));
}

// ==================== Authentication ====================

#[tokio::test]
async fn test_basic_auth_retries_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"classified".as_slice()))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"x\""),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        tries: 1,
        ..options(dir.path())
    });
    let url = format!("{}/secret", server.uri()).replacen("http://", "http://user:pass@", 1);
    let outcome = session.retrieve(&url).await.unwrap();

    assert!(matches!(outcome, Outcome::Retrieved { status: 200, .. }));
    assert_eq!(std::fs::read(dir.path().join("secret")).unwrap(), b"classified");
}

#[tokio::test]
async fn test_rejected_credentials_fail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"x\""),
        )
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        http_user: Some("user".to_string()),
        http_password: Some("wrong".to_string()),
        ..options(dir.path())
    });
    let err = session
        .retrieve(&format!("{}/secret", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::AuthFailed { .. }));
    assert_eq!(err.exit_status(), ExitStatus::Auth);
}

#[tokio::test]
async fn test_unsupported_scheme_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Digest realm=\"x\""),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        http_user: Some("user".to_string()),
        ..options(dir.path())
    });
    let err = session
        .retrieve(&format!("{}/digest", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::AuthFailed { ref reason, .. } if reason.contains("Digest")));
}

// ==================== Resume and Ranges ====================

#[tokio::test]
async fn test_resume_appends_partial_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.bin"))
        .and(header("Range", "bytes=5-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 5-9/10")
                .set_body_bytes(b"56789".as_slice()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("data.bin");
    std::fs::write(&file, b"01234").unwrap();
    let mut session = Session::new(Options {
        continue_download: true,
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/data.bin", server.uri()))
        .await
        .unwrap();

    let Outcome::Retrieved {
        len,
        received,
        status,
        ..
    } = outcome
    else {
        panic!("expected Retrieved, got {outcome:?}");
    };
    assert_eq!(status, 206);
    assert_eq!(received, 5);
    assert_eq!(len, 10);
    assert_eq!(std::fs::read(&file).unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_range_not_satisfiable_on_complete_file_is_unneeded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.bin"))
        .respond_with(ResponseTemplate::new(416).insert_header("Content-Range", "bytes */10"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("data.bin");
    std::fs::write(&file, b"0123456789").unwrap();
    let mut session = Session::new(Options {
        continue_download: true,
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/data.bin", server.uri()))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Unneeded { .. }));
    assert_eq!(std::fs::read(&file).unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_range_not_satisfiable_on_short_file_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.bin"))
        .respond_with(ResponseTemplate::new(416).insert_header("Content-Range", "bytes */10"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.bin"), b"01234").unwrap();
    let mut session = Session::new(Options {
        continue_download: true,
        ..options(dir.path())
    });
    let err = session
        .retrieve(&format!("{}/data.bin", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::RangeNotSatisfiable {
            restval: 5,
            total: 10,
            ..
        }
    ));
}

#[tokio::test]
async fn test_range_not_satisfiable_without_content_range_uses_length() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .and(header("Range", "bytes=10-"))
        .respond_with(ResponseTemplate::new(416).set_body_bytes(vec![b'x'; 500]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("doc");
    std::fs::write(&file, b"0123456789").unwrap();
    let mut session = Session::new(Options {
        continue_download: true,
        ..options(dir.path())
    });
    let err = session
        .retrieve(&format!("{}/doc", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::RangeNotSatisfiable {
            restval: 10,
            total: 500,
            ..
        }
    ));
    assert!(err.is_fatal());
    assert_eq!(std::fs::read(&file).unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_ignored_range_restarts_from_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.bin"))
        .and(header("Range", "bytes=5-"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".as_slice()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("data.bin");
    std::fs::write(&file, b"xxxxx").unwrap();
    let mut session = Session::new(Options {
        start_pos: Some(5),
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/data.bin", server.uri()))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Retrieved { len: 10, .. }));
    assert_eq!(std::fs::read(&file).unwrap(), b"0123456789");
}

#[tokio::test]
async fn test_continue_refuses_to_truncate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".as_slice()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("data.bin");
    std::fs::write(&file, b"01234").unwrap();
    let mut session = Session::new(Options {
        continue_download: true,
        ..options(dir.path())
    });
    let err = session
        .retrieve(&format!("{}/data.bin", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::ContinueNotSupported { .. }));
    assert_eq!(std::fs::read(&file).unwrap(), b"01234");
}

#[tokio::test]
async fn test_full_response_already_on_disk_is_unneeded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".as_slice()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();
    let mut session = Session::new(Options {
        continue_download: true,
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/data.bin", server.uri()))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Unneeded { .. }));
}

// ==================== Time-stamping ====================

#[tokio::test]
async fn test_conditional_get_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page.html"))
        .and(header_exists("If-Modified-Since"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("page.html");
    std::fs::write(&file, b"local copy").unwrap();
    let mut session = Session::new(Options {
        timestamping: true,
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/page.html", server.uri()))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Unneeded { .. }));
    assert_eq!(std::fs::read(&file).unwrap(), b"local copy");
}

#[tokio::test]
async fn test_head_probe_skips_older_remote() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/page.html"))
        .respond_with(ResponseTemplate::new(200).insert_header("Last-Modified", OLD_DATE))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("page.html"), b"").unwrap();
    let mut session = Session::new(Options {
        timestamping: true,
        if_modified_since: false,
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/page.html", server.uri()))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Unneeded { .. }));
}

#[tokio::test]
async fn test_head_probe_fetches_newer_remote_and_sets_mtime() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/page.html"))
        .respond_with(ResponseTemplate::new(200).insert_header("Last-Modified", NEW_DATE))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", NEW_DATE)
                .set_body_bytes(b"fresh".as_slice()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("page.html");
    std::fs::write(&file, b"stale").unwrap();
    set_mtime(&file, httpdate::parse_http_date(OLD_DATE).unwrap());

    let mut session = Session::new(Options {
        timestamping: true,
        if_modified_since: false,
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/page.html", server.uri()))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Retrieved { .. }));
    assert_eq!(std::fs::read(&file).unwrap(), b"fresh");
    let mtime = std::fs::metadata(&file).unwrap().modified().unwrap();
    assert_eq!(mtime, httpdate::parse_http_date(NEW_DATE).unwrap());
}

// ==================== Retries ====================

#[tokio::test]
async fn test_gateway_timeout_is_retried() {
    let server = MockServer::start().await;
    let count = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(Flaky {
            count: Arc::clone(&count),
            failures: 1,
            first: 504,
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(options(dir.path()));
    let outcome = session
        .retrieve(&format!("{}/busy", server.uri()))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Retrieved { status: 200, .. }));
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read(dir.path().join("busy")).unwrap(), b"recovered");
}

#[tokio::test]
async fn test_configured_status_is_retried() {
    let server = MockServer::start().await;
    let count = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .respond_with(Flaky {
            count: Arc::clone(&count),
            failures: 2,
            first: 503,
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        retry_on_http_error: vec![503],
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/flaky", server.uri()))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Retrieved { .. }));
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_tries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(504))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        tries: 2,
        ..options(dir.path())
    });
    let err = session
        .retrieve(&format!("{}/down", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::GatewayTimeout { .. }));
}

// ==================== Spider and Delete-After ====================

#[tokio::test]
async fn test_spider_checks_existence_only() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/exists"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        spider: true,
        ..options(dir.path())
    });
    let outcome = session
        .retrieve(&format!("{}/exists", server.uri()))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::RemoteExists { status: 200 });
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_delete_after_removes_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"temporary".as_slice()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Options {
        delete_after: true,
        ..options(dir.path())
    });
    let url = format!("{}/tmp.txt", server.uri());
    let outcome = session.retrieve(&url).await.unwrap();

    let file = dir.path().join("tmp.txt");
    assert!(matches!(outcome, Outcome::Retrieved { local_file: None, len: 9, .. }));
    assert!(!file.exists());
    assert!(session.registry().was_deleted(&file));
    assert_eq!(session.registry().local_file(&url), None);
}

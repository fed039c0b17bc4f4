//! GitHubReleaseHost against a local stand-in for the GitHub REST API.
//!
//! The stand-in speaks just enough HTTP/1.1 for reqwest: it records every
//! request and answers from a per-test routing function.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use dotship_hosting::{
    Credential, GitHubReleaseHost, HostingError, ReleaseDescriptor, ReleaseFlags, ReleaseHost,
    RepoSlug,
};

const TAG_REF: &str = "/repos/octo/uploader/git/ref/tags/v2.0.0";
const RELEASES: &str = "/repos/octo/uploader/releases";
const UPLOADS: &str = "/uploads/octo/uploader/releases/7/assets";

#[derive(Debug, Clone)]
struct Request {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

type Handler = Arc<dyn Fn(&Request, &str) -> (u16, String) + Send + Sync>;

struct StubApi {
    base: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl StubApi {
    async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Request, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let (recorded, server_base) = (requests.clone(), base.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (recorded, handler, base) =
                    (recorded.clone(), handler.clone(), server_base.clone());
                tokio::spawn(serve(stream, recorded, handler, base));
            }
        });

        StubApi { base, requests }
    }

    fn host(&self) -> GitHubReleaseHost {
        GitHubReleaseHost::new(RepoSlug::parse("octo/uploader").unwrap())
            .unwrap()
            .with_api_base(&self.base)
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// `METHOD /path` of every request, in arrival order.
    fn lines(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path()))
            .collect()
    }
}

async fn serve(
    mut stream: TcpStream,
    recorded: Arc<Mutex<Vec<Request>>>,
    handler: Handler,
    base: String,
) {
    let mut buf = Vec::new();
    while let Some(request) = read_request(&mut stream, &mut buf).await {
        let (status, body) = handler(&request, &base);
        recorded.lock().unwrap().push(request);
        let response = format!(
            "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
            status,
            if status < 400 { "OK" } else { "Error" },
            body.len(),
            body
        );
        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<Request> {
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        fill(stream, buf).await?;
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut start = lines.next()?.split(' ');
    let method = start.next()?.to_string();
    let target = start.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        fill(stream, buf).await?;
    }
    let body = buf[header_end..header_end + length].to_vec();
    buf.drain(..header_end + length);

    Some(Request {
        method,
        target,
        headers,
        body,
    })
}

async fn fill(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<()> {
    let mut chunk = [0u8; 8192];
    let n = stream.read(&mut chunk).await.ok()?;
    if n == 0 {
        return None;
    }
    buf.extend_from_slice(&chunk[..n]);
    Some(())
}

fn created(base: &str) -> String {
    json!({
        "id": 7,
        "html_url": "https://github.com/octo/uploader/releases/tag/untagged-1",
        "upload_url": format!("{}{}{{?name,label}}", base, UPLOADS),
    })
    .to_string()
}

fn not_found() -> (u16, String) {
    (404, r#"{"message":"Not Found"}"#.to_string())
}

fn bundle() -> (tempfile::TempDir, ReleaseDescriptor) {
    let dir = tempfile::tempdir().unwrap();
    let asset = dir.path().join("bundle.zip");
    std::fs::write(&asset, b"PK\x03\x04").unwrap();
    let descriptor = ReleaseDescriptor {
        tag: "v2.0.0".to_string(),
        name: String::new(),
        body: String::new(),
        target: "main".to_string(),
        files: vec![asset],
        flags: ReleaseFlags::pipeline(),
    };
    (dir, descriptor)
}

fn token() -> Credential {
    Credential::new("ghp_test".to_string())
}

#[tokio::test]
async fn creates_draft_release_and_uploads_assets() {
    let api = StubApi::start(|r, base| match (r.method.as_str(), r.path()) {
        ("GET", TAG_REF) => (200, r#"{"ref":"refs/tags/v2.0.0"}"#.to_string()),
        ("POST", RELEASES) => (201, created(base)),
        ("POST", UPLOADS) => (201, r#"{"id":1,"name":"bundle.zip"}"#.to_string()),
        _ => not_found(),
    })
    .await;
    let (_dir, descriptor) = bundle();

    let outcome = api.host().create_release(&descriptor, &token()).await.unwrap();

    assert_eq!(outcome.release_id, 7);
    assert_eq!(outcome.assets, vec!["bundle.zip"]);
    assert_eq!(
        api.lines(),
        vec![
            format!("GET {}", TAG_REF),
            format!("POST {}", RELEASES),
            format!("POST {}", UPLOADS),
        ]
    );

    let requests = api.requests();
    assert!(requests
        .iter()
        .all(|r| r.header("authorization") == Some("Bearer ghp_test")));

    let body = requests[1].json();
    assert_eq!(body["tag_name"], "v2.0.0");
    assert_eq!(body["target_commitish"], "main");
    assert_eq!(body["draft"], true);
    assert_eq!(body["generate_release_notes"], true);
    assert_eq!(body["make_latest"], "true");

    assert_eq!(requests[2].target, format!("{}?name=bundle.zip", UPLOADS));
    assert_eq!(requests[2].body, b"PK\x03\x04");
}

#[tokio::test]
async fn missing_tag_fails_before_release_is_created() {
    let api = StubApi::start(|_, _| not_found()).await;
    let (_dir, descriptor) = bundle();

    let err = api
        .host()
        .create_release(&descriptor, &token())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        HostingError::TagNotFound {
            tag: "v2.0.0".to_string()
        }
    );
    assert_eq!(api.lines(), vec![format!("GET {}", TAG_REF)]);
}

#[tokio::test]
async fn failed_upload_deletes_the_release() {
    let api = StubApi::start(|r, base| match (r.method.as_str(), r.path()) {
        ("GET", TAG_REF) => (200, "{}".to_string()),
        ("POST", RELEASES) => (201, created(base)),
        ("POST", UPLOADS) => (500, r#"{"message":"upload backend unavailable"}"#.to_string()),
        ("DELETE", "/repos/octo/uploader/releases/7") => (204, String::new()),
        _ => not_found(),
    })
    .await;
    let (_dir, descriptor) = bundle();

    let err = api
        .host()
        .create_release(&descriptor, &token())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        HostingError::Rejected {
            status: 500,
            message: "upload backend unavailable".to_string()
        }
    );
    assert_eq!(
        api.lines().last().map(String::as_str),
        Some("DELETE /repos/octo/uploader/releases/7")
    );
}

#[tokio::test]
async fn duplicate_release_is_reported_without_rollback() {
    let api = StubApi::start(|r, _| match (r.method.as_str(), r.path()) {
        ("GET", TAG_REF) => (200, "{}".to_string()),
        ("POST", RELEASES) => (
            422,
            r#"{"message":"Validation Failed","errors":[{"resource":"Release","code":"already_exists","field":"tag_name"}]}"#
                .to_string(),
        ),
        _ => not_found(),
    })
    .await;
    let (_dir, descriptor) = bundle();

    let err = api
        .host()
        .create_release(&descriptor, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, HostingError::DuplicateRelease { .. }));
    assert!(api.lines().iter().all(|l| !l.starts_with("DELETE")));
}

#[tokio::test]
async fn unreadable_create_response_deletes_release_by_id() {
    // id present, upload_url missing
    let api = StubApi::start(|r, _| match (r.method.as_str(), r.path()) {
        ("GET", TAG_REF) => (200, "{}".to_string()),
        ("POST", RELEASES) => (201, r#"{"id":7}"#.to_string()),
        ("DELETE", "/repos/octo/uploader/releases/7") => (204, String::new()),
        _ => not_found(),
    })
    .await;
    let (_dir, descriptor) = bundle();

    let err = api
        .host()
        .create_release(&descriptor, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, HostingError::Rejected { status: 201, .. }));
    assert_eq!(
        api.lines(),
        vec![
            format!("GET {}", TAG_REF),
            format!("POST {}", RELEASES),
            "DELETE /repos/octo/uploader/releases/7".to_string(),
        ]
    );
}

#[tokio::test]
async fn unparseable_create_response_deletes_matching_draft() {
    let api = StubApi::start(|r, _| match (r.method.as_str(), r.path()) {
        ("GET", TAG_REF) => (200, "{}".to_string()),
        ("POST", RELEASES) => (201, "<html>gateway</html>".to_string()),
        ("GET", RELEASES) => (
            200,
            json!([
                { "id": 3, "tag_name": "v1.9.0", "draft": false },
                { "id": 9, "tag_name": "v2.0.0", "draft": true },
            ])
            .to_string(),
        ),
        ("DELETE", "/repos/octo/uploader/releases/9") => (204, String::new()),
        _ => not_found(),
    })
    .await;
    let (_dir, descriptor) = bundle();

    let err = api
        .host()
        .create_release(&descriptor, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, HostingError::Rejected { .. }));
    assert_eq!(
        api.lines().last().map(String::as_str),
        Some("DELETE /repos/octo/uploader/releases/9")
    );
    assert!(api.lines().iter().all(|l| !l.starts_with("POST /uploads")));
}

#[tokio::test]
async fn unreachable_api_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let (_dir, descriptor) = bundle();

    let host = GitHubReleaseHost::new(RepoSlug::parse("octo/uploader").unwrap())
        .unwrap()
        .with_api_base(&base);
    let err = host.create_release(&descriptor, &token()).await.unwrap_err();

    assert!(err.is_transport());
}

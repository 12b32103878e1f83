use std::collections::BTreeMap;

use scoop_backup_core::{ContentRef, Error, GistStore, GistStoreConfig, RemoteStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answers one connection per response, in order, and hands back the raw
/// request texts. Responses are built from the server's base URL.
async fn respond_in_order(
    responses: impl FnOnce(&str) -> Vec<String>,
) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let responses = responses(&base);

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if request_complete(&buf) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            requests.push(String::from_utf8_lossy(&buf).to_string());
        }
        requests
    });

    (base, handle)
}

fn http_response(status: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n{extra_headers}\
         content-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )
}

async fn respond_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let (base, all) = respond_in_order(|_| vec![http_response(status, "", body)]).await;
    let handle = tokio::spawn(async move { all.await.unwrap().remove(0) });
    (base, handle)
}

fn request_complete(buf: &[u8]) -> bool {
    let text = String::from_utf8_lossy(buf);
    let Some(head_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..head_end]
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    buf.len() >= head_end + 4 + content_length
}

fn store(base: &str) -> GistStore {
    GistStore::new(GistStoreConfig {
        api_base: format!("{base}/"),
        token: "ghp_test".to_string(),
        user_agent: "ScoopBackup-test".to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn create_posts_private_gist_with_api_headers() {
    let (base, server) = respond_once("201 Created", r#"{"id":"abc123","public":false}"#).await;

    let id = store(&base)
        .create(
            "Scoop Backup - 2024/01/01 10:00:00",
            BTreeMap::from([(
                "scoop_backup_2024-01-01-10-00-00.json".to_string(),
                "QUJD".to_string(),
            )]),
        )
        .await
        .unwrap();
    assert_eq!(id, "abc123");

    let request = server.await.unwrap();
    let lower = request.to_ascii_lowercase();
    assert!(request.starts_with("POST /gists HTTP/1.1"));
    assert!(lower.contains("x-github-api-version: 2022-11-28"));
    assert!(lower.contains("accept: application/vnd.github+json"));
    assert!(lower.contains("authorization: bearer ghp_test"));
    assert!(lower.contains("user-agent: scoopbackup-test"));

    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["public"], false);
    assert_eq!(json["description"], "Scoop Backup - 2024/01/01 10:00:00");
    assert_eq!(
        json["files"]["scoop_backup_2024-01-01-10-00-00.json"]["content"],
        "QUJD"
    );
}

#[tokio::test]
async fn list_requests_one_page_and_maps_files() {
    let (base, server) = respond_once(
        "200 OK",
        r#"[
            {"id":"g1","description":"Scoop Backup - 2024/01/02 10:00:00","files":{
                "scoop_backup_2024-01-02-10-00-00.json":{
                    "filename":"scoop_backup_2024-01-02-10-00-00.json",
                    "raw_url":"https://gist.example/raw/g1"}}},
            {"id":"g2","description":null,"files":{}}
        ]"#,
    )
    .await;

    let listed = store(&base).list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, "g1");
    assert_eq!(listed[0].payload().unwrap().url, "https://gist.example/raw/g1");
    assert!(listed[0].created_at().is_some());
    assert_eq!(listed[1].label, "");

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /gists?per_page=100 HTTP/1.1"));
}

#[tokio::test]
async fn list_follows_next_links_across_pages() {
    let page_one = r#"[{"id":"new","description":"Scoop Backup - 2024/02/01 10:00:00","files":{
        "scoop_backup_2024-02-01-10-00-00.json":{
            "filename":"scoop_backup_2024-02-01-10-00-00.json",
            "raw_url":"https://gist.example/raw/new"}}}]"#;
    let page_two = r#"[{"id":"old","description":"Scoop Backup - 2023/02/01 10:00:00","files":{
        "scoop_backup_2023-02-01-10-00-00.json":{
            "filename":"scoop_backup_2023-02-01-10-00-00.json",
            "raw_url":"https://gist.example/raw/old"}}}]"#;

    let (base, server) = respond_in_order(|base| {
        let link = format!(
            "link: <{base}/gists?per_page=100&page=2>; rel=\"next\", \
             <{base}/gists?per_page=100&page=2>; rel=\"last\"\r\n"
        );
        vec![
            http_response("200 OK", &link, page_one),
            http_response("200 OK", "", page_two),
        ]
    })
    .await;

    let listed = store(&base).list().await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].starts_with("GET /gists?per_page=100 HTTP/1.1"));
    assert!(requests[1].starts_with("GET /gists?per_page=100&page=2 HTTP/1.1"));
    assert!(requests[1].to_ascii_lowercase().contains("authorization: bearer ghp_test"));
}

#[tokio::test]
async fn message_body_fails_even_with_success_status() {
    let (base, _server) = respond_once("200 OK", r#"{"message":"Bad credentials"}"#).await;

    let err = store(&base).list().await.unwrap_err();
    assert!(matches!(err, Error::Remote { ref message } if message == "Bad credentials"));
}

#[tokio::test]
async fn delete_accepts_no_content() {
    let (base, server) = respond_once("204 No Content", "").await;

    store(&base).delete("abc123").await.unwrap();
    let request = server.await.unwrap();
    assert!(request.starts_with("DELETE /gists/abc123 HTTP/1.1"));
}

#[tokio::test]
async fn delete_not_found_is_remote_error() {
    let (base, _server) = respond_once("404 Not Found", r#"{"message":"Not Found"}"#).await;

    let err = store(&base).delete("gone").await.unwrap_err();
    assert!(err.to_string().contains("Not Found"));
}

#[tokio::test]
async fn read_content_returns_raw_text() {
    let (base, server) = respond_once("200 OK", "AQIDBAUG").await;

    let content = ContentRef {
        filename: "scoop_backup_2024-01-02-10-00-00.json".to_string(),
        url: format!("{base}/raw/g1/scoop_backup_2024-01-02-10-00-00.json"),
    };
    let text = store(&base).read_content(&content).await.unwrap();
    assert_eq!(text, "AQIDBAUG");

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /raw/g1/scoop_backup_2024-01-02-10-00-00.json HTTP/1.1"));
}

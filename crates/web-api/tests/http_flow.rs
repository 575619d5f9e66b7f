mod support;

use futures_util::SinkExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use support::{next_json, TestServer};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::start().await;

    let response = Client::new()
        .get(server.http_url("/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "message": "OK" }));
}

#[tokio::test]
async fn history_requires_bearer_token() {
    let server = TestServer::start().await;
    let client = Client::new();

    let missing = client
        .get(server.http_url("/api/v1/rooms/r1/messages"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let invalid = client
        .get(server.http_url("/api/v1/rooms/r1/messages"))
        .header("authorization", "Bearer garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn room_history_pages_newest_first() {
    let server = TestServer::start().await;
    server.join_room("r1", &["alice"]).await;
    let mut alice = server.connect("alice").await;

    for content in ["first", "second", "third"] {
        alice
            .send(TungsteniteMessage::text(
                json!({
                    "type": "new_message",
                    "room_id": "r1", "content": content
                })
                .to_string(),
            ))
            .await
            .unwrap();
        // 等回显确认落库
        assert_eq!(next_json(&mut alice).await["content"], content);
    }

    let token = server.token("alice");
    let client = Client::new();

    let first_page: Value = client
        .get(server.http_url("/api/v1/rooms/r1/messages?page=1&page_size=2"))
        .header("authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first_page["current_page"], 1);
    assert_eq!(first_page["page_size"], 2);
    assert_eq!(first_page["has_more"], true);
    let contents: Vec<&str> = first_page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|message| message["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["third", "second"]);

    let second_page: Value = client
        .get(server.http_url("/api/v1/rooms/r1/messages?page=2&page_size=2"))
        .header("authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second_page["has_more"], false);
    assert_eq!(second_page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(second_page["messages"][0]["content"], "first");
}

#[tokio::test]
async fn thread_history_for_unknown_thread_is_empty() {
    let server = TestServer::start().await;
    let token = server.token("alice");

    let response = Client::new()
        .get(server.http_url("/api/v1/threads/t-none/messages"))
        .header("authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["messages"], json!([]));
    assert_eq!(body["current_page"], 1);
    assert_eq!(body["page_size"], 20);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn unparsable_paging_params_fall_back_to_defaults() {
    let server = TestServer::start().await;
    let token = server.token("alice");

    let response = Client::new()
        .get(server.http_url("/api/v1/rooms/r1/messages?page=abc&page_size=xyz"))
        .header("authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["current_page"], 1);
    assert_eq!(body["page_size"], 20);

    let capped: Value = Client::new()
        .get(server.http_url("/api/v1/rooms/r1/messages?page=-2&page_size=500"))
        .header("authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(capped["current_page"], 1);
    assert_eq!(capped["page_size"], 100);
}

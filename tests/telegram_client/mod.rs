//! `TelegramClient` tests.
//!
//! Same approach as the GitLab client tests: a local server stands in for
//! the Bot API.

use crate::common::{HttpServerHandle, Method, Request, Response, TestBuilder};
use gitlab_telegram_bot::telegram::{TelegramApi, TelegramClient};
use secrecy::SecretString;
use serde_json::json;
use std::sync::{Arc, Mutex};

const TOKEN: &str = "123456:ABC-secret";

fn client(server: &HttpServerHandle) -> TelegramClient {
    TelegramClient::new(SecretString::from(TOKEN), server.url())
}

fn update_json(update_id: i64, text: &str) -> serde_json::Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id * 10,
            "from": {"id": 1001, "is_bot": false, "first_name": "Bob", "username": "bob"},
            "chat": {"id": 42, "type": "private", "first_name": "Bob", "username": "bob"},
            "date": 1700000000,
            "text": text,
        }
    })
}

#[tokio::test]
async fn get_updates_without_offset() {
    let requests = Arc::new(Mutex::new(Vec::<Request>::new()));
    let seen = requests.clone();
    let (server, events) = TestBuilder::default()
        .handler(Method::GET, "{token}/getUpdates", move |req| {
            seen.lock().unwrap().push(req);
            Response::json(json!({
                "ok": true,
                "result": [update_json(5, "/gitlabusername alice")],
            }))
        })
        .build();

    let updates = client(&server).get_updates(None).await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].update_id, 5);
    let message = updates[0].message.as_ref().unwrap();
    assert_eq!(message.chat.id, 42);
    assert_eq!(message.text.as_deref(), Some("/gitlabusername alice"));
    assert_eq!(
        message.from.as_ref().unwrap().username.as_deref(),
        Some("bob")
    );

    let path = format!("/bot{TOKEN}/getUpdates");
    events.assert_eq(&[(Method::GET, path.as_str())]);
    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].components["token"], format!("bot{TOKEN}"));
    assert_eq!(requests[0].query_param("offset"), None);
}

#[tokio::test]
async fn get_updates_with_offset() {
    let requests = Arc::new(Mutex::new(Vec::<Request>::new()));
    let seen = requests.clone();
    let (server, _events) = TestBuilder::default()
        .handler(Method::GET, "{token}/getUpdates", move |req| {
            seen.lock().unwrap().push(req);
            Response::json(json!({"ok": true, "result": []}))
        })
        .build();

    let updates = client(&server).get_updates(Some(6)).await.unwrap();
    assert!(updates.is_empty());
    assert_eq!(requests.lock().unwrap()[0].query_param("offset"), Some("6"));
}

#[tokio::test]
async fn api_errors_carry_the_description() {
    let (server, _events) = TestBuilder::default()
        .handler(Method::GET, "{token}/getUpdates", |_req| {
            Response::json(json!({
                "ok": false,
                "error_code": 409,
                "description": "Conflict: terminated by other getUpdates request",
            }))
            .code(409)
        })
        .build();

    let err = client(&server).get_updates(None).await.unwrap_err();
    let message = format!("{err:?}");
    assert!(
        message.contains("Telegram API error 409: Conflict"),
        "{message}"
    );
    assert!(!message.contains(TOKEN), "{message}");
}

#[tokio::test]
async fn send_message() {
    let requests = Arc::new(Mutex::new(Vec::<Request>::new()));
    let seen = requests.clone();
    let (server, events) = TestBuilder::default()
        .handler(Method::POST, "{token}/sendMessage", move |req| {
            seen.lock().unwrap().push(req);
            Response::json(json!({
                "ok": true,
                "result": {
                    "message_id": 99,
                    "from": {"id": 555, "is_bot": true, "first_name": "Bot", "username": "review_bot"},
                    "chat": {"id": 42, "type": "private", "username": "dana"},
                    "date": 1700000000,
                    "text": "hello dana",
                },
            }))
        })
        .build();

    let message = client(&server)
        .send_message(42, "hello dana")
        .await
        .unwrap();
    assert_eq!(message.message_id, 99);
    assert_eq!(message.chat.id, 42);

    let path = format!("/bot{TOKEN}/sendMessage");
    events.assert_eq(&[(Method::POST, path.as_str())]);
    assert_eq!(
        requests.lock().unwrap()[0].json(),
        json!({"chat_id": 42, "text": "hello dana"})
    );
}

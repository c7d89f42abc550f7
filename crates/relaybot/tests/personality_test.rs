#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Route tables of both personalities, driven the way a worker drives them.

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use relaybot::handlers::{CommandBackend, Responder};
use relaybot::personality::{Personality, RouteDeps};
use relaycore::router::HandlerError;
use relaycore::{BotIdentity, CommandInjector, Envelope, HandlerContext, HandlerRouter, MemoryQueue, SyntheticCommand};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Outbox(Mutex<Vec<(i64, String)>>);

#[async_trait]
impl Responder for Outbox {
    async fn send_html(&self, chat_id: i64, text: &str) -> Result<(), HandlerError> {
        self.0.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

type Calls = Arc<Mutex<Vec<Value>>>;

/// Command backend that records every request and hands back a step counter
/// as the user's state.
async fn spawn_backend() -> (Arc<CommandBackend>, Calls) {
    async fn record(State(calls): State<Calls>, Json(body): Json<Value>) -> Json<Value> {
        let mut calls = calls.lock().unwrap();
        calls.push(body);
        Json(json!({ "state": { "step": calls.len() } }))
    }

    let calls = Calls::default();
    let app = Router::new()
        .route("/commands", post(record))
        .with_state(Arc::clone(&calls));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let backend = CommandBackend::new(&format!("http://{}/commands", addr), Duration::from_secs(5)).unwrap();
    (Arc::new(backend), calls)
}

fn router(personality: Personality, outbox: &Arc<Outbox>, backend: Option<Arc<CommandBackend>>) -> HandlerRouter {
    let deps = RouteDeps {
        responder: Arc::clone(outbox) as Arc<dyn Responder>,
        backend,
    };
    personality.router(&deps).unwrap()
}

fn ctx() -> HandlerContext {
    HandlerContext::new(BotIdentity::new("1:a"), "parser", -100)
}

fn message(chat_type: &str, body: Value) -> Envelope {
    let mut message = json!({
        "message_id": 10,
        "from": { "id": 42, "is_bot": false, "first_name": "Ann" },
        "chat": { "id": 42, "type": chat_type },
    });
    if let (Some(target), Some(fields)) = (message.as_object_mut(), body.as_object()) {
        target.extend(fields.clone());
    }
    serde_json::from_value(json!({ "update_id": 1, "message": message })).unwrap()
}

fn text(chat_type: &str, text: &str) -> Envelope {
    message(chat_type, json!({ "text": text }))
}

fn callback(data: &str) -> Envelope {
    serde_json::from_value(json!({
        "update_id": 2,
        "callback_query": {
            "id": "cb1",
            "from": { "id": 42, "first_name": "Ann" },
            "data": data,
            "message": { "message_id": 9, "chat": { "id": 42, "type": "private" } },
        },
    }))
    .unwrap()
}

fn route<'a>(router: &'a HandlerRouter, envelope: &Envelope) -> Option<&'a str> {
    router.route_for(envelope).map(|route| route.name.as_str())
}

#[test]
fn parser_matches_links_in_text_and_captions() {
    let router = router(Personality::Parser, &Arc::new(Outbox::default()), None);

    let link = "https://www.wildberries.ru/catalog/123456/detail.aspx";
    assert_eq!(route(&router, &text("group", link)), Some("links"));
    assert_eq!(
        route(&router, &message("group", json!({ "caption": format!("look {}", link), "photo": [{}] }))),
        Some("links")
    );
    assert_eq!(route(&router, &text("private", "https://ozon.ru/t/AbC12")), Some("links"));
    assert_eq!(route(&router, &text("private", "just chatting")), None);
}

#[test]
fn parser_search_needs_a_query() {
    let router = router(Personality::Parser, &Arc::new(Outbox::default()), None);

    assert_eq!(route(&router, &text("private", "/search")), None);
    assert_eq!(route(&router, &text("private", "/search red boots")), Some("search"));
    assert_eq!(route(&router, &text("private", "/last")), Some("last"));
}

#[tokio::test]
async fn parser_start_replies_in_place() {
    let outbox = Arc::new(Outbox::default());
    let router = router(Personality::Parser, &outbox, None);

    let matched = router.dispatch(&text("private", "/start"), &ctx()).await.unwrap();

    assert_eq!(matched.as_deref(), Some("start"));
    let sent = outbox.0.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 42);
    assert!(sent[0].1.starts_with("<b>Привет!</b>"));
}

#[tokio::test]
async fn reports_are_only_forwarded_for_the_system_sender() {
    let (backend, calls) = spawn_backend().await;
    let router = router(Personality::Parser, &Arc::new(Outbox::default()), Some(backend));
    let injector = CommandInjector::new(Arc::new(MemoryQueue::new()), -100);

    // same route either way; only the sentinel sender gets through
    let from_user = text("private", "/popular");
    assert_eq!(router.dispatch(&from_user, &ctx()).await.unwrap().as_deref(), Some("popular"));
    assert!(calls.lock().unwrap().is_empty());

    let synthetic = injector
        .build(&SyntheticCommand::new(BotIdentity::new("1:a"), "top_brand", vec!["12".to_string()]))
        .unwrap();
    assert_eq!(router.dispatch(&synthetic, &ctx()).await.unwrap().as_deref(), Some("top_brand"));

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["action"], "top_brand");
    assert_eq!(calls[0]["bot"], "parser");
    assert_eq!(calls[0]["envelope"]["message"]["text"], "/top_brand 12");
}

#[tokio::test]
async fn forwarded_commands_carry_the_users_state() {
    let (backend, calls) = spawn_backend().await;
    let router = router(Personality::Tarot, &Arc::new(Outbox::default()), Some(backend));
    let ctx = ctx();

    router.dispatch(&text("private", "/card3 flip"), &ctx).await.unwrap();
    router.dispatch(&callback("more_3_tarot"), &ctx).await.unwrap();

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0]["action"], "card");
    assert!(calls[0].get("state").is_none());
    assert_eq!(calls[1]["action"], "more");
    assert_eq!(calls[1]["state"], json!({ "step": 1 }));
    assert_eq!(ctx.user_state(42), Some(json!({ "step": 2 })));
}

#[test]
fn tarot_readings_are_private_only() {
    let router = router(Personality::Tarot, &Arc::new(Outbox::default()), None);

    assert_eq!(route(&router, &text("private", "/card")), Some("card"));
    assert_eq!(route(&router, &text("private", "/card3 deck 5 major")), Some("card"));
    assert_eq!(route(&router, &text("group", "/card")), None);
    assert_eq!(route(&router, &text("private", "/futark triplet")), Some("futhark"));
    assert_eq!(route(&router, &text("private", "/futhark")), Some("futhark"));
    assert_eq!(route(&router, &text("private", "/oraculum3")), Some("oraculum"));
    assert_eq!(route(&router, &text("private", "/all deck 7")), Some("all_deck"));
    assert_eq!(route(&router, &text("group", "/one")), None);

    // help is answered everywhere
    assert_eq!(route(&router, &text("group", "/help")), Some("help"));
}

#[test]
fn tarot_callbacks_route_by_data_prefix() {
    let router = router(Personality::Tarot, &Arc::new(Outbox::default()), None);

    assert_eq!(route(&router, &callback("deckspage_2_oraculum")), Some("decks_page"));
    assert_eq!(route(&router, &callback("desc_12#14")), Some("desc"));
    assert_eq!(route(&router, &callback("meaning_ab1_3_1#2_0")), Some("meaning"));
    assert_eq!(route(&router, &callback("moreoracle_1_x")), Some("more_oracle"));
    assert_eq!(route(&router, &callback("futhark_3")), Some("futhark_rune"));
    assert_eq!(route(&router, &callback("deckspage_x")), None);
}

#[test]
fn tarot_photos_go_to_the_backend() {
    let router = router(Personality::Tarot, &Arc::new(Outbox::default()), None);
    assert_eq!(
        route(&router, &message("private", json!({ "photo": [{ "file_id": "f" }] }))),
        Some("photo")
    );
}

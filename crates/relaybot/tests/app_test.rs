#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Single-process wiring: one side failing must bring the other down.

use relaybot::app::run_single_process;
use relaycore::Settings;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn settings(listen_addr: &str, personality: &str) -> Settings {
    Settings::from_toml_str(&format!(
        r#"
            listen_addr = "{listen_addr}"
            poll_interval_ms = 10

            [[bots]]
            name = "marketing"
            token = "111:aaa"
            chat_id = -100
            personality = "{personality}"
        "#
    ))
    .unwrap()
}

#[tokio::test]
async fn worker_startup_failure_stops_the_receiver() {
    let settings = settings("127.0.0.1:0", "weather");
    let cancel = CancellationToken::new();

    let result = timeout(Duration::from_secs(5), run_single_process(&settings, cancel.clone()))
        .await
        .expect("receiver kept running after the workers failed");

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("unknown personality"), "{:#}", err);
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn receiver_bind_failure_stops_the_workers() {
    let settings = settings("not-an-address", "parser");
    let cancel = CancellationToken::new();

    let result = timeout(Duration::from_secs(5), run_single_process(&settings, cancel.clone()))
        .await
        .expect("workers kept running after the receiver failed");

    assert!(result.is_err());
    assert!(cancel.is_cancelled());
}

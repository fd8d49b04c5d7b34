//! Integration test: events flow through the dispatcher loop into a real channel
//! client talking to a mock Bot API server.
#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use lib::channels::{ChannelError, ChannelHandle, InboundEvent, TelegramChannel};
use lib::config::{CommandSettings, LocalSettings, ReplyConfig};
use lib::dispatch::Dispatcher;
use serde_json::json;
use tokio::sync::mpsc;

fn local_settings(timeout: Duration) -> LocalSettings {
    LocalSettings {
        command: CommandSettings {
            timeout,
            shell: PathBuf::from("/bin/sh"),
            working_dir: None,
        },
        reply: ReplyConfig::default(),
    }
}

#[tokio::test]
async fn only_the_authorized_human_message_gets_a_reply() {
    let server = MockServer::start();
    let reply = server.mock(|when, then| {
        when.method(POST)
            .path("/bottok/sendMessage")
            .json_body(json!({ "chat_id": "42", "text": "<pre>hello\n</pre>", "parse_mode": "HTML" }));
        then.status(200).json_body(json!({ "ok": true, "result": {} }));
    });

    let channel: Arc<dyn ChannelHandle> =
        Arc::new(TelegramChannel::new("tok".to_string(), server.base_url()));
    let dispatcher = Dispatcher::from_local("42", &local_settings(Duration::from_secs(5)));

    let (tx, rx) = mpsc::channel(8);
    tx.send(InboundEvent::from_user("7", "1", "echo wrong-chat")).await.unwrap();
    let mut automated = InboundEvent::from_user("42", "99", "echo from-bot");
    automated.is_automated = true;
    tx.send(automated).await.unwrap();
    tx.send(InboundEvent::from_user("42", "1", "echo hello")).await.unwrap();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(10), dispatcher.run(rx, channel))
        .await
        .expect("dispatcher drained the queue");
    reply.assert_calls(1);
}

#[tokio::test]
async fn failed_send_does_not_stop_later_events() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/bottok/sendMessage")
            .json_body(json!({ "chat_id": "42", "text": "<pre>first\n</pre>", "parse_mode": "HTML" }));
        then.status(400)
            .json_body(json!({ "ok": false, "description": "Bad Request" }));
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path("/bottok/sendMessage")
            .json_body(json!({ "chat_id": "42", "text": "<pre>second\n</pre>", "parse_mode": "HTML" }));
        then.status(200).json_body(json!({ "ok": true, "result": {} }));
    });

    let channel: Arc<dyn ChannelHandle> =
        Arc::new(TelegramChannel::new("tok".to_string(), server.base_url()));
    let dispatcher = Dispatcher::from_local("42", &local_settings(Duration::from_secs(5)));

    let (tx, rx) = mpsc::channel(8);
    tx.send(InboundEvent::from_user("42", "1", "echo first")).await.unwrap();
    tx.send(InboundEvent::from_user("42", "1", "echo second")).await.unwrap();
    drop(tx);

    dispatcher.run(rx, channel).await;
    first.assert_calls(1);
    second.assert_calls(1);
}

#[derive(Default)]
struct OrderedSink {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl ChannelHandle for OrderedSink {
    fn id(&self) -> &str {
        "sink"
    }

    fn stop(&self) {}

    async fn send_message(&self, _conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn replies_follow_arrival_order() {
    let sink = Arc::new(OrderedSink::default());
    let dispatcher = Dispatcher::from_local("C1", &local_settings(Duration::from_secs(5)));

    let (tx, rx) = mpsc::channel(8);
    tx.send(InboundEvent::from_user("C1", "U1", "sleep 0.3; echo slow")).await.unwrap();
    tx.send(InboundEvent::from_user("C1", "U1", "echo fast")).await.unwrap();
    drop(tx);

    dispatcher.run(rx, sink.clone()).await;
    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.as_slice(), &["```\nslow\n\n```".to_string(), "```\nfast\n\n```".to_string()]);
}

#[tokio::test]
async fn timed_out_command_still_replies() {
    let sink = Arc::new(OrderedSink::default());
    let dispatcher = Dispatcher::from_local("C1", &local_settings(Duration::from_millis(300)));

    let (tx, rx) = mpsc::channel(8);
    tx.send(InboundEvent::from_user("C1", "U1", "sleep 5")).await.unwrap();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(4), dispatcher.run(rx, sink.clone()))
        .await
        .expect("timeout enforced");
    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent.as_slice(), &["```\n[No output]\n[Timed out after 300ms]\n```".to_string()]);
}

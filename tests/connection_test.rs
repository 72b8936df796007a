use std::time::Duration;
use warelay::binary::node::NodeContent;
use warelay::binary::NodeBuilder;
use warelay::error::DisconnectReason;
use warelay::request::{InfoQuery, InfoQueryType, IqError};
use warelay::testutil::{EventCollector, TestHarness};
use warelay::types::events::{ConnectionState, Event};
use warelay::types::jid::Jid;
use warelay::Creds;
use warelay::SocketConfig;

fn ping_query() -> InfoQuery<'static> {
    InfoQuery {
        namespace: "w:p",
        query_type: InfoQueryType::Get,
        to: Jid::server_jid(),
        target: None,
        id: None,
        content: Some(NodeContent::Nodes(vec![NodeBuilder::new("ping").build()])),
        timeout: None,
    }
}

#[tokio::test]
async fn queries_resolve_on_matching_reply_id() {
    let mut harness = TestHarness::new().await;
    let client = harness.client.clone();

    let pending = tokio::spawn(async move { client.send_iq(ping_query()).await });

    let sent = harness.wait_for_stanzas().await;
    let iq = sent.iter().find(|n| n.tag == "iq").expect("iq on the wire");
    let req_id = iq.attrs.get("id").unwrap().clone();

    harness
        .inject(
            NodeBuilder::new("iq")
                .attr("id", req_id.clone())
                .attr("type", "result")
                .build(),
        )
        .await;

    let response = pending.await.unwrap().expect("query should resolve");
    assert_eq!(response.attrs.get("id"), Some(&req_id));
}

#[tokio::test]
async fn replies_with_unrelated_ids_do_not_resolve_queries() {
    let mut harness = TestHarness::new().await;
    let client = harness.client.clone();

    let pending = tokio::spawn(async move {
        let mut query = ping_query();
        query.timeout = Some(Duration::from_millis(150));
        client.send_iq(query).await
    });

    harness.wait_for_stanzas().await;
    harness
        .inject(
            NodeBuilder::new("iq")
                .attr("id", "some-other-id")
                .attr("type", "result")
                .build(),
        )
        .await;

    assert!(matches!(pending.await.unwrap(), Err(IqError::Timeout)));
}

#[tokio::test]
async fn error_replies_surface_code_and_text() {
    let mut harness = TestHarness::new().await;
    let client = harness.client.clone();

    let pending = tokio::spawn(async move { client.send_iq(ping_query()).await });
    let sent = harness.wait_for_stanzas().await;
    let req_id = sent[0].attrs.get("id").unwrap().clone();

    harness
        .inject(
            NodeBuilder::new("iq")
                .attr("id", req_id)
                .attr("type", "error")
                .children([NodeBuilder::new("error")
                    .attr("code", "404")
                    .attr("text", "item-not-found")
                    .build()])
                .build(),
        )
        .await;

    match pending.await.unwrap() {
        Err(IqError::ServerError { code, text }) => {
            assert_eq!(code, 404);
            assert_eq!(text, "item-not-found");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn close_cancels_pending_queries() {
    let mut harness = TestHarness::new().await;
    let client = harness.client.clone();

    let pending = tokio::spawn(async move { client.send_iq(ping_query()).await });
    harness.wait_for_stanzas().await;

    harness
        .client
        .end(DisconnectReason::ConnectionClosed)
        .await;

    assert!(matches!(
        pending.await.unwrap(),
        Err(IqError::Disconnected(_))
    ));
}

#[tokio::test]
async fn end_emits_exactly_one_close_update() {
    let harness = TestHarness::new().await;
    let collector = EventCollector::install(&harness.client);

    for _ in 0..3 {
        harness.client.end(DisconnectReason::ConnectionLost).await;
    }

    let closes: Vec<_> = collector
        .snapshot()
        .into_iter()
        .filter(|e| match e {
            Event::ConnectionUpdate(update) => {
                update.connection == Some(ConnectionState::Close)
            }
            _ => false,
        })
        .collect();
    assert_eq!(closes.len(), 1, "close must be emitted exactly once");
}

#[tokio::test(start_paused = true)]
async fn keepalive_silence_closes_with_connection_lost() {
    let mut creds = Creds::generate();
    creds.me = Some("5550001111:1@s.whatsapp.net".parse().unwrap());
    let mut config = SocketConfig::default();
    config.keep_alive_interval = Duration::from_secs(10);

    let harness = TestHarness::with_creds_and_config(creds, config).await;
    let collector = EventCollector::install(&harness.client);

    // Silence runs past interval + grace on the virtual clock.
    tokio::time::sleep(Duration::from_secs(31)).await;

    let closes: Vec<_> = collector
        .snapshot()
        .into_iter()
        .filter_map(|e| match e {
            Event::ConnectionUpdate(update)
                if update.connection == Some(ConnectionState::Close) =>
            {
                update.last_disconnect
            }
            _ => None,
        })
        .collect();
    assert_eq!(closes.len(), 1, "exactly one close update");
    assert_eq!(closes[0].reason, DisconnectReason::ConnectionLost);
}

#[tokio::test]
async fn stream_error_closes_with_mapped_reason() {
    let mut harness = TestHarness::new().await;
    let collector = EventCollector::install(&harness.client);

    harness
        .inject(NodeBuilder::new("stream:error").attr("code", "401").build())
        .await;
    harness.settle().await;

    let close = collector
        .snapshot()
        .into_iter()
        .find_map(|e| match e {
            Event::ConnectionUpdate(update)
                if update.connection == Some(ConnectionState::Close) =>
            {
                update.last_disconnect
            }
            _ => None,
        })
        .expect("close update emitted");
    assert_eq!(close.reason, DisconnectReason::LoggedOut);
}

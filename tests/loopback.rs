//! The real tokio-tungstenite transport against a local WebSocket server.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use polygon_stream::types::events::TradeEvent;
use polygon_stream::ws::connection::ConnectionState;
use polygon_stream::{StreamClientBuilder, StreamCluster, handler_fn};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_session_over_a_local_socket() {
    common::init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let mut received = Vec::new();

        ws.send(Message::Text(
            r#"[{"ev":"status","status":"connected","message":"Connected Successfully"}]"#.into(),
        ))
        .await
        .unwrap();

        // auth, then the subscription
        while received.len() < 2 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_owned();
                    if text.contains(r#""action":"auth""#) {
                        ws.send(Message::Text(
                            r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#
                                .into(),
                        ))
                        .await
                        .unwrap();
                    }
                    received.push(text);
                }
                Some(Ok(_)) => {}
                other => panic!("client went away early: {other:?}"),
            }
        }

        ws.send(Message::Text(
            r#"[{"ev":"T","sym":"AMD","x":4,"p":114.125,"s":100,"c":[0,12],"t":1536036818784}]"#
                .into(),
        ))
        .await
        .unwrap();

        // Drain until the client closes.
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
        received
    });

    let client = StreamClientBuilder::new("loopback-key", StreamCluster::Stocks)
        .url(format!("ws://{addr}/stocks"))
        .build()
        .unwrap();

    let trades = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&trades);
    client.register_handler(
        "T",
        handler_fn(move |msg| {
            let trade: TradeEvent = msg.decode()?;
            sink.lock().unwrap().push(trade);
            Ok(())
        }),
    );
    client.subscribe_stock_trades(["AMD"]).await.unwrap();
    client.start().await.unwrap();

    common::eventually(Duration::from_secs(5), || !trades.lock().unwrap().is_empty()).await;
    assert_eq!(client.connection_state(), ConnectionState::Ready);
    {
        let trades = trades.lock().unwrap();
        assert_eq!(trades[0].symbol, "AMD");
        assert_eq!(trades[0].price, Some(114.125));
        assert_eq!(trades[0].conditions, vec![0, 12]);
        assert!(trades[0].timestamp().is_some());
    }

    client.close().await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        received,
        vec![
            r#"{"action":"auth","params":"loopback-key"}"#.to_owned(),
            r#"{"action":"subscribe","params":"T.AMD"}"#.to_owned(),
        ]
    );
    assert_eq!(client.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_refused_connection_goes_through_the_reconnect_policy() {
    common::init_tracing();
    // Bind and drop to get a port nobody is listening on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let client = StreamClientBuilder::new("loopback-key", StreamCluster::Stocks)
        .url(format!("ws://{addr}/stocks"))
        .max_reconnect_attempts(1)
        .reconnect_delay(Duration::from_millis(10))
        .build()
        .unwrap();
    client.start().await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), client.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(
        matches!(err, polygon_stream::PolygonError::ReconnectLimit { attempts: 1, .. }),
        "{err:?}"
    );
}

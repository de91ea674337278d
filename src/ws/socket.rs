//! tokio-tungstenite transport.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use url::Url;

use crate::ws::connection::{Connector, Frame, FrameSink, FrameSource};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens TLS (or plain, for `ws://`) WebSocket connections to one URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    config: WebSocketConfig,
}

impl WsConnector {
    pub fn new(url: Url, config: WebSocketConfig) -> Self {
        Self { url, config }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    type Sink = WsSink;
    type Source = WsSource;

    async fn open(&self) -> Result<(WsSink, WsSource), tungstenite::Error> {
        let (ws, response) =
            connect_async_with_config(self.url.as_str(), Some(self.config), true).await?;
        tracing::debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");
        let (write, read) = ws.split();
        Ok((WsSink(write), WsSource(read)))
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

/// Write half of a [`WsConnector`] transport.
pub struct WsSink(SplitSink<WsStream, Message>);

impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), tungstenite::Error> {
        self.0.send(Message::Text(text.into())).await
    }

    async fn send_ping(&mut self) -> Result<(), tungstenite::Error> {
        self.0.send(Message::Ping(Default::default())).await
    }

    async fn close(&mut self) -> Result<(), tungstenite::Error> {
        self.0.close().await
    }
}

/// Read half of a [`WsConnector`] transport.
pub struct WsSource(SplitStream<WsStream>);

impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, tungstenite::Error>> {
        loop {
            let frame = match self.0.next().await? {
                Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
                Ok(Message::Binary(data)) => Frame::Binary(data),
                Ok(Message::Ping(_)) => Frame::Ping,
                Ok(Message::Pong(_)) => Frame::Pong,
                Ok(Message::Close(close)) => Frame::Close(
                    close.map(|c| (u16::from(c.code), c.reason.as_str().to_owned())),
                ),
                // Raw frames only surface when writing; skip if one appears.
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e)),
            };
            return Some(Ok(frame));
        }
    }
}

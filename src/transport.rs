//! Duplex transport seam between the session state machine and the wire.
//!
//! The session client only sees these traits, so protocol tests run against
//! a scripted in-memory transport while production uses the WebSocket
//! implementation below.

use anyhow::Context;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::session::SessionConfig;

/// Close code for an abnormal termination without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// What the session sees coming back from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    Text(String),
    Closed { code: u16 },
}

/// Factory for one connection attempt. The session task borrows itself
/// across awaits while holding the transport, so implementations must be
/// shareable as well as sendable.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&mut self, config: &SessionConfig) -> anyhow::Result<Box<dyn TransportLink>>;
}

/// One live duplex connection. Owned exclusively by a single session.
#[async_trait]
pub trait TransportLink: Send {
    async fn send_binary(&mut self, data: Vec<u8>) -> anyhow::Result<()>;
    async fn close(&mut self, code: u16) -> anyhow::Result<()>;
    /// Next inbound message; `None` once the stream is exhausted after a
    /// close has already been reported.
    async fn next(&mut self) -> Option<TransportMessage>;
}

/// WebSocket transport against the Deepgram listen endpoint.
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self, config: &SessionConfig) -> anyhow::Result<Box<dyn TransportLink>> {
        let url = build_listen_url(config)?;
        let host = url.host_str().unwrap_or("api.deepgram.com").to_string();

        // The credential travels as a WebSocket subprotocol, never in the
        // query string where it would end up in logs.
        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header(
                "Sec-WebSocket-Protocol",
                format!("token, {}", config.api_key),
            )
            .body(())?;

        log::info!("Connecting to {}...", redacted(&url));
        let (ws_stream, _) = connect_async(request)
            .await
            .context("WebSocket handshake failed")?;
        log::info!("Connected");

        let (write, read) = ws_stream.split();
        Ok(Box::new(WsLink { write, read }))
    }
}

/// Build the listen URL with the fixed transcription parameters.
fn build_listen_url(config: &SessionConfig) -> anyhow::Result<Url> {
    let mut url = Url::parse(&config.url).context("Invalid endpoint URL")?;
    url.query_pairs_mut()
        .append_pair("model", &config.model)
        .append_pair("language", &config.language)
        .append_pair("punctuate", "true")
        .append_pair("smart_format", "true")
        .append_pair("interim_results", "true")
        .append_pair("endpointing", &config.endpointing_ms.to_string())
        .append_pair("encoding", "linear16")
        .append_pair("sample_rate", &config.sample_rate.to_string());
    Ok(url)
}

fn redacted(url: &Url) -> String {
    format!("{}://{}{}", url.scheme(), url.host_str().unwrap_or(""), url.path())
}

struct WsLink {
    write: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    read: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send_binary(&mut self, data: Vec<u8>) -> anyhow::Result<()> {
        self.write.send(Message::Binary(data.into())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16) -> anyhow::Result<()> {
        self.write
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "Client disconnecting".into(),
            })))
            .await?;
        Ok(())
    }

    async fn next(&mut self) -> Option<TransportMessage> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(TransportMessage::Text(text.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame
                        .map(|f| u16::from(f.code))
                        .unwrap_or(ABNORMAL_CLOSE_CODE);
                    return Some(TransportMessage::Closed { code });
                }
                // Pings are answered by tungstenite; binary is not expected.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    log::warn!("WebSocket read error: {}", e);
                    return Some(TransportMessage::Closed {
                        code: ABNORMAL_CLOSE_CODE,
                    });
                }
                None => return None,
            }
        }
    }
}

// WebSocket hub transport (JSON text frames over tokio-tungstenite).

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use coedit_common::protocol::hub::{HubCall, HubEvent};

use super::{validate_hub_url, HubFuture, HubTransport};

type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn install_crypto_provider() {
    // Fails harmlessly when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

pub struct WsHubTransport {
    hub_url: String,
    socket: Option<HubSocket>,
}

impl WsHubTransport {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self { hub_url: hub_url.into(), socket: None }
    }

    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn open(&mut self, access_token: &str) -> Result<()> {
        let url = validate_hub_url(&self.hub_url)?;
        if url.scheme() == "wss" {
            install_crypto_provider();
        }
        let mut request = url
            .as_str()
            .into_client_request()
            .with_context(|| format!("failed to build upgrade request for `{url}`"))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .context("access token is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _response) = connect_async(request)
            .await
            .with_context(|| format!("WebSocket connection to `{url}` failed"))?;
        info!(hub_url = %url, "hub socket open");
        self.socket = Some(socket);
        Ok(())
    }

    async fn send_call(&mut self, call: HubCall) -> Result<()> {
        let socket = self.socket.as_mut().context("hub socket is not open")?;
        let frame = serde_json::to_string(&call).context("failed to serialize hub call")?;
        socket
            .send(Message::Text(frame.into()))
            .await
            .with_context(|| format!("failed to send {}", call.method()))
    }

    async fn recv_event(&mut self) -> Result<Option<HubEvent>> {
        loop {
            let Some(socket) = self.socket.as_mut() else {
                return Ok(None);
            };
            let Some(frame) = socket.next().await else {
                self.socket = None;
                return Ok(None);
            };

            match frame.context("hub socket read failed")? {
                Message::Text(text) => match serde_json::from_str::<HubEvent>(text.as_str()) {
                    Ok(event) => return Ok(Some(event)),
                    Err(error) => {
                        // Unknown or malformed frames are dropped; the socket stays up.
                        debug!(error = %error, "ignoring unrecognized hub frame");
                    }
                },
                Message::Ping(payload) => {
                    if let Err(error) = socket.send(Message::Pong(payload)).await {
                        warn!(error = %error, "failed to answer hub ping");
                    }
                }
                Message::Close(_) => {
                    self.socket = None;
                    return Ok(None);
                }
                Message::Binary(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut socket) = self.socket.take() {
            if let Err(error) = socket.close(None).await {
                debug!(error = %error, "hub socket close handshake failed");
            }
        }
        Ok(())
    }
}

impl HubTransport for WsHubTransport {
    fn start<'a>(&'a mut self, access_token: &'a str) -> HubFuture<'a, ()> {
        Box::pin(self.open(access_token))
    }

    fn invoke<'a>(&'a mut self, call: HubCall) -> HubFuture<'a, ()> {
        Box::pin(self.send_call(call))
    }

    fn next_event<'a>(&'a mut self) -> HubFuture<'a, Option<HubEvent>> {
        Box::pin(self.recv_event())
    }

    fn stop<'a>(&'a mut self) -> HubFuture<'a, ()> {
        Box::pin(self.close())
    }
}

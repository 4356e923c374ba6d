//! WsTransport — one tokio task per websocket connection.
//!
//! Each socket task only reports back into the session loop, tagged with the
//! [`ConnectionId`] it was opened for.  Closing is requested through a
//! oneshot; a task closed that way exits without reporting, since the
//! manager has already forgotten its id.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::connection::{ConnectionId, Transport, ABNORMAL_CLOSURE};
use crate::endpoint;
use crate::error::TransportError;
use crate::session::{LoopEvent, TransportEvent};

/// Reported when the peer closed without a status code.
const NO_STATUS: u16 = 1005;

#[derive(Debug)]
struct CloseRequest {
    code: u16,
    reason: String,
}

pub struct WsTransport {
    url: Url,
    tokens: Option<Arc<TokenSource>>,
    events: mpsc::Sender<LoopEvent>,
    sockets: HashMap<ConnectionId, oneshot::Sender<CloseRequest>>,
}

impl WsTransport {
    pub fn new(
        url: Url,
        tokens: Option<Arc<TokenSource>>,
        events: mpsc::Sender<LoopEvent>,
    ) -> Self {
        Self {
            url,
            tokens,
            events,
            sockets: HashMap::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WsTransport {
    fn open(&mut self, id: ConnectionId) {
        // tasks that already exited dropped their receiver
        self.sockets.retain(|_, tx| !tx.is_closed());

        let (close_tx, close_rx) = oneshot::channel();
        self.sockets.insert(id, close_tx);
        tokio::spawn(run_socket(
            id,
            self.url.clone(),
            self.tokens.clone(),
            self.events.clone(),
            close_rx,
        ));
    }

    fn close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        if let Some(tx) = self.sockets.remove(&id) {
            let _ = tx.send(CloseRequest {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for (_, tx) in self.sockets.drain() {
            let _ = tx.send(CloseRequest {
                code: crate::connection::NORMAL_CLOSURE,
                reason: "session dropped".to_string(),
            });
        }
    }
}

async fn post(events: &mpsc::Sender<LoopEvent>, id: ConnectionId, event: TransportEvent) {
    if events.send(LoopEvent::Transport(id, event)).await.is_err() {
        debug!("ws {:?}: session loop gone", id);
    }
}

async fn fail(events: &mpsc::Sender<LoopEvent>, id: ConnectionId, error: String) {
    post(events, id, TransportEvent::Error(error.clone())).await;
    post(
        events,
        id,
        TransportEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: error,
        },
    )
    .await;
}

async fn run_socket(
    id: ConnectionId,
    url: Url,
    tokens: Option<Arc<TokenSource>>,
    events: mpsc::Sender<LoopEvent>,
    mut close_rx: oneshot::Receiver<CloseRequest>,
) {
    let dial = async {
        let target = match &tokens {
            Some(source) => {
                let token = source.fetch().await?;
                endpoint::with_credential(&url, &token)
            }
            None => url.clone(),
        };
        let credential = if tokens.is_some() { " (with credential)" } else { "" };
        debug!("ws {:?}: dialing {}{}", id, url, credential);
        let (stream, _) = connect_async(target.as_str()).await?;
        Ok::<_, TransportError>(stream)
    };

    let stream = tokio::select! {
        result = dial => match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("ws {:?}: dial failed: {}", id, e);
                fail(&events, id, e.to_string()).await;
                return;
            }
        },
        _ = &mut close_rx => {
            debug!("ws {:?}: dial abandoned", id);
            return;
        }
    };

    info!("ws {:?}: connected to {}", id, url);
    post(&events, id, TransportEvent::Opened).await;

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            request = &mut close_rx => {
                let request = request.unwrap_or(CloseRequest {
                    code: crate::connection::NORMAL_CLOSURE,
                    reason: "transport dropped".to_string(),
                });
                debug!("ws {:?}: closing with {} ({})", id, request.code, request.reason);
                let frame = CloseFrame {
                    code: CloseCode::from(request.code),
                    reason: request.reason.into(),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!("ws {:?}: close frame not sent: {}", id, e);
                }
                return;
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    post(&events, id, TransportEvent::Frame(text)).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("ws {:?}: ignoring binary frame ({} bytes)", id, data.len());
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        debug!("ws {:?}: pong failed: {}", id, e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS, String::new()));
                    info!("ws {:?}: closed by server ({} {:?})", id, code, reason);
                    post(&events, id, TransportEvent::Closed { code, reason }).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("ws {:?}: read error: {}", id, e);
                    fail(&events, id, e.to_string()).await;
                    return;
                }
                None => {
                    post(
                        &events,
                        id,
                        TransportEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "stream ended".to_string(),
                        },
                    )
                    .await;
                    return;
                }
            }
        }
    }
}

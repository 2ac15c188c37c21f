//! Default push transport: a websocket opened with `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::channel::{PushConnection, PushConnector, PushSignals};
use crate::error::{Result, TelemetryError};

/// Connects to the collector's websocket endpoint. Outgoing frames go
/// through a writer task so `send_text` never waits on the socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: Url, signals: PushSignals) -> Result<Box<dyn PushConnection>> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TelemetryError::Push(format!("connect to {} failed: {}", url.host_str().unwrap_or("?"), e)))?;
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer_signals = signals.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    writer_signals.error(e.to_string());
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // The collector never sends anything meaningful; only watch for closure.
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Close(frame)) => {
                        debug!("Collector closed push socket: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        signals.error(e.to_string());
                        break;
                    }
                }
            }
            signals.closed();
        });

        Ok(Box::new(WsConnection { tx }))
    }
}

struct WsConnection {
    tx: mpsc::UnboundedSender<Message>,
}

impl PushConnection for WsConnection {
    fn send_text(&self, text: String) -> Result<()> {
        self.tx
            .send(Message::Text(text.into()))
            .map_err(|_| TelemetryError::PushClosed)
    }

    fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }
}

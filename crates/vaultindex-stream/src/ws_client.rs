//! `WsStreamClient` — [`StreamClient`] over a WebSocket connection.
//!
//! Protocol: after connecting (bearer token in the `Authorization` header) the
//! client sends one `configure` frame carrying filter, finality and cursor.
//! The server answers with JSON frames:
//!
//! ```text
//! {"type":"data","blocks":[{"header":{...},"events":[...]}]}
//! {"type":"heartbeat"}
//! {"type":"error","code":14,"message":"..."}
//! ```

use async_trait::async_trait;
use futures::{channel::mpsc, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
};
use tracing::{debug, info, warn};

use crate::client::{BlockStream, StreamClient, StreamError};
use crate::message::{BlockMessage, Cursor, Finality, StatusCode, StreamFilter, SubscriptionRequest};

/// WebSocket stream client.
///
/// Each `subscribe` opens a fresh connection served by its own reader task;
/// dropping the returned stream stops the task.
pub struct WsStreamClient {
    url: String,
    auth_token: Option<String>,
}

impl WsStreamClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

#[async_trait]
impl StreamClient for WsStreamClient {
    async fn subscribe(&self, request: SubscriptionRequest) -> Result<BlockStream, StreamError> {
        let mut ws_request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::transport(StatusCode::INVALID_ARGUMENT, e.to_string()))?;
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StreamError::transport(StatusCode::UNAUTHENTICATED, e.to_string()))?;
            ws_request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!(url = %self.url, cursor = ?request.starting_cursor, "connecting to event stream");
        let (ws, _) = connect_async(ws_request)
            .await
            .map_err(|e| StreamError::unavailable(format!("connect {}: {e}", self.url)))?;
        let (mut write, mut read) = ws.split();

        let configure = ClientFrame::Configure {
            filter: &request.filter,
            finality: request.finality,
            starting_cursor: request.starting_cursor,
        };
        let text = serde_json::to_string(&configure)
            .map_err(|e| StreamError::Malformed(format!("encode configure frame: {e}")))?;
        write
            .send(Message::Text(text))
            .await
            .map_err(|e| StreamError::unavailable(format!("send configure frame: {e}")))?;

        let (mut tx, rx) = mpsc::channel::<Result<BlockMessage, StreamError>>(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                if tx.is_closed() {
                    debug!("stream receiver dropped");
                    return;
                }
                let item = match msg {
                    Err(e) => {
                        warn!(error = %e, "websocket error");
                        let _ = tx.send(Err(StreamError::unavailable(e.to_string()))).await;
                        return;
                    }
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Ping(data)) => {
                        let _ = write.send(Message::Pong(data)).await;
                        continue;
                    }
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "event stream closed by server");
                        return;
                    }
                    Ok(_) => continue,
                };
                if let Flow::Stop = forward(parse_frame(&item), &mut tx).await {
                    return;
                }
            }
        });

        Ok(Box::pin(rx))
    }
}

/// Blocks buffered between the reader task and the consumer.
const CHANNEL_CAPACITY: usize = 64;

/// Whether the reader task keeps reading after a frame.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Hand one parsed frame to the consumer.
///
/// Stops on server errors, on malformed frames, and as soon as the receiving
/// side is gone, including on frames that carry no blocks.
async fn forward(
    frame: Result<ServerFrame, StreamError>,
    tx: &mut mpsc::Sender<Result<BlockMessage, StreamError>>,
) -> Flow {
    match frame {
        Ok(ServerFrame::Data { blocks }) => {
            for block in blocks {
                if tx.send(Ok(block)).await.is_err() {
                    debug!("stream receiver dropped");
                    return Flow::Stop;
                }
            }
            Flow::Continue
        }
        Ok(ServerFrame::Heartbeat) | Ok(ServerFrame::Unknown) => {
            if tx.is_closed() {
                debug!("stream receiver dropped");
                Flow::Stop
            } else {
                Flow::Continue
            }
        }
        Ok(ServerFrame::Error { code, message }) => {
            let _ = tx.send(Err(StreamError::transport(StatusCode(code), message))).await;
            Flow::Stop
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            Flow::Stop
        }
    }
}

// ─── Frames ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame<'a> {
    Configure {
        filter: &'a StreamFilter,
        finality: Finality,
        starting_cursor: Option<Cursor>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerFrame {
    Data {
        #[serde(default)]
        blocks: Vec<BlockMessage>,
    },
    Heartbeat,
    Error {
        code: u32,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

fn parse_frame(text: &str) -> Result<ServerFrame, StreamError> {
    serde_json::from_str(text).map_err(|e| {
        let head: String = text.chars().take(120).collect();
        StreamError::Malformed(format!("{e}: {head}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultindex_core::SelectorTable;

    #[test]
    fn parses_data_frame() {
        let text = r#"{"type":"data","blocks":[
            {"header":{"block_number":812000,"timestamp":1718000000},
             "events":[{"index":0,"transaction_hash":"0xab","keys":["0x1"],"data":["0x2","0x3"]}]}
        ]}"#;
        let ServerFrame::Data { blocks } = parse_frame(text).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_number(), Some(812_000));
        assert_eq!(blocks[0].events[0].data.as_deref().map(<[String]>::len), Some(2));
    }

    #[test]
    fn parses_error_frame() {
        let frame = parse_frame(r#"{"type":"error","code":14,"message":"try again"}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Error { code: 14, .. }));
    }

    #[test]
    fn tolerates_unknown_frame_types() {
        assert!(matches!(parse_frame(r#"{"type":"invalidate"}"#).unwrap(), ServerFrame::Unknown));
        assert!(matches!(parse_frame(r#"{"type":"heartbeat"}"#).unwrap(), ServerFrame::Heartbeat));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(parse_frame("not json"), Err(StreamError::Malformed(_))));
    }

    #[test]
    fn configure_frame_shape() {
        let filter = StreamFilter::for_contract("0x1".parse().unwrap(), &SelectorTable::vault());
        let frame = ClientFrame::Configure {
            filter: &filter,
            finality: Finality::Accepted,
            starting_cursor: Some(Cursor { order_key: 12 }),
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "configure");
        assert_eq!(v["finality"], "accepted");
        assert_eq!(v["starting_cursor"]["order_key"], 12);
        assert_eq!(v["filter"]["events"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn heartbeat_stops_once_receiver_is_gone() {
        let (mut tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        assert_eq!(forward(Ok(ServerFrame::Heartbeat), &mut tx).await, Flow::Continue);

        drop(rx);
        assert_eq!(forward(Ok(ServerFrame::Heartbeat), &mut tx).await, Flow::Stop);
        assert_eq!(forward(Ok(ServerFrame::Unknown), &mut tx).await, Flow::Stop);
    }

    #[tokio::test]
    async fn data_frames_are_forwarded_in_order() {
        let (mut tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let ServerFrame::Data { blocks } =
            parse_frame(r#"{"type":"data","blocks":[{"header":{"block_number":1}},{"header":{"block_number":2}}]}"#)
                .unwrap()
        else {
            panic!("expected data frame");
        };
        let frame = Ok(ServerFrame::Data { blocks });
        assert_eq!(forward(frame, &mut tx).await, Flow::Continue);

        let error = Ok(ServerFrame::Error { code: 14, message: "busy".into() });
        assert_eq!(forward(error, &mut tx).await, Flow::Stop);
        drop(tx);

        let received: Vec<_> = rx.collect().await;
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].as_ref().unwrap().block_number(), Some(1));
        assert_eq!(received[1].as_ref().unwrap().block_number(), Some(2));
        assert!(matches!(&received[2], Err(e) if e.code() == StatusCode::UNAVAILABLE));
    }
}

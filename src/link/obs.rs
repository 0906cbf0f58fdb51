//! OBS Studio link over obs-websocket v5
//!
//! Program and preview are the enabled scene items of the current program
//! and preview scenes. Preview is empty while studio mode is off.

use std::collections::VecDeque;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{LinkError, LinkEvent, SwitcherLink};
use crate::mapping::SwitcherId;
use crate::snapshot::Bus;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RPC_VERSION: u32 = 1;

// WebSocketOpCode
const OP_HELLO: u8 = 0;
const OP_IDENTIFY: u8 = 1;
const OP_IDENTIFIED: u8 = 2;
const OP_EVENT: u8 = 5;
const OP_REQUEST: u8 = 6;
const OP_REQUEST_RESPONSE: u8 = 7;

// EventSubscription bits: Scenes | Transitions | SceneItems | Ui
const EVENT_SUBSCRIPTIONS: u32 = (1 << 2) | (1 << 4) | (1 << 7) | (1 << 10);

// RequestStatus::StudioModeNotActive
const STUDIO_MODE_NOT_ACTIVE: i64 = 506;

// Events queued while a request is in flight
const PENDING_EVENT_LIMIT: usize = 8;

// Events after which bus contents may have changed
const STATE_EVENTS: &[&str] = &[
    "CurrentProgramSceneChanged",
    "CurrentPreviewSceneChanged",
    "SceneItemEnableStateChanged",
    "SceneItemCreated",
    "SceneItemRemoved",
    "StudioModeStateChanged",
    "SceneTransitionEnded",
];

#[derive(Debug, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    d: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    obs_web_socket_version: Option<String>,
    rpc_version: u32,
    authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
struct AuthChallenge {
    challenge: String,
    salt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestResponse {
    request_id: String,
    request_status: RequestStatus,
    #[serde(default)]
    response_data: Value,
}

#[derive(Debug, Deserialize)]
struct RequestStatus {
    result: bool,
    code: i64,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneItem {
    source_name: String,
    scene_item_enabled: bool,
}

/// Compute the obs-websocket authentication string
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{}{}", password, salt)));
    STANDARD.encode(Sha256::digest(format!("{}{}", secret, challenge)))
}

fn protocol_error(context: &str, e: serde_json::Error) -> LinkError {
    LinkError::Protocol(format!("{}: {}", context, e))
}

fn is_state_event(data: &Value) -> bool {
    data.get("eventType")
        .and_then(Value::as_str)
        .is_some_and(|event_type| STATE_EVENTS.contains(&event_type))
}

fn queue_event(pending: &mut VecDeque<LinkEvent>, event: LinkEvent) {
    if pending.len() < PENDING_EVENT_LIMIT && !pending.contains(&event) {
        pending.push_back(event);
    }
}

// Next protocol frame, skipping control and binary messages
async fn read_frame(ws: &mut WsStream) -> Result<Frame, LinkError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).map_err(|e| protocol_error("bad frame", e));
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(match frame {
                    Some(frame) => LinkError::Closed {
                        code: u16::from(frame.code),
                        reason: frame.reason.to_string(),
                    },
                    None => LinkError::Closed {
                        code: 1005,
                        reason: String::new(),
                    },
                });
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(LinkError::Closed {
                    code: 1006,
                    reason: "stream ended".to_string(),
                });
            }
        }
    }
}

async fn send_frame(ws: &mut WsStream, op: u8, d: Value) -> Result<(), LinkError> {
    let text = json!({ "op": op, "d": d }).to_string();
    ws.send(Message::Text(text)).await?;
    Ok(())
}

// Send one request and wait for its response, queueing events seen meanwhile
async fn exchange(
    ws: &mut WsStream,
    pending: &mut VecDeque<LinkEvent>,
    request_type: &str,
    request_id: String,
    data: Option<Value>,
) -> Result<Value, LinkError> {
    let mut d = json!({ "requestType": request_type, "requestId": request_id });
    if let Some(data) = data {
        d["requestData"] = data;
    }
    send_frame(ws, OP_REQUEST, d).await?;

    loop {
        let frame = read_frame(ws).await?;
        match frame.op {
            OP_REQUEST_RESPONSE => {
                let response: RequestResponse = serde_json::from_value(frame.d)
                    .map_err(|e| protocol_error("bad request response", e))?;
                if response.request_id != request_id {
                    // Late reply to a request that already timed out
                    continue;
                }
                if response.request_status.result {
                    return Ok(response.response_data);
                }
                return Err(LinkError::Rejected {
                    request: request_type.to_string(),
                    code: response.request_status.code,
                    comment: response.request_status.comment,
                });
            }
            OP_EVENT if is_state_event(&frame.d) => queue_event(pending, LinkEvent::StateChanged),
            _ => {}
        }
    }
}

fn scene_name(data: &Value, field: &str) -> Result<String, LinkError> {
    data.get(field)
        .or_else(|| data.get("sceneName"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LinkError::Protocol(format!("response missing {}", field)))
}

// Link to OBS Studio's websocket server
pub struct ObsLink {
    host: String,
    port: u16,
    password: String,
    request_timeout: Duration,
    socket: Option<WsStream>,
    pending: VecDeque<LinkEvent>,
    next_request_id: u64,
}

impl ObsLink {
    pub fn new(host: String, port: u16, password: String, request_timeout: Duration) -> Self {
        Self {
            host,
            port,
            password,
            request_timeout,
            socket: None,
            pending: VecDeque::new(),
            next_request_id: 1,
        }
    }

    async fn request(&mut self, request_type: &str, data: Option<Value>) -> Result<Value, LinkError> {
        let request_id = self.next_request_id.to_string();
        self.next_request_id += 1;

        let ws = self.socket.as_mut().ok_or(LinkError::NotConnected)?;
        let result = tokio::time::timeout(
            self.request_timeout,
            exchange(ws, &mut self.pending, request_type, request_id, data),
        )
        .await
        .unwrap_or(Err(LinkError::Timeout(self.request_timeout)));

        if let Err(LinkError::WebSocket(_) | LinkError::Closed { .. }) = &result {
            self.socket = None;
        }
        result
    }

    async fn scene_items(&mut self, scene: String) -> Result<Vec<SwitcherId>, LinkError> {
        let data = self
            .request("GetSceneItemList", Some(json!({ "sceneName": scene })))
            .await?;
        let items: Vec<SceneItem> = serde_json::from_value(data["sceneItems"].clone())
            .map_err(|e| protocol_error("bad scene item list", e))?;

        Ok(items
            .into_iter()
            .filter(|item| item.scene_item_enabled)
            .map(|item| SwitcherId::Source(item.source_name))
            .collect())
    }
}

impl SwitcherLink for ObsLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let url = self.address();
        log::debug!("Connecting to OBS at {}", url);

        let (mut ws, _) = connect_async(url.as_str()).await?;

        let frame = read_frame(&mut ws).await?;
        if frame.op != OP_HELLO {
            return Err(LinkError::Protocol(format!("expected Hello, got op {}", frame.op)));
        }
        let hello: Hello =
            serde_json::from_value(frame.d).map_err(|e| protocol_error("bad Hello", e))?;
        log::debug!(
            "obs-websocket {} (rpc {})",
            hello.obs_web_socket_version.as_deref().unwrap_or("unknown"),
            hello.rpc_version
        );

        let mut identify = json!({
            "rpcVersion": RPC_VERSION,
            "eventSubscriptions": EVENT_SUBSCRIPTIONS,
        });
        if let Some(auth) = &hello.authentication {
            identify["authentication"] =
                Value::String(auth_response(&self.password, &auth.salt, &auth.challenge));
        }
        send_frame(&mut ws, OP_IDENTIFY, identify).await?;

        loop {
            let frame = read_frame(&mut ws).await?;
            if frame.op == OP_IDENTIFIED {
                break;
            }
        }

        self.socket = Some(ws);
        self.pending.clear();
        log::debug!("Connected to OBS successfully");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn next_event(&mut self) -> LinkEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }
        let Some(ws) = self.socket.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            match read_frame(ws).await {
                Ok(frame) if frame.op == OP_EVENT && is_state_event(&frame.d) => {
                    return LinkEvent::StateChanged;
                }
                Ok(_) => {}
                Err(LinkError::Closed { code, reason }) => {
                    log::debug!("OBS closed the connection ({}): {}", code, reason);
                    self.socket = None;
                    return LinkEvent::Disconnected;
                }
                Err(e) => {
                    self.socket = None;
                    return LinkEvent::Error(e.cause());
                }
            }
        }
    }

    async fn visible_inputs(&mut self, bus: Bus) -> Result<Vec<SwitcherId>, LinkError> {
        let scene = match bus {
            Bus::Program => {
                let data = self.request("GetCurrentProgramScene", None).await?;
                scene_name(&data, "currentProgramSceneName")?
            }
            Bus::Preview => match self.request("GetCurrentPreviewScene", None).await {
                Ok(data) => scene_name(&data, "currentPreviewSceneName")?,
                Err(LinkError::Rejected {
                    code: STUDIO_MODE_NOT_ACTIVE,
                    ..
                }) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            },
        };
        self.scene_items(scene).await
    }

    fn address(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_auth_response() {
        let auth = auth_response(
            "supersecretpassword",
            "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
            "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=",
        );

        assert_eq!(auth, "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4=");
    }

    #[test]
    fn test_state_events() {
        assert!(is_state_event(&json!({ "eventType": "CurrentProgramSceneChanged" })));
        assert!(!is_state_event(&json!({ "eventType": "InputVolumeChanged" })));
        assert!(!is_state_event(&json!({})));
        assert!(!is_state_event(&json!({ "eventType": 7 })));
    }

    #[test]
    fn test_pending_events_coalesce() {
        let mut pending = VecDeque::new();
        for _ in 0..5 {
            queue_event(&mut pending, LinkEvent::StateChanged);
        }

        assert_eq!(pending.len(), 1);
    }

    async fn recv_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn respond(ws: &mut WebSocketStream<TcpStream>, request: &Value, ok: bool, code: i64, data: Value) {
        send_json(
            ws,
            json!({
                "op": OP_REQUEST_RESPONSE,
                "d": {
                    "requestType": request["d"]["requestType"],
                    "requestId": request["d"]["requestId"],
                    "requestStatus": { "result": ok, "code": code },
                    "responseData": data,
                }
            }),
        )
        .await;
    }

    // Minimal obs-websocket server with studio mode off
    async fn fake_obs(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        send_json(
            &mut ws,
            json!({ "op": OP_HELLO, "d": { "obsWebSocketVersion": "5.0.0", "rpcVersion": 1 } }),
        )
        .await;
        let identify = recv_json(&mut ws).await;
        assert_eq!(identify["op"], OP_IDENTIFY);
        assert!(identify["d"].get("authentication").is_none());
        send_json(&mut ws, json!({ "op": OP_IDENTIFIED, "d": { "negotiatedRpcVersion": 1 } })).await;

        loop {
            let request = recv_json(&mut ws).await;
            match request["d"]["requestType"].as_str().unwrap() {
                "GetCurrentProgramScene" => {
                    // An event racing the response must not be lost
                    send_json(
                        &mut ws,
                        json!({ "op": OP_EVENT, "d": { "eventType": "SceneItemEnableStateChanged" } }),
                    )
                    .await;
                    respond(&mut ws, &request, true, 100, json!({ "currentProgramSceneName": "Wide" }))
                        .await;
                }
                "GetSceneItemList" => {
                    assert_eq!(request["d"]["requestData"]["sceneName"], "Wide");
                    respond(
                        &mut ws,
                        &request,
                        true,
                        100,
                        json!({ "sceneItems": [
                            { "sourceName": "Camera 1", "sceneItemEnabled": true },
                            { "sourceName": "Camera 2", "sceneItemEnabled": false },
                            { "sourceName": "Lower Third", "sceneItemEnabled": true },
                        ] }),
                    )
                    .await;
                }
                "GetCurrentPreviewScene" => {
                    respond(&mut ws, &request, false, STUDIO_MODE_NOT_ACTIVE, Value::Null).await;
                    break;
                }
                other => panic!("unexpected request {}", other),
            }
        }

        let _ = ws.close(None).await;
    }

    #[tokio::test]
    async fn test_session_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(fake_obs(listener));

        let mut link = ObsLink::new("127.0.0.1".into(), port, String::new(), Duration::from_secs(2));
        link.connect().await.unwrap();
        assert!(link.is_connected());

        let program = link.visible_inputs(Bus::Program).await.unwrap();
        assert_eq!(
            program,
            vec![
                SwitcherId::Source("Camera 1".into()),
                SwitcherId::Source("Lower Third".into()),
            ]
        );

        // Studio mode off: empty preview, not an error
        assert!(link.visible_inputs(Bus::Preview).await.unwrap().is_empty());

        // Event seen during the first request is delivered afterwards
        assert_eq!(link.next_event().await, LinkEvent::StateChanged);

        // Server closes after the preview request
        assert_eq!(link.next_event().await, LinkEvent::Disconnected);
        assert!(!link.is_connected());

        server.await.unwrap();
    }
}

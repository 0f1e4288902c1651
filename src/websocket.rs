// SPDX-License-Identifier: Apache-2.0
//
// WebSocket command loop: JSON request frames in, status envelopes out.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::error::Error;
use crate::input::discover::{self, DeviceKind};
use crate::server::{get_screen, AppState};

/// Session bodies are small command frames; anything larger is a client
/// bug.
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

pub fn upgrade(upgrade: WebSocketUpgrade, app: AppState) -> Response {
    upgrade
        .max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| command_loop(socket, app))
}

/// Frames are handled strictly in order; each reply is written before the
/// next frame is read.
async fn command_loop(mut socket: WebSocket, app: AppState) {
    info!("websocket session started");

    while let Some(frame) = socket.recv().await {
        let reply = match frame {
            Ok(Message::Text(text)) => interpret_message(&app, text.as_str()).await,
            Ok(Message::Binary(_)) => Some(error_envelope(
                "unacceptable data type sent, only text expected",
            )),
            Ok(Message::Close(_)) => break,
            Ok(_) => None,
            Err(err) => {
                debug!("websocket read failed: {err}");
                break;
            }
        };

        if let Some(reply) = reply {
            if socket.send(Message::Text(reply.into())).await.is_err() {
                break;
            }
        }
    }

    info!("websocket session closed");
}

/// Dispatches one command frame. `None` means no reply is owed (the
/// reserved `stream` command and control frames).
pub(crate) async fn interpret_message(app: &AppState, raw: &str) -> Option<String> {
    let root: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => return Some(error_envelope(&err.to_string())),
    };
    let Some(kind) = root.get("type").and_then(Value::as_str) else {
        return Some(error_envelope("invalid type"));
    };

    match kind.to_lowercase().as_str() {
        "button" => Some(button_command(app, &root).await),
        "touch" => Some(touch_command(app, &root).await),
        "key" => Some(key_command(app, &root).await),
        "text" => Some(text_command(app, &root).await),
        "swipe" => Some(swipe_command(app, &root).await),
        "screens" => Some(screens_command(app).await),
        "stream" => None, // reserved
        _ => Some(unknown_type_envelope(raw)),
    }
}

async fn button_command(app: &AppState, root: &Value) -> String {
    let Some(value) = int_field(root, "value") else {
        return error_envelope("event or value not found");
    };
    let event = match resolve_event(app, root, DeviceKind::Touchscreen) {
        Ok(event) => event,
        Err(message) => return error_envelope(&message),
    };
    match app.input.button(value as i32, event).await {
        Ok(()) => ok_envelope(),
        Err(Error::BadRequest(message)) => error_envelope(&message),
        Err(err) => {
            error!("websocket button failed: {err}");
            error_envelope("unable to perform button op")
        }
    }
}

async fn touch_command(app: &AppState, root: &Value) -> String {
    let (Some(x), Some(y), Some(duration)) = (
        int_field(root, "x"),
        int_field(root, "y"),
        int_field(root, "duration"),
    ) else {
        return error_envelope("x, y or duration is not found");
    };
    let event = match resolve_event(app, root, DeviceKind::Touchscreen) {
        Ok(event) => event,
        Err(message) => return error_envelope(&message),
    };
    match app.input.touch(x as i32, y as i32, duration as i32, event).await {
        Ok(()) => ok_envelope(),
        Err(Error::BadRequest(message)) => error_envelope(&message),
        Err(err) => {
            error!("websocket touch failed: {err}");
            error_envelope("unable to perform touch op")
        }
    }
}

async fn key_command(app: &AppState, root: &Value) -> String {
    let Some(key) = int_field(root, "key") else {
        return error_envelope("event or value is not found");
    };
    let event = match resolve_event(app, root, DeviceKind::Keyboard) {
        Ok(event) => event,
        Err(message) => return error_envelope(&message),
    };
    match app.input.key(key as u16, event).await {
        Ok(()) => ok_envelope(),
        Err(Error::BadRequest(message)) => error_envelope(&message),
        Err(err) => {
            error!("websocket key failed: {err}");
            error_envelope("unable to perform key event")
        }
    }
}

async fn text_command(app: &AppState, root: &Value) -> String {
    let Some(entries) = root.get("text").and_then(Value::as_array) else {
        return error_envelope("value is not found");
    };
    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.as_i64() {
            Some(key) => keys.push(key as u16),
            None => return error_envelope("value is not found"),
        }
    }
    let event = match resolve_event(app, root, DeviceKind::Keyboard) {
        Ok(event) => event,
        Err(message) => return error_envelope(&message),
    };
    match app.input.text(&keys, event).await {
        Ok(()) => ok_envelope(),
        Err(Error::BadRequest(message)) => error_envelope(&message),
        Err(err) => {
            error!("websocket text failed: {err}");
            error_envelope("unable to perform text op")
        }
    }
}

async fn swipe_command(app: &AppState, root: &Value) -> String {
    let (Some(x), Some(y), Some(x2), Some(y2), Some(velocity)) = (
        int_field(root, "x"),
        int_field(root, "y"),
        int_field(root, "x2"),
        int_field(root, "y2"),
        int_field(root, "velocity"),
    ) else {
        return error_envelope("x, y, x2, y2, duration or velocity is not found");
    };
    let event = match resolve_event(app, root, DeviceKind::Mouse) {
        Ok(event) => event,
        Err(message) => return error_envelope(&message),
    };
    match app
        .input
        .swipe(x as i32, y as i32, x2 as i32, y2 as i32, velocity as i32, event)
        .await
    {
        Ok(()) => ok_envelope(),
        Err(Error::BadRequest(message)) => error_envelope(&message),
        Err(err) => {
            error!("websocket swipe failed: {err}");
            error_envelope("unable to perform swipe op")
        }
    }
}

async fn screens_command(app: &AppState) -> String {
    let Some(screen) = get_screen(app).await else {
        return error_envelope("unable to create screen object");
    };
    match tokio::task::spawn_blocking(move || screen.list_screens()).await {
        Ok(Ok(listing)) => status_envelope(&listing),
        Ok(Err(err)) => {
            error!("websocket screen listing failed: {err}");
            error_envelope("unable to create screen object")
        }
        Err(_) => error_envelope("unable to create screen object"),
    }
}

fn int_field(root: &Value, key: &str) -> Option<i64> {
    root.get(key).and_then(Value::as_i64)
}

fn resolve_event(app: &AppState, root: &Value, kind: DeviceKind) -> Result<i32, String> {
    match int_field(root, "event") {
        Some(event) => Ok(event as i32),
        None => app
            .cfg
            .devices
            .as_deref()
            .and_then(|devices| discover::event_id_for(devices, kind))
            .ok_or_else(|| "event is not found".to_string()),
    }
}

fn ok_envelope() -> String {
    json!({ "status": "OK" }).to_string()
}

fn status_envelope(data: &str) -> String {
    json!({ "status": data }).to_string()
}

fn error_envelope(message: &str) -> String {
    json!({ "status": "error", "message": message }).to_string()
}

/// The offending frame is echoed back verbatim so the client can match the
/// failure to its request.
fn unknown_type_envelope(raw: &str) -> String {
    json!({
        "request": raw,
        "status": "error",
        "message": "unrecognized type in the message sent",
    })
    .to_string()
}

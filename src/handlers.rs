// SPDX-License-Identifier: Apache-2.0
//
// HTTP request handlers: input injection, screen listing and screenshots.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::Stream;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::error::{error_response, Error};
use crate::input::discover::{self, DeviceKind};
use crate::screen::ImageData;
use crate::server::{get_screen, AppState};
use crate::websocket;

const TEMP_NAME_LEN: usize = 25;

#[derive(Deserialize)]
struct MoveBody {
    x: Option<i64>,
    y: Option<i64>,
    event: Option<i64>,
}

#[derive(Deserialize)]
struct ButtonBody {
    value: Option<i64>,
    event: Option<i64>,
}

#[derive(Deserialize)]
struct TouchBody {
    x: Option<i64>,
    y: Option<i64>,
    duration: Option<i64>,
    event: Option<i64>,
}

#[derive(Deserialize)]
struct SwipeBody {
    x: Option<i64>,
    y: Option<i64>,
    x2: Option<i64>,
    y2: Option<i64>,
    velocity: Option<i64>,
    event: Option<i64>,
}

#[derive(Deserialize)]
struct KeyBody {
    key: Option<i64>,
    event: Option<i64>,
}

#[derive(Deserialize)]
struct TextBody {
    text: Option<Vec<i64>>,
    event: Option<i64>,
}

pub async fn move_pointer(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, Error> {
    require_json(&headers)?;
    let request: MoveBody = parse_body(&body)?;
    let (Some(x), Some(y)) = (request.x, request.y) else {
        return Err(Error::bad_request("x/y axis or event is not found"));
    };
    let event = resolve_event(&app, request.event, DeviceKind::Mouse)?;
    app.input
        .move_to(x as i32, y as i32, event)
        .await
        .map_err(backend_error)?;
    Ok(ok_text())
}

pub async fn button(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, Error> {
    require_json(&headers)?;
    let request: ButtonBody = parse_body(&body)?;
    let Some(value) = request.value else {
        return Err(Error::bad_request("value is not found"));
    };
    let event = resolve_event(&app, request.event, DeviceKind::Touchscreen)?;
    app.input
        .button(value as i32, event)
        .await
        .map_err(backend_error)?;
    Ok(ok_text())
}

pub async fn touch(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, Error> {
    require_json(&headers)?;
    let request: TouchBody = parse_body(&body)?;
    let (Some(x), Some(y), Some(duration)) = (request.x, request.y, request.duration) else {
        return Err(Error::bad_request("x, y or duration is not found"));
    };
    let event = resolve_event(&app, request.event, DeviceKind::Touchscreen)?;
    app.input
        .touch(x as i32, y as i32, duration as i32, event)
        .await
        .map_err(backend_error)?;
    Ok(ok_text())
}

pub async fn swipe(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, Error> {
    require_json(&headers)?;
    let request: SwipeBody = parse_body(&body)?;
    let (Some(x), Some(y), Some(x2), Some(y2), Some(velocity)) =
        (request.x, request.y, request.x2, request.y2, request.velocity)
    else {
        return Err(Error::bad_request(
            "x, y, x2, y2, duration or velocity is not found",
        ));
    };
    let event = resolve_event(&app, request.event, DeviceKind::Mouse)?;
    app.input
        .swipe(x as i32, y as i32, x2 as i32, y2 as i32, velocity as i32, event)
        .await
        .map_err(backend_error)?;
    Ok(ok_text())
}

pub async fn key(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, Error> {
    require_json(&headers)?;
    let request: KeyBody = parse_body(&body)?;
    let Some(key) = request.key else {
        return Err(Error::bad_request("event or value is not found"));
    };
    let event = resolve_event(&app, request.event, DeviceKind::Keyboard)?;
    app.input
        .key(key as u16, event)
        .await
        .map_err(backend_error)?;
    Ok(ok_text())
}

pub async fn text(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, Error> {
    require_json(&headers)?;
    let request: TextBody = parse_body(&body)?;
    let Some(entries) = request.text else {
        return Err(Error::bad_request("value is not found"));
    };
    let event = resolve_event(&app, request.event, DeviceKind::Keyboard)?;
    let keys: Vec<u16> = entries.iter().map(|&key| key as u16).collect();
    app.input.text(&keys, event).await.map_err(backend_error)?;
    Ok(ok_text())
}

pub async fn screen_list(State(app): State<AppState>) -> Result<Response, Error> {
    let screen = get_screen(&app)
        .await
        .ok_or_else(|| Error::internal("unable to create screen object"))?;
    let listing = tokio::task::spawn_blocking(move || screen.list_screens())
        .await
        .map_err(|_| Error::internal("unable to create screen object"))?
        .map_err(|err| {
            error!("screen listing failed: {err}");
            Error::internal("unable to create screen object")
        })?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        listing,
    )
        .into_response())
}

pub async fn screenshot(
    State(app): State<AppState>,
    Path(screen_number): Path<String>,
) -> Result<Response, Error> {
    let screen = get_screen(&app)
        .await
        .ok_or_else(|| Error::internal("unable to create screen object"))?;

    let screen_id: u32 = screen_number
        .trim()
        .parse()
        .map_err(|_| Error::bad_request("invalid screen id"))?;

    let image = tokio::task::spawn_blocking(move || screen.grab(screen_id))
        .await
        .map_err(|_| Error::internal("unable to get screenshot"))?
        .map_err(|err| {
            error!("screen capture failed: {err}");
            Error::internal("unable to get screenshot")
        })?;

    stream_image(image).await
}

/// Spools the encoded image to a randomly named temp file and streams it;
/// the file is removed once the stream is dropped.
async fn stream_image(image: ImageData) -> Result<Response, Error> {
    let name: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_NAME_LEN)
        .map(char::from)
        .collect();
    let path = std::env::temp_dir().join(format!("{name}.{}", image.extension()));

    tokio::fs::write(&path, &image.bytes).await?;
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            let _ = std::fs::remove_file(&path);
            return Err(err.into());
        }
    };

    let content_type = image.content_type();
    let stream = SpooledFile {
        inner: ReaderStream::new(file),
        _cleanup: RemoveOnDrop(path),
    };
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(stream),
    )
        .into_response())
}

struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

struct SpooledFile {
    inner: ReaderStream<tokio::fs::File>,
    _cleanup: RemoveOnDrop,
}

impl Stream for SpooledFile {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub async fn post_options() -> Response {
    options_response("POST")
}

pub async fn get_options() -> Response {
    options_response("GET")
}

fn options_response(allow: &'static str) -> Response {
    (
        StatusCode::OK,
        [
            (header::ALLOW, allow),
            (header::CACHE_CONTROL, "max-age=604800"),
        ],
    )
        .into_response()
}

/// Unrouted requests either upgrade to the WebSocket command loop or 404.
pub async fn fallback(State(app): State<AppState>, request: Request) -> Response {
    if wants_websocket(request.headers()) {
        let (mut parts, _body) = request.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => websocket::upgrade(upgrade, app),
            Err(rejection) => rejection.into_response(),
        };
    }
    Error::NotFound.into_response()
}

pub async fn method_not_allowed() -> Response {
    Error::MethodNotAllowed.into_response()
}

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Response decoration applied to every reply: permissive CORS headers, and
/// the body-limit rejection reshaped into the daemon's 500 error form.
pub async fn decorate(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        response = error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "request body exceeds the permitted size",
        );
    }

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(header::SERVER, HeaderValue::from_static("uiprobe"));
    response
}

fn ok_text() -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "OK").into_response()
}

fn require_json(headers: &HeaderMap) -> Result<(), Error> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().starts_with("application/json"))
        .unwrap_or(false);
    if is_json {
        Ok(())
    } else {
        Err(Error::bad_request("invalid content-type"))
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|err| {
        debug!("request body rejected: {err}");
        Error::BadRequest(err.to_string())
    })
}

/// An explicit `event` field wins; otherwise the discovered device table
/// supplies the first device of the wanted kind.
fn resolve_event(app: &AppState, explicit: Option<i64>, kind: DeviceKind) -> Result<i32, Error> {
    match explicit {
        Some(event) => Ok(event as i32),
        None => app
            .cfg
            .devices
            .as_deref()
            .and_then(|devices| discover::event_id_for(devices, kind))
            .ok_or_else(|| Error::bad_request("event is not found")),
    }
}

fn backend_error(err: Error) -> Error {
    match err {
        Error::BadRequest(_) => err,
        other => {
            error!("input backend failure: {other}");
            Error::internal("Error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::discover::{DeviceKind, DeviceMapping};
    use crate::input::events::codes::*;
    use crate::input::events::tests::read_records;
    use crate::server::testutil::{test_app, test_state};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::fs::File;
    use tower::ServiceExt;

    fn touch_table(event: i32) -> Vec<DeviceMapping> {
        vec![DeviceMapping {
            event_number: event,
            relevance: 1,
            kind: DeviceKind::Touchscreen,
        }]
    }

    fn json_post(uri: &str, body: Value) -> Request {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn button_posts_commit_a_tracked_contact() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("event2")).unwrap();
        let app = test_app(test_state(dir.path(), Some(touch_table(2))));

        let response = app
            .oneshot(json_post("/button", json!({"event": 2, "value": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        let records = read_records(&dir.path().join("event2"));
        assert_eq!(
            records,
            vec![
                (EV_ABS, ABS_MT_TRACKING_ID, 100),
                (EV_KEY, BTN_TOUCH, 1),
                (EV_SYN, SYN_REPORT, 0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resolves_the_touchscreen_from_the_table() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("event7")).unwrap();
        let app = test_app(test_state(dir.path(), Some(touch_table(7))));

        let response = app
            .oneshot(json_post("/touch", json!({"x": 10, "y": 20, "duration": 0})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let records = read_records(&dir.path().join("event7"));
        assert_eq!(records[0], (EV_ABS, ABS_MT_TRACKING_ID, 100));
        assert_eq!(records[3], (EV_KEY, BTN_TOUCH, 1));
        assert_eq!(records.last().unwrap(), &(EV_SYN, SYN_REPORT, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn swipe_emits_the_documented_report_train() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("event0")).unwrap();
        let app = test_app(test_state(dir.path(), None));

        let body = json!({"x": 0, "y": 0, "x2": 100, "y2": 50, "velocity": 5, "event": 0});
        let response = app.oneshot(json_post("/swipe", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let records = read_records(&dir.path().join("event0"));
        let syns = records.iter().filter(|r| r.0 == EV_SYN).count();
        assert_eq!(syns, 7);
        let majors: Vec<i32> = records
            .iter()
            .filter(|r| r.1 == ABS_MT_TOUCH_MAJOR && r.2 != 0)
            .map(|r| r.2)
            .collect();
        assert_eq!(majors, vec![2, 3, 4, 5, 6, 7]);
        let final_x = records.iter().rev().find(|r| r.1 == ABS_MT_POSITION_X);
        let final_y = records.iter().rev().find(|r| r.1 == ABS_MT_POSITION_Y);
        assert_eq!(final_x.unwrap().2, 100);
        assert_eq!(final_y.unwrap().2, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn text_spaces_keys_a_second_apart() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("event1")).unwrap();
        let app = test_app(test_state(dir.path(), None));

        let response = app
            .oneshot(json_post("/text", json!({"event": 1, "text": [30, 48, 38]})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let records = read_records(&dir.path().join("event1"));
        assert_eq!(records.len(), 9);
        assert_eq!(records[0], (EV_KEY, 30, 1));
        assert_eq!(records[3], (EV_KEY, 48, 1));
        assert_eq!(records[6], (EV_KEY, 38, 1));
    }

    #[tokio::test]
    async fn trailing_slash_and_query_string_still_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("event2")).unwrap();

        for uri in ["/button/", "/button?x=1"] {
            let app = test_app(test_state(dir.path(), Some(touch_table(2))));
            let response = app
                .oneshot(json_post(uri, json!({"value": 0})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "uri {uri}");
        }
    }

    #[tokio::test]
    async fn options_lists_the_registered_verbs() {
        let dir = tempfile::tempdir().unwrap();

        let app = test_app(test_state(dir.path(), None));
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/touch")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ALLOW], "POST");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=604800");

        let app = test_app(test_state(dir.path(), None));
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/screen")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[header::ALLOW], "GET");
    }

    #[tokio::test]
    async fn unknown_paths_return_the_error_shape() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_state(dir.path(), None));

        let request = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(body_json(response).await, json!({"message": "url not found"}));
    }

    #[tokio::test]
    async fn wrong_verb_is_method_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_state(dir.path(), None));

        let response = app
            .oneshot(json_post("/screen", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            body_json(response).await,
            json!({"message": "method not allowed"})
        );
    }

    #[tokio::test]
    async fn non_json_content_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_state(dir.path(), None));

        let request = Request::builder()
            .method("POST")
            .uri("/touch")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"message": "invalid content-type"})
        );
    }

    #[tokio::test]
    async fn missing_fields_name_the_expectation() {
        let dir = tempfile::tempdir().unwrap();

        let cases = [
            ("/move", json!({}), "x/y axis or event is not found"),
            ("/button", json!({}), "value is not found"),
            ("/touch", json!({"x": 1}), "x, y or duration is not found"),
            (
                "/swipe",
                json!({"x": 1, "y": 2}),
                "x, y, x2, y2, duration or velocity is not found",
            ),
            ("/key", json!({}), "event or value is not found"),
            ("/text", json!({}), "value is not found"),
        ];
        for (uri, body, message) in cases {
            let app = test_app(test_state(dir.path(), None));
            let response = app.oneshot(json_post(uri, body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {uri}");
            assert_eq!(
                body_json(response).await,
                json!({"message": message}),
                "uri {uri}"
            );
        }
    }

    #[tokio::test]
    async fn unresolvable_event_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_state(dir.path(), None));

        let response = app
            .oneshot(json_post("/key", json!({"key": 30})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"message": "event is not found"})
        );
    }

    #[tokio::test]
    async fn non_integer_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_state(dir.path(), None));

        let response = app
            .oneshot(json_post("/move", json!({"x": "10", "y": 20})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn backend_failures_surface_as_generic_errors() {
        let dir = tempfile::tempdir().unwrap();
        // no event9 node in the scratch directory
        let app = test_app(test_state(dir.path(), None));

        let response = app
            .oneshot(json_post("/move", json!({"x": 1, "y": 2, "event": 9})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"message": "Error"}));
    }

    #[tokio::test]
    async fn screen_requests_fail_without_a_backend() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_state(dir.path(), None));

        let request = Request::builder()
            .uri("/screen")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"message": "unable to create screen object"})
        );

        let app = test_app(test_state(dir.path(), None));
        let request = Request::builder()
            .uri("/screen/42")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn oversize_bodies_map_to_the_internal_error_shape() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_state(dir.path(), None));

        let request = Request::builder()
            .method("POST")
            .uri("/touch")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(vec![b'x'; crate::server::MAX_BODY_BYTES + 1]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Long-lived viewer connections
//!
//! - `/events`: StatusEvents as Server-Sent Events
//! - `/api/ws`: the same events over a WebSocket
//! - `/video_feed`: MJPEG live view (`multipart/x-mixed-replace`)
//!
//! Each connection waits on the publisher or frame buffer without polling
//! and ends when the monitor shuts down.

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::{SinkExt, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;

use crate::event_publisher::SubscriberHandle;
use crate::frame_buffer::{Frame, FrameBuffer, Revision};
use crate::state::AppState;

pub const MJPEG_BOUNDARY: &str = "frame";

// ========================================
// Status events
// ========================================

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let handle = state.monitor.publisher().subscribe().await;
    tracing::debug!(subscriber_id = %handle.id(), "SSE viewer attached");
    Sse::new(subscriber_events(handle)).keep_alive(KeepAlive::default())
}

fn subscriber_events(handle: SubscriberHandle) -> impl Stream<Item = Result<Event, axum::Error>> {
    futures::stream::unfold(handle, |mut handle| async move {
        let event = handle.recv().await?;
        Some((Event::default().json_data(&event), handle))
    })
}

/// GET /api/ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let publisher = state.monitor.publisher().clone();
    let mut handle = publisher.subscribe().await;
    let conn_id = handle.id();

    tracing::info!(connection_id = %conn_id, "WebSocket client connected");

    // Forward published events to the socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = handle.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize status event");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // Incoming messages are only watched for close
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    publisher.unsubscribe(&conn_id).await;
}

// ========================================
// Live video
// ========================================

/// GET /video_feed
pub async fn video_feed(State(state): State<AppState>) -> impl IntoResponse {
    let frames = state.monitor.frames().clone();
    tracing::debug!(waiting = frames.waiting(), "Video viewer attached");

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
            ),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
        ],
        Body::from_stream(mjpeg_parts(frames)),
    )
}

/// One multipart part per frame the viewer has not seen yet
fn mjpeg_parts(frames: Arc<FrameBuffer>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold((frames, Revision::NONE), |(frames, seen)| async move {
        let frame = frames.next_frame(seen).await.ok()?;
        let revision = frame.revision();
        Some((Ok(encode_part(&frame)), (frames, revision)))
    })
}

fn encode_part(frame: &Frame) -> Bytes {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MJPEG_BOUNDARY);
    let mut part = Vec::with_capacity(header.len() + frame.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(frame.data());
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

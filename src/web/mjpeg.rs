use std::convert::Infallible;

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::camera::broadcaster::Subscriber;

pub const BOUNDARY: &str = "frame";
const CONTENT_TYPE_VALUE: &str = "multipart/x-mixed-replace; boundary=frame";

/// One multipart part: boundary line, part header, JPEG payload.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Streams a subscriber's frames until the camera stops or the client leaves.
pub fn stream_response(mut subscriber: Subscriber) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(2);

    tokio::spawn(async move {
        info!("stream viewer attached");
        let mut sent = 0_u64;
        loop {
            let frame = tokio::select! {
                _ = tx.closed() => break,
                frame = subscriber.recv() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            if tx.send(Ok(encode_part(&frame.jpeg))).await.is_err() {
                break;
            }
            sent += 1;
        }
        info!(
            "stream viewer detached after {sent} frames ({} dropped)",
            subscriber.dropped()
        );
    });

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_VALUE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    (
        StatusCode::OK,
        headers,
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

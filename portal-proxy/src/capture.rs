use crate::BoxError;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Bytes of response body kept for the preview.
pub const MAX_RESPONSE_PREVIEW: usize = 256 * 1024;

/// Preview text for bodies that are neither text-like nor valid UTF-8.
pub const BINARY_BODY_MARKER: &str = "[binary response body omitted]";

/// Response body type produced by every gateway branch.
pub type GatewayBody = UnsyncBoxBody<Bytes, BoxError>;

/// What the capture layer saw by the time the body finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Total bytes passed through to the client.
    pub size: u64,
    pub preview: Vec<u8>,
    pub truncated: bool,
    /// The body ended with an error instead of end-of-stream.
    pub errored: bool,
}

type OnComplete = Box<dyn FnOnce(CaptureSummary) + Send>;

/// Pass-through response body that records size and a bounded preview.
///
/// `on_complete` fires exactly once: at end of stream, on a body error, or
/// when the body is dropped early (client went away).
pub struct CaptureBody {
    inner: GatewayBody,
    summary: CaptureSummary,
    on_complete: Option<OnComplete>,
}

impl CaptureBody {
    pub fn new<F>(inner: GatewayBody, on_complete: F) -> Self
    where
        F: FnOnce(CaptureSummary) + Send + 'static,
    {
        Self {
            inner,
            summary: CaptureSummary::default(),
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn observe(&mut self, data: &Bytes) {
        self.summary.size += data.len() as u64;
        let remaining = MAX_RESPONSE_PREVIEW.saturating_sub(self.summary.preview.len());
        if remaining == 0 {
            if !data.is_empty() {
                self.summary.truncated = true;
            }
            return;
        }
        if data.len() > remaining {
            self.summary.preview.extend_from_slice(&data[..remaining]);
            self.summary.truncated = true;
        } else {
            self.summary.preview.extend_from_slice(data);
        }
    }

    fn finish(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(std::mem::take(&mut self.summary));
        }
    }
}

impl Body for CaptureBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.observe(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.summary.errored = true;
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CaptureBody {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Render a captured preview for the request log.
pub fn format_body_preview(content_type: &str, preview: &[u8]) -> String {
    if preview.is_empty() {
        return String::new();
    }
    if is_text_like(content_type) || std::str::from_utf8(preview).is_ok() {
        return String::from_utf8_lossy(preview).into_owned();
    }
    BINARY_BODY_MARKER.to_string()
}

pub fn is_text_like(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    ["text/", "application/json", "application/xml", "application/javascript", "application/x-www-form-urlencoded"]
        .iter()
        .any(|prefix| ct.starts_with(prefix))
        || ct.contains("+json")
        || ct.contains("+xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full, StreamBody};
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    fn boxed(bytes: Vec<u8>) -> GatewayBody {
        Full::new(Bytes::from(bytes)).map_err(|e: Infallible| match e {}).boxed_unsync()
    }

    fn capture(inner: GatewayBody) -> (CaptureBody, Arc<Mutex<Vec<CaptureSummary>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let body = CaptureBody::new(inner, move |s| sink.lock().unwrap().push(s));
        (body, seen)
    }

    #[tokio::test]
    async fn passes_bytes_through_and_records_preview() {
        let (body, seen) = capture(boxed(b"hello".to_vec()));
        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(&out[..], b"hello");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].size, 5);
        assert_eq!(seen[0].preview, b"hello");
        assert!(!seen[0].truncated);
    }

    #[tokio::test]
    async fn truncates_preview_but_not_the_stream() {
        let chunks: Vec<Result<Frame<Bytes>, BoxError>> = vec![
            Ok(Frame::data(Bytes::from(vec![b'a'; MAX_RESPONSE_PREVIEW - 10]))),
            Ok(Frame::data(Bytes::from(vec![b'b'; 20]))),
            Ok(Frame::data(Bytes::from(vec![b'c'; 30]))),
        ];
        let inner = StreamBody::new(futures_util::stream::iter(chunks)).boxed_unsync();
        let (body, seen) = capture(inner);
        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(out.len(), MAX_RESPONSE_PREVIEW + 40);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].size, (MAX_RESPONSE_PREVIEW + 40) as u64);
        assert_eq!(seen[0].preview.len(), MAX_RESPONSE_PREVIEW);
        assert!(seen[0].truncated);
    }

    #[tokio::test]
    async fn completes_once_when_dropped_early() {
        let (body, seen) = capture(boxed(b"never read".to_vec()));
        drop(body);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].size, 0);
    }

    #[tokio::test]
    async fn error_marks_summary() {
        let chunks: Vec<Result<Frame<Bytes>, BoxError>> =
            vec![Ok(Frame::data(Bytes::from_static(b"par"))), Err("backend reset".into())];
        let inner = StreamBody::new(futures_util::stream::iter(chunks)).boxed_unsync();
        let (body, seen) = capture(inner);
        assert!(body.collect().await.is_err());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].errored);
        assert_eq!(seen[0].size, 3);
    }

    #[test]
    fn preview_renders_text_types() {
        assert_eq!(format_body_preview("application/json; charset=utf-8", b"{\"a\":1}"), "{\"a\":1}");
        assert_eq!(format_body_preview("application/problem+json", b"{}"), "{}");
        assert_eq!(format_body_preview("", b""), "");
    }

    #[test]
    fn preview_replaces_invalid_utf8_for_text_types() {
        let out = format_body_preview("text/plain", &[b'o', b'k', 0xff]);
        assert_eq!(out, "ok\u{FFFD}");
    }

    #[test]
    fn preview_accepts_valid_utf8_for_unknown_types() {
        assert_eq!(format_body_preview("application/octet-stream", "héllo".as_bytes()), "héllo");
    }

    #[test]
    fn preview_hides_binary() {
        let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0xff, 0xfe];
        assert_eq!(format_body_preview("image/png", &png), BINARY_BODY_MARKER);
    }

    #[test]
    fn text_like_detection() {
        assert!(is_text_like("TEXT/HTML"));
        assert!(is_text_like("application/x-www-form-urlencoded"));
        assert!(is_text_like("application/atom+xml"));
        assert!(!is_text_like("application/octet-stream"));
        assert!(!is_text_like("image/png"));
    }
}

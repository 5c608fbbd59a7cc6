use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;

use ivb_core::broadcast::{BroadcastEvent, BroadcastPayload, BroadcastPermit};

use crate::{
    server::AppState,
    upload::{read_upload, UploadDir, UploadedJob},
};

const EVENT_BUFFER: usize = 32;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn broadcast_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "inProgress": state.guard.in_progress() }))
}

pub async fn cancel_broadcast(State(state): State<Arc<AppState>>) -> Response {
    if state.cancel_current() {
        tracing::warn!("broadcast cancellation requested");
        Json(serde_json::json!({ "success": true })).into_response()
    } else {
        error_response(StatusCode::CONFLICT, "No broadcast in progress")
    }
}

/// Start a broadcast from a multipart upload and stream its progress as SSE.
pub async fn start_broadcast(State(state): State<Arc<AppState>>, form: Multipart) -> Response {
    let Some(permit) = state.guard.try_acquire() else {
        return error_response(StatusCode::CONFLICT, "Broadcast already in progress");
    };

    let upload_dir = match UploadDir::create(&state.cfg.upload_dir).await {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!(error = %e, "cannot create upload dir");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Cannot store upload");
        }
    };

    let job = match read_upload(form, &upload_dir).await {
        Ok(job) => job,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let cancel = CancellationToken::new();
    *state.current_job() = Some(cancel.clone());

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(run_job(state.clone(), job, upload_dir, permit, cancel, tx));

    let stream = ReceiverStream::new(rx).map(|ev| Ok::<_, Infallible>(to_sse(&ev)));
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Clears the running-job slot when the job task ends, including by panic.
struct CurrentJob(Arc<AppState>);

impl Drop for CurrentJob {
    fn drop(&mut self) {
        *self.0.current_job() = None;
    }
}

/// Owns everything a job needs; uploads and the guard are released before the
/// event channel closes, so a client that saw the stream end can start again.
async fn run_job(
    state: Arc<AppState>,
    job: UploadedJob,
    upload_dir: UploadDir,
    permit: BroadcastPermit,
    cancel: CancellationToken,
    tx: mpsc::Sender<BroadcastEvent>,
) {
    let current = CurrentJob(state.clone());

    if let Err(message) = dispatch_job(&state, job, &cancel, &tx).await {
        tracing::warn!(error = %message, "broadcast not started");
        let _ = tx.send(BroadcastEvent::Error { message }).await;
    }

    drop(current);
    drop(upload_dir);
    drop(permit);
    drop(tx);
}

async fn dispatch_job(
    state: &AppState,
    job: UploadedJob,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<BroadcastEvent>,
) -> Result<(), String> {
    let payload = BroadcastPayload::new(job.media, job.caption);
    payload.validate().map_err(|e| e.to_string())?;

    let test_config = state
        .resolver
        .test_config()
        .await
        .map_err(|e| e.to_string())?;
    if job.test_mode == Some(true) {
        test_config
            .ensure_test_targets()
            .map_err(|e| e.to_string())?;
    }
    let test_mode = job.test_mode.unwrap_or(test_config.test_mode);
    let recipients = state
        .resolver
        .resolve_with(&test_config, test_mode)
        .await
        .map_err(|e| e.to_string())?;

    if recipients.chat_ids.is_empty() {
        return Err("No recipients found".to_string());
    }

    tracing::info!(
        mode = recipients.mode.as_str(),
        recipients = recipients.chat_ids.len(),
        "broadcast requested over http"
    );

    state
        .broadcaster
        .run(&recipients.chat_ids, &payload, cancel, tx)
        .await;
    Ok(())
}

fn to_sse(event: &BroadcastEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => Event::default().data(
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string(),
        ),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use ivb_core::{
        broadcast::{Broadcaster, ChatIdSource, RecipientResolver, RetryPolicy},
        config::Config,
        domain::ChatId,
        messaging::{
            port::BroadcastMessenger,
            types::{MediaFile, SendError},
        },
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl BroadcastMessenger for FakeMessenger {
        async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<(), SendError> {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.clone(), format!("text:{text}")));
            Ok(())
        }

        async fn send_media(
            &self,
            chat_id: &ChatId,
            media: &MediaFile,
            caption: Option<&str>,
        ) -> Result<(), SendError> {
            assert!(media.path.exists(), "upload must exist while sending");
            self.sent.lock().unwrap().push((
                chat_id.clone(),
                format!("media:{}:{}", media.name, caption.unwrap_or_default()),
            ));
            Ok(())
        }

        async fn send_media_album(
            &self,
            chat_id: &ChatId,
            media: &[MediaFile],
            _caption: Option<&str>,
        ) -> Result<(), SendError> {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.clone(), format!("album:{}", media.len())));
            Ok(())
        }
    }

    struct FixedSource(Vec<ChatId>);

    #[async_trait]
    impl ChatIdSource for FixedSource {
        async fn distinct_chat_ids(&self) -> ivb_core::Result<Vec<ChatId>> {
            Ok(self.0.clone())
        }
    }

    const BOUNDARY: &str = "ivb-test-boundary";

    fn test_state(tag: &str, chat_ids: Vec<ChatId>) -> (AppState, Arc<FakeMessenger>, PathBuf) {
        let messenger = Arc::new(FakeMessenger::default());
        let (state, upload_dir) = test_state_with(tag, chat_ids, messenger.clone());
        (state, messenger, upload_dir)
    }

    fn test_state_with(
        tag: &str,
        chat_ids: Vec<ChatId>,
        messenger: Arc<dyn BroadcastMessenger>,
    ) -> (AppState, PathBuf) {
        let upload_dir =
            std::env::temp_dir().join(format!("ivb-http-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&upload_dir);
        std::fs::create_dir_all(&upload_dir).unwrap();

        let cfg = Arc::new(Config {
            telegram_bot_token: None,
            telegram_request_timeout: Duration::from_secs(1),
            invoice_db_path: "/tmp/i.db".into(),
            test_config_path: "/nonexistent/broadcast-test.json".into(),
            promo_dir: "/tmp/p".into(),
            sent_dir: "/tmp/s".into(),
            message_delay: Duration::ZERO,
            max_attempts: 3,
            http_addr: ([127, 0, 0, 1], 0).into(),
            upload_dir: upload_dir.clone(),
            max_upload_bytes: 1024 * 1024,
        });
        let resolver = RecipientResolver::new(
            Arc::new(FixedSource(chat_ids)),
            cfg.test_config_path.clone(),
        );
        let broadcaster = Broadcaster::new(messenger, RetryPolicy::default(), Duration::ZERO);
        (AppState::new(cfg, resolver, broadcaster), upload_dir)
    }

    fn multipart_body(caption: Option<&str>, files: &[(&str, &[u8])]) -> Body {
        let mut body = String::new();
        if let Some(c) = caption {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"caption\"\r\n\r\n{c}\r\n"
            ));
        }
        for (name, bytes) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{}\r\n",
                String::from_utf8_lossy(bytes)
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Body::from(body)
    }

    fn broadcast_request(body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/broadcast")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body)
            .unwrap()
    }

    async fn sse_events(resp: Response) -> Vec<serde_json::Value> {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn streams_events_and_cleans_up_uploads() {
        let (state, messenger, upload_dir) =
            test_state("stream", vec![ChatId::Id(111), ChatId::Id(222)]);
        let guard = state.guard.clone();
        let app = build_router(state);

        let resp = app
            .oneshot(broadcast_request(multipart_body(
                Some("Sale!"),
                &[("promo.jpg", &b"jpeg"[..]), ("notes.pdf", &b"pdf"[..])],
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let events = sse_events(resp).await;
        let types: Vec<_> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["start", "result", "result", "done"]);
        assert_eq!(events[0]["mediaCount"], 1);
        assert_eq!(events[0]["hasCaption"], true);
        assert_eq!(events[1]["chatId"], 111);
        assert_eq!(events[3]["stats"]["successful"], 2);

        assert_eq!(
            messenger.sent.lock().unwrap().clone(),
            vec![
                (ChatId::Id(111), "media:promo.jpg:Sale!".to_string()),
                (ChatId::Id(222), "media:promo.jpg:Sale!".to_string()),
            ]
        );
        assert!(!guard.in_progress());
        assert_eq!(std::fs::read_dir(&upload_dir).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(&upload_dir);
    }

    #[tokio::test]
    async fn caption_can_come_from_message_txt() {
        let (state, messenger, upload_dir) = test_state("msgtxt", vec![ChatId::Id(1)]);
        let app = build_router(state);

        let resp = app
            .oneshot(broadcast_request(multipart_body(
                None,
                &[("message.txt", &b"  Hello there \n"[..])],
            )))
            .await
            .unwrap();
        let events = sse_events(resp).await;
        assert_eq!(events.last().unwrap()["type"], "done");
        assert_eq!(
            messenger.sent.lock().unwrap().clone(),
            vec![(ChatId::Id(1), "text:Hello there".to_string())]
        );

        let _ = std::fs::remove_dir_all(&upload_dir);
    }

    #[tokio::test]
    async fn setup_failures_become_error_events() {
        let (state, _messenger, upload_dir) = test_state("empty", vec![ChatId::Id(1)]);
        let app = build_router(state);
        let resp = app
            .oneshot(broadcast_request(multipart_body(Some("   "), &[])))
            .await
            .unwrap();
        let events = sse_events(resp).await;
        assert_eq!(
            events,
            vec![serde_json::json!({"type": "error", "message": "No media and no caption"})]
        );
        let _ = std::fs::remove_dir_all(&upload_dir);

        let (state, _messenger, upload_dir) = test_state("norecipients", vec![]);
        let app = build_router(state);
        let resp = app
            .oneshot(broadcast_request(multipart_body(Some("hi"), &[])))
            .await
            .unwrap();
        let events = sse_events(resp).await;
        assert_eq!(
            events,
            vec![serde_json::json!({"type": "error", "message": "No recipients found"})]
        );
        let _ = std::fs::remove_dir_all(&upload_dir);
    }

    #[tokio::test]
    async fn overlapping_runs_get_conflict() {
        let (state, _messenger, upload_dir) = test_state("conflict", vec![ChatId::Id(1)]);
        let _held = state.guard.try_acquire().unwrap();
        let app = build_router(state);

        let resp = app
            .clone()
            .oneshot(broadcast_request(multipart_body(Some("hi"), &[])))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/broadcast/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status["inProgress"], true);

        let _ = std::fs::remove_dir_all(&upload_dir);
    }

    #[tokio::test]
    async fn cancel_without_job_is_conflict() {
        let (state, _messenger, upload_dir) = test_state("cancel", vec![]);
        let app = build_router(state);
        let resp = app.oneshot(cancel_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let _ = std::fs::remove_dir_all(&upload_dir);
    }

    /// Holds each send until released, so a job can be observed mid-run.
    #[derive(Default)]
    struct GatedMessenger {
        started: Notify,
        release: Notify,
        sends: AtomicUsize,
    }

    impl GatedMessenger {
        async fn gate(&self) -> Result<(), SendError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[async_trait]
    impl BroadcastMessenger for GatedMessenger {
        async fn send_text(&self, _chat_id: &ChatId, _text: &str) -> Result<(), SendError> {
            self.gate().await
        }

        async fn send_media(
            &self,
            _chat_id: &ChatId,
            _media: &MediaFile,
            _caption: Option<&str>,
        ) -> Result<(), SendError> {
            self.gate().await
        }

        async fn send_media_album(
            &self,
            _chat_id: &ChatId,
            _media: &[MediaFile],
            _caption: Option<&str>,
        ) -> Result<(), SendError> {
            self.gate().await
        }
    }

    struct PanickingMessenger;

    #[async_trait]
    impl BroadcastMessenger for PanickingMessenger {
        async fn send_text(&self, _chat_id: &ChatId, _text: &str) -> Result<(), SendError> {
            panic!("transport exploded");
        }

        async fn send_media(
            &self,
            _chat_id: &ChatId,
            _media: &MediaFile,
            _caption: Option<&str>,
        ) -> Result<(), SendError> {
            panic!("transport exploded");
        }

        async fn send_media_album(
            &self,
            _chat_id: &ChatId,
            _media: &[MediaFile],
            _caption: Option<&str>,
        ) -> Result<(), SendError> {
            panic!("transport exploded");
        }
    }

    fn cancel_request() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/broadcast/cancel")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn cancelling_a_running_job_ends_it_cleanly() {
        let messenger = Arc::new(GatedMessenger::default());
        let (state, upload_dir) = test_state_with(
            "cancel-running",
            vec![ChatId::Id(1), ChatId::Id(2), ChatId::Id(3)],
            messenger.clone(),
        );
        let handle = state.clone();
        let app = build_router(state);

        let resp = app
            .clone()
            .oneshot(broadcast_request(multipart_body(
                Some("Sale!"),
                &[("promo.jpg", &b"jpeg"[..])],
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        messenger.started.notified().await;
        assert!(handle.guard.in_progress());

        let cancelled = app.clone().oneshot(cancel_request()).await.unwrap();
        assert_eq!(cancelled.status(), StatusCode::OK);
        messenger.release.notify_one();

        let events = sse_events(resp).await;
        let types: Vec<_> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["start", "result", "done"]);
        assert_eq!(events[2]["cancelled"], true);
        assert_eq!(events[2]["stats"]["total"], 1);
        assert_eq!(messenger.sends.load(Ordering::SeqCst), 1);

        assert!(!handle.guard.in_progress());
        assert!(handle.current_job().is_none());
        assert_eq!(std::fs::read_dir(&upload_dir).unwrap().count(), 0);

        let again = app.oneshot(cancel_request()).await.unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let _ = std::fs::remove_dir_all(&upload_dir);
    }

    #[tokio::test]
    async fn panicking_job_releases_guard_and_cancel_slot() {
        let (state, upload_dir) =
            test_state_with("panic", vec![ChatId::Id(1)], Arc::new(PanickingMessenger));
        let handle = state.clone();
        let app = build_router(state);

        let resp = app
            .clone()
            .oneshot(broadcast_request(multipart_body(Some("hi"), &[])))
            .await
            .unwrap();
        let events = sse_events(resp).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "start");

        assert!(!handle.guard.in_progress());
        assert!(handle.current_job().is_none());
        assert_eq!(std::fs::read_dir(&upload_dir).unwrap().count(), 0);

        let resp = app.oneshot(cancel_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let _ = std::fs::remove_dir_all(&upload_dir);
    }

    #[tokio::test]
    async fn explicit_test_mode_without_test_ids_is_refused() {
        let (state, messenger, upload_dir) = test_state("testmode", vec![ChatId::Id(1)]);
        let app = build_router(state);

        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"caption\"\r\n\r\nhi\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"testMode\"\r\n\r\ntrue\r\n\
             --{BOUNDARY}--\r\n"
        );
        let resp = app
            .oneshot(broadcast_request(Body::from(body)))
            .await
            .unwrap();
        let events = sse_events(resp).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
        assert!(messenger.sent.lock().unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&upload_dir);
    }
}

use crate::health::{HealthDataType, HEALTH_INFO_VERSION};
use crate::stream::HealthInfoStream;
use crate::transport::{QueryValues, ResponseBody, Transport, TransportError};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const HEALTH_INFO_PATH: &str = "/healthinfo";
/// Upper bound on how much of an error body is read.
const MAX_ERROR_BODY_BYTES: usize = 100 << 10;

/// Structured error returned by the admin API on non-200 responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub bucket_name: String,
    pub key: String,
    pub resource: String,
    pub request_id: String,
    pub host_id: String,
    pub region: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "Error response code {}.", self.code)
        } else {
            f.write_str(&self.message)
        }
    }
}

#[derive(Debug, Error)]
pub enum HealthInfoError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Server(ErrorResponse),
    #[error("{0}")]
    Reported(String),
    #[error("Upgrade the client to support health info version {0}")]
    UnsupportedVersion(String),
    #[error("malformed health info response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("health info response ended before the version envelope")]
    EmptyResponse,
}

/// Client of the cluster admin API.
pub struct AdminClient<T> {
    transport: T,
}

impl<T: Transport> AdminClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Requests the cluster health report.
    ///
    /// On success the returned stream owns the open response body and is
    /// positioned at the first snapshot. Every failure path drops the body.
    /// No retries are made; cancel by dropping the future.
    pub async fn server_health_info(
        &self,
        types: &[HealthDataType],
        deadline: Duration,
    ) -> Result<HealthInfoStream<T::Body>, HealthInfoError> {
        let query = health_info_query(types, deadline);
        debug!(
            deadline = %format_deadline(deadline),
            requested = types.len(),
            "requesting health info"
        );

        let response = self
            .transport
            .execute(Method::GET, HEALTH_INFO_PATH, &query)
            .await?;

        if response.status != StatusCode::OK {
            let err = http_resp_to_error_response(response.status, response.body).await;
            warn!(status = %response.status, code = %err.code, "health info request rejected");
            return Err(HealthInfoError::Server(err));
        }

        let (envelope, stream) = HealthInfoStream::open(response.body).await?;
        if let Some(message) = envelope.error_message() {
            return Err(HealthInfoError::Reported(message.to_string()));
        }
        if !envelope.is_supported() {
            warn!(
                version = %envelope.version,
                supported = HEALTH_INFO_VERSION,
                "server sent an unsupported health info version"
            );
            return Err(HealthInfoError::UnsupportedVersion(envelope.version));
        }

        Ok(stream)
    }
}

/// Every known type is sent explicitly, `true` only for requested ones.
pub fn health_info_query(types: &[HealthDataType], deadline: Duration) -> QueryValues {
    let mut query = QueryValues::new();
    query.insert("deadline".to_string(), format_deadline(deadline));
    for t in HealthDataType::iter() {
        query.insert(t.as_str().to_string(), "false".to_string());
    }
    for t in types {
        query.insert(t.as_str().to_string(), "true".to_string());
    }
    query
}

/// Renders a deadline truncated to whole seconds the way the server parses
/// durations (`0s`, `45s`, `1m30s`, `2h0m0s`).
pub fn format_deadline(deadline: Duration) -> String {
    let secs = deadline.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

async fn http_resp_to_error_response<B: ResponseBody>(
    status: StatusCode,
    mut body: B,
) -> ErrorResponse {
    let status_text = status.to_string();
    let mut data = Vec::new();
    while data.len() < MAX_ERROR_BODY_BYTES {
        match body.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_ERROR_BODY_BYTES - data.len();
                data.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            Ok(None) => break,
            Err(err) => {
                return ErrorResponse {
                    code: status_text,
                    message: format!("Failed to read server response: {err}."),
                    ..ErrorResponse::default()
                };
            }
        }
    }
    drop(body);

    match serde_json::from_slice::<ErrorResponse>(&data) {
        Ok(mut resp) => {
            if resp.code.is_empty() {
                resp.code = status_text;
            }
            resp
        }
        Err(err) => {
            let message = match std::str::from_utf8(&data) {
                Ok(text) => format!("Failed to parse server response ({err}): {text}"),
                Err(_) => format!("Failed to read server response: {err}"),
            };
            ErrorResponse {
                code: status_text,
                message,
                ..ErrorResponse::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthInfo;
    use crate::transport::{ReqwestTransport, TransportResponse};
    use axum::http::StatusCode as AxumStatus;
    use axum::{routing::get, Router};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    struct StubBody {
        chunks: VecDeque<Bytes>,
        closed: Arc<AtomicUsize>,
    }

    impl ResponseBody for StubBody {
        async fn chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
            Ok(self.chunks.pop_front())
        }
    }

    impl Drop for StubBody {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Replies with a canned response and counts closed bodies.
    struct StubTransport {
        status: StatusCode,
        chunks: Vec<&'static str>,
        refuse: bool,
        closed: Arc<AtomicUsize>,
        requests: Mutex<Vec<(Method, String, QueryValues)>>,
    }

    impl StubTransport {
        fn replying(status: StatusCode, chunks: &[&'static str]) -> Self {
            Self {
                status,
                chunks: chunks.to_vec(),
                refuse: false,
                closed: Arc::new(AtomicUsize::new(0)),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }

        fn last_query(&self) -> QueryValues {
            self.requests.lock().unwrap().last().unwrap().2.clone()
        }
    }

    impl Transport for StubTransport {
        type Body = StubBody;

        async fn execute(
            &self,
            method: Method,
            rel_path: &str,
            query: &QueryValues,
        ) -> Result<TransportResponse<StubBody>, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((method, rel_path.to_string(), query.clone()));
            if self.refuse {
                return Err(TransportError::InvalidUrl {
                    url: "http://unreachable".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(TransportResponse {
                status: self.status,
                body: StubBody {
                    chunks: self
                        .chunks
                        .iter()
                        .map(|c| Bytes::from_static(c.as_bytes()))
                        .collect(),
                    closed: self.closed.clone(),
                },
            })
        }
    }

    async fn request(
        client: &AdminClient<StubTransport>,
        types: &[HealthDataType],
    ) -> Result<HealthInfoStream<StubBody>, HealthInfoError> {
        client
            .server_health_info(types, Duration::from_millis(1500))
            .await
    }

    #[test]
    fn query_lists_every_type_explicitly() {
        let requested = [HealthDataType::SysCpu, HealthDataType::PerfNet];
        let query = health_info_query(&requested, Duration::from_secs(90));
        assert_eq!(query.len(), HealthDataType::ALL.len() + 1);
        assert_eq!(query["deadline"], "1m30s");
        for t in HealthDataType::iter() {
            let expected = if requested.contains(&t) { "true" } else { "false" };
            assert_eq!(query[t.as_str()], expected, "type {t}");
        }
    }

    #[test]
    fn empty_request_sends_all_false() {
        let query = health_info_query(&[], Duration::ZERO);
        assert_eq!(query["deadline"], "0s");
        assert!(HealthDataType::iter().all(|t| query[t.as_str()] == "false"));
    }

    #[test]
    fn duplicate_request_is_harmless() {
        let query = health_info_query(
            &[HealthDataType::SysMem, HealthDataType::SysMem],
            Duration::from_secs(1),
        );
        assert_eq!(query.len(), 13);
        assert_eq!(query["sysmem"], "true");
    }

    #[test]
    fn deadline_is_truncated_to_seconds() {
        assert_eq!(format_deadline(Duration::from_millis(1500)), "1s");
        assert_eq!(format_deadline(Duration::from_millis(999)), "0s");
        assert_eq!(format_deadline(Duration::from_secs(59)), "59s");
        assert_eq!(format_deadline(Duration::from_secs(60)), "1m0s");
        assert_eq!(format_deadline(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_deadline(Duration::from_secs(26 * 3600 + 61)), "26h1m1s");
    }

    #[tokio::test]
    async fn sends_one_get_to_healthinfo() {
        let client = AdminClient::new(StubTransport::replying(
            StatusCode::OK,
            &[r#"{"version":"1"}"#],
        ));
        let stream = request(&client, &[HealthDataType::SysOsInfo]).await.unwrap();
        drop(stream);

        let requests = client.transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Method::GET);
        assert_eq!(requests[0].1, "/healthinfo");
        assert_eq!(requests[0].2["deadline"], "1s");
        assert_eq!(requests[0].2["sysosinfo"], "true");
    }

    #[tokio::test]
    async fn transport_failure_is_returned() {
        let mut transport = StubTransport::replying(StatusCode::OK, &[]);
        transport.refuse = true;
        let client = AdminClient::new(transport);

        let err = request(&client, &[]).await.err().unwrap();
        assert!(matches!(err, HealthInfoError::Transport(_)));
        assert_eq!(client.transport.closed(), 0);
    }

    #[tokio::test]
    async fn non_200_decodes_server_error_and_closes_body() {
        let client = AdminClient::new(StubTransport::replying(
            StatusCode::FORBIDDEN,
            &[r#"{"Code":"AccessDenied","Message":"Access Denied.","#, r#""RequestId":"17A"}"#],
        ));
        let err = request(&client, &[]).await.err().unwrap();
        match &err {
            HealthInfoError::Server(resp) => {
                assert_eq!(resp.code, "AccessDenied");
                assert_eq!(resp.request_id, "17A");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.to_string(), "Access Denied.");
        assert_eq!(client.transport.closed(), 1);
    }

    #[tokio::test]
    async fn non_json_error_body_keeps_status_and_text() {
        let client = AdminClient::new(StubTransport::replying(
            StatusCode::BAD_GATEWAY,
            &["upstream unavailable"],
        ));
        let err = request(&client, &[]).await.err().unwrap();
        let HealthInfoError::Server(resp) = err else {
            panic!("expected server error");
        };
        assert_eq!(resp.code, "502 Bad Gateway");
        assert!(resp.message.contains("upstream unavailable"));
        assert_eq!(client.transport.closed(), 1);
    }

    #[tokio::test]
    async fn envelope_error_fails_despite_200() {
        let client = AdminClient::new(StubTransport::replying(
            StatusCode::OK,
            &[r#"{"version":"1","error":"boom"}"#],
        ));
        let err = request(&client, &[]).await.err().unwrap();
        assert!(matches!(err, HealthInfoError::Reported(_)));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(client.transport.closed(), 1);
    }

    #[tokio::test]
    async fn version_zero_is_accepted() {
        let client = AdminClient::new(StubTransport::replying(
            StatusCode::OK,
            &[r#"{"version":"","sys":{}}"#],
        ));
        let stream = request(&client, &[]).await.unwrap();
        assert_eq!(stream.version(), "");
        assert_eq!(client.transport.closed(), 0);

        drop(stream);
        assert_eq!(client.transport.closed(), 1);
    }

    #[tokio::test]
    async fn current_version_is_accepted() {
        let client = AdminClient::new(StubTransport::replying(
            StatusCode::OK,
            &[r#"{"version":"1"}"#, "\n", r#"{"version":"1","sys":{"meminfo":[{"addr":"n1","total":4}]}}"#],
        ));
        let mut stream = request(&client, &HealthDataType::ALL).await.unwrap();
        assert_eq!(stream.version(), HEALTH_INFO_VERSION);
        assert!(client.transport.last_query().values().skip(1).all(|v| v == "true"));

        let first: HealthInfo = stream.next().await.unwrap().unwrap();
        assert!(first.sys.meminfo.is_empty());
        let second: HealthInfo = stream.next().await.unwrap().unwrap();
        assert_eq!(second.sys.meminfo[0].addr, "n1");
        assert_eq!(client.transport.closed(), 0);
    }

    #[tokio::test]
    async fn unknown_version_asks_for_upgrade() {
        let client = AdminClient::new(StubTransport::replying(
            StatusCode::OK,
            &[r#"{"version":"2"}"#],
        ));
        let err = request(&client, &[]).await.err().unwrap();
        assert!(matches!(err, HealthInfoError::UnsupportedVersion(ref v) if v == "2"));
        assert!(err.to_string().contains("2"));
        assert!(err.to_string().contains("Upgrade"));
        assert_eq!(client.transport.closed(), 1);
    }

    #[tokio::test]
    async fn malformed_envelope_closes_body() {
        let client = AdminClient::new(StubTransport::replying(StatusCode::OK, &["<html>"]));
        let err = request(&client, &[]).await.err().unwrap();
        assert!(matches!(err, HealthInfoError::Decode(_)));
        assert_eq!(client.transport.closed(), 1);
    }

    #[tokio::test]
    async fn reqwest_transport_end_to_end() {
        let app = Router::new()
            .route(
                "/minio/admin/v3/healthinfo",
                get(|| async {
                    concat!(
                        r#"{"version":"1","timestamp":"2021-03-04T05:06:07Z"}"#,
                        "\n",
                        r#"{"version":"1","sys":{"cpus":[{"addr":"n1","cpus":[{"cores":4}]}]}}"#,
                        "\n"
                    )
                }),
            )
            .fallback(|| async { (AxumStatus::NOT_FOUND, r#"{"Code":"NotFound"}"#) });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let transport = ReqwestTransport::new(
            &format!("http://{addr}"),
            "/minio/admin/v3",
            "healthdiag-test",
            Duration::from_secs(5),
        )
        .unwrap();
        let client = AdminClient::new(transport);
        let stream = client
            .server_health_info(&[HealthDataType::SysCpu], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(stream.version(), "1");

        let raw = stream.latest_raw().await.unwrap().unwrap();
        let latest: HealthInfo = serde_json::from_str(raw.get()).unwrap();
        let cpus = latest.sys.cpus[0].outcome.collected().unwrap();
        assert_eq!(cpus.cpus[0].cores, 4);

        let wrong_prefix = AdminClient::new(
            ReqwestTransport::new(
                &format!("http://{addr}"),
                "/minio/admin/v2",
                "healthdiag-test",
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        let err = wrong_prefix
            .server_health_info(&[], Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HealthInfoError::Server(ref resp) if resp.code == "NotFound"));
    }
}

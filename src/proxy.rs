use crate::config::ProxyConfig;
use crate::credential::Credential;
use crate::error::{ProxyError, Result};
use crate::logging::RequestLogger;
use crate::translate::streaming::{StreamFrame, StreamTranslator};
use crate::translate::upstream_types::{
    truncate, upstream_error_message, UpstreamChatResponse, UpstreamChunk, UpstreamRequest,
};
use crate::upstream::completions_url;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::pin::Pin;
use std::time::Duration;

/// One parsed `data:` payload from the upstream event stream.
#[derive(Debug)]
pub enum UpstreamEvent {
    Chunk(UpstreamChunk),
    Done,
}

/// Lazy, finite, non-restartable sequence of upstream events for one request.
pub type UpstreamEventStream = Pin<Box<dyn Stream<Item = Result<UpstreamEvent>> + Send>>;

/// Sends translated requests to the upstream with the configured credential.
///
/// Built once at startup; the credential it holds is never replaced.
#[derive(Debug, Clone)]
pub struct UpstreamDispatcher {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    credential: Credential,
    request_timeout: Duration,
}

impl UpstreamDispatcher {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        credential: Credential,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_version: api_version.into(),
            credential,
            request_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig, credential: Credential) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self::new(
            client,
            config.effective_base_url()?,
            config.effective_api_version()?,
            credential,
            config.request_timeout(),
        ))
    }

    pub fn endpoint(&self, deployment: &str) -> String {
        completions_url(&self.base_url, deployment, &self.api_version)
    }

    /// Longest silence tolerated between two upstream stream events.
    pub fn idle_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn send(&self, req: &UpstreamRequest, log: &RequestLogger) -> Result<reqwest::Response> {
        let url = self.endpoint(&req.deployment);
        let streaming = req.is_streaming();

        log.info(
            "proxy",
            format!(
                "POST {} deployment={} streaming={}",
                url, req.deployment, streaming
            ),
        );

        let mut builder = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.credential.bearer())
            .header(CONTENT_TYPE, "application/json")
            .json(&req.body);

        // A whole-request timeout would cut long streams; those get an idle timeout instead.
        builder = if streaming {
            builder.header(ACCEPT, "text/event-stream")
        } else {
            builder.timeout(self.request_timeout)
        };

        let response = tokio::time::timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| ProxyError::Timeout {
                message: format!(
                    "no response from upstream within {}s",
                    self.request_timeout.as_secs()
                ),
            })?
            .map_err(|e| ProxyError::from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = ProxyError::from_upstream_status(status.as_u16(), upstream_error_message(&body));
        if err.is_auth_failure() {
            log.error(
                "proxy",
                format!(
                    "Upstream rejected the credential (status {}); it must be replaced and the proxy restarted",
                    status.as_u16()
                ),
            );
        } else {
            log.warn(
                "proxy",
                format!("Upstream error status={}: {}", status.as_u16(), truncate(&body, 300)),
            );
        }
        Err(err)
    }

    /// Non-streaming call: wait for the full upstream body and parse it.
    pub async fn complete(
        &self,
        req: &UpstreamRequest,
        log: &RequestLogger,
    ) -> Result<UpstreamChatResponse> {
        let response = self.send(req, log).await?;
        read_completion(response, log).await
    }

    /// Streaming call: returns once upstream has accepted the request.
    /// Events are pulled from the connection only as the caller consumes them.
    ///
    /// An upstream that answers with a single JSON body instead of an event
    /// stream is relayed as one chunk followed by the end marker.
    pub async fn stream(
        &self,
        req: &UpstreamRequest,
        log: &RequestLogger,
    ) -> Result<UpstreamEventStream> {
        let response = self.send(req, log).await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));

        if is_json {
            log.warn(
                "proxy",
                "Upstream answered a streaming request with a JSON body; relaying it as one chunk",
            );
            let completion = tokio::time::timeout(self.request_timeout, read_completion(response, log))
                .await
                .map_err(|_| ProxyError::Timeout {
                    message: format!(
                        "upstream body not received within {}s",
                        self.request_timeout.as_secs()
                    ),
                })??;
            let events = vec![
                Ok(UpstreamEvent::Chunk(UpstreamChunk::from(completion))),
                Ok(UpstreamEvent::Done),
            ];
            return Ok(Box::pin(futures::stream::iter(events)));
        }

        Ok(Box::pin(parse_event_stream(response.bytes_stream())))
    }
}

async fn read_completion(
    response: reqwest::Response,
    log: &RequestLogger,
) -> Result<UpstreamChatResponse> {
    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::from_transport(&e))?;

    log.debug("proxy", format!("Upstream response body_len={}", body.len()));

    let parsed = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse upstream response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;
    check_completion(parsed, &body)
}

/// A 2xx body may still report a failure, or carry no completion at all.
fn check_completion(mut resp: UpstreamChatResponse, body: &str) -> Result<UpstreamChatResponse> {
    if let Some(detail) = resp.error.take() {
        return Err(ProxyError::Upstream {
            status: 502,
            message: detail.describe(),
        });
    }
    if resp.choices.is_empty() && resp.text.is_none() {
        return Err(ProxyError::translation(format!(
            "Upstream response has neither choices nor text. Body: {}",
            truncate(body, 300)
        )));
    }
    Ok(resp)
}

/// Parse a raw SSE byte stream into upstream events.
pub fn parse_event_stream<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<UpstreamEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    bytes.eventsource().filter_map(|event| async move {
        match event {
            Ok(event) => parse_event_data(&event.data),
            Err(EventStreamError::Transport(e)) => Some(Err(ProxyError::Transport {
                message: e.to_string(),
            })),
            Err(e) => Some(Err(ProxyError::translation(format!(
                "Malformed upstream event stream: {e}"
            )))),
        }
    })
}

fn parse_event_data(data: &str) -> Option<Result<UpstreamEvent>> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(UpstreamEvent::Done));
    }

    Some(match serde_json::from_str::<UpstreamChunk>(data) {
        Ok(mut chunk) => match chunk.error.take() {
            Some(detail) => Err(ProxyError::Upstream {
                status: 502,
                message: detail.describe(),
            }),
            None => Ok(UpstreamEvent::Chunk(chunk)),
        },
        Err(e) => Err(ProxyError::translation(format!(
            "Unparseable upstream chunk: {}. Data: {}",
            e,
            truncate(data, 200)
        ))),
    })
}

/// Relay upstream events to the client as translated frames.
///
/// Each frame is yielded before the next upstream event is requested. Dropping
/// the returned stream (client went away) drops `events` and with it the
/// upstream connection.
pub fn relay<S>(
    events: S,
    model: &str,
    idle_timeout: Duration,
    log: RequestLogger,
) -> impl Stream<Item = StreamFrame> + Send + 'static
where
    S: Stream<Item = Result<UpstreamEvent>> + Send + 'static,
{
    let mut translator = StreamTranslator::new(model);

    async_stream::stream! {
        let mut guard = RelayGuard::new(log.clone());
        tokio::pin!(events);

        let mut relayed = 0usize;
        let mut failure = None;

        loop {
            let next = match tokio::time::timeout(idle_timeout, events.next()).await {
                Ok(next) => next,
                Err(_) => {
                    failure = Some(ProxyError::Timeout {
                        message: format!("no upstream data for {}s", idle_timeout.as_secs()),
                    });
                    break;
                }
            };

            match next {
                Some(Ok(UpstreamEvent::Chunk(chunk))) => {
                    if let Some(frame) = translator.process_chunk(&chunk) {
                        relayed += 1;
                        yield frame;
                    }
                }
                Some(Ok(UpstreamEvent::Done)) | None => break,
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        match failure {
            Some(err) => {
                log.error("stream", format!("Upstream stream failed after {relayed} chunks: {err}"));
                for frame in translator.fail(&err) {
                    yield frame;
                }
            }
            None => {
                if let Some(frame) = translator.finish() {
                    yield frame;
                }
                log.info("stream", format!("Stream completed: {relayed} chunks relayed"));
            }
        }

        guard.disarm();
    }
}

/// Records a client disconnect when the relay is dropped before it terminates.
struct RelayGuard {
    log: RequestLogger,
    armed: bool,
}

impl RelayGuard {
    fn new(log: RequestLogger) -> Self {
        Self { log, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::info!(request_id = self.log.request_id(), "client disconnected mid-stream");
            self.log.warn(
                "stream",
                "Client disconnected mid-stream; upstream connection released",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::SharedLogger;
    use bytes::Bytes;
    use futures::stream;

    fn collect_texts(frames: &[StreamFrame]) -> String {
        frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Chunk(c) => c.choices.first()?.delta.content.clone(),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_parse_event_stream_across_split_bytes() {
        let raw = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"data: {\"text\":\"Hi\"}\n\nda")),
            Ok(Bytes::from_static(b"ta: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"}}]}\n\n")),
            Ok(Bytes::from_static(b": keep-alive\n\ndata: [DONE]\n\n")),
        ];

        let events: Vec<_> = parse_event_stream(stream::iter(raw)).collect().await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Ok(UpstreamEvent::Chunk(c)) if c.text.as_deref() == Some("Hi")));
        assert!(matches!(&events[1], Ok(UpstreamEvent::Chunk(c)) if c.choices.len() == 1));
        assert!(matches!(events[2], Ok(UpstreamEvent::Done)));
    }

    #[tokio::test]
    async fn test_in_band_error_chunk_becomes_upstream_error() {
        let raw = vec![Ok::<_, std::io::Error>(Bytes::from_static(
            b"data: {\"error\":{\"message\":\"content filtered\",\"code\":\"content_filter\"}}\n\n",
        ))];

        let events: Vec<_> = parse_event_stream(stream::iter(raw)).collect().await;
        assert!(matches!(
            &events[0],
            Err(ProxyError::Upstream { message, .. }) if message.contains("content filtered")
        ));
    }

    #[test]
    fn test_dispatcher_rejects_zero_timeout() {
        let mut config = ProxyConfig::default();
        config.upstream.timeout_secs = 0;
        let err = UpstreamDispatcher::from_config(&config, Credential::new("t").unwrap()).unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
    }

    #[test]
    fn test_completion_with_in_band_error_is_upstream_error() {
        let body = r#"{"error":{"message":"content filtered","code":"content_filter"}}"#;
        let parsed: UpstreamChatResponse = serde_json::from_str(body).unwrap();

        let err = check_completion(parsed, body).unwrap_err();
        assert!(matches!(
            &err,
            ProxyError::Upstream { status: 502, message } if message == "content filtered (code content_filter)"
        ));
    }

    #[test]
    fn test_completion_without_content_is_translation_error() {
        let body = r#"{"id":"chatcmpl-1","usage":{"prompt_tokens":3,"completion_tokens":0,"total_tokens":3}}"#;
        let parsed: UpstreamChatResponse = serde_json::from_str(body).unwrap();

        let err = check_completion(parsed, body).unwrap_err();
        assert!(matches!(err, ProxyError::Translation { .. }));
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn test_completion_with_text_or_choices_passes() {
        let body = r#"{"text":""}"#;
        let parsed: UpstreamChatResponse = serde_json::from_str(body).unwrap();
        assert!(check_completion(parsed, body).is_ok());

        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Hi"}}]}"#;
        let parsed: UpstreamChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(check_completion(parsed, body).unwrap().choices.len(), 1);
    }

    #[tokio::test]
    async fn test_json_completion_relays_as_single_chunk() {
        let completion: UpstreamChatResponse =
            serde_json::from_str(r#"{"text":"Hi there"}"#).unwrap();
        let events = stream::iter(vec![
            Ok(UpstreamEvent::Chunk(UpstreamChunk::from(completion))),
            Ok(UpstreamEvent::Done),
        ]);
        let log = SharedLogger::in_memory().for_request("t0");

        let frames: Vec<_> = relay(events, "m", Duration::from_secs(5), log).collect().await;

        assert_eq!(frames.len(), 2);
        assert_eq!(collect_texts(&frames), "Hi there");
        assert!(frames[1].is_done());
    }

    #[tokio::test]
    async fn test_relay_is_lossless_and_terminates_once() {
        let events = stream::iter(vec![
            Ok(UpstreamEvent::Chunk(UpstreamChunk::text("Hi"))),
            Ok(UpstreamEvent::Chunk(UpstreamChunk::default())),
            Ok(UpstreamEvent::Chunk(UpstreamChunk::text(" there"))),
            Ok(UpstreamEvent::Chunk(UpstreamChunk::text("!"))),
            Ok(UpstreamEvent::Done),
            Ok(UpstreamEvent::Chunk(UpstreamChunk::text("ignored"))),
        ]);
        let log = SharedLogger::in_memory().for_request("t1");

        let frames: Vec<_> = relay(events, "gpt-4.1-nano", Duration::from_secs(5), log)
            .collect()
            .await;

        assert_eq!(frames.len(), 4);
        assert_eq!(collect_texts(&frames), "Hi there!");
        assert!(frames.last().unwrap().is_done());
        assert_eq!(frames.iter().filter(|f| f.is_done()).count(), 1);
    }

    #[tokio::test]
    async fn test_relay_closes_on_upstream_eof_without_done() {
        let events = stream::iter(vec![Ok(UpstreamEvent::Chunk(UpstreamChunk::text("a")))]);
        let log = SharedLogger::in_memory().for_request("t2");

        let frames: Vec<_> = relay(events, "m", Duration::from_secs(5), log).collect().await;

        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_done());
    }

    #[tokio::test]
    async fn test_relay_error_path_sends_error_then_done() {
        let events = stream::iter(vec![
            Ok(UpstreamEvent::Chunk(UpstreamChunk::text("partial"))),
            Err(ProxyError::Transport {
                message: "connection reset".to_string(),
            }),
            Ok(UpstreamEvent::Chunk(UpstreamChunk::text("never"))),
        ]);
        let logger = SharedLogger::in_memory();

        let frames: Vec<_> = relay(events, "m", Duration::from_secs(5), logger.for_request("t3"))
            .collect()
            .await;

        assert_eq!(frames.len(), 3);
        assert_eq!(collect_texts(&frames), "partial");
        assert!(matches!(frames[1], StreamFrame::Error(_)));
        assert!(frames[2].is_done());
        assert!(logger
            .recent(10)
            .iter()
            .any(|e| e.message.contains("failed after 1 chunks")));
    }

    #[tokio::test]
    async fn test_relay_idle_timeout_terminates_stream() {
        let events = stream::iter(vec![Ok(UpstreamEvent::Chunk(UpstreamChunk::text("a")))])
            .chain(stream::pending());
        let log = SharedLogger::in_memory().for_request("t4");

        let frames: Vec<_> = relay(events, "m", Duration::from_millis(50), log).collect().await;

        assert_eq!(frames.len(), 3);
        let StreamFrame::Error(ref err) = frames[1] else {
            panic!("Expected error frame");
        };
        assert_eq!(err.error.error_type, "timeout_error");
        assert!(frames[2].is_done());
    }

    #[tokio::test]
    async fn test_dropping_relay_mid_stream_is_logged() {
        let events = stream::iter(vec![
            Ok(UpstreamEvent::Chunk(UpstreamChunk::text("a"))),
            Ok(UpstreamEvent::Chunk(UpstreamChunk::text("b"))),
        ])
        .chain(stream::pending());
        let logger = SharedLogger::in_memory();

        let mut frames = Box::pin(relay(
            events,
            "m",
            Duration::from_secs(60),
            logger.for_request("t5"),
        ));
        assert!(frames.next().await.is_some());
        drop(frames);

        let recent = logger.recent(10);
        assert!(recent
            .iter()
            .any(|e| e.message.contains("Client disconnected") && e.request_id.as_deref() == Some("t5")));
    }
}

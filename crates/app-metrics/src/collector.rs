//! Fan-out collection of per-instance metrics.
//!
//! [`Collector::collect`] sends one request per running instance through the
//! app's primary route, all in flight at once. Each request carries the
//! instance routing header so the router delivers it to that exact instance.
//! Instance failures are recorded on the instance and never abort the batch.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Request};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::config::{CollectorConfig, HttpTransportConfig, NormalizeFailurePolicy};
use crate::descriptor::ApplicationDescriptor;
use crate::error::{CollectError, ConfigError, InstanceError, Result};
use crate::metric::{InstanceMetric, Metrics, sort_by_instance};
use crate::normalizer::Normalizer;
use crate::transport::{HttpTransport, Transport};

/// Routing header pinning a request to one instance, valued `<guid>:<index>`.
pub const INSTANCE_HEADER: &str = "X-CF-APP-INSTANCE";

static INSTANCE_HEADER_NAME: HeaderName = HeaderName::from_static("x-cf-app-instance");

/// Collects metrics from every running instance of one app.
pub struct Collector<'a> {
    app: &'a ApplicationDescriptor,
    normalizer: Arc<dyn Normalizer>,
    transport: Arc<dyn Transport>,
    metrics_path: String,
    on_normalize_error: NormalizeFailurePolicy,
}

impl<'a> Collector<'a> {
    pub fn new(
        app: &'a ApplicationDescriptor,
        normalizer: Arc<dyn Normalizer>,
        config: CollectorConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let transport = match config.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&HttpTransportConfig::default())?),
        };

        Ok(Self {
            app,
            normalizer,
            transport,
            metrics_path: config.metrics_path,
            on_normalize_error: config.on_normalize_error,
        })
    }

    pub fn app(&self) -> &'a ApplicationDescriptor {
        self.app
    }

    /// URL every instance request is sent to, or `None` when the app has no route.
    pub fn target_url(&self) -> Option<String> {
        self.app
            .primary_route()
            .map(|route| format!("http://{}{}", route.hostname(), self.metrics_path))
    }

    /// Collect from every running instance.
    ///
    /// Returns one entry per running instance, sorted by instance index. When
    /// `cancel` fires first, every in-flight request is dropped and the entries
    /// gathered so far come back inside [`CollectError::Cancelled`].
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<Vec<InstanceMetric>> {
        self.run(cancel, None).await
    }

    /// Like [`collect`](Self::collect), but gives up once `deadline` has elapsed.
    pub async fn collect_with_deadline(
        &self,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<Vec<InstanceMetric>> {
        self.run(cancel, Some(deadline)).await
    }

    #[instrument(skip_all, fields(app = %self.app.display_name()))]
    async fn run(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<Vec<InstanceMetric>> {
        let Some(target) = self.target_url() else {
            return Err(CollectError::no_routes(self.app.display_name()));
        };

        let indices: Vec<usize> = self.app.running_indices().collect();
        if indices.len() != self.app.running_instances {
            warn!(
                expected = self.app.running_instances,
                running = indices.len(),
                "Running instance count does not match instance states"
            );
        }
        if indices.is_empty() {
            debug!("No running instances to collect from");
            return Ok(Vec::new());
        }

        let expected = indices.len();
        if cancel.is_cancelled() {
            return Err(CollectError::Cancelled {
                partial: Vec::new(),
                expected,
            });
        }

        let url = match Url::parse(&target) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %target, error = %e, "Invalid metrics URL");
                return Ok(indices
                    .into_iter()
                    .map(|index| {
                        InstanceMetric::failure(index, InstanceError::request(&target, e.to_string()))
                    })
                    .collect());
            }
        };

        debug!(url = %url, instances = expected, "Collecting instance metrics");

        // Every request task watches this token; dropping the guard on any
        // return path cancels whatever is still in flight.
        let token = cancel.child_token();
        let _guard = token.clone().drop_guard();
        let (tx, mut rx) = mpsc::channel(expected);

        for &index in &indices {
            let unit = InstanceUnit {
                index,
                url: url.clone(),
                guid: self.app.guid.clone(),
                transport: Arc::clone(&self.transport),
                normalizer: Arc::clone(&self.normalizer),
                on_normalize_error: self.on_normalize_error,
            };
            let tx = tx.clone();
            let token = token.clone();

            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        trace!(instance = index, "Instance request cancelled");
                    }
                    metric = unit.run() => {
                        let _ = tx.send(metric).await;
                    }
                }
            });
        }
        drop(tx);

        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        let mut results = Vec::with_capacity(expected);
        while results.len() < expected {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(received = results.len(), expected, "Collection cancelled");
                    sort_by_instance(&mut results);
                    return Err(CollectError::Cancelled { partial: results, expected });
                }
                _ = &mut expiry => {
                    debug!(received = results.len(), expected, "Collection deadline exceeded");
                    sort_by_instance(&mut results);
                    return Err(CollectError::DeadlineExceeded {
                        deadline: deadline.unwrap_or_default(),
                        partial: results,
                        expected,
                    });
                }
                received = rx.recv() => match received {
                    Some(metric) => results.push(metric),
                    None => break,
                },
            }
        }

        if results.len() < expected {
            for index in indices {
                if !results.iter().any(|metric| metric.instance() == index) {
                    warn!(instance = index, "Instance task ended without reporting");
                    results.push(InstanceMetric::failure(
                        index,
                        "instance task ended without reporting",
                    ));
                }
            }
        }

        sort_by_instance(&mut results);
        Ok(results)
    }
}

/// One instance's request, run on its own task.
struct InstanceUnit {
    index: usize,
    url: Url,
    guid: String,
    transport: Arc<dyn Transport>,
    normalizer: Arc<dyn Normalizer>,
    on_normalize_error: NormalizeFailurePolicy,
}

impl InstanceUnit {
    async fn run(self) -> InstanceMetric {
        match self.fetch().await {
            Ok(metrics) => InstanceMetric::success(self.index, metrics),
            Err(e) => {
                debug!(instance = self.index, error = %e, "Instance collection failed");
                InstanceMetric::failure(self.index, e)
            }
        }
    }

    async fn fetch(&self) -> std::result::Result<Metrics, InstanceError> {
        let request = self.request()?;
        let response = self.transport.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            debug!(instance = self.index, %status, "Instance answered with a non-success status");
        }

        let body = response.bytes().await.map_err(InstanceError::Body)?;
        match self.normalizer.normalize(&body) {
            Ok(metrics) => Ok(metrics),
            Err(e) if self.on_normalize_error == NormalizeFailurePolicy::RawFallback => {
                debug!(instance = self.index, error = %e, "Keeping unparsed body");
                Ok(Metrics::Raw(body))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn request(&self) -> std::result::Result<Request, InstanceError> {
        let value = HeaderValue::from_str(&format!("{}:{}", self.guid, self.index))
            .map_err(|e| InstanceError::request(self.url.as_str(), e.to_string()))?;

        let mut request = Request::new(Method::GET, self.url.clone());
        request
            .headers_mut()
            .insert(INSTANCE_HEADER_NAME.clone(), value);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use reqwest::Response;

    use super::*;
    use crate::descriptor::{InstanceState, Route};
    use crate::error::TransportError;
    use crate::normalizer::{Expvar, PassThrough};

    #[derive(Clone)]
    enum Reply {
        Body(&'static str),
        Delayed(Duration, &'static str),
        Status(u16, &'static str),
        Fail(&'static str),
        Timeout(Duration),
        Hang,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Answers each instance from a script keyed by the routing header.
    struct ScriptedTransport {
        replies: HashMap<usize, Reply>,
        fallback: Reply,
        seen: Mutex<Vec<(String, String)>>,
        hang_dropped: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn new(fallback: Reply) -> Self {
            Self {
                replies: HashMap::new(),
                fallback,
                seen: Mutex::new(Vec::new()),
                hang_dropped: Arc::new(AtomicBool::new(false)),
            }
        }

        fn reply(mut self, index: usize, reply: Reply) -> Self {
            self.replies.insert(index, reply);
            self
        }

        fn seen(&self) -> Vec<(String, String)> {
            let mut seen = self.seen.lock().unwrap().clone();
            seen.sort();
            seen
        }
    }

    fn response(status: u16, body: &'static str) -> Response {
        let response = axum::http::Response::builder()
            .status(status)
            .body(body)
            .unwrap();
        Response::from(response)
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: Request) -> std::result::Result<Response, TransportError> {
            let header = request
                .headers()
                .get(INSTANCE_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            self.seen
                .lock()
                .unwrap()
                .push((request.url().to_string(), header.clone()));

            let index: usize = header
                .rsplit(':')
                .next()
                .and_then(|index| index.parse().ok())
                .unwrap();
            let reply = self.replies.get(&index).unwrap_or(&self.fallback).clone();

            match reply {
                Reply::Body(body) => Ok(response(200, body)),
                Reply::Delayed(delay, body) => {
                    tokio::time::sleep(delay).await;
                    Ok(response(200, body))
                }
                Reply::Status(status, body) => Ok(response(status, body)),
                Reply::Fail(reason) => Err(TransportError::other(reason)),
                Reply::Timeout(timeout) => {
                    tokio::time::sleep(timeout).await;
                    Err(TransportError::Timeout(timeout))
                }
                Reply::Hang => {
                    let _flag = DropFlag(Arc::clone(&self.hang_dropped));
                    std::future::pending().await
                }
            }
        }
    }

    fn app(states: &[&str]) -> ApplicationDescriptor {
        states.iter().fold(
            ApplicationDescriptor::new("app-guid")
                .with_name("demo")
                .with_route(Route::with_host("demo", "apps.example.com")),
            |app, state| app.with_instance(InstanceState::new(*state)),
        )
    }

    fn collector<'a>(
        app: &'a ApplicationDescriptor,
        transport: &Arc<ScriptedTransport>,
    ) -> Collector<'a> {
        let config = CollectorConfig::default().with_transport(transport.clone());
        Collector::new(app, Arc::new(Expvar::new()), config).unwrap()
    }

    fn instances(batch: &[InstanceMetric]) -> Vec<usize> {
        batch.iter().map(InstanceMetric::instance).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_running_instances_sorted() {
        let app = app(&["RUNNING", "STOPPED", "RUNNING", "running", "CRASHED"]);
        let transport = Arc::new(
            ScriptedTransport::new(Reply::Body(r#"{"a": 1}"#))
                .reply(0, Reply::Delayed(Duration::from_millis(30), r#"{"a": 0}"#))
                .reply(2, Reply::Delayed(Duration::from_millis(10), r#"{"a": 2}"#)),
        );

        let batch = collector(&app, &transport)
            .collect(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(instances(&batch), vec![0, 2, 3]);
        assert!(batch.iter().all(InstanceMetric::is_success));
        assert_eq!(batch[0].metrics().unwrap().get("a").unwrap(), 0);
        assert_eq!(batch[2].metrics().unwrap().get("a").unwrap(), 1);

        let url = "http://demo.apps.example.com/debug/metrics".to_string();
        assert_eq!(
            transport.seen(),
            vec![
                (url.clone(), "app-guid:0".to_string()),
                (url.clone(), "app-guid:2".to_string()),
                (url, "app-guid:3".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_instances_do_not_affect_others() {
        let app = app(&["RUNNING", "RUNNING", "RUNNING"]);
        let transport = Arc::new(
            ScriptedTransport::new(Reply::Body(r#"{"ok": true}"#))
                .reply(0, Reply::Fail("connection refused"))
                .reply(1, Reply::Timeout(Duration::from_secs(5))),
        );

        let batch = collector(&app, &transport)
            .collect(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(instances(&batch), vec![0, 1, 2]);
        assert_eq!(batch[0].error(), Some("connection refused"));
        assert!(batch[0].metrics().is_none());
        assert_eq!(batch[1].error(), Some("request timed out after 5s"));
        assert!(batch[2].is_success());
        assert_eq!(batch[2].error(), None);
    }

    #[tokio::test]
    async fn test_non_success_status_is_still_normalized() {
        let app = app(&["RUNNING"]);
        let transport =
            Arc::new(ScriptedTransport::new(Reply::Status(503, r#"{"draining": true}"#)));

        let batch = collector(&app, &transport)
            .collect(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            batch[0].metrics().unwrap().get("draining").unwrap(),
            &serde_json::Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_normalize_failure_policies() {
        let app = app(&["RUNNING"]);
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("not json")));

        let strict = collector(&app, &transport)
            .collect(&CancellationToken::new())
            .await
            .unwrap();
        assert!(
            strict[0]
                .error()
                .unwrap()
                .starts_with("failed to normalize metrics")
        );

        let config = CollectorConfig::default()
            .with_transport(transport.clone())
            .with_normalize_failure_policy(NormalizeFailurePolicy::RawFallback);
        let lenient = Collector::new(&app, Arc::new(Expvar::new()), config)
            .unwrap()
            .collect(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            lenient[0].metrics().unwrap().as_raw().unwrap().as_ref(),
            b"not json"
        );
    }

    #[tokio::test]
    async fn test_unicode_whitespace_in_exposition_stays_on_instance() {
        let app = app(&["RUNNING"]);
        let transport = Arc::new(ScriptedTransport::new(Reply::Body(
            "# HELP foo\u{a0}bar baz\n# TYPE foo gauge\nfoo 1\n",
        )));
        let config = CollectorConfig::default().with_transport(transport.clone());

        let batch = Collector::new(&app, Arc::new(crate::normalizer::Prometheus::new()), config)
            .unwrap()
            .collect(&CancellationToken::new())
            .await
            .unwrap();

        assert!(batch[0].is_success());
        assert_eq!(batch[0].metrics().unwrap().get("foo").unwrap()["help"], "bar baz");
    }

    #[tokio::test]
    async fn test_pass_through_keeps_body() {
        let app = app(&["RUNNING"]);
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("plain text")));
        let config = CollectorConfig::default().with_transport(transport.clone());

        let batch = Collector::new(&app, Arc::new(PassThrough::new()), config)
            .unwrap()
            .collect(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&batch[0]).unwrap(),
            serde_json::json!({"instance": 0, "error": "", "metrics": {"raw": "plain text"}})
        );
    }

    #[tokio::test]
    async fn test_no_routes_sends_nothing() {
        let app = ApplicationDescriptor::new("app-guid")
            .with_name("lonely")
            .with_instance(InstanceState::running());
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("{}")));

        let err = collector(&app, &transport)
            .collect(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CollectError::NoRoutes { ref app } if app == "lonely"));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_no_running_instances_returns_empty_batch() {
        let app = app(&["STOPPED", "CRASHED"]);
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("{}")));

        let batch = collector(&app, &transport)
            .collect(&CancellationToken::new())
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert!(transport.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_partial_batch_and_drops_requests() {
        let app = app(&["RUNNING", "RUNNING"]);
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("{}")).reply(1, Reply::Hang));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = collector(&app, &transport)
            .collect(&cancel)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            CollectError::Cancelled { partial, expected } => {
                assert_eq!(expected, 2);
                assert_eq!(instances(&partial), vec![0]);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(transport.hang_dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_collect_aborts_requests() {
        let app = app(&["RUNNING"]);
        let transport = Arc::new(ScriptedTransport::new(Reply::Hang));
        let collector = collector(&app, &transport);
        let cancel = CancellationToken::new();

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), collector.collect(&cancel)).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(transport.hang_dropped.load(Ordering::SeqCst));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_batch() {
        let app = app(&["RUNNING", "RUNNING", "RUNNING"]);
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("{}")).reply(0, Reply::Hang));

        let err = collector(&app, &transport)
            .collect_with_deadline(&CancellationToken::new(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        match err {
            CollectError::DeadlineExceeded {
                deadline,
                partial,
                expected,
            } => {
                assert_eq!(deadline, Duration::from_secs(1));
                assert_eq!(expected, 3);
                assert_eq!(instances(&partial), vec![1, 2]);
            }
            other => panic!("expected deadline error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_already_cancelled_token_sends_nothing() {
        let app = app(&["RUNNING"]);
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("{}")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = collector(&app, &transport)
            .collect(&cancel)
            .await
            .unwrap_err();

        assert!(err.partial().is_empty());
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_hostname_fails_every_instance() {
        let app = ApplicationDescriptor::new("app-guid")
            .with_route(Route::bare("bad host"))
            .with_instance(InstanceState::running())
            .with_instance(InstanceState::running());
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("{}")));

        let batch = collector(&app, &transport)
            .collect(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(instances(&batch), vec![0, 1]);
        assert!(batch.iter().all(|metric| {
            metric
                .error()
                .is_some_and(|error| error.starts_with("failed to build request"))
        }));
        assert!(transport.seen().is_empty());
    }

    #[test]
    fn test_target_url_uses_first_route_and_path() {
        let app = ApplicationDescriptor::new("g")
            .with_route(Route::bare("apps.example.com"))
            .with_route(Route::with_host("other", "example.org"));
        let transport = Arc::new(ScriptedTransport::new(Reply::Body("{}")));
        let config = CollectorConfig::default()
            .with_transport(transport)
            .with_metrics_path("debug/vars");

        let collector = Collector::new(&app, Arc::new(Expvar::new()), config).unwrap();
        assert_eq!(
            collector.target_url().as_deref(),
            Some("http://apps.example.com/debug/vars")
        );
    }

    #[test]
    fn test_default_transport_is_built() {
        let app = app(&["RUNNING"]);
        let collector =
            Collector::new(&app, Arc::new(Expvar::new()), CollectorConfig::default()).unwrap();
        assert_eq!(collector.app().guid, "app-guid");
    }
}

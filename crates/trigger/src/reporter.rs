//! Where fork status reports go.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument, warn};

use construct::{ForkReport, ForkStatus, ReportError, StatusReporter};

/// Logs every report as a structured event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatusReporter;

#[async_trait]
impl StatusReporter for TracingStatusReporter {
    async fn report(&self, report: &ForkReport) -> Result<(), ReportError> {
        let refs = report.summary.as_ref().map(|s| s.refs_pushed);
        match report.status {
            ForkStatus::Failed | ForkStatus::TimedOut => warn!(
                trigger = %report.trigger,
                status = %report.status,
                reason = report.reason.as_deref().unwrap_or_default(),
                retryable = report.retryable.unwrap_or(false),
                "fork status"
            ),
            _ => info!(trigger = %report.trigger, status = %report.status, ?refs, "fork status"),
        }
        Ok(())
    }
}

/// PUTs every report as JSON to a fixed response URL.
#[derive(Debug, Clone)]
pub struct HttpStatusReporter {
    client: Client,
    url: String,
}

impl HttpStatusReporter {
    pub fn new(url: impl Into<String>) -> Result<Self, ReportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ReportError::Transport {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl StatusReporter for HttpStatusReporter {
    #[instrument(skip_all, fields(trigger = %report.trigger, status = %report.status))]
    async fn report(&self, report: &ForkReport) -> Result<(), ReportError> {
        let response = self
            .client
            .put(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|e| ReportError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Sends each report to every inner reporter.
///
/// Delivery to later reporters is attempted even if an earlier one fails;
/// the first error is returned.
pub struct FanOutReporter {
    reporters: Vec<Arc<dyn StatusReporter>>,
}

impl FanOutReporter {
    pub fn new(reporters: Vec<Arc<dyn StatusReporter>>) -> Self {
        Self { reporters }
    }
}

#[async_trait]
impl StatusReporter for FanOutReporter {
    async fn report(&self, report: &ForkReport) -> Result<(), ReportError> {
        let mut first_error = None;
        for reporter in &self.reporters {
            if let Err(e) = reporter.report(report).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use construct::LogicalId;

    use super::*;
    use executor::test_http::serve_once;

    fn report() -> ForkReport {
        ForkReport::pending(LogicalId::new("MirrorFork").unwrap()).start()
    }

    #[tokio::test]
    async fn http_reporter_puts_the_report_as_json() {
        let (base, request) = serve_once(200, "").await;
        HttpStatusReporter::new(format!("{base}/status/abc"))
            .unwrap()
            .report(&report())
            .await
            .unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("PUT /status/abc "));
        assert!(request.contains(r#""status":"running""#));
        assert!(request.contains(r#""trigger":"MirrorFork""#));
    }

    #[tokio::test]
    async fn non_success_response_is_rejected() {
        let (base, _) = serve_once(403, "").await;
        let err = HttpStatusReporter::new(base)
            .unwrap()
            .report(&report())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Rejected { status: 403 }));
    }

    #[tokio::test]
    async fn fan_out_reaches_every_reporter_despite_failures() {
        let (base, request) = serve_once(500, "").await;
        let (ok_base, ok_request) = serve_once(200, "").await;
        let reporters: Vec<Arc<dyn StatusReporter>> = vec![
            Arc::new(HttpStatusReporter::new(base).unwrap()) as Arc<dyn StatusReporter>,
            Arc::new(TracingStatusReporter),
            Arc::new(HttpStatusReporter::new(ok_base).unwrap()),
        ];
        let reporter = FanOutReporter::new(reporters);

        let err = reporter.report(&report()).await.unwrap_err();
        assert!(matches!(err, ReportError::Rejected { status: 500 }));
        assert!(request.await.unwrap().starts_with("PUT "));
        assert!(ok_request.await.unwrap().starts_with("PUT "));
    }
}

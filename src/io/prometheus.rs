//! Prometheus metrics HTTP endpoint
//!
//! Exposes scanner metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{
    LatencySummary, Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with device label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    device: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{device=\"{device}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    device: &str,
    latency: &LatencySummary,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += latency.buckets[i];
        let _ = writeln!(output, "{name}_bucket{{device=\"{device}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += latency.buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{device=\"{device}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{device=\"{device}\"}} {}", latency.sum_ms);
    let _ = writeln!(output, "{name}_count{{device=\"{device}\"}} {}", latency.count);
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, device_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_frame_metrics(&mut output, device_id, &summary);
    write_recognizer_metrics(&mut output, device_id, &summary);
    write_session_metrics(&mut output, device_id, &summary);

    output
}

fn write_frame_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scanner_frames_submitted_total",
        "Frames pushed by the camera",
        MetricType::Counter,
        device,
        summary.frames_submitted,
    );
    write_metric(
        output,
        "scanner_frames_superseded_total",
        "Frames replaced by a newer frame before analysis",
        MetricType::Counter,
        device,
        summary.frames_superseded,
    );
    write_metric(
        output,
        "scanner_frames_discarded_total",
        "Frames dropped without analysis (paused, found, or shut down)",
        MetricType::Counter,
        device,
        summary.frames_discarded,
    );
    let _ = writeln!(output, "# HELP scanner_frames_per_sec Frames analyzed per second");
    let _ = writeln!(output, "# TYPE scanner_frames_per_sec gauge");
    let _ = writeln!(
        output,
        "scanner_frames_per_sec{{device=\"{device}\"}} {:.2}",
        summary.frames_per_sec
    );
    write_metric(
        output,
        "scanner_frame_release_failures_total",
        "Frame buffers that could not be released",
        MetricType::Counter,
        device,
        summary.release_failures,
    );
}

fn write_recognizer_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scanner_barcode_calls_total",
        "Barcode recognizer invocations",
        MetricType::Counter,
        device,
        summary.barcode_calls,
    );
    write_histogram(
        output,
        "scanner_barcode_latency_ms",
        "Barcode recognizer latency in milliseconds",
        device,
        &summary.barcode_latency,
    );
    write_metric(
        output,
        "scanner_ocr_calls_total",
        "OCR recognizer invocations",
        MetricType::Counter,
        device,
        summary.ocr_calls,
    );
    write_metric(
        output,
        "scanner_ocr_throttled_total",
        "Frames without a barcode that skipped OCR",
        MetricType::Counter,
        device,
        summary.ocr_throttled,
    );
    write_histogram(
        output,
        "scanner_ocr_latency_ms",
        "OCR recognizer latency in milliseconds",
        device,
        &summary.ocr_latency,
    );
    write_metric(
        output,
        "scanner_ocr_latency_p99_ms",
        "99th percentile OCR latency",
        MetricType::Gauge,
        device,
        summary.ocr_latency.p99_ms,
    );
    write_metric(
        output,
        "scanner_recognizer_failures_total",
        "Recognizer calls that returned an error",
        MetricType::Counter,
        device,
        summary.recognizer_failures,
    );
}

fn write_session_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP scanner_accepted_total Identifiers accepted by source");
    let _ = writeln!(output, "# TYPE scanner_accepted_total counter");
    for (source, val) in [
        ("barcode", summary.accepted_barcode),
        ("ocr", summary.accepted_ocr),
        ("manual", summary.accepted_manual),
    ] {
        let _ = writeln!(
            output,
            "scanner_accepted_total{{device=\"{device}\",source=\"{source}\"}} {val}"
        );
    }
    write_metric(
        output,
        "scanner_late_completions_total",
        "Valid identifiers ignored because the session already had one",
        MetricType::Counter,
        device,
        summary.late_completions,
    );
    write_metric(
        output,
        "scanner_manual_rejected_total",
        "Manual entries rejected as invalid",
        MetricType::Counter,
        device,
        summary.manual_rejected,
    );
    write_metric(
        output,
        "scanner_pipeline_failures_total",
        "Sessions failed after repeated frame release errors",
        MetricType::Counter,
        device,
        summary.pipeline_failures,
    );
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    device_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &device_id);
            let mut response = text_response(StatusCode::OK, body);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    device_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let device_id = Arc::new(device_id);

    info!(port = %port, device = %device_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let device_id = device_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let device_id = device_id.clone();
                                async move { handle_request(req, metrics, device_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::RecognitionSource;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_frame_submitted();
        metrics.record_barcode_call(7);
        metrics.record_ocr_call(150);
        metrics.record_accepted(RecognitionSource::Ocr);

        let output = format_prometheus_metrics(&metrics, "kiosk-1");

        assert!(output.contains("scanner_frames_submitted_total{device=\"kiosk-1\"} 1"));
        assert!(output.contains("scanner_barcode_latency_ms_bucket{device=\"kiosk-1\",le=\"10\"} 1"));
        assert!(output.contains("scanner_ocr_latency_ms_sum{device=\"kiosk-1\"} 150"));
        assert!(output.contains("scanner_accepted_total{device=\"kiosk-1\",source=\"ocr\"} 1"));

        // scrapes do not reset histograms
        let again = format_prometheus_metrics(&metrics, "kiosk-1");
        assert!(again.contains("scanner_ocr_latency_ms_count{device=\"kiosk-1\"} 1"));
    }
}

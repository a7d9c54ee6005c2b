//! HTTP control plane
//!
//! Manual check-in/out, cached status, a fresh read of the registered times,
//! a dump of the attendance elements on the page, health and Prometheus
//! metrics. Uses hyper for the HTTP server.
//!
//! JSON envelope: `{"success":true,"data":..,"message":..}` on success,
//! `{"success":false,"error":..}` otherwise (409 when a check-out is already
//! running, 500 for failures).

use crate::domain::types::{Action, ActionOutcome, RequestOutcome};
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::services::attendance::AttendanceHandle;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

const JSON: &str = "application/json; charset=utf-8";
const PROMETHEUS: &str = "text/plain; version=0.0.4; charset=utf-8";

const ENDPOINTS: [&str; 7] = [
    "POST /check-in",
    "POST /check-out",
    "GET /status",
    "GET /actual-times",
    "GET /debug",
    "GET /health",
    "GET /metrics",
];

/// Everything a request handler needs
#[derive(Clone)]
pub struct ControlContext {
    pub handle: AttendanceHandle,
    pub metrics: Arc<Metrics>,
    pub device_id: Arc<String>,
    pub presence_enabled: bool,
}

/// A routed response before it becomes an HTTP response
#[derive(Debug, PartialEq)]
struct Reply {
    status: StatusCode,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn json(status: StatusCode, value: Value) -> Self {
        Self { status, content_type: JSON, body: value.to_string() }
    }

    fn ok(data: Value, message: &str) -> Self {
        Self::json(StatusCode::OK, json!({ "success": true, "data": data, "message": message }))
    }

    fn err(status: StatusCode, error: &str) -> Self {
        Self::json(status, json!({ "success": false, "error": error }))
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = self.status;
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        response
    }
}

fn write_counter(output: &mut String, name: &str, help: &str, device: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name}{{device=\"{device}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, device: &str) -> String {
    let mut output = String::with_capacity(2048);
    let counters = [
        ("attendance_records_total", "Raw proximity records read", summary.records_total),
        ("attendance_records_matched_total", "Records mentioning the tracked device", summary.records_matched),
        ("attendance_ticks_total", "De-duplicated presence ticks", summary.ticks_emitted),
        ("attendance_source_restarts_total", "Proximity source restarts", summary.source_restarts),
        ("attendance_action_attempts_total", "Action attempts including retries", summary.action_attempts),
        ("attendance_check_in_success_total", "Successful check-ins", summary.check_in_success),
        ("attendance_check_out_success_total", "Successful check-outs", summary.check_out_success),
        ("attendance_already_done_total", "Actions found already registered", summary.already_done),
        ("attendance_action_failed_total", "Actions failed after all retries", summary.action_failed),
        ("attendance_checkout_rejected_total", "Check-outs rejected while one was running", summary.checkout_rejected),
    ];
    for (name, help, val) in counters {
        write_counter(&mut output, name, help, device, val);
    }
    let _ = writeln!(output, "# HELP attendance_uptime_seconds Process uptime");
    let _ = writeln!(output, "# TYPE attendance_uptime_seconds gauge");
    let _ = writeln!(output, "attendance_uptime_seconds{{device=\"{device}\"}} {}", summary.uptime_secs);
    output
}

async fn perform(ctx: &ControlContext, action: Action) -> Reply {
    let result = match action {
        Action::CheckIn => ctx.handle.check_in().await,
        Action::CheckOut => ctx.handle.check_out().await,
    };
    match result {
        Ok(RequestOutcome::Completed(ActionOutcome::Success(times))) => Reply::ok(
            json!({
                "outcome": "success",
                "checkInTime": times.check_in_display(),
                "checkOutTime": times.check_out_display(),
            }),
            &format!("{action} completed"),
        ),
        Ok(RequestOutcome::Completed(ActionOutcome::AlreadyDone)) => {
            Reply::ok(json!({ "outcome": "already_done" }), &format!("{action} was already registered"))
        }
        Ok(RequestOutcome::Completed(ActionOutcome::Failed(reason))) => {
            Reply::err(StatusCode::INTERNAL_SERVER_ERROR, &reason)
        }
        Ok(RequestOutcome::InProgress) => Reply::err(StatusCode::CONFLICT, "check-out already in progress"),
        Err(e) => Reply::err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn route(method: &Method, path: &str, ctx: &ControlContext) -> Reply {
    match (method, path) {
        (&Method::POST, "/check-in") => perform(ctx, Action::CheckIn).await,
        (&Method::POST, "/check-out") => perform(ctx, Action::CheckOut).await,
        (&Method::GET, "/status") => match ctx.handle.today_status().await {
            Ok(status) => Reply::ok(json!(status), "today's status"),
            Err(e) => Reply::err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        (&Method::GET, "/actual-times") => match ctx.handle.actual_times().await {
            Ok(times) => Reply::ok(
                json!({ "checkInTime": times.check_in_display(), "checkOutTime": times.check_out_display() }),
                "read from the attendance site",
            ),
            Err(e) => Reply::err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        (&Method::GET, "/debug") => match ctx.handle.page_elements().await {
            Ok(elements) => Reply::ok(json!({ "elements": elements }), "page structure"),
            Err(e) => Reply::err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        (&Method::GET, "/health") => {
            let work_started = match ctx.handle.today_status().await {
                Ok(status) => status.is_work_started,
                Err(e) => return Reply::err(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()),
            };
            Reply::ok(
                json!({
                    "status": "ok",
                    "uptimeSecs": ctx.metrics.report().uptime_secs,
                    "presenceMonitor": ctx.presence_enabled,
                    "workStarted": work_started,
                }),
                "healthy",
            )
        }
        (&Method::GET, "/metrics") => Reply {
            status: StatusCode::OK,
            content_type: PROMETHEUS,
            body: format_prometheus_metrics(&ctx.metrics.report(), &ctx.device_id),
        },
        _ => Reply::json(
            StatusCode::NOT_FOUND,
            json!({ "success": false, "error": "not found", "endpoints": ENDPOINTS }),
        ),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: ControlContext,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let reply = route(req.method(), req.uri().path(), &ctx).await;
    if reply.status.is_server_error() {
        warn!(method = %req.method(), path = %req.uri().path(), status = %reply.status, "control_request_failed");
    } else {
        info!(method = %req.method(), path = %req.uri().path(), status = %reply.status, "control_request");
    }
    Ok(reply.into_response())
}

/// Start the control HTTP server
pub async fn start_control_server(
    port: u16,
    ctx: ControlContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "control_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "control_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("control_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AttendanceTimes, PageElement};
    use crate::infra::clock::FakeClock;
    use crate::infra::config::Config;
    use crate::io::notify::LogNotifier;
    use crate::services::attendance::AttendanceMachine;
    use crate::services::executor::fake::FakeActions;
    use chrono::NaiveDate;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn context(actions: FakeActions) -> (ControlContext, watch::Sender<bool>) {
        let metrics = Arc::new(Metrics::new());
        let clock = FakeClock::new(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(12, 0, 0).unwrap());
        let (machine, handle) = AttendanceMachine::new(
            &Config::default(),
            Arc::new(actions),
            Arc::new(LogNotifier),
            Arc::new(clock),
            metrics.clone(),
        );
        let (_tick_tx, tick_rx) = mpsc::channel(1);
        let (_seen_tx, seen_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(machine.run(tick_rx, seen_rx, shutdown_rx));
        let ctx = ControlContext {
            handle,
            metrics,
            device_id: Arc::new("60:06:E3:97:04:E5".to_string()),
            presence_enabled: false,
        };
        (ctx, shutdown_tx)
    }

    fn body(reply: &Reply) -> Value {
        serde_json::from_str(&reply.body).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_route() {
        let (ctx, _shutdown) = context(FakeActions::new(vec![]));
        let reply = route(&Method::GET, "/status", &ctx).await;
        assert_eq!(reply.status, StatusCode::OK);
        let json = body(&reply);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["isWorkStarted"], false);
        assert_eq!(json["data"]["lastDetected"], "none");
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_in_route_success() {
        let mut times = AttendanceTimes::default();
        times.set(Action::CheckIn, "08:41:07".to_string());
        let (ctx, _shutdown) = context(FakeActions::new(vec![ActionOutcome::Success(times)]));

        let reply = route(&Method::POST, "/check-in", &ctx).await;
        assert_eq!(reply.status, StatusCode::OK);
        let json = body(&reply);
        assert_eq!(json["data"]["checkInTime"], "08:41:07");
        assert_eq!(json["data"]["checkOutTime"], "unregistered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_action_is_500() {
        let (ctx, _shutdown) = context(FakeActions::new(vec![ActionOutcome::Failed("control not found".into())]));
        let reply = route(&Method::POST, "/check-in", &ctx).await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(&reply), json!({ "success": false, "error": "control not found" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_out_in_progress_is_409() {
        let (ctx, _shutdown) = context(FakeActions::new(vec![]).with_delay(Duration::from_secs(30)));

        let first = {
            let ctx = ctx.clone();
            tokio::spawn(async move { route(&Method::POST, "/check-out", &ctx).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = route(&Method::POST, "/check-out", &ctx).await;
        assert_eq!(second.status, StatusCode::CONFLICT);
        assert_eq!(first.await.unwrap().status, StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actual_times_route() {
        let times = AttendanceTimes { check_in: Some("08:02:44".into()), check_out: None };
        let (ctx, _shutdown) = context(FakeActions::new(vec![]).with_times(times));
        let json = body(&route(&Method::GET, "/actual-times", &ctx).await);
        assert_eq!(json["data"]["checkInTime"], "08:02:44");
        assert_eq!(json["data"]["checkOutTime"], "unregistered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_route_lists_page_elements() {
        let elements = vec![
            PageElement { kind: "control", text: "출근하기".into(), disabled: true, visible: true },
            PageElement { kind: "time", text: "08:41:07".into(), disabled: false, visible: true },
        ];
        let (ctx, _shutdown) = context(FakeActions::new(vec![]).with_elements(elements));

        let reply = route(&Method::GET, "/debug", &ctx).await;
        assert_eq!(reply.status, StatusCode::OK);
        let json = body(&reply);
        assert_eq!(json["data"]["elements"][0]["kind"], "control");
        assert_eq!(json["data"]["elements"][0]["disabled"], true);
        assert_eq!(json["data"]["elements"][1]["text"], "08:41:07");
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_and_not_found() {
        let (ctx, _shutdown) = context(FakeActions::new(vec![]));

        let health = body(&route(&Method::GET, "/health", &ctx).await);
        assert_eq!(health["data"]["status"], "ok");
        assert_eq!(health["data"]["presenceMonitor"], false);

        let missing = route(&Method::GET, "/nope", &ctx).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(body(&missing)["endpoints"].as_array().unwrap().len(), ENDPOINTS.len());

        // Wrong method on a known path
        let wrong = route(&Method::GET, "/check-in", &ctx).await;
        assert_eq!(wrong.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_raw_record(true);
        metrics.record_tick();
        metrics.record_checkout_rejected();

        let output = format_prometheus_metrics(&metrics.report(), "dev");

        assert!(output.contains("attendance_records_total{device=\"dev\"} 1"));
        assert!(output.contains("attendance_ticks_total{device=\"dev\"} 1"));
        assert!(output.contains("attendance_checkout_rejected_total{device=\"dev\"} 1"));
        assert!(output.contains("# TYPE attendance_uptime_seconds gauge"));
    }
}

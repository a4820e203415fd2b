use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let active_sessions = state.sessions.active_count();

    // A history store that cannot be read degrades the service, the
    // gateway itself keeps accepting sessions.
    let (history_status, history_entries) = match state.history.len() {
        Ok(len) => ("ok", Some(len)),
        Err(_) => ("unavailable", None),
    };
    let status = if history_entries.is_some() { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "voice-log-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "active_sessions": active_sessions
        },
        "history": {
            "status": history_status,
            "entries": history_entries,
            "persistent": state.history.is_persistent(),
            "max_entries": config.history.max_entries
        },
        "pipeline": state.pipeline.name(),
        "memory": get_memory_info(),
        "system": get_system_status(active_sessions, state.sessions.max_sessions())
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let sessions = &metrics.sessions;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "sessions": {
            "active": state.sessions.active_count(),
            "opened": sessions.opened,
            "finalized": sessions.finalized,
            "abandoned": sessions.abandoned,
            "refused": sessions.refused,
            "frames_rejected": sessions.frames_rejected,
            "lines_forwarded": sessions.lines_forwarded,
            "bytes_received": sessions.bytes_received
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_sessions": state.get_config().performance.max_concurrent_sessions,
            "max_session_bytes": state.get_config().audio.max_session_bytes
        }
    }))
}

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(active_sessions: usize, max_sessions: usize) -> serde_json::Value {
    let session_usage = if max_sessions > 0 {
        active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": active_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::SessionEvent;
    use actix_web::test::{call_and_read_body_json, init_service, TestRequest};
    use actix_web::App;

    #[test]
    fn test_system_status_thresholds() {
        assert_eq!(get_system_status(0, 10)["status"], "normal");
        assert_eq!(get_system_status(8, 10)["status"], "moderate_load");
        assert_eq!(get_system_status(10, 10)["status"], "high_load");
        assert_eq!(get_system_status(9, 10)["load_warnings"].as_array().map(Vec::len), Some(1));
    }

    #[actix_web::test]
    async fn test_health_reports_history() {
        let state = web::Data::new(AppState::new(AppConfig::default()).unwrap());
        state.history.record("one").unwrap();

        let app = init_service(
            App::new()
                .app_data(state.clone())
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let body: serde_json::Value =
            call_and_read_body_json(&app, TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "voice-log-backend");
        assert_eq!(body["history"]["entries"], 1);
        assert_eq!(body["history"]["persistent"], false);
        assert_eq!(body["metrics"]["active_sessions"], 0);
    }

    #[actix_web::test]
    async fn test_detailed_metrics_include_session_counters() {
        let state = web::Data::new(AppState::new(AppConfig::default()).unwrap());
        state.record_session_event(SessionEvent::Opened);
        state.record_session_event(SessionEvent::Finalized);
        state.record_session_event(SessionEvent::BytesReceived(4096));

        let app = init_service(
            App::new()
                .app_data(state.clone())
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let body: serde_json::Value =
            call_and_read_body_json(&app, TestRequest::get().uri("/metrics").to_request()).await;

        assert_eq!(body["sessions"]["opened"], 1);
        assert_eq!(body["sessions"]["finalized"], 1);
        assert_eq!(body["sessions"]["bytes_received"], 4096);
        assert_eq!(body["sessions"]["abandoned"], 0);
    }
}

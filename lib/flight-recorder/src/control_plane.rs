// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Dump handlers exposed to the control plane.
//!
//! The handlers are plain functions over query parameters so they can be
//! mounted on any transport; [`router`] mounts them on axum at
//! `GET /handler/{name}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dump::DumpOptions;
use crate::recorder::TraceRecorder;
use crate::registry::NativeDumpSource;

pub const DUMP_BINARY_HANDLER: &str = "dump_fr_trace_msgpack";
pub const DUMP_JSON_HANDLER: &str = "dump_fr_trace_json";

const INCLUDE_COLLECTIVES: &str = "includecollectives";
const INCLUDE_STACKTRACES: &str = "includestacktraces";
const ONLY_ACTIVE: &str = "onlyactive";

const CONTENT_TYPE_BINARY: &str = "application/octet-stream";
const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_TEXT: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HandlerResponse {
    fn ok(content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type,
            body,
        }
    }

    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            content_type: CONTENT_TYPE_TEXT,
            body: message.into_bytes(),
        }
    }

    fn not_found(name: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            content_type: CONTENT_TYPE_TEXT,
            body: format!("Unknown handler: {name}").into_bytes(),
        }
    }
}

impl IntoResponse for HandlerResponse {
    fn into_response(self) -> Response {
        (self.status, [(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

/// Apply `params` to the whitelisted boolean `flags`.
///
/// Every whitelisted value is checked, in request order, before unknown
/// keys are rejected. A repeated key keeps its last value.
fn validate_params(
    params: &[(String, String)],
    flags: &mut [(&'static str, bool)],
) -> Result<(), HandlerResponse> {
    let mut consumed = 0;
    for (key, raw) in params {
        let Some((name, value)) = flags.iter_mut().find(|(name, _)| *name == key.as_str()) else {
            continue;
        };
        *value = match raw.as_str() {
            "true" => true,
            "false" => false,
            _ => {
                return Err(HandlerResponse::bad_request(format!(
                    "Invalid value for {name} valid values are true or false"
                )));
            }
        };
        consumed += 1;
    }
    if consumed < params.len() {
        return Err(HandlerResponse::bad_request(
            "Invalid parameters - unexpected param passed in".to_string(),
        ));
    }
    Ok(())
}

/// Binary dump. Defaults: `includecollectives=true`,
/// `includestacktraces=true`, `onlyactive=false`.
pub fn handle_dump_binary(
    recorder: &TraceRecorder,
    source: Option<&dyn NativeDumpSource>,
    params: &[(String, String)],
) -> HandlerResponse {
    let mut flags = [
        (INCLUDE_COLLECTIVES, true),
        (INCLUDE_STACKTRACES, true),
        (ONLY_ACTIVE, false),
    ];
    if let Err(response) = validate_params(params, &mut flags) {
        return response;
    }
    let options = DumpOptions {
        include_collectives: flags[0].1,
        include_stacktraces: flags[1].1,
        only_active: flags[2].1,
    };
    let native = source.and_then(NativeDumpSource::native_dumps);
    HandlerResponse::ok(CONTENT_TYPE_BINARY, recorder.dump(native.as_ref(), options))
}

/// JSON dump. Defaults: `includecollectives=true`, `onlyactive=false`.
pub fn handle_dump_json(
    recorder: &TraceRecorder,
    source: Option<&dyn NativeDumpSource>,
    params: &[(String, String)],
) -> HandlerResponse {
    let mut flags = [(INCLUDE_COLLECTIVES, true), (ONLY_ACTIVE, false)];
    if let Err(response) = validate_params(params, &mut flags) {
        return response;
    }
    let native = source.and_then(NativeDumpSource::native_dumps);
    let json = recorder.dump_json(native.as_ref(), flags[0].1, flags[1].1);
    HandlerResponse::ok(CONTENT_TYPE_JSON, json.into_bytes())
}

/// Run the handler registered under `name`.
pub fn dispatch(
    name: &str,
    recorder: &TraceRecorder,
    source: Option<&dyn NativeDumpSource>,
    params: &[(String, String)],
) -> HandlerResponse {
    match name {
        DUMP_BINARY_HANDLER => handle_dump_binary(recorder, source, params),
        DUMP_JSON_HANDLER => handle_dump_json(recorder, source, params),
        _ => HandlerResponse::not_found(name),
    }
}

#[derive(Clone)]
pub struct ControlState {
    pub recorder: Arc<TraceRecorder>,
    pub native: Option<Arc<dyn NativeDumpSource>>,
}

impl ControlState {
    pub fn new(recorder: Arc<TraceRecorder>) -> Self {
        Self {
            recorder,
            native: None,
        }
    }

    pub fn with_native(mut self, native: Arc<dyn NativeDumpSource>) -> Self {
        self.native = Some(native);
        self
    }
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/handler/{name}", get(handler))
        .with_state(state)
}

async fn handler(
    State(state): State<ControlState>,
    Path(name): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> HandlerResponse {
    tracing::debug!(handler = %name, ?params, "control plane request");
    // Dumps take the recorder lock and may poll device markers.
    let result = tokio::task::spawn_blocking(move || {
        dispatch(&name, &state.recorder, state.native.as_deref(), &params)
    })
    .await;
    match result {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "control plane handler panicked");
            HandlerResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                content_type: CONTENT_TYPE_TEXT,
                body: b"Handler failed".to_vec(),
            }
        }
    }
}

/// Serve [`router`] on `addr` until `cancel_token` fires.
///
/// Returns the bound address (useful with port 0) and the server task.
pub async fn start_control_server(
    state: ControlState,
    addr: SocketAddr,
    cancel_token: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind control server to {}: {}", addr, e);
            return Err(anyhow::anyhow!(
                "Failed to bind control server to {}: {}",
                addr,
                e
            ));
        }
    };
    let actual_address = listener.local_addr()?;
    tracing::info!(address = %actual_address, "flight recorder control server listening");

    let app = router(state);
    let observer = cancel_token.child_token();
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(observer.cancelled_owned())
            .await
        {
            tracing::error!("Control server error: {}", e);
        }
    });
    Ok((actual_address, task))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;
    use crate::dump::NativeDumps;
    use crate::{GroupName, GroupStatus, RecordOp, RecorderConfig};

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn recorder() -> Arc<TraceRecorder> {
        let recorder = Arc::new(TraceRecorder::new(&RecorderConfig::with_capacity(4)));
        let pg_name = GroupName::new("0", "default_pg");
        let status = Arc::new(GroupStatus::new());
        recorder.record(RecordOp::new(0, &pg_name, &status, "nccl:all_reduce"));
        recorder
    }

    struct FixedNative;

    impl NativeDumpSource for FixedNative {
        fn native_dumps(&self) -> Option<NativeDumps> {
            Some(NativeDumps::from([(
                "comm0".to_string(),
                [("nranks".to_string(), "2".to_string())].into(),
            )]))
        }
    }

    #[rstest]
    #[case(&[("onlyactive", "maybe")], "Invalid value for onlyactive valid values are true or false")]
    #[case(&[("bogus", "true")], "Invalid parameters - unexpected param passed in")]
    #[case(&[("includecollectives", "true"), ("bogus", "1")], "Invalid parameters - unexpected param passed in")]
    #[case(&[("includestacktraces", "TRUE")], "Invalid value for includestacktraces valid values are true or false")]
    #[case(&[("onlyactive", "maybe"), ("onlyactive", "true")], "Invalid value for onlyactive valid values are true or false")]
    fn test_binary_rejects(#[case] pairs: &[(&str, &str)], #[case] message: &str) {
        let response = handle_dump_binary(&recorder(), None, &params(pairs));
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.content_type, "text/plain");
        assert_eq!(String::from_utf8(response.body).unwrap(), message);
    }

    #[test]
    fn test_json_checks_every_repeated_value() {
        let recorder = recorder();
        let response = handle_dump_json(
            &recorder,
            None,
            &params(&[("onlyactive", "maybe"), ("onlyactive", "true")]),
        );
        assert_eq!(response.status, StatusCode::BAD_REQUEST);

        let response = handle_dump_json(
            &recorder,
            None,
            &params(&[("includecollectives", "true"), ("includecollectives", "false")]),
        );
        assert_eq!(response.status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(json.get("entries").is_none());
    }

    #[test]
    fn test_json_does_not_accept_stacktraces() {
        let response = handle_dump_json(&recorder(), None, &params(&[("includestacktraces", "true")]));
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_binary_defaults() {
        let recorder = recorder();
        let response = handle_dump_binary(&recorder, None, &[]);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "application/octet-stream");
        assert_eq!(response.body, recorder.dump(None, DumpOptions::default()));
    }

    #[test]
    fn test_json_applies_flags_and_native_state() {
        let response = handle_dump_json(
            &recorder(),
            Some(&FixedNative),
            &params(&[("includecollectives", "false"), ("onlyactive", "true")]),
        );
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "application/json");

        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(json.get("entries").is_none());
        assert_eq!(json["nccl_comm_state"]["comm0"]["nranks"], "2");
    }

    #[tokio::test]
    async fn test_router_dispatch() {
        let app = router(ControlState::new(recorder()).with_native(Arc::new(FixedNative)));

        let response = app
            .clone()
            .oneshot(
                Request::get("/handler/dump_fr_trace_json?onlyactive=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["entries"][0]["profiling_name"], "nccl:all_reduce");

        let response = app
            .clone()
            .oneshot(
                Request::get("/handler/dump_fr_trace_msgpack?onlyactive=maybe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(Request::get("/handler/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let (addr, task) = start_control_server(
            ControlState::new(recorder()),
            "127.0.0.1:0".parse().unwrap(),
            cancel.clone(),
        )
        .await
        .unwrap();
        assert_ne!(addr.port(), 0);

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}

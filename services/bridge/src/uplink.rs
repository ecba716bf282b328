//! C6: Uplink Loop — receives WebPA-style frames, translates them to the
//! internal request form, dispatches through the [`Engine`], translates the
//! response back, and replies.
//!
//! Two transports: `mock` speaks the internal request/response JSON
//! directly over stdin/stdout (one object per line, matching the original's
//! own interface loop); `parodus` carries [`UplinkFrame`]s as newline-JSON
//! over a pair of raw TCP sockets. The real parodus wire format is a
//! binary WRP/msgpack encoding that isn't part of this repository's
//! grounding material, so the TCP transport here uses a JSON framing
//! instead (recorded as a deviation in DESIGN.md).

use crate::engine::Engine;
use bridge_protocol::{
    is_wildcard, MsgType, Op, ParamValue, Request, Response, UplinkFrame, WebPaChild,
    WebPaParamResult, WebPaRequest, WebPaResponse, WebPaValue,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct UplinkConfig {
    pub service_name: String,
    /// `"mock"` or `"parodus"`.
    pub mode: String,
    pub parodus_url: Option<String>,
    pub parodus_client_url: Option<String>,
}

/// Run the uplink loop to completion. Returns once a shutdown signal is
/// observed between polls, or immediately on a connection failure.
pub async fn run(cfg: UplinkConfig, engine: Engine) -> Result<(), UplinkError> {
    match cfg.mode.as_str() {
        "mock" => run_mock(engine).await,
        "parodus" => run_parodus(cfg, engine).await,
        other => Err(UplinkError::Protocol(format!("unknown uplink mode '{}'", other))),
    }
}

// ---------------------------------------------------------------------------
// Mock transport: internal Request/Response JSON, one per line
// ---------------------------------------------------------------------------

async fn run_mock(engine: Engine) -> Result<(), UplinkError> {
    info!("uplink loop starting in mock mode (stdin/stdout)");
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("shutdown signal received, draining mock uplink loop");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) if !text.trim().is_empty() => {
                        let response = handle_mock_line(&engine, &text);
                        let out = serde_json::to_string(&response)
                            .unwrap_or_else(|_| "{\"status\":500}".to_owned());
                        stdout.write_all(out.as_bytes()).await.map_err(|e| UplinkError::Io(e.to_string()))?;
                        stdout.write_all(b"\n").await.map_err(|e| UplinkError::Io(e.to_string()))?;
                        stdout.flush().await.map_err(|e| UplinkError::Io(e.to_string()))?;
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        debug!("stdin closed, exiting mock uplink loop");
                        break;
                    }
                    Err(e) => return Err(UplinkError::Io(e.to_string())),
                }
            }
        }
    }

    engine.close();
    Ok(())
}

fn handle_mock_line(engine: &Engine, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(req) => engine.dispatch(&req),
        Err(e) => {
            warn!(error = %e, "failed to parse request line");
            let mut resp = Response::new(None, bridge_protocol::Status::BadRequest);
            resp.message = Some(format!("invalid request JSON: {}", e));
            resp
        }
    }
}

// ---------------------------------------------------------------------------
// Parodus transport: UplinkFrame carried as newline-JSON over TCP
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "msgType")]
    msg_type: MsgType,
    #[serde(rename = "transactionUuid")]
    transaction_uuid: String,
    source: String,
    dest: String,
    #[serde(rename = "contentType")]
    content_type: String,
    payload: String,
}

impl From<&UplinkFrame> for WireFrame {
    fn from(f: &UplinkFrame) -> Self {
        WireFrame {
            msg_type: f.msg_type,
            transaction_uuid: f.transaction_uuid.clone(),
            source: f.source.clone(),
            dest: f.dest.clone(),
            content_type: f.content_type.clone(),
            payload: String::from_utf8_lossy(&f.payload).into_owned(),
        }
    }
}

impl From<WireFrame> for UplinkFrame {
    fn from(w: WireFrame) -> Self {
        UplinkFrame {
            msg_type: w.msg_type,
            transaction_uuid: w.transaction_uuid,
            source: w.source,
            dest: w.dest,
            content_type: w.content_type,
            payload: w.payload.into_bytes(),
        }
    }
}

async fn run_parodus(cfg: UplinkConfig, engine: Engine) -> Result<(), UplinkError> {
    let send_url = cfg
        .parodus_url
        .clone()
        .unwrap_or_else(|| "tcp://127.0.0.1:6666".to_owned());
    let recv_url = cfg
        .parodus_client_url
        .clone()
        .unwrap_or_else(|| "tcp://127.0.0.1:6668".to_owned());

    info!(send_url = %send_url, recv_url = %recv_url, "uplink loop starting in parodus mode");

    let recv_addr = strip_tcp_scheme(&recv_url)?;
    let stream = TcpStream::connect(recv_addr)
        .await
        .map_err(|e| UplinkError::Connect(format!("connecting to {}: {}", recv_addr, e)))?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("shutdown signal received, draining parodus uplink loop");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) if !text.trim().is_empty() => {
                        let wire: WireFrame = match serde_json::from_str(&text) {
                            Ok(w) => w,
                            Err(e) => {
                                warn!(error = %e, "failed to parse uplink frame");
                                continue;
                            }
                        };
                        let frame: UplinkFrame = wire.into();
                        if let Some(reply) = process_frame(&frame, &engine, &cfg.service_name) {
                            let reply_wire = WireFrame::from(&reply);
                            let out = serde_json::to_string(&reply_wire)
                                .map_err(|e| UplinkError::Serialization(e.to_string()))?;
                            writer.write_all(out.as_bytes()).await.map_err(|e| UplinkError::Io(e.to_string()))?;
                            writer.write_all(b"\n").await.map_err(|e| UplinkError::Io(e.to_string()))?;
                            writer.flush().await.map_err(|e| UplinkError::Io(e.to_string()))?;
                        }
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        debug!("parodus connection closed, exiting uplink loop");
                        break;
                    }
                    Err(e) => return Err(UplinkError::Io(e.to_string())),
                }
            }
        }
    }

    engine.close();
    Ok(())
}

fn strip_tcp_scheme(url: &str) -> Result<&str, UplinkError> {
    url.strip_prefix("tcp://")
        .ok_or_else(|| UplinkError::Connect(format!("expected a tcp:// URL, got '{}'", url)))
}

// ---------------------------------------------------------------------------
// Frame processing (§4.6)
// ---------------------------------------------------------------------------

/// Handle one received frame end to end: parse, translate, dispatch,
/// convert, build the reply. Returns `None` only if the payload can't be
/// parsed as JSON at all (logged, frame dropped).
fn process_frame(frame: &UplinkFrame, engine: &Engine, _service_name: &str) -> Option<UplinkFrame> {
    match frame.msg_type {
        MsgType::Req | MsgType::Retrieve | MsgType::Event => {}
    }

    let webpa: WebPaRequest = match serde_json::from_slice(&frame.payload) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to parse WebPA payload");
            return None;
        }
    };

    let internal_req = translate_webpa_to_internal(&webpa, &frame.transaction_uuid);
    let internal_resp = engine.dispatch(&internal_req);
    let webpa_resp = convert_internal_to_webpa(&internal_resp, &internal_req);

    let payload = serde_json::to_vec(&webpa_resp).unwrap_or_default();
    Some(frame.reply_with(payload))
}

/// WebPA -> internal translation (§4.6). Non-destructive: only ever adds
/// fields derived from `command`, never removes anything already present.
#[must_use]
pub fn translate_webpa_to_internal(root: &WebPaRequest, envelope_txn_id: &str) -> Request {
    let mut req = Request {
        id: root.id.clone().or_else(|| Some(envelope_txn_id.to_owned())),
        ..Default::default()
    };

    match root.command.as_deref() {
        Some("GET") => {
            req.op = Some(Op::Get);
            req.params = root.names.clone();
        }
        Some("GET_ATTRIBUTES") => {
            req.op = Some(Op::GetAttributes);
            req.param = root.names.as_ref().and_then(|n| n.first().cloned());
        }
        Some("SET") => {
            req.op = Some(Op::Set);
            if let Some(p) = root.parameters.as_ref().and_then(|ps| ps.first()) {
                req.param = Some(p.name.clone());
                req.value = p.value.clone();
            }
        }
        Some("SET_ATTRIBUTES") => {
            req.op = Some(Op::SetAttributes);
            if let Some(p) = root.parameters.as_ref().and_then(|ps| ps.first()) {
                req.param = Some(p.name.clone());
                req.attributes = p.attributes.clone();
            }
        }
        Some("ADD_ROW") => {
            req.op = Some(Op::AddRow);
            req.table_name = root.table.clone();
            req.row_data = root.row.clone();
        }
        Some("DELETE_ROW") => {
            req.op = Some(Op::DeleteRow);
            req.row_name = root.row_name.clone();
        }
        Some("REPLACE_ROWS") => {
            req.op = Some(Op::ReplaceRows);
            req.table_name = root.table.clone();
            req.table_data = root.rows.clone();
        }
        Some("SUBSCRIBE") => {
            req.op = Some(Op::Subscribe);
            req.event = root.event.clone();
            req.param = root.event.clone();
        }
        Some("UNSUBSCRIBE") => {
            req.op = Some(Op::Unsubscribe);
            req.event = root.event.clone();
            req.param = root.event.clone();
        }
        _ => {}
    }

    req
}

/// Internal -> WebPA response conversion (§4.6).
#[must_use]
pub fn convert_internal_to_webpa(resp: &Response, original_request: &Request) -> WebPaResponse {
    let wildcard_names: Vec<&String> = original_request
        .params
        .iter()
        .flatten()
        .filter(|n| is_wildcard(n))
        .collect();

    if !wildcard_names.is_empty() {
        let joined = wildcard_names
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let children: Vec<WebPaChild> = resp
            .results
            .iter()
            .flatten()
            .filter_map(|(name, v)| {
                v.as_ref().map(|pv| WebPaChild {
                    name: name.clone(),
                    value: pv.v.clone(),
                    data_type: pv.t,
                })
            })
            .collect();
        let parameter_count = children.len();
        return WebPaResponse {
            status_code: resp.status,
            message: resp.message.clone(),
            parameters: vec![WebPaParamResult {
                name: joined,
                value: WebPaValue::Group(children),
                data_type: 11,
                message: resp.message.clone(),
                parameter_count: Some(parameter_count),
            }],
        };
    }

    let parameters: Vec<WebPaParamResult> = resp
        .results
        .iter()
        .flatten()
        .filter_map(|(name, v)| {
            v.as_ref().map(|pv| WebPaParamResult {
                name: name.clone(),
                value: WebPaValue::Scalar(pv.v.clone()),
                data_type: pv.t,
                message: None,
                parameter_count: None,
            })
        })
        .collect();

    let message = match resp.message.clone() {
        Some(m) => Some(m),
        None if resp.status == 200 || resp.status == 207 => Some("Success".to_owned()),
        None => Some("Failure".to_owned()),
    };

    WebPaResponse {
        status_code: resp.status,
        message,
        parameters,
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum UplinkError {
    Connect(String),
    Io(String),
    Protocol(String),
    Serialization(String),
}

impl std::fmt::Display for UplinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UplinkError::Connect(s) => write!(f, "connection error: {}", s),
            UplinkError::Io(s) => write!(f, "I/O error: {}", s),
            UplinkError::Protocol(s) => write!(f, "protocol error: {}", s),
            UplinkError::Serialization(s) => write!(f, "serialization error: {}", s),
        }
    }
}

impl std::error::Error for UplinkError {}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::WebPaParameter;

    #[test]
    fn translate_get_copies_names_to_params() {
        let webpa = WebPaRequest {
            id: Some("1".into()),
            command: Some("GET".into()),
            names: Some(vec!["Device.WiFi.Radio.1.Enable".into()]),
            ..Default::default()
        };
        let req = translate_webpa_to_internal(&webpa, "txn-1");
        assert_eq!(req.op, Some(Op::Get));
        assert_eq!(req.params, Some(vec!["Device.WiFi.Radio.1.Enable".to_owned()]));
        assert_eq!(req.id, Some("1".to_owned()));
    }

    #[test]
    fn translate_missing_id_falls_back_to_envelope_txn_id() {
        let webpa = WebPaRequest {
            command: Some("GET".into()),
            names: Some(vec!["Device.X".into()]),
            ..Default::default()
        };
        let req = translate_webpa_to_internal(&webpa, "envelope-txn");
        assert_eq!(req.id, Some("envelope-txn".to_owned()));
    }

    #[test]
    fn translate_set_takes_first_parameter() {
        let webpa = WebPaRequest {
            command: Some("SET".into()),
            parameters: Some(vec![WebPaParameter {
                name: "Device.X".into(),
                value: Some("1".into()),
                attributes: None,
            }]),
            ..Default::default()
        };
        let req = translate_webpa_to_internal(&webpa, "txn-1");
        assert_eq!(req.op, Some(Op::Set));
        assert_eq!(req.param, Some("Device.X".to_owned()));
        assert_eq!(req.value, Some("1".to_owned()));
    }

    #[test]
    fn translate_delete_row_takes_row_name() {
        let webpa = WebPaRequest {
            command: Some("DELETE_ROW".into()),
            row_name: Some("Device.Hosts.HostTable.1.".into()),
            ..Default::default()
        };
        let req = translate_webpa_to_internal(&webpa, "txn-1");
        assert_eq!(req.op, Some(Op::DeleteRow));
        assert_eq!(req.row_name, Some("Device.Hosts.HostTable.1.".to_owned()));
    }

    #[test]
    fn convert_flattens_non_wildcard_results() {
        let original = Request {
            params: Some(vec!["Device.X".into()]),
            ..Default::default()
        };
        let mut results = std::collections::HashMap::new();
        results.insert("Device.X".to_owned(), Some(ParamValue { v: "1".into(), t: 1 }));
        let resp = Response {
            status: 200,
            results: Some(results),
            ..Default::default()
        };
        let webpa = convert_internal_to_webpa(&resp, &original);
        assert_eq!(webpa.message, Some("Success".to_owned()));
        assert_eq!(webpa.parameters.len(), 1);
        match &webpa.parameters[0].value {
            WebPaValue::Scalar(v) => assert_eq!(v, "1"),
            _ => panic!("expected scalar"),
        }
    }

    #[test]
    fn convert_groups_wildcard_results() {
        let original = Request {
            params: Some(vec!["Device.WiFi.Radio.".into()]),
            ..Default::default()
        };
        let mut results = std::collections::HashMap::new();
        results.insert(
            "Device.WiFi.Radio.1.Enable".to_owned(),
            Some(ParamValue { v: "true".into(), t: 3 }),
        );
        results.insert(
            "Device.WiFi.Radio.2.Enable".to_owned(),
            Some(ParamValue { v: "false".into(), t: 3 }),
        );
        let resp = Response {
            status: 200,
            results: Some(results),
            ..Default::default()
        };
        let webpa = convert_internal_to_webpa(&resp, &original);
        assert_eq!(webpa.parameters.len(), 1);
        assert_eq!(webpa.parameters[0].data_type, 11);
        match &webpa.parameters[0].value {
            WebPaValue::Group(children) => assert_eq!(children.len(), 2),
            _ => panic!("expected group"),
        }
    }

    #[test]
    fn convert_failure_status_sets_failure_message() {
        let original = Request::default();
        let resp = Response {
            status: 500,
            ..Default::default()
        };
        let webpa = convert_internal_to_webpa(&resp, &original);
        assert_eq!(webpa.message, Some("Failure".to_owned()));
    }

    #[test]
    fn wire_frame_round_trips_through_uplink_frame() {
        let frame = UplinkFrame {
            msg_type: MsgType::Req,
            transaction_uuid: "abc".into(),
            source: "config".into(),
            dest: "device".into(),
            content_type: "application/json".into(),
            payload: b"{\"command\":\"GET\"}".to_vec(),
        };
        let wire = WireFrame::from(&frame);
        let back: UplinkFrame = wire.into();
        assert_eq!(back.transaction_uuid, frame.transaction_uuid);
        assert_eq!(back.payload, frame.payload);
    }
}

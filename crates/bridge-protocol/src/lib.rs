// bridge-protocol: WebPA-style uplink wire types and internal request/
// response/notification types shared between the uplink loop and the
// dispatch engine.
//
// All internal request/response JSON uses the field names fixed by the
// spec (`v`/`t` for cached values, `op` for the operation, etc). The WebPA
// wire form uses a different, frozen vocabulary (`command`, `names`,
// `parameters`, ...) and is translated to/from the internal form by the
// uplink loop (see the `bridge` crate's `uplink` module).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Value type code (§3)
// ---------------------------------------------------------------------------

/// WebPA-compatible value type code. Serializes as its bare integer, not a
/// string tag, since it travels inside `dataType`/`t` fields on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    String = 0,
    Int32 = 1,
    Uint32 = 2,
    Bool = 3,
    Float = 4,
    DateTime = 5,
    Bytes = 6,
    Int64 = 7,
    Uint64 = 8,
    Byte = 9,
    None = 10,
    Table = 11,
}

impl ValueType {
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => ValueType::Int32,
            2 => ValueType::Uint32,
            3 => ValueType::Bool,
            4 => ValueType::Float,
            5 => ValueType::DateTime,
            6 => ValueType::Bytes,
            7 => ValueType::Int64,
            8 => ValueType::Uint64,
            9 => ValueType::Byte,
            10 => ValueType::None,
            11 => ValueType::Table,
            // Unknown bus-native types map to string (§3).
            _ => ValueType::String,
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(d)?;
        Ok(ValueType::from_code(code))
    }
}

// ---------------------------------------------------------------------------
// Status codes (§4.3)
// ---------------------------------------------------------------------------

/// Internal dispatch status, mapped 1:1 to an HTTP-like status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Partial,
    BadRequest,
    NotFound,
    Forbidden,
    Conflict,
    Precondition,
    Unprocessable,
    Timeout,
    Locked,
    TooMany,
    ServerError,
    NotImplemented,
    Unavailable,
}

impl Status {
    #[must_use]
    pub fn http_code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Partial => 207,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::Forbidden => 403,
            Status::Conflict => 409,
            Status::Precondition => 412,
            Status::Unprocessable => 422,
            Status::Timeout => 408,
            Status::Locked => 423,
            Status::TooMany => 429,
            Status::ServerError => 500,
            Status::NotImplemented => 501,
            Status::Unavailable => 503,
        }
    }
}

/// Frozen per-parameter / per-transaction error codes (§7).
pub mod error_codes {
    pub const INPUT_INVALID: &str = "INPUT_INVALID";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const CONFLICT: &str = "CONFLICT";
    pub const PRECONDITION: &str = "PRECONDITION";
    pub const TRANSPORT: &str = "TRANSPORT";
    pub const PARTIAL: &str = "PARTIAL";
    pub const INTERNAL: &str = "INTERNAL";
}

// ---------------------------------------------------------------------------
// Operations (§3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    Get,
    Set,
    GetAttributes,
    SetAttributes,
    AddRow,
    DeleteRow,
    ReplaceRows,
    Subscribe,
    Unsubscribe,
    /// Supplemented per DESIGN.md's resolution of the `test_and_set` open
    /// question: not in the original op list, added because its semantics
    /// are fully specified and free to wire once GET/SET exist.
    TestAndSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub notify: i32,
    pub access: AccessMode,
}

/// One entry of `rowData`/`tableData` row contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowField {
    pub name: String,
    pub value: String,
    #[serde(rename = "dataType")]
    pub data_type: u8,
}

// ---------------------------------------------------------------------------
// Internal request / response (§3)
// ---------------------------------------------------------------------------

/// Internal request form. Fields are `Option` because each `op` only uses a
/// subset; the Protocol Engine validates the subset it needs per op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub op: Option<Op>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "dataType"
    )]
    pub data_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "tableName"
    )]
    pub table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "rowData")]
    pub row_data: Option<Vec<RowField>>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "rowName")]
    pub row_name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "tableData"
    )]
    pub table_data: Option<Vec<Vec<RowField>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Expected prior value for `TEST_AND_SET`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "expectedValue"
    )]
    pub expected_value: Option<String>,
}

/// `{v, t}` pair carried under a result key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub v: String,
    pub t: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<HashMap<String, Option<ParamValue>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "newRowName")]
    pub new_row_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl Response {
    #[must_use]
    pub fn new(id: Option<String>, status: Status) -> Self {
        Response {
            id,
            status: status.http_code(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// WebPA wire form (§4.6, §6)
// ---------------------------------------------------------------------------

/// Uplink frame type, preserved between request and reply (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MsgType {
    Req,
    Retrieve,
    Event,
}

/// Uplink transport envelope. `payload` carries the JSON body as raw bytes
/// so the transport layer never needs to understand its contents.
#[derive(Debug, Clone)]
pub struct UplinkFrame {
    pub msg_type: MsgType,
    pub transaction_uuid: String,
    pub source: String,
    pub dest: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl UplinkFrame {
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Build a reply frame of the same type, with source/dest swapped and
    /// the transaction id echoed (§6).
    #[must_use]
    pub fn reply_with(&self, payload: Vec<u8>) -> UplinkFrame {
        UplinkFrame {
            msg_type: self.msg_type,
            transaction_uuid: self.transaction_uuid.clone(),
            source: self.dest.clone(),
            dest: self.source.clone(),
            content_type: "application/json".to_owned(),
            payload,
        }
    }
}

/// WebPA request form as received on the uplink (§4.6 translation rules).
/// Every field is optional; which are populated depends on `command`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebPaRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<WebPaParameter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// `ADD_ROW`'s new row fields. The wire form overloads the `row` key
    /// between `ADD_ROW` (fields) and `DELETE_ROW` (a row name string); we
    /// split that into two typed fields instead of one `Value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<Vec<RowField>>,
    /// `DELETE_ROW`'s fully-qualified row name.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "rowName")]
    pub row_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<RowField>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPaParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

/// One entry of the WebPA response's `parameters` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPaParamResult {
    pub name: String,
    pub value: WebPaValue,
    #[serde(rename = "dataType")]
    pub data_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "parameterCount")]
    pub parameter_count: Option<usize>,
}

/// A WebPA parameter's `value` is either a scalar string or, for a
/// wildcard-group result, a nested array of child entries (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebPaValue {
    Scalar(String),
    Group(Vec<WebPaChild>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPaChild {
    pub name: String,
    pub value: String,
    #[serde(rename = "dataType")]
    pub data_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPaResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub parameters: Vec<WebPaParamResult>,
}

// ---------------------------------------------------------------------------
// Notifications (§3, §4.5, §6)
// ---------------------------------------------------------------------------

/// A fully-built notification, independent of wire representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ParamChange {
        param_name: String,
        old_value: String,
        new_value: String,
        data_type: u8,
        write_id: Option<String>,
    },
    ConnectedClient {
        mac_id: String,
        status: String,
        interface: String,
        hostname: String,
        ip_address: String,
    },
    TransactionStatus {
        transaction_id: String,
        status: String,
        error_message: Option<String>,
    },
    DeviceStatus {
        status_code: i32,
        reason: String,
        device_id: String,
    },
    FactoryReset {
        status_code: i32,
        reason: String,
        device_id: String,
    },
    FirmwareUpgrade {
        status_code: i32,
        reason: String,
        device_id: String,
    },
}

impl Notification {
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Notification::ParamChange { .. } => 0,
            Notification::ConnectedClient { .. } => 1,
            Notification::TransactionStatus { .. } => 2,
            Notification::DeviceStatus { .. } => 3,
            Notification::FactoryReset { .. } => 4,
            Notification::FirmwareUpgrade { .. } => 5,
        }
    }

    /// Wrap this notification in the wire envelope (§6): `{type, source,
    /// destination, timestamp, data}`.
    #[must_use]
    pub fn into_envelope(
        self,
        source: impl Into<String>,
        destination: impl Into<String>,
        timestamp_ms: u64,
    ) -> NotificationEnvelope {
        let data = match &self {
            Notification::ParamChange {
                param_name,
                old_value,
                new_value,
                data_type,
                write_id,
            } => serde_json::json!({
                "paramName": param_name,
                "oldValue": old_value,
                "newValue": new_value,
                "dataType": data_type,
                "writeID": write_id,
            }),
            Notification::ConnectedClient {
                mac_id,
                status,
                interface,
                hostname,
                ip_address,
            } => serde_json::json!({
                "macId": mac_id,
                "status": status,
                "interface": interface,
                "hostname": hostname,
                "ipAddress": ip_address,
            }),
            Notification::TransactionStatus {
                transaction_id,
                status,
                error_message,
            } => serde_json::json!({
                "transactionId": transaction_id,
                "status": status,
                "errorMessage": error_message,
            }),
            Notification::DeviceStatus {
                status_code,
                reason,
                device_id,
            }
            | Notification::FactoryReset {
                status_code,
                reason,
                device_id,
            }
            | Notification::FirmwareUpgrade {
                status_code,
                reason,
                device_id,
            } => serde_json::json!({
                "statusCode": status_code,
                "reason": reason,
                "deviceId": device_id,
            }),
        };
        NotificationEnvelope {
            kind: self.type_code(),
            source: source.into(),
            destination: destination.into(),
            timestamp: timestamp_ms,
            data,
        }
    }

    /// Inverse of [`Notification::into_envelope`], used by the round-trip
    /// tests. Fails if `data` doesn't match the shape implied by `kind`.
    pub fn from_envelope(env: &NotificationEnvelope) -> Result<Self, NotificationDecodeError> {
        let d = &env.data;
        let get_str = |k: &str| -> Result<String, NotificationDecodeError> {
            d.get(k)
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .ok_or_else(|| NotificationDecodeError::MissingField(k.to_owned()))
        };
        Ok(match env.kind {
            0 => Notification::ParamChange {
                param_name: get_str("paramName")?,
                old_value: get_str("oldValue")?,
                new_value: get_str("newValue")?,
                data_type: d
                    .get("dataType")
                    .and_then(serde_json::Value::as_u64)
                    .ok_or_else(|| NotificationDecodeError::MissingField("dataType".into()))?
                    as u8,
                write_id: d
                    .get("writeID")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
            },
            1 => Notification::ConnectedClient {
                mac_id: get_str("macId")?,
                status: get_str("status")?,
                interface: get_str("interface")?,
                hostname: get_str("hostname")?,
                ip_address: get_str("ipAddress")?,
            },
            2 => Notification::TransactionStatus {
                transaction_id: get_str("transactionId")?,
                status: get_str("status")?,
                error_message: d
                    .get("errorMessage")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
            },
            3 | 4 | 5 => {
                let status_code = d
                    .get("statusCode")
                    .and_then(serde_json::Value::as_i64)
                    .ok_or_else(|| NotificationDecodeError::MissingField("statusCode".into()))?
                    as i32;
                let reason = get_str("reason")?;
                let device_id = get_str("deviceId")?;
                match env.kind {
                    3 => Notification::DeviceStatus {
                        status_code,
                        reason,
                        device_id,
                    },
                    4 => Notification::FactoryReset {
                        status_code,
                        reason,
                        device_id,
                    },
                    _ => Notification::FirmwareUpgrade {
                        status_code,
                        reason,
                        device_id,
                    },
                }
            }
            other => return Err(NotificationDecodeError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "type")]
    pub kind: u8,
    pub source: String,
    pub destination: String,
    pub timestamp: u64,
    pub data: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationDecodeError {
    #[error("missing field `{0}` in notification data")]
    MissingField(String),
    #[error("unknown notification type code {0}")]
    UnknownType(u8),
}

// ---------------------------------------------------------------------------
// Wildcard helpers (§3, §4.2)
// ---------------------------------------------------------------------------

/// True if `name` is a table/subtree wildcard (trailing `.`) or carries an
/// embedded pattern wildcard (`*`) anywhere. Per §4.2, only a trailing `*`
/// or an entirely-absent `*` are meaningful — a mid-string `*` is treated
/// literally by the cache, but the protocol engine still routes any name
/// containing `*` through the wildcard path per §3's definition.
#[must_use]
pub fn is_wildcard(name: &str) -> bool {
    name.ends_with('.') || name.contains('*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_from_code_maps_known_codes() {
        assert_eq!(ValueType::from_code(3).code(), 3);
        assert_eq!(ValueType::from_code(11).code(), 11);
    }

    #[test]
    fn value_type_from_code_maps_unknown_to_string() {
        assert_eq!(ValueType::from_code(250).code(), ValueType::String.code());
    }

    #[test]
    fn status_http_codes_match_table() {
        assert_eq!(Status::Ok.http_code(), 200);
        assert_eq!(Status::Partial.http_code(), 207);
        assert_eq!(Status::Conflict.http_code(), 409);
        assert_eq!(Status::Precondition.http_code(), 412);
        assert_eq!(Status::Unavailable.http_code(), 503);
    }

    #[test]
    fn op_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&Op::GetAttributes).unwrap();
        assert_eq!(json, "\"GET_ATTRIBUTES\"");
        let op: Op = serde_json::from_str("\"ADD_ROW\"").unwrap();
        assert_eq!(op, Op::AddRow);
    }

    #[test]
    fn request_round_trips_get_params() {
        let req = Request {
            id: Some("1".to_owned()),
            op: Some(Op::Get),
            params: Some(vec!["Device.Foo".to_owned()]),
            ..Default::default()
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, req.id);
        assert_eq!(back.params, req.params);
    }

    #[test]
    fn is_wildcard_recognizes_trailing_dot_and_star() {
        assert!(is_wildcard("Device.X."));
        assert!(is_wildcard("Device.X.*"));
        assert!(!is_wildcard("Device.X.Y"));
    }

    #[test]
    fn notification_param_change_round_trips_through_envelope() {
        let n = Notification::ParamChange {
            param_name: "Device.WiFi.Radio.1.Enable".to_owned(),
            old_value: "unknown".to_owned(),
            new_value: "true".to_owned(),
            data_type: ValueType::Bool.code(),
            write_id: Some("abc".to_owned()),
        };
        let env = n
            .clone()
            .into_envelope("event:device-status", "uplink", 1234);
        assert_eq!(env.kind, 0);
        let round_tripped = Notification::from_envelope(&env).unwrap();
        assert_eq!(round_tripped, n);
    }

    #[test]
    fn notification_connected_client_round_trips_through_envelope() {
        let n = Notification::ConnectedClient {
            mac_id: "AA:BB:CC:DD:EE:FF".to_owned(),
            status: "Online".to_owned(),
            interface: "wifi".to_owned(),
            hostname: "laptop".to_owned(),
            ip_address: "10.0.0.5".to_owned(),
        };
        let env = n.clone().into_envelope("src", "dst", 42);
        let round_tripped = Notification::from_envelope(&env).unwrap();
        assert_eq!(round_tripped, n);
    }

    #[test]
    fn notification_envelope_serializes_as_expected_json_shape() {
        let n = Notification::DeviceStatus {
            status_code: 1,
            reason: "reboot".to_owned(),
            device_id: "dev-1".to_owned(),
        };
        let env = n.into_envelope("src", "dst", 99);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], 3);
        assert_eq!(json["data"]["statusCode"], 1);
        assert_eq!(json["data"]["deviceId"], "dev-1");
    }
}

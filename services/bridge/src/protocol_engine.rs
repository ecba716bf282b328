//! C3: Protocol Engine — dispatches a validated internal [`Request`] against
//! the cache and downlink bus, and maps every outcome onto the §4.3 status
//! code table.

use crate::cache::Cache;
use crate::downlink::{DownlinkAdapter, DownlinkError};
use bridge_protocol::{
    is_wildcard, Notification, Op, ParamValue, Request, Response, Status, ValueType,
};
use std::collections::HashMap;

/// Run one request to completion. Returns the response to send back plus
/// any notifications the caller (the Engine) should hand to the Notification
/// Manager — kept separate so this function stays a value-in, value-out
/// dispatcher with no knowledge of notification sinks.
pub fn dispatch(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let Some(op) = req.op else {
        return (bad_request(req, "missing 'op'"), vec![]);
    };
    match op {
        Op::Get => handle_get(req, downlink, cache),
        Op::Set => handle_set(req, downlink, cache),
        Op::GetAttributes => handle_get_attributes(req, downlink, cache),
        Op::SetAttributes => handle_set_attributes(req, downlink, cache),
        Op::AddRow => handle_add_row(req, downlink),
        Op::DeleteRow => handle_delete_row(req, downlink, cache),
        Op::ReplaceRows => handle_replace_rows(req, downlink, cache),
        Op::Subscribe => handle_subscribe(req, downlink),
        Op::Unsubscribe => handle_unsubscribe(req, downlink),
        Op::TestAndSet => handle_test_and_set(req, downlink, cache),
    }
}

fn bad_request(req: &Request, message: &str) -> Response {
    let mut resp = Response::new(req.id.clone(), Status::BadRequest);
    resp.message = Some(message.to_owned());
    resp
}

fn error_response(req: &Request, status: Status, message: impl Into<String>) -> Response {
    let mut resp = Response::new(req.id.clone(), status);
    resp.message = Some(message.into());
    resp
}

fn map_downlink_error(e: &DownlinkError) -> Status {
    match e {
        DownlinkError::NotFound(_) => Status::NotFound,
        DownlinkError::Forbidden(_) => Status::Forbidden,
        DownlinkError::Timeout(_) => Status::Timeout,
        DownlinkError::Transport(_) => Status::Unavailable,
        DownlinkError::Internal(_) => Status::ServerError,
    }
}

// ---------------------------------------------------------------------------
// GET
// ---------------------------------------------------------------------------

fn handle_get(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let Some(params) = &req.params else {
        return (bad_request(req, "GET requires 'params'"), vec![]);
    };
    if params.is_empty() {
        let mut resp = Response::new(req.id.clone(), Status::Ok);
        resp.results = Some(HashMap::new());
        return (resp, vec![]);
    }

    let mut results: HashMap<String, Option<ParamValue>> = HashMap::new();
    let mut hard_error: Option<Status> = None;
    let mut any_missing = false;

    for name in params {
        if is_wildcard(name) {
            let mut matches = cache.get_wildcard(name);
            if matches.is_empty() {
                match downlink.expand_wildcard(name) {
                    Ok(found) => {
                        let bulk: Vec<(String, String, u8)> = found
                            .iter()
                            .map(|(n, v)| (n.clone(), v.value.clone(), v.data_type))
                            .collect();
                        cache.set_bulk(&bulk);
                        matches = bulk;
                    }
                    Err(DownlinkError::NotFound(_)) => matches = vec![],
                    Err(e) => {
                        hard_error = Some(map_downlink_error(&e));
                        break;
                    }
                }
            }
            for (n, v, t) in matches {
                results.insert(n, Some(ParamValue { v, t }));
            }
        } else if let Some((v, t)) = cache.get(name) {
            results.insert(name.clone(), Some(ParamValue { v, t }));
        } else {
            match downlink.get(name) {
                Ok(dv) => {
                    cache.set(name, &dv.value, dv.data_type, None);
                    results.insert(
                        name.clone(),
                        Some(ParamValue {
                            v: dv.value,
                            t: dv.data_type,
                        }),
                    );
                }
                Err(DownlinkError::NotFound(_)) => {
                    results.insert(name.clone(), None);
                    any_missing = true;
                }
                Err(e) => {
                    hard_error = Some(map_downlink_error(&e));
                    break;
                }
            }
        }
    }

    if let Some(status) = hard_error {
        return (error_response(req, status, "downlink error during GET"), vec![]);
    }

    let status = if any_missing { Status::Partial } else { Status::Ok };

    let mut resp = Response::new(req.id.clone(), status);
    resp.results = Some(results);
    (resp, vec![])
}

// ---------------------------------------------------------------------------
// SET / TEST_AND_SET
// ---------------------------------------------------------------------------

fn handle_set(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let (Some(name), Some(value)) = (&req.param, &req.value) else {
        return (bad_request(req, "SET requires 'param' and 'value'"), vec![]);
    };
    do_set(req, name, value, None, downlink, cache)
}

fn handle_test_and_set(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let (Some(name), Some(value), Some(expected)) =
        (&req.param, &req.value, &req.expected_value)
    else {
        return (
            bad_request(req, "TEST_AND_SET requires 'param', 'value', and 'expectedValue'"),
            vec![],
        );
    };

    let current = match cache.get(name) {
        Some((v, _)) => Some(v),
        None => match downlink.get(name) {
            Ok(dv) => Some(dv.value),
            Err(DownlinkError::NotFound(_)) => None,
            Err(e) => return (error_response(req, map_downlink_error(&e), "downlink error"), vec![]),
        },
    };

    if current.as_deref() != Some(expected.as_str()) {
        return (
            error_response(
                req,
                Status::Precondition,
                "current value does not match expectedValue",
            ),
            vec![],
        );
    }

    do_set(req, name, value, current, downlink, cache)
}

fn do_set(
    req: &Request,
    name: &str,
    value: &str,
    known_old_value: Option<String>,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let old_value = known_old_value.or_else(|| cache.get(name).map(|(v, _)| v));
    let data_type = req.data_type.unwrap_or(ValueType::String.code());

    if let Err(e) = downlink.set(name, value, data_type) {
        return (
            error_response(req, map_downlink_error(&e), format!("SET failed: {}", e)),
            vec![],
        );
    }
    cache.set(name, value, data_type, None);

    let notification = Notification::ParamChange {
        param_name: name.to_owned(),
        old_value: old_value.unwrap_or_else(|| "unknown".to_owned()),
        new_value: value.to_owned(),
        data_type,
        write_id: req.id.clone(),
    };

    (Response::new(req.id.clone(), Status::Ok), vec![notification])
}

// ---------------------------------------------------------------------------
// GET_ATTRIBUTES / SET_ATTRIBUTES
// ---------------------------------------------------------------------------

fn handle_get_attributes(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let Some(name) = &req.param else {
        return (bad_request(req, "GET_ATTRIBUTES requires 'param'"), vec![]);
    };
    match downlink.get_attributes(name) {
        Ok(attrs) => {
            cache.set_attributes(name, attrs.clone());
            let mut resp = Response::new(req.id.clone(), Status::Ok);
            resp.attributes = Some(attrs);
            (resp, vec![])
        }
        Err(e) => (
            error_response(req, map_downlink_error(&e), format!("{}", e)),
            vec![],
        ),
    }
}

fn handle_set_attributes(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let (Some(name), Some(attrs)) = (&req.param, &req.attributes) else {
        return (
            bad_request(req, "SET_ATTRIBUTES requires 'param' and 'attributes'"),
            vec![],
        );
    };
    match downlink.set_attributes(name, attrs) {
        Ok(()) => {
            cache.set_attributes(name, attrs.clone());
            (Response::new(req.id.clone(), Status::Ok), vec![])
        }
        Err(e) => (
            error_response(req, map_downlink_error(&e), format!("{}", e)),
            vec![],
        ),
    }
}

// ---------------------------------------------------------------------------
// Row operations
// ---------------------------------------------------------------------------

fn handle_add_row(req: &Request, downlink: &mut dyn DownlinkAdapter) -> (Response, Vec<Notification>) {
    let (Some(table_name), Some(row_data)) = (&req.table_name, &req.row_data) else {
        return (bad_request(req, "ADD_ROW requires 'tableName' and 'rowData'"), vec![]);
    };
    match downlink.add_table_row(table_name, row_data) {
        Ok(new_row_name) => {
            let mut resp = Response::new(req.id.clone(), Status::Ok);
            resp.new_row_name = Some(new_row_name);
            (resp, vec![])
        }
        Err(e) => (
            error_response(req, map_downlink_error(&e), format!("{}", e)),
            vec![],
        ),
    }
}

fn handle_delete_row(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let Some(row_name) = &req.row_name else {
        return (bad_request(req, "DELETE_ROW requires 'rowName'"), vec![]);
    };
    match downlink.delete_table_row(row_name) {
        Ok(()) => {
            cache.invalidate_wildcard(row_name);
            (Response::new(req.id.clone(), Status::Ok), vec![])
        }
        Err(e) => (
            error_response(req, map_downlink_error(&e), format!("{}", e)),
            vec![],
        ),
    }
}

fn handle_replace_rows(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> (Response, Vec<Notification>) {
    let (Some(table_name), Some(table_data)) = (&req.table_name, &req.table_data) else {
        return (
            bad_request(req, "REPLACE_ROWS requires 'tableName' and 'tableData'"),
            vec![],
        );
    };
    match downlink.replace_table(table_name, table_data) {
        Ok(()) => {
            cache.invalidate_wildcard(table_name);
            (Response::new(req.id.clone(), Status::Ok), vec![])
        }
        Err(e) => (
            error_response(req, map_downlink_error(&e), format!("{}", e)),
            vec![],
        ),
    }
}

// ---------------------------------------------------------------------------
// Subscribe / Unsubscribe
// ---------------------------------------------------------------------------

fn handle_subscribe(req: &Request, downlink: &mut dyn DownlinkAdapter) -> (Response, Vec<Notification>) {
    let Some(name) = &req.param else {
        return (bad_request(req, "SUBSCRIBE requires 'param'"), vec![]);
    };
    match downlink.subscribe(name) {
        Ok(()) => (Response::new(req.id.clone(), Status::Ok), vec![]),
        Err(e) => (
            error_response(req, map_downlink_error(&e), format!("{}", e)),
            vec![],
        ),
    }
}

fn handle_unsubscribe(
    req: &Request,
    downlink: &mut dyn DownlinkAdapter,
) -> (Response, Vec<Notification>) {
    let Some(name) = &req.param else {
        return (bad_request(req, "UNSUBSCRIBE requires 'param'"), vec![]);
    };
    match downlink.unsubscribe(name) {
        Ok(()) => (Response::new(req.id.clone(), Status::Ok), vec![]),
        Err(e) => (
            error_response(req, map_downlink_error(&e), format!("{}", e)),
            vec![],
        ),
    }
}

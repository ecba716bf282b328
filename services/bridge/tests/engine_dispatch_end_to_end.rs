//! End-to-end tests against the public `Engine`: config load, dispatch,
//! notification delivery, and performance accounting wired together.
use bridge::config::{load_config_from_str, CliOverrides};
use bridge::engine::Engine;
use bridge_protocol::{Notification, Op, Request};
use std::sync::{Arc, Mutex};

fn test_engine() -> Engine {
    let toml_str = r#"
        schema_version = 1
        [uplink]
        service_name = "com.example.bridge"
    "#;
    let cfg = load_config_from_str(toml_str, &CliOverrides::default()).unwrap();
    Engine::new(&cfg)
}

#[test]
fn get_on_empty_params_returns_ok_with_empty_results() {
    let engine = test_engine();
    let req = Request {
        id: Some("1".into()),
        op: Some(Op::Get),
        params: Some(vec![]),
        ..Default::default()
    };
    let resp = engine.dispatch(&req);
    assert_eq!(resp.status, 200);
    assert!(resp.results.unwrap().is_empty());
}

#[test]
fn set_then_get_round_trips_through_engine_cache() {
    let engine = test_engine();
    let set_req = Request {
        id: Some("1".into()),
        op: Some(Op::Set),
        param: Some("Device.DeviceInfo.Model".into()),
        value: Some("ModelX".into()),
        data_type: Some(0),
        ..Default::default()
    };
    assert_eq!(engine.dispatch(&set_req).status, 200);

    let get_req = Request {
        id: Some("2".into()),
        op: Some(Op::Get),
        params: Some(vec!["Device.DeviceInfo.Model".into()]),
        ..Default::default()
    };
    let resp = engine.dispatch(&get_req);
    assert_eq!(resp.status, 200);
    let results = resp.results.unwrap();
    let pv = results["Device.DeviceInfo.Model"].as_ref().unwrap();
    assert_eq!(pv.v, "ModelX");
    assert_eq!(pv.t, 0);
}

#[test]
fn set_dispatch_reaches_a_registered_notification_sink() {
    let engine = test_engine();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    engine.notifications.register(
        0,
        Box::new(move |n: &Notification| {
            if let Notification::ParamChange { param_name, .. } = n {
                seen_clone.lock().unwrap().push(param_name.clone());
            }
        }),
    );

    let set_req = Request {
        id: Some("1".into()),
        op: Some(Op::Set),
        param: Some("Device.WiFi.Radio.1.Enable".into()),
        value: Some("true".into()),
        data_type: Some(3),
        ..Default::default()
    };
    engine.dispatch(&set_req);

    assert_eq!(seen.lock().unwrap().as_slice(), ["Device.WiFi.Radio.1.Enable"]);
}

#[test]
fn performance_report_accumulates_across_many_dispatches() {
    let engine = test_engine();
    for i in 0..5 {
        let req = Request {
            id: Some(i.to_string()),
            op: Some(Op::Get),
            params: Some(vec![format!("Device.Missing.{}", i)]),
            ..Default::default()
        };
        engine.dispatch(&req);
    }
    let report = engine.performance_report();
    let timer = &report.timers[bridge::performance::names::DISPATCH_GET];
    assert_eq!(timer.count, 5);
}

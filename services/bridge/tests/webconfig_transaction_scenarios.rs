//! WebConfig scenarios driven through the public `Engine`, not the
//! module-internal fixtures already covered by `webconfig.rs`'s own tests.
use bridge::config::{load_config_from_str, CliOverrides};
use bridge::engine::Engine;
use bridge::webconfig::{ParamUpdate, TransactionMode, WebConfigOp};
use bridge_protocol::{Op, Request, Status};

fn test_engine() -> Engine {
    let toml_str = r#"
        schema_version = 1
        [uplink]
        service_name = "com.example.bridge"
    "#;
    let cfg = load_config_from_str(toml_str, &CliOverrides::default()).unwrap();
    Engine::new(&cfg)
}

fn get(engine: &Engine, name: &str) -> bridge_protocol::Response {
    engine.dispatch(&Request {
        id: Some("get".into()),
        op: Some(Op::Get),
        params: Some(vec![name.to_owned()]),
        ..Default::default()
    })
}

/// Scenario 5 (§8): atomic transaction with one failing parameter rolls
/// every already-applied write back, observable through later GETs.
#[test]
fn atomic_transaction_failure_restores_pre_transaction_values() {
    let engine = test_engine();
    engine.dispatch(&Request {
        id: Some("seed".into()),
        op: Some(Op::Set),
        param: Some("Device.A".into()),
        value: Some("1".into()),
        data_type: Some(1),
        ..Default::default()
    });

    // Make Device.B read-only so its SET fails mid-transaction.
    engine.dispatch(&Request {
        id: Some("attrs".into()),
        op: Some(Op::Set),
        param: Some("Device.B".into()),
        value: Some("2".into()),
        data_type: Some(1),
        ..Default::default()
    });
    engine.dispatch(&Request {
        id: Some("set_attrs".into()),
        op: Some(Op::SetAttributes),
        param: Some("Device.B".into()),
        attributes: Some(bridge_protocol::Attributes {
            notify: 0,
            access: bridge_protocol::AccessMode::ReadOnly,
        }),
        ..Default::default()
    });

    let updates = vec![
        ParamUpdate { name: "Device.A".into(), value: "100".into(), data_type: 1, op: WebConfigOp::Set },
        ParamUpdate { name: "Device.B".into(), value: "200".into(), data_type: 1, op: WebConfigOp::Set },
    ];
    let result = engine.execute_transaction("txn-rollback", &updates, TransactionMode::Atomic);
    assert_ne!(result.status, Status::Ok);

    // Device.A rolled back cleanly and reports SUCCESS; only Device.B, the
    // parameter that actually failed, carries a failure status.
    let a_result = result.results.iter().find(|r| r.name == "Device.A").unwrap();
    let b_result = result.results.iter().find(|r| r.name == "Device.B").unwrap();
    assert_eq!(a_result.status, Status::Ok);
    assert_eq!(b_result.status, Status::Forbidden);

    let resp = get(&engine, "Device.A");
    let results = resp.results.unwrap();
    assert_eq!(results["Device.A"].as_ref().unwrap().v, "1");
}

/// Scenario 6 (§8): WebConfig `Add` on an already-present parameter is
/// rejected with 409 and never calls the adapter's `Set`.
#[test]
fn add_on_existing_parameter_is_rejected_without_writing() {
    let engine = test_engine();
    engine.dispatch(&Request {
        id: Some("seed".into()),
        op: Some(Op::Set),
        param: Some("Device.Existing".into()),
        value: Some("orig".into()),
        data_type: Some(0),
        ..Default::default()
    });

    let updates = vec![ParamUpdate {
        name: "Device.Existing".into(),
        value: "new".into(),
        data_type: 0,
        op: WebConfigOp::Add,
    }];
    let result = engine.execute_transaction("txn-add-conflict", &updates, TransactionMode::NonAtomic);
    assert_eq!(result.results[0].status, Status::Conflict);

    let resp = get(&engine, "Device.Existing");
    let results = resp.results.unwrap();
    assert_eq!(results["Device.Existing"].as_ref().unwrap().v, "orig");
}

#[test]
fn non_atomic_transaction_reports_per_parameter_outcomes() {
    let engine = test_engine();
    let updates = vec![
        ParamUpdate { name: "Device.One".into(), value: "1".into(), data_type: 1, op: WebConfigOp::Set },
        ParamUpdate { name: "Device.Two".into(), value: "2".into(), data_type: 1, op: WebConfigOp::Set },
    ];
    let result = engine.execute_transaction("txn-multi", &updates, TransactionMode::NonAtomic);
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.results.len(), 2);
    assert!(result.results.iter().all(|r| r.status == Status::Ok));
    assert_eq!(engine.webconfig_stats().transactions_committed, 1);
}

//! C5: Notification Pipeline — a per-type sink table plus the automatic
//! event-pattern subscriptions that turn downlink events into notifications.

use crate::config::NotificationsConfig;
use bridge_protocol::{Notification, NotificationEnvelope};
use std::collections::HashMap;
use std::sync::Mutex;

/// Downlink event patterns the pipeline auto-subscribes to when enabled
/// (§4.5). Matched literally against the event's reported parameter name.
pub const AUTO_SUBSCRIBE_PATTERNS: &[&str] = &[
    "Device.WiFi.Radio.*.Enable",
    "Device.Ethernet.Interface.*.Enable",
    "Device.Hosts.Host.*",
    "Device.DeviceInfo.X_COMCAST-COM_*",
    "Device.Time.*",
];

/// A typed callback registered against one notification type. Boxed so
/// callers can register closures that capture test state.
pub type Sink = Box<dyn Fn(&Notification) + Send + Sync>;

/// Emits a notification's JSON envelope to the uplink transport. Kept
/// separate from [`Sink`] since it always runs, per §4.5's "serialize and
/// hand to the uplink emit hook if available".
pub type EmitHook = Box<dyn Fn(&NotificationEnvelope) + Send + Sync>;

#[derive(Default)]
struct SinkTable {
    sinks: HashMap<u8, Sink>,
}

/// Builds, routes, and emits notifications. Does not retry or persist:
/// delivery is best-effort, matching §4.5.
pub struct NotificationPipeline {
    sinks: Mutex<SinkTable>,
    emit_hook: Mutex<Option<EmitHook>>,
    config: NotificationsConfig,
    source: String,
}

impl NotificationPipeline {
    #[must_use]
    pub fn new(config: NotificationsConfig, source: impl Into<String>) -> Self {
        NotificationPipeline {
            sinks: Mutex::new(SinkTable::default()),
            emit_hook: Mutex::new(None),
            config,
            source: source.into(),
        }
    }

    /// Register a sink for a notification type, identified by
    /// [`Notification::type_code`]. A second registration replaces the first.
    pub fn register(&self, type_code: u8, sink: Sink) {
        self.sinks.lock().unwrap().sinks.insert(type_code, sink);
    }

    pub fn unregister(&self, type_code: u8) {
        self.sinks.lock().unwrap().sinks.remove(&type_code);
    }

    /// Install the function used to hand a notification's wire envelope to
    /// the uplink transport (`event:device-status`).
    pub fn set_emit_hook(&self, hook: EmitHook) {
        *self.emit_hook.lock().unwrap() = Some(hook);
    }

    fn enabled(&self, n: &Notification) -> bool {
        match n {
            Notification::ParamChange { .. } => self.config.enable_param_notifications,
            Notification::ConnectedClient { .. } => self.config.enable_client_notifications,
            Notification::DeviceStatus { .. }
            | Notification::FactoryReset { .. }
            | Notification::FirmwareUpgrade { .. } => self.config.enable_device_notifications,
            // Transaction-status notifications aren't gated by §4.5's three
            // configurable flags; they report WebConfig's own activity.
            Notification::TransactionStatus { .. } => true,
        }
    }

    /// Build the wire envelope and dispatch it: call the typed sink if
    /// registered, then hand the JSON envelope to the emit hook.
    pub fn emit(&self, notification: Notification, timestamp_ms: u64) {
        if !self.enabled(&notification) {
            return;
        }
        let type_code = notification.type_code();
        if let Some(sink) = self.sinks.lock().unwrap().sinks.get(&type_code) {
            sink(&notification);
        }
        let envelope = notification.into_envelope(self.source.clone(), "event:device-status", timestamp_ms);
        if let Some(hook) = self.emit_hook.lock().unwrap().as_ref() {
            hook(&envelope);
        }
    }

    /// Emit every notification produced by dispatching one protocol op, in
    /// order. Used by the engine after each Protocol/WebConfig call.
    pub fn emit_all(&self, notifications: Vec<Notification>, timestamp_ms: u64) {
        for n in notifications {
            self.emit(n, timestamp_ms);
        }
    }
}

/// True if a downlink-reported event parameter name matches one of the fixed
/// auto-subscribe patterns. A `*` in the pattern matches exactly one
/// path segment (the patterns only ever use it that way).
#[must_use]
pub fn matches_auto_pattern(param_name: &str) -> bool {
    AUTO_SUBSCRIBE_PATTERNS
        .iter()
        .any(|pattern| pattern_matches(pattern, param_name))
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let name_segments: Vec<&str> = name.split('.').collect();
    if pattern_segments.len() != name_segments.len() {
        // The `Device.Hosts.Host.*` / `Device.DeviceInfo.X_COMCAST-COM_*`
        // patterns also accept a name with one trailing segment beyond the
        // pattern (e.g. the row index), so allow exactly one extra segment.
        if name_segments.len() != pattern_segments.len() + 1 {
            return false;
        }
    }
    pattern_segments
        .iter()
        .zip(name_segments.iter())
        .all(|(p, n)| *p == "*" || p == n)
}

/// Build a param-change notification for a downlink value-changed event.
/// `oldValue` is always `"unknown"` since the adapter doesn't supply it
/// (§4.5, §5).
#[must_use]
pub fn param_change_from_event(param_name: &str, new_value: &str, data_type: u8) -> Notification {
    Notification::ParamChange {
        param_name: param_name.to_owned(),
        old_value: "unknown".to_owned(),
        new_value: new_value.to_owned(),
        data_type,
        write_id: None,
    }
}

/// Build a connected-client notification for an object-created/deleted event
/// on `Device.Hosts.Host.*`.
#[must_use]
pub fn connected_client_from_event(
    mac_id: &str,
    created: bool,
    interface: &str,
    hostname: &str,
    ip_address: &str,
) -> Notification {
    Notification::ConnectedClient {
        mac_id: mac_id.to_owned(),
        status: if created { "Online" } else { "Offline" }.to_owned(),
        interface: interface.to_owned(),
        hostname: hostname.to_owned(),
        ip_address: ip_address.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn all_enabled() -> NotificationsConfig {
        NotificationsConfig {
            enable_param_notifications: true,
            enable_client_notifications: true,
            enable_device_notifications: true,
        }
    }

    #[test]
    fn emit_calls_registered_sink_for_matching_type() {
        let pipeline = NotificationPipeline::new(all_enabled(), "uplink");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        pipeline.register(
            0,
            Box::new(move |_n| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        pipeline.emit(
            param_change_from_event("Device.WiFi.Radio.1.Enable", "true", 3),
            1000,
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_skips_disabled_category() {
        let mut cfg = all_enabled();
        cfg.enable_param_notifications = false;
        let pipeline = NotificationPipeline::new(cfg, "uplink");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        pipeline.register(0, Box::new(move |_n| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        pipeline.emit(param_change_from_event("Device.X", "1", 1), 1000);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_hook_receives_built_envelope() {
        let pipeline = NotificationPipeline::new(all_enabled(), "uplink");
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        pipeline.set_emit_hook(Box::new(move |env| {
            *seen_clone.lock().unwrap() = Some(env.kind);
        }));
        pipeline.emit(param_change_from_event("Device.X", "1", 1), 1000);
        assert_eq!(*seen.lock().unwrap(), Some(0));
    }

    #[test]
    fn transaction_status_is_never_gated() {
        let mut cfg = all_enabled();
        cfg.enable_device_notifications = false;
        cfg.enable_param_notifications = false;
        cfg.enable_client_notifications = false;
        let pipeline = NotificationPipeline::new(cfg, "uplink");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        pipeline.set_emit_hook(Box::new(move |_env| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));
        pipeline.emit(
            Notification::TransactionStatus {
                transaction_id: "txn-1".into(),
                status: "completed".into(),
                error_message: None,
            },
            1000,
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn matches_auto_pattern_recognizes_wifi_radio_enable() {
        assert!(matches_auto_pattern("Device.WiFi.Radio.1.Enable"));
        assert!(!matches_auto_pattern("Device.WiFi.Radio.1.SSID"));
    }

    #[test]
    fn matches_auto_pattern_allows_trailing_segment_for_host_table() {
        assert!(matches_auto_pattern("Device.Hosts.Host.1.IPAddress"));
        assert!(matches_auto_pattern("Device.Hosts.Host.1"));
    }

    #[test]
    fn connected_client_event_sets_status_from_created_flag() {
        let n = connected_client_from_event("AA:BB", true, "wifi", "host", "10.0.0.1");
        match n {
            Notification::ConnectedClient { status, .. } => assert_eq!(status, "Online"),
            _ => panic!("wrong variant"),
        }
    }
}

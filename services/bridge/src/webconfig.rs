//! C4: WebConfig Engine — transactional bulk parameter updates with
//! optional atomic rollback, backed by real pre-transaction snapshots
//! (see [`crate::backup`]).

use crate::backup::BackupStore;
use crate::cache::Cache;
use crate::downlink::{DownlinkAdapter, DownlinkError};
use bridge_protocol::{Notification, Status};
use std::collections::HashMap;

/// Per-parameter operation within a WebConfig transaction (§4.4 step 3's
/// per-operation mapping onto the Downlink Adapter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebConfigOp {
    /// Maps to `Set`.
    Set,
    /// Maps to `Set`; distinguished from `Set` only for result bookkeeping,
    /// both go through the same adapter call.
    Replace,
    /// `Get` first; 409 "already exists" if present, else `Set`.
    Add,
    /// `Set(name, "")` plus a cache invalidation.
    Delete,
    /// `Get` only; never writes and never emits a param-change notification.
    Get,
}

#[derive(Debug, Clone)]
pub struct ParamUpdate {
    pub name: String,
    pub value: String,
    pub data_type: u8,
    pub op: WebConfigOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// All updates apply, or none do.
    Atomic,
    /// Each update applies independently; failures don't block the rest.
    NonAtomic,
}

#[derive(Debug, Clone)]
pub struct ParamResult {
    pub name: String,
    pub status: Status,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub transaction_id: String,
    pub status: Status,
    pub results: Vec<ParamResult>,
}

#[derive(Debug, Clone, Default)]
pub struct WebConfigStats {
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub transactions_partial: u64,
}

pub struct WebConfigEngine {
    backup: BackupStore,
    max_transaction_size: usize,
    rollback_enabled: bool,
    stats: WebConfigStats,
}

impl WebConfigEngine {
    #[must_use]
    pub fn new(backup_dir: impl Into<std::path::PathBuf>, max_transaction_size: usize, rollback_enabled: bool) -> Self {
        WebConfigEngine {
            backup: BackupStore::new(backup_dir),
            max_transaction_size,
            rollback_enabled,
            stats: WebConfigStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> WebConfigStats {
        self.stats.clone()
    }

    /// Reject a transaction before any backup/apply work: empty, or over the
    /// configured size ceiling.
    pub fn validate_transaction(&self, updates: &[ParamUpdate]) -> Result<(), String> {
        if updates.is_empty() {
            return Err("transaction must contain at least one update".to_owned());
        }
        if updates.len() > self.max_transaction_size {
            return Err(format!(
                "transaction has {} updates, exceeds max_transaction_size {}",
                updates.len(),
                self.max_transaction_size
            ));
        }
        for u in updates {
            if u.name.is_empty() {
                return Err("parameter name must not be empty".to_owned());
            }
            let needs_value = matches!(u.op, WebConfigOp::Set | WebConfigOp::Replace | WebConfigOp::Add);
            if needs_value && u.value.is_empty() {
                return Err(format!("parameter '{}' requires a value for {:?}", u.name, u.op));
            }
        }
        Ok(())
    }

    /// Run the full 7-step protocol: validate, snapshot, backup, apply
    /// (atomic or not), commit/rollback, notify, clean up the backup.
    pub fn execute(
        &mut self,
        transaction_id: &str,
        updates: &[ParamUpdate],
        mode: TransactionMode,
        downlink: &mut dyn DownlinkAdapter,
        cache: &mut Cache,
    ) -> (TransactionResult, Vec<Notification>) {
        if let Err(msg) = self.validate_transaction(updates) {
            return (
                TransactionResult {
                    transaction_id: transaction_id.to_owned(),
                    status: Status::Unprocessable,
                    results: vec![ParamResult {
                        name: String::new(),
                        status: Status::Unprocessable,
                        message: Some(msg),
                    }],
                },
                vec![],
            );
        }

        let snapshot = self.snapshot_prior_values(updates, downlink, cache);
        if self.rollback_enabled {
            if let Err(e) = self.backup.create_backup(transaction_id, &snapshot) {
                return (
                    TransactionResult {
                        transaction_id: transaction_id.to_owned(),
                        status: Status::ServerError,
                        results: vec![],
                    },
                    vec![format_failure_notification(transaction_id, &e.to_string())],
                );
            }
        }

        let (results, notifications, overall_override) = match mode {
            TransactionMode::Atomic => {
                self.apply_atomic(transaction_id, updates, &snapshot, downlink, cache)
            }
            TransactionMode::NonAtomic => {
                let (results, notifications) =
                    self.apply_non_atomic(transaction_id, updates, downlink, cache);
                (results, notifications, None)
            }
        };

        if self.rollback_enabled {
            let _ = self.backup.delete_backup(transaction_id);
        }

        let overall = overall_override.unwrap_or_else(|| overall_status(&results));
        match overall {
            Status::Ok => self.stats.transactions_committed += 1,
            Status::Partial => self.stats.transactions_partial += 1,
            _ => self.stats.transactions_rolled_back += 1,
        }

        (
            TransactionResult {
                transaction_id: transaction_id.to_owned(),
                status: overall,
                results,
            },
            notifications,
        )
    }

    fn snapshot_prior_values(
        &self,
        updates: &[ParamUpdate],
        downlink: &mut dyn DownlinkAdapter,
        cache: &mut Cache,
    ) -> HashMap<String, (String, u8)> {
        let mut snapshot = HashMap::new();
        for u in updates {
            let prior = cache.get(&u.name).or_else(|| {
                downlink
                    .get(&u.name)
                    .ok()
                    .map(|dv| (dv.value, dv.data_type))
            });
            if let Some(v) = prior {
                snapshot.insert(u.name.clone(), v);
            }
        }
        snapshot
    }

    fn apply_atomic(
        &self,
        transaction_id: &str,
        updates: &[ParamUpdate],
        snapshot: &HashMap<String, (String, u8)>,
        downlink: &mut dyn DownlinkAdapter,
        cache: &mut Cache,
    ) -> (Vec<ParamResult>, Vec<Notification>, Option<Status>) {
        let mut applied: Vec<&ParamUpdate> = Vec::new();
        let mut failure: Option<(String, Status, String)> = None;

        for u in updates {
            match apply_update(u, downlink, cache) {
                Ok(_) => {
                    if u.op != WebConfigOp::Get {
                        applied.push(u);
                    }
                }
                Err((status, msg)) => {
                    failure = Some((u.name.clone(), status, msg));
                    break;
                }
            }
        }

        if let Some((failed_name, status, msg)) = failure {
            // Roll back every update already applied, in reverse order.
            for u in applied.iter().rev() {
                if let Some((old_value, old_type)) = snapshot.get(&u.name) {
                    let _ = downlink.set(&u.name, old_value, *old_type);
                    cache.set(&u.name, old_value, *old_type, None);
                } else {
                    // Newly added parameter with no prior value and no
                    // generic single-parameter delete on the adapter;
                    // best-effort via the table-row primitive, which only
                    // succeeds when `u.name` is actually a row.
                    let _ = downlink.delete_table_row(&u.name);
                    cache.delete(&u.name);
                }
            }
            // Each already-applied parameter reverted cleanly, so its own
            // result is SUCCESS; only the parameter that actually failed
            // carries the failure status.
            let results = updates
                .iter()
                .map(|u| {
                    if u.name == failed_name {
                        ParamResult {
                            name: u.name.clone(),
                            status,
                            message: Some(msg.clone()),
                        }
                    } else {
                        ParamResult {
                            name: u.name.clone(),
                            status: Status::Ok,
                            message: None,
                        }
                    }
                })
                .collect();
            return (
                results,
                vec![transaction_status_notification(transaction_id, "rolled_back", Some(msg))],
                Some(status),
            );
        }

        let results = updates
            .iter()
            .map(|u| ParamResult {
                name: u.name.clone(),
                status: Status::Ok,
                message: None,
            })
            .collect();
        let mut notifications: Vec<Notification> = updates
            .iter()
            .filter(|u| u.op != WebConfigOp::Get)
            .map(|u| Notification::ParamChange {
                param_name: u.name.clone(),
                old_value: snapshot
                    .get(&u.name)
                    .map(|(v, _)| v.clone())
                    .unwrap_or_else(|| "unknown".to_owned()),
                new_value: u.value.clone(),
                data_type: u.data_type,
                write_id: Some(transaction_id.to_owned()),
            })
            .collect();
        notifications.push(transaction_status_notification(transaction_id, "completed", None));
        (results, notifications, None)
    }

    fn apply_non_atomic(
        &self,
        transaction_id: &str,
        updates: &[ParamUpdate],
        downlink: &mut dyn DownlinkAdapter,
        cache: &mut Cache,
    ) -> (Vec<ParamResult>, Vec<Notification>) {
        let mut results = Vec::new();
        let mut notifications = Vec::new();

        for u in updates {
            match apply_update(u, downlink, cache) {
                Ok(old) => {
                    results.push(ParamResult {
                        name: u.name.clone(),
                        status: Status::Ok,
                        message: None,
                    });
                    if u.op != WebConfigOp::Get {
                        notifications.push(Notification::ParamChange {
                            param_name: u.name.clone(),
                            old_value: old.map(|(v, _)| v).unwrap_or_else(|| "unknown".to_owned()),
                            new_value: u.value.clone(),
                            data_type: u.data_type,
                            write_id: Some(transaction_id.to_owned()),
                        });
                    }
                }
                Err((status, msg)) => {
                    results.push(ParamResult {
                        name: u.name.clone(),
                        status,
                        message: Some(msg),
                    });
                }
            }
        }

        let status_label = if results.iter().all(|r| r.status == Status::Ok) {
            "completed"
        } else if results.iter().any(|r| r.status == Status::Ok) {
            "partial"
        } else {
            "failed"
        };
        notifications.push(transaction_status_notification(transaction_id, status_label, None));
        (results, notifications)
    }
}

/// Apply one parameter update per its operation's §4.4 mapping onto the
/// Downlink Adapter, returning the prior value where one existed (used for
/// the param-change notification's `oldValue`).
fn apply_update(
    u: &ParamUpdate,
    downlink: &mut dyn DownlinkAdapter,
    cache: &mut Cache,
) -> Result<Option<(String, u8)>, (Status, String)> {
    match u.op {
        WebConfigOp::Set | WebConfigOp::Replace => {
            let old = cache.get(&u.name);
            downlink
                .set(&u.name, &u.value, u.data_type)
                .map_err(|e| (map_downlink_error(&e), e.to_string()))?;
            cache.set(&u.name, &u.value, u.data_type, None);
            Ok(old)
        }
        WebConfigOp::Delete => {
            let old = cache.get(&u.name);
            downlink
                .set(&u.name, "", u.data_type)
                .map_err(|e| (map_downlink_error(&e), e.to_string()))?;
            cache.delete(&u.name);
            Ok(old)
        }
        WebConfigOp::Add => match downlink.get(&u.name) {
            Ok(_) => Err((Status::Conflict, "Parameter already exists".to_owned())),
            Err(DownlinkError::NotFound(_)) => {
                downlink
                    .set(&u.name, &u.value, u.data_type)
                    .map_err(|e| (map_downlink_error(&e), e.to_string()))?;
                cache.set(&u.name, &u.value, u.data_type, None);
                Ok(None)
            }
            Err(e) => Err((map_downlink_error(&e), e.to_string())),
        },
        WebConfigOp::Get => downlink
            .get(&u.name)
            .map(|dv| Some((dv.value, dv.data_type)))
            .map_err(|e| (map_downlink_error(&e), e.to_string())),
    }
}

fn overall_status(results: &[ParamResult]) -> Status {
    if results.iter().all(|r| r.status == Status::Ok) {
        Status::Ok
    } else if results.iter().any(|r| r.status == Status::Ok) {
        Status::Partial
    } else {
        results.first().map(|r| r.status).unwrap_or(Status::ServerError)
    }
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

fn transaction_status_notification(
    transaction_id: &str,
    status: &str,
    error_message: Option<String>,
) -> Notification {
    Notification::TransactionStatus {
        transaction_id: transaction_id.to_owned(),
        status: status.to_owned(),
        error_message,
    }
}

fn format_failure_notification(transaction_id: &str, message: &str) -> Notification {
    transaction_status_notification(transaction_id, "failed", Some(message.to_owned()))
}

//! In-memory [`DownlinkAdapter`] used by every test in this repository,
//! since the real bus client is out of scope (§1).

use super::{check_writable, DownlinkAdapter, DownlinkError, DownlinkValue};
use bridge_protocol::{AccessMode, Attributes, RowField};
use std::collections::{BTreeMap, HashSet};

/// A parameter tree backed by a sorted map so prefix/wildcard expansion is a
/// contiguous range scan rather than a full-table filter.
pub struct MockDownlink {
    open: bool,
    values: BTreeMap<String, DownlinkValue>,
    attributes: BTreeMap<String, Attributes>,
    subscriptions: HashSet<String>,
    next_row_index: BTreeMap<String, u64>,
}

impl Default for MockDownlink {
    fn default() -> Self {
        MockDownlink {
            open: false,
            values: BTreeMap::new(),
            attributes: BTreeMap::new(),
            subscriptions: HashSet::new(),
            next_row_index: BTreeMap::new(),
        }
    }
}

impl MockDownlink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a parameter directly, bypassing `set`'s access check. Used by
    /// tests to pre-populate fixtures.
    pub fn seed(&mut self, name: impl Into<String>, value: impl Into<String>, data_type: u8) {
        self.values.insert(
            name.into(),
            DownlinkValue {
                value: value.into(),
                data_type,
            },
        );
    }

    pub fn seed_attributes(&mut self, name: impl Into<String>, attributes: Attributes) {
        self.attributes.insert(name.into(), attributes);
    }

    #[must_use]
    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions.contains(name)
    }

    fn ensure_open(&self) -> Result<(), DownlinkError> {
        if !self.open {
            return Err(DownlinkError::Transport("adapter is not open".into()));
        }
        Ok(())
    }

    fn access_for(&self, name: &str) -> AccessMode {
        self.attributes
            .get(name)
            .map(|a| a.access)
            .unwrap_or(AccessMode::ReadWrite)
    }

    /// Strip a wildcard suffix down to the literal prefix to scan for.
    fn wildcard_prefix(pattern: &str) -> &str {
        pattern.strip_suffix('*').unwrap_or(pattern)
    }
}

impl DownlinkAdapter for MockDownlink {
    fn open(&mut self, _component: &str) -> Result<(), DownlinkError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DownlinkError> {
        self.open = false;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<DownlinkValue, DownlinkError> {
        self.ensure_open()?;
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| DownlinkError::NotFound(name.to_owned()))
    }

    fn expand_wildcard(&self, prefix: &str) -> Result<Vec<(String, DownlinkValue)>, DownlinkError> {
        self.ensure_open()?;
        let prefix = Self::wildcard_prefix(prefix);
        Ok(self
            .values
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn set(&mut self, name: &str, value: &str, data_type: u8) -> Result<(), DownlinkError> {
        self.ensure_open()?;
        check_writable(self.access_for(name))?;
        self.values.insert(
            name.to_owned(),
            DownlinkValue {
                value: value.to_owned(),
                data_type,
            },
        );
        Ok(())
    }

    fn get_attributes(&self, name: &str) -> Result<Attributes, DownlinkError> {
        self.ensure_open()?;
        if !self.values.contains_key(name) {
            return Err(DownlinkError::NotFound(name.to_owned()));
        }
        Ok(self.attributes.get(name).cloned().unwrap_or(Attributes {
            notify: 0,
            access: AccessMode::ReadWrite,
        }))
    }

    fn set_attributes(&mut self, name: &str, attributes: &Attributes) -> Result<(), DownlinkError> {
        self.ensure_open()?;
        if !self.values.contains_key(name) {
            return Err(DownlinkError::NotFound(name.to_owned()));
        }
        self.attributes.insert(name.to_owned(), attributes.clone());
        Ok(())
    }

    fn add_table_row(
        &mut self,
        table_name: &str,
        row_data: &[RowField],
    ) -> Result<String, DownlinkError> {
        self.ensure_open()?;
        let counter = self.next_row_index.entry(table_name.to_owned()).or_insert(1);
        let index = *counter;
        *counter += 1;
        let row_name = format!("{}{}.", table_name, index);
        for field in row_data {
            self.values.insert(
                format!("{}{}", row_name, field.name),
                DownlinkValue {
                    value: field.value.clone(),
                    data_type: field.data_type,
                },
            );
        }
        Ok(row_name)
    }

    fn delete_table_row(&mut self, row_name: &str) -> Result<(), DownlinkError> {
        self.ensure_open()?;
        let keys: Vec<String> = self
            .values
            .range(row_name.to_owned()..)
            .take_while(|(k, _)| k.starts_with(row_name))
            .map(|(k, _)| k.clone())
            .collect();
        if keys.is_empty() {
            return Err(DownlinkError::NotFound(row_name.to_owned()));
        }
        for k in keys {
            self.values.remove(&k);
            self.attributes.remove(&k);
        }
        Ok(())
    }

    fn replace_table(
        &mut self,
        table_name: &str,
        table_data: &[Vec<RowField>],
    ) -> Result<(), DownlinkError> {
        self.ensure_open()?;
        let stale: Vec<String> = self
            .values
            .range(table_name.to_owned()..)
            .take_while(|(k, _)| k.starts_with(table_name))
            .map(|(k, _)| k.clone())
            .collect();
        for k in stale {
            self.values.remove(&k);
            self.attributes.remove(&k);
        }
        self.next_row_index.remove(table_name);
        for row in table_data {
            self.add_table_row(table_name, row)?;
        }
        Ok(())
    }

    fn subscribe(&mut self, name: &str) -> Result<(), DownlinkError> {
        self.ensure_open()?;
        self.subscriptions.insert(name.to_owned());
        Ok(())
    }

    fn unsubscribe(&mut self, name: &str) -> Result<(), DownlinkError> {
        self.ensure_open()?;
        self.subscriptions.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> MockDownlink {
        let mut d = MockDownlink::new();
        d.open("com.example.bridge").unwrap();
        d
    }

    #[test]
    fn get_missing_param_is_not_found() {
        let d = opened();
        assert!(matches!(d.get("Device.X"), Err(DownlinkError::NotFound(_))));
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut d = opened();
        d.set("Device.X.Y", "42", 1).unwrap();
        let v = d.get("Device.X.Y").unwrap();
        assert_eq!(v.value, "42");
        assert_eq!(v.data_type, 1);
    }

    #[test]
    fn set_rejected_on_read_only_parameter() {
        let mut d = opened();
        d.seed("Device.X.Y", "1", 1);
        d.seed_attributes(
            "Device.X.Y",
            Attributes {
                notify: 0,
                access: AccessMode::ReadOnly,
            },
        );
        assert!(matches!(
            d.set("Device.X.Y", "2", 1),
            Err(DownlinkError::Forbidden(_))
        ));
    }

    #[test]
    fn expand_wildcard_returns_all_matching_prefix() {
        let mut d = opened();
        d.seed("Device.WiFi.Radio.1.Enable", "true", 3);
        d.seed("Device.WiFi.Radio.2.Enable", "false", 3);
        d.seed("Device.Other.Param", "x", 0);
        let matches = d.expand_wildcard("Device.WiFi.").unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn add_and_delete_table_row() {
        let mut d = opened();
        let row_name = d
            .add_table_row(
                "Device.Hosts.HostTable.",
                &[RowField {
                    name: "Alias".into(),
                    value: "guest".into(),
                    data_type: 0,
                }],
            )
            .unwrap();
        assert_eq!(row_name, "Device.Hosts.HostTable.1.");
        assert!(d.get("Device.Hosts.HostTable.1.Alias").is_ok());
        d.delete_table_row(&row_name).unwrap();
        assert!(matches!(
            d.get("Device.Hosts.HostTable.1.Alias"),
            Err(DownlinkError::NotFound(_))
        ));
    }

    #[test]
    fn replace_table_drops_old_rows_and_adds_new_ones() {
        let mut d = opened();
        d.add_table_row(
            "Device.Hosts.HostTable.",
            &[RowField {
                name: "Alias".into(),
                value: "old".into(),
                data_type: 0,
            }],
        )
        .unwrap();
        d.replace_table(
            "Device.Hosts.HostTable.",
            &[vec![RowField {
                name: "Alias".into(),
                value: "new".into(),
                data_type: 0,
            }]],
        )
        .unwrap();
        let rows = d.expand_wildcard("Device.Hosts.HostTable.").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.value, "new");
    }

    #[test]
    fn subscribe_and_unsubscribe_round_trip() {
        let mut d = opened();
        d.subscribe("Device.X.").unwrap();
        assert!(d.is_subscribed("Device.X."));
        d.unsubscribe("Device.X.").unwrap();
        assert!(!d.is_subscribed("Device.X."));
    }

    #[test]
    fn calls_before_open_fail_with_transport_error() {
        let d = MockDownlink::new();
        assert!(matches!(d.get("Device.X"), Err(DownlinkError::Transport(_))));
    }
}

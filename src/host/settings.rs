//! Live per-host settings lookup.
//!
//! Patterns are matched by the longest suffix of whole domain labels, with
//! `*` as the fallback. The table is swapped atomically on reload, so lookups
//! on the dispatch path never wait on a writer.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::{HostSettings, DEFAULT_HOST_PATTERN};

#[derive(Debug)]
pub struct SettingsStore {
    table: ArcSwap<HashMap<String, Arc<HostSettings>>>,
}

impl SettingsStore {
    pub fn new(hosts: &HashMap<String, HostSettings>) -> Self {
        Self {
            table: ArcSwap::from_pointee(Self::build(hosts)),
        }
    }

    fn build(hosts: &HashMap<String, HostSettings>) -> HashMap<String, Arc<HostSettings>> {
        hosts
            .iter()
            .map(|(pattern, settings)| (pattern.to_ascii_lowercase(), Arc::new(settings.clone())))
            .collect()
    }

    /// Replace the whole table.
    pub fn replace(&self, hosts: &HashMap<String, HostSettings>) {
        self.table.store(Arc::new(Self::build(hosts)));
        tracing::info!(patterns = hosts.len(), "Host settings reloaded");
    }

    /// Settings for `host`: the most specific matching pattern, else `*`, else defaults.
    pub fn lookup(&self, host: &str) -> Arc<HostSettings> {
        let table = self.table.load();
        let host = host.to_ascii_lowercase();

        let mut candidate = host.as_str();
        loop {
            if let Some(settings) = table.get(candidate) {
                return settings.clone();
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => break,
            }
        }

        table
            .get(DEFAULT_HOST_PATTERN)
            .cloned()
            .unwrap_or_else(|| Arc::new(HostSettings::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max: usize) -> HostSettings {
        HostSettings {
            max_connections_per_host: max,
            ..HostSettings::default()
        }
    }

    #[test]
    fn test_longest_suffix_wins() {
        let mut hosts = HashMap::new();
        hosts.insert("*".to_string(), settings(1));
        hosts.insert("example.com".to_string(), settings(2));
        hosts.insert("api.example.com".to_string(), settings(3));
        let store = SettingsStore::new(&hosts);

        assert_eq!(store.lookup("v1.api.example.com").max_connections_per_host, 3);
        assert_eq!(store.lookup("API.example.com").max_connections_per_host, 3);
        assert_eq!(store.lookup("www.example.com").max_connections_per_host, 2);
        assert_eq!(store.lookup("example.org").max_connections_per_host, 1);
    }

    #[test]
    fn test_label_boundaries_respected() {
        let mut hosts = HashMap::new();
        hosts.insert("ample.com".to_string(), settings(9));
        let store = SettingsStore::new(&hosts);
        assert_eq!(
            store.lookup("example.com").max_connections_per_host,
            HostSettings::default().max_connections_per_host
        );
    }

    #[test]
    fn test_replace() {
        let mut hosts = HashMap::new();
        hosts.insert("*".to_string(), settings(1));
        let store = SettingsStore::new(&hosts);
        hosts.insert("*".to_string(), settings(4));
        store.replace(&hosts);
        assert_eq!(store.lookup("anything").max_connections_per_host, 4);
    }
}

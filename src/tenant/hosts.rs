//! # Host Cache
//!
//! Maps host IPs to their agent version and entity id.
//!
//! The cache is rebuilt from a full host listing on every miss. Readers may
//! observe a stale map while another task rebuilds it.

use crate::tenant::client::HostResponse;
use crate::tenant::types::HostInfo;
use std::collections::HashMap;
use std::sync::RwLock;

/// Hosts not seen for longer than this are ignored
const HOST_STALE_AFTER_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, Default)]
pub struct HostCache {
    hosts: RwLock<HashMap<String, HostInfo>>,
}

impl HostCache {
    pub fn get(&self, ip: &str) -> Option<HostInfo> {
        self.hosts
            .read()
            .ok()
            .and_then(|hosts| hosts.get(ip).cloned())
    }

    pub fn replace(&self, hosts: HashMap<String, HostInfo>) {
        if let Ok(mut guard) = self.hosts.write() {
            *guard = hosts;
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.read().map_or(0, |hosts| hosts.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the ip map from a host listing
pub fn build_host_map(
    hosts: Vec<HostResponse>,
    network_zone: Option<&str>,
    now_ms: i64,
) -> HashMap<String, HostInfo> {
    let mut map = HashMap::new();
    for host in hosts {
        let Some(version) = host.agent_version.as_ref().map(ToString::to_string) else {
            continue;
        };
        if now_ms.saturating_sub(host.last_seen_timestamp) > HOST_STALE_AFTER_MS {
            continue;
        }
        if !zone_matches(host.network_zone_id.as_deref(), network_zone) {
            continue;
        }
        for ip in host.ip_addresses {
            map.insert(
                ip,
                HostInfo {
                    version: version.clone(),
                    entity_id: host.entity_id.clone(),
                },
            );
        }
    }
    map
}

fn zone_matches(host_zone: Option<&str>, configured: Option<&str>) -> bool {
    match configured.filter(|z| !z.is_empty()) {
        Some(zone) => host_zone == Some(zone),
        None => matches!(host_zone, None | Some("" | "default")),
    }
}

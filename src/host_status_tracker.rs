//! Host Status Tracker
//!
//! Tracks host liveness from the traffic hosts publish (ping, response and
//! error topics). Only transitions produce events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Host connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostConnectionStatus {
    /// Nothing heard yet
    Unknown,
    Online,
    Offline,
}

/// Host status transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostStatusEvent {
    /// Online (or Unknown) to Offline
    Lost,
    /// Offline to Online
    Recovered,
}

/// Status snapshot for the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatus {
    pub host_id: String,
    pub status: HostConnectionStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct HostEntry {
    status: HostConnectionStatus,
    last_seen: Option<DateTime<Utc>>,
}

impl Default for HostEntry {
    fn default() -> Self {
        Self {
            status: HostConnectionStatus::Unknown,
            last_seen: None,
        }
    }
}

/// Tracks host status and detects transitions
pub struct HostStatusTracker {
    hosts: RwLock<HashMap<String, HostEntry>>,
}

impl HostStatusTracker {
    pub fn new() -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Update host status and return transition event if any
    ///
    /// - `Some(Lost)` for Online -> Offline and Unknown -> Offline
    /// - `Some(Recovered)` for Offline -> Online
    /// - `None` otherwise
    pub async fn update_status(&self, host_id: &str, is_online: bool) -> Option<HostStatusEvent> {
        let mut hosts = self.hosts.write().await;
        let entry = hosts.entry(host_id.to_string()).or_default();
        if is_online {
            entry.last_seen = Some(Utc::now());
        }
        transition(host_id, entry, is_online)
    }

    /// Record traffic from a host; marks it Online
    pub async fn mark_seen(&self, host_id: &str) -> Option<HostStatusEvent> {
        self.update_status(host_id, true).await
    }

    /// Mark Online hosts not seen within `max_age` as Offline
    ///
    /// Hosts never seen stay Unknown.
    pub async fn sweep_stale(&self, max_age: Duration) -> Vec<(String, HostStatusEvent)> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut hosts = self.hosts.write().await;

        let mut events = Vec::new();
        for (host_id, entry) in hosts.iter_mut() {
            let Some(last_seen) = entry.last_seen else {
                continue;
            };
            if entry.status == HostConnectionStatus::Online && now - last_seen > max_age {
                if let Some(event) = transition(host_id, entry, false) {
                    events.push((host_id.clone(), event));
                }
            }
        }
        events
    }

    pub async fn get_status(&self, host_id: &str) -> HostStatus {
        let hosts = self.hosts.read().await;
        let entry = hosts.get(host_id).cloned().unwrap_or_default();
        HostStatus {
            host_id: host_id.to_string(),
            status: entry.status,
            last_seen: entry.last_seen,
        }
    }

    pub async fn get_all(&self) -> Vec<HostStatus> {
        let mut all: Vec<HostStatus> = self
            .hosts
            .read()
            .await
            .iter()
            .map(|(id, e)| HostStatus {
                host_id: id.clone(),
                status: e.status,
                last_seen: e.last_seen,
            })
            .collect();
        all.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        all
    }

    /// Remove host from tracking (e.g., when deleted)
    pub async fn remove(&self, host_id: &str) {
        self.hosts.write().await.remove(host_id);
    }
}

impl Default for HostStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn transition(host_id: &str, entry: &mut HostEntry, is_online: bool) -> Option<HostStatusEvent> {
    let prev = entry.status;
    entry.status = if is_online {
        HostConnectionStatus::Online
    } else {
        HostConnectionStatus::Offline
    };

    match (prev, entry.status) {
        (HostConnectionStatus::Online, HostConnectionStatus::Offline) => {
            tracing::warn!(host_id = %host_id, "Host connection lost");
            Some(HostStatusEvent::Lost)
        }
        (HostConnectionStatus::Unknown, HostConnectionStatus::Offline) => {
            tracing::warn!(host_id = %host_id, "Host never reported - marking as lost");
            Some(HostStatusEvent::Lost)
        }
        (HostConnectionStatus::Offline, HostConnectionStatus::Online) => {
            tracing::info!(host_id = %host_id, "Host connection recovered");
            Some(HostStatusEvent::Recovered)
        }
        _ => None,
    }
}

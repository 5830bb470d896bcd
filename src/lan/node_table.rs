//! The LAN roster: who else is out there.
//!
//! One writer (the receive loop) and many readers (the `/lan/roster` HTTP
//! handler, periodic reaping) make this the same read-mostly shape the
//! teacher reaches for with `concread::CowCell` elsewhere; readers get a
//! consistent snapshot with no lock contention against the writer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use concread::cowcell::asynch::CowCell;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct LanNode {
    pub name: String,
    pub ip: IpAddr,
    pub http_port: u16,
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// A roster entry with its age computed at snapshot time, for `/lan/roster`.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub name: String,
    pub ip: IpAddr,
    pub http_port: u16,
    pub age_seconds: u64,
}

pub struct NodeTable {
    cell: CowCell<HashMap<IpAddr, LanNode>>,
}

impl NodeTable {
    pub fn new() -> Self {
        NodeTable {
            cell: CowCell::new(HashMap::new()),
        }
    }

    /// Records (or refreshes the last-seen time of) a peer learned from a
    /// ping, pong, rq, or result.
    pub async fn refresh(&self, ip: IpAddr, name: String, http_port: u16) {
        let mut txn = self.cell.write().await;
        txn.insert(
            ip,
            LanNode {
                name,
                ip,
                http_port,
                last_seen: Some(Instant::now()),
            },
        );
        txn.commit().await;
    }

    /// Drops a peer immediately, on receipt of a `pang`.
    pub async fn remove(&self, ip: IpAddr) {
        let mut txn = self.cell.write().await;
        txn.remove(&ip);
        txn.commit().await;
    }

    /// A point-in-time snapshot of the roster, for the HTTP handler.
    pub async fn roster(&self) -> Vec<LanNode> {
        let txn = self.cell.read().await;
        txn.values().cloned().collect()
    }

    /// Like [`Self::roster`], but with each entry's age (seconds since last
    /// ping/pong) computed at snapshot time.
    pub async fn roster_snapshot(&self) -> Vec<RosterEntry> {
        let now = Instant::now();
        let txn = self.cell.read().await;
        txn.values()
            .map(|node| RosterEntry {
                name: node.name.clone(),
                ip: node.ip,
                http_port: node.http_port,
                age_seconds: node
                    .last_seen
                    .map(|seen| now.duration_since(seen).as_secs())
                    .unwrap_or(0),
            })
            .collect()
    }

    /// Evicts nodes that haven't been heard from within `ttl`.
    pub async fn reap(&self, ttl: Duration) {
        let now = Instant::now();
        let mut txn = self.cell.write().await;
        let stale: Vec<IpAddr> = txn
            .iter()
            .filter(|(_, node)| {
                node.last_seen
                    .map(|seen| now.duration_since(seen) > ttl)
                    .unwrap_or(false)
            })
            .map(|(ip, _)| *ip)
            .collect();
        for ip in stale {
            txn.remove(&ip);
        }
        txn.commit().await;
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refresh_then_remove_round_trips() {
        let table = NodeTable::new();
        let ip: IpAddr = "192.168.1.5".parse().unwrap();
        table.refresh(ip, "node-a".to_string(), 8888).await;

        let roster = table.roster().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "node-a");

        table.remove(ip).await;
        assert!(table.roster().await.is_empty());
    }

    #[tokio::test]
    async fn reap_evicts_stale_entries_only() {
        let table = NodeTable::new();
        let stale_ip: IpAddr = "192.168.1.5".parse().unwrap();
        let fresh_ip: IpAddr = "192.168.1.6".parse().unwrap();
        table.refresh(stale_ip, "stale".to_string(), 8888).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        table.refresh(fresh_ip, "fresh".to_string(), 8888).await;

        table.reap(Duration::from_millis(10)).await;
        let roster = table.roster().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "fresh");
    }
}

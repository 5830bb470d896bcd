//! Wire format for the LAN gossip protocol: the HTTP port rides along in
//! ping/pong so peers know where to reach each node's JSON API, and a
//! result's URL is stripped before it goes out and rebuilt by the receiver
//! from the sender's own address.
//!
//! One JSON object per UDP datagram, to stay consistent with the JSON the
//! HTTP API already speaks and avoid a second codec.

use serde::{Deserialize, Serialize};

use crate::model::{Qid, Query, Ri};

/// One LAN datagram. `_msgtype` is the discriminator field on the wire,
/// matching the original protocol's naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_msgtype", rename_all = "lowercase")]
pub enum Envelope {
    Ping(Ping),
    Pong(Pong),
    /// Sent best-effort on graceful shutdown so peers drop this node from
    /// their roster without waiting out the full TTL.
    Pang(Pang),
    /// A query relayed onto the LAN, asking peers to resolve it.
    Rq(Rq),
    /// A result relayed back to whichever node asked.
    Result(ResultMsg),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub name: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    pub name: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pang {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rq {
    pub qid: Qid,
    pub query: Query,
    /// So the receiving node knows where to reach our HTTP API for any
    /// `result` it sends back, and for roster purposes.
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMsg {
    pub qid: Qid,
    /// `ri.url` is always `None` on the wire: the sender strips it (it
    /// would be meaningless off-node) and the receiver rebuilds it from
    /// the UDP source address plus `http_port`.
    pub ri: Ri,
    pub http_port: u16,
}

impl ResultMsg {
    /// Strips `ri.url` before sending, per the wire contract above.
    pub fn new(qid: Qid, mut ri: Ri, http_port: u16) -> Self {
        ri.url = None;
        ResultMsg { qid, ri, http_port }
    }
}

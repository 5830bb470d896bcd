//! The LAN resolver: UDP multicast gossip of presence and queries between
//! Playdar nodes on the same network.

pub mod messages;
pub mod node_table;

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, trace, warn};

use crate::config::ConfigFile;
use crate::model::{Qid, Ri};
use crate::platform::Platform;
use crate::resolver::Resolver;

use messages::{Envelope, Pang, Ping, Pong, ResultMsg, Rq};
use node_table::NodeTable;

const PING_INTERVAL: Duration = Duration::from_secs(60);
const REAP_INTERVAL: Duration = Duration::from_secs(30);
/// Upper bound on a datagram we'll *read*; generous, since malformed or
/// oversized traffic from other implementations is simply dropped, not a
/// reason to truncate our own receive buffer.
const MAX_DATAGRAM: usize = 65_507;
/// Spec §4.E: "Payload size ≤ 1500 bytes; larger outgoing payloads are
/// refused (not truncated)." This caps only what *we* send.
const MAX_OUTBOUND_PAYLOAD: usize = 1500;

/// Enumerates this host's own addresses, so gossip we receive that
/// originated from ourselves (multicast loopback, or a reflection off the
/// router) is dropped instead of re-processed.
fn local_addresses() -> HashSet<IpAddr> {
    let mut addrs = HashSet::new();
    addrs.insert(IpAddr::V4(Ipv4Addr::LOCALHOST));
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces {
                addrs.insert(iface.ip());
            }
        }
        Err(err) => warn!(%err, "could not enumerate local interfaces for LAN self-ignore"),
    }
    addrs
}

pub struct LanResolver {
    name: String,
    socket: Arc<UdpSocket>,
    node_table: Arc<NodeTable>,
    local_addrs: HashSet<IpAddr>,
    numcopies: u8,
    multicast_group: Ipv4Addr,
    listenport: u16,
    http_port: u16,
    unicast_endpoints: Vec<SocketAddr>,
    /// Set once, from `init`. `start_resolving` needs registry access to
    /// fetch the query it's being asked to resolve and is only ever called
    /// after `init` has run, so this is always populated by then.
    platform: tokio::sync::OnceCell<Platform>,
}

impl LanResolver {
    /// Binds the UDP socket and joins the multicast group. Must run before
    /// the resolver is handed to the pipeline.
    pub async fn bind(config: &ConfigFile) -> std::io::Result<Self> {
        let bind_addr = config.udp_listener_address().map_err(std::io::Error::from)?;
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        socket.join_multicast_v4(config.multicast_group, Ipv4Addr::UNSPECIFIED)?;

        let unicast_endpoints = config
            .endpoints
            .iter()
            .filter_map(|entry| resolve_endpoint(entry, config.listenport))
            .collect();

        Ok(LanResolver {
            name: config.name.clone(),
            socket: Arc::new(socket),
            node_table: Arc::new(NodeTable::new()),
            local_addrs: local_addresses(),
            numcopies: config.numcopies.max(1),
            multicast_group: config.multicast_group,
            listenport: config.listenport,
            http_port: config.http_port,
            unicast_endpoints,
            platform: tokio::sync::OnceCell::new(),
        })
    }

    pub fn node_table(&self) -> Arc<NodeTable> {
        self.node_table.clone()
    }

    fn is_self(&self, addr: &SocketAddr) -> bool {
        self.local_addrs.contains(&addr.ip())
    }

    /// Encodes `envelope`, refusing (not truncating) anything over the
    /// outbound payload cap.
    fn encode(envelope: &Envelope) -> Option<Vec<u8>> {
        let payload = match serde_json::to_vec(envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "failed to encode LAN envelope");
                return None;
            }
        };
        if payload.len() > MAX_OUTBOUND_PAYLOAD {
            warn!(len = payload.len(), "LAN envelope too large to send, dropping");
            return None;
        }
        Some(payload)
    }

    /// Sends an already-encoded `payload` to `target`, `numcopies` times
    /// (redundancy against UDP loss, per the original protocol's design). A
    /// free function rather than a method so the result-echo task (which
    /// only holds a cloned socket handle, not a whole `LanResolver`) can
    /// call it too.
    async fn send_payload(socket: &UdpSocket, numcopies: u8, payload: &[u8], target: SocketAddr) {
        for _ in 0..numcopies {
            if let Err(err) = socket.send_to(payload, target).await {
                warn!(%err, %target, "LAN send failed");
            }
        }
    }

    /// Sends `envelope` to the multicast group and any configured unicast
    /// endpoints.
    async fn send(&self, envelope: &Envelope) {
        let Some(payload) = Self::encode(envelope) else {
            return;
        };

        let multicast_target = SocketAddr::new(IpAddr::V4(self.multicast_group), self.listenport);
        let mut targets = vec![multicast_target];
        targets.extend(self.unicast_endpoints.iter().copied());

        for target in &targets {
            Self::send_payload(&self.socket, self.numcopies, &payload, *target).await;
        }
    }

    async fn send_ping(&self) {
        self.send(&Envelope::Ping(Ping {
            name: self.name.clone(),
            http_port: self.http_port,
        }))
        .await;
    }

    /// Best-effort departure notice, used on graceful shutdown.
    pub async fn send_pang(&self) {
        self.send(&Envelope::Pang(Pang {
            name: self.name.clone(),
        }))
        .await;
    }

    fn spawn_ping_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let resolver = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(PING_INTERVAL);
            loop {
                ticker.tick().await;
                resolver.send_ping().await;
            }
        })
    }

    /// Reaps at `min(REAP_INTERVAL, ttl)` so a TTL configured shorter than
    /// the default cadence is still honored — otherwise a stale node could
    /// sit in the roster past its TTL between ticks.
    fn spawn_reap_loop(self: &Arc<Self>, ttl: Duration) -> tokio::task::JoinHandle<()> {
        let node_table = self.node_table.clone();
        tokio::spawn(async move {
            let mut ticker = interval(REAP_INTERVAL.min(ttl));
            loop {
                ticker.tick().await;
                node_table.reap(ttl).await;
            }
        })
    }

    fn spawn_receive_loop(self: &Arc<Self>, platform: Platform) -> tokio::task::JoinHandle<()> {
        let resolver = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                if platform.is_shutting_down() {
                    break;
                }
                let (len, src) = match resolver.socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "LAN recv_from failed");
                        continue;
                    }
                };
                if resolver.is_self(&src) {
                    continue;
                }
                let envelope: Envelope = match serde_json::from_slice(&buf[..len]) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        trace!(%err, %src, "ignoring malformed LAN datagram");
                        continue;
                    }
                };
                resolver.handle_envelope(&platform, src, envelope).await;
            }
        })
    }

    async fn handle_envelope(&self, platform: &Platform, src: SocketAddr, envelope: Envelope) {
        match envelope {
            Envelope::Ping(ping) => {
                // Authoritative self-ignore (spec §4.E/§9): the IP-set check
                // in the receive loop is only an optimization; `from_name ==
                // self` is what actually must hold, since multiple of our
                // own addresses (or NAT/multicast reflection) could expose a
                // ping as if from an unrecognized peer.
                if ping.name == self.name {
                    trace!(%src, "ignoring our own ping");
                    return;
                }
                self.node_table.refresh(src.ip(), ping.name, ping.http_port).await;
                self.send(&Envelope::Pong(Pong {
                    name: self.name.clone(),
                    http_port: self.http_port,
                }))
                .await;
            }
            Envelope::Pong(pong) => {
                if pong.name == self.name {
                    trace!(%src, "ignoring our own pong");
                    return;
                }
                self.node_table.refresh(src.ip(), pong.name, pong.http_port).await;
            }
            Envelope::Pang(pang) => {
                debug!(node = %pang.name, %src, "peer announced departure");
                self.node_table.remove(src.ip()).await;
            }
            Envelope::Rq(rq) => self.handle_rq(platform, src, rq).await,
            Envelope::Result(result) => self.handle_result(platform, src, result).await,
        }
    }

    /// A peer is asking the LAN to resolve a query. We never re-offer it
    /// to our own LAN resolver (that would loop the multicast forever);
    /// every *other* local resolver gets a chance to answer, and any hit
    /// is reported back as a `result` aimed at the query's origin.
    async fn handle_rq(&self, platform: &Platform, src: SocketAddr, rq: Rq) {
        // The responder is a UDP endpoint to echo `result` datagrams back
        // to, not an HTTP one — `src` is exactly that (the datagram's own
        // source address), regardless of whatever HTTP port the peer
        // advertises in the query body.
        let (qid, outcome) = platform
            .registry()
            .register_with_responder(rq.query, Some(src))
            .await;
        if outcome == crate::registry::RegisterOutcome::AlreadyExists {
            trace!(%qid, "ignoring duplicate rq for an already-live query");
            return;
        }
        debug!(%qid, %src, "received rq, offering to local resolvers");
        self.spawn_result_echo(platform.clone(), qid, src);
        for resolver in platform.resolvers() {
            if resolver.name() == self.name {
                continue;
            }
            platform.registry().mark_offered(qid, resolver.name()).await;
            resolver.start_resolving(qid).await;
        }
    }

    /// Implements the "callback bound to the originating UDP endpoint" of
    /// spec §4.B: every RI subsequently accepted for `qid` — including
    /// whatever's already in its prefix by the time we subscribe — is sent
    /// to `origin` as a `result` datagram, url stripped, until the query is
    /// reaped (the registry's broadcast sender drops, ending the
    /// subscription with `RecvError::Closed`).
    fn spawn_result_echo(&self, platform: Platform, qid: Qid, origin: SocketAddr) {
        let socket = self.socket.clone();
        let numcopies = self.numcopies;
        let http_port = self.http_port;
        tokio::spawn(async move {
            let Some((prefix, mut rx)) = platform.registry().subscribe(qid).await else {
                return;
            };
            for ri in prefix {
                Self::echo_result(&socket, numcopies, http_port, origin, qid, ri).await;
            }
            loop {
                match rx.recv().await {
                    Ok(ri) => Self::echo_result(&socket, numcopies, http_port, origin, qid, ri).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn echo_result(
        socket: &UdpSocket,
        numcopies: u8,
        http_port: u16,
        target: SocketAddr,
        qid: Qid,
        ri: Ri,
    ) {
        let envelope = Envelope::Result(ResultMsg::new(qid, ri, http_port));
        if let Some(payload) = Self::encode(&envelope) {
            Self::send_payload(socket, numcopies, &payload, target).await;
        }
    }

    /// A peer is reporting a result for a query we (or another node whose
    /// rq we relayed) dispatched. The URL was stripped before transit; we
    /// rebuild it from the sender's address and announced HTTP port.
    async fn handle_result(&self, platform: &Platform, src: SocketAddr, result: ResultMsg) {
        if !platform.registry().query_exists(result.qid).await {
            trace!(qid = %result.qid, "dropping result for unknown/expired qid");
            return;
        }
        let mut ri = result.ri;
        ri.url = Some(format!(
            "http://{}:{}/sid/{}",
            src.ip(),
            result.http_port,
            ri.sid
        ));
        let threshold = platform.config().solve_threshold;
        platform
            .registry()
            .report_results(result.qid, vec![ri], threshold)
            .await;
    }
}

fn resolve_endpoint(entry: &str, default_port: u16) -> Option<SocketAddr> {
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Some(addr);
    }
    entry
        .parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, default_port))
}

#[async_trait]
impl Resolver for LanResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> u16 {
        100
    }

    fn target_time_ms(&self) -> u32 {
        3000
    }

    async fn init(&self, platform: Platform) -> bool {
        self.platform.set(platform).is_ok()
    }

    /// Relays `qid`'s query onto the LAN as an `rq`, so peers can offer it
    /// to their own resolvers. Any hits come back asynchronously as
    /// `result` datagrams, handled by [`Self::handle_result`].
    async fn start_resolving(&self, qid: Qid) {
        let Some(platform) = self.platform.get() else {
            warn!("LAN resolver asked to resolve before init() ran");
            return;
        };
        let Some(query) = platform.registry().get_query(qid).await else {
            trace!(%qid, "query vanished before LAN dispatch could run");
            return;
        };
        self.send(&Envelope::Rq(Rq {
            qid,
            query,
            http_port: self.http_port,
        }))
        .await;
    }

    async fn cancel_query(&self, qid: Qid) {
        trace!(%qid, "LAN resolver cannot cancel in-flight multicast sends");
    }
}

/// Spawns the resolver's background tasks (ping loop, reap loop, receive
/// loop) against a concrete [`Platform`], and returns a single supervisory
/// handle that finishes as soon as any one of them does — `main`'s
/// `Servers::any_finished` treats that as a sign the daemon should shut
/// down rather than keep running half its LAN subsystem. Called once from
/// `main` after the registry and HTTP server are up, since the receive
/// loop needs the full resolver list (to offer incoming `rq`s to siblings)
/// already in place.
pub fn spawn_supervised(
    resolver: Arc<LanResolver>,
    platform: Platform,
    lan_node_ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    let ping = resolver.spawn_ping_loop();
    let reap = resolver.spawn_reap_loop(lan_node_ttl);
    let receive = resolver.spawn_receive_loop(platform);

    tokio::spawn(async move {
        tokio::select! {
            _ = ping => warn!("LAN ping loop exited"),
            _ = reap => warn!("LAN node-table reap loop exited"),
            _ = receive => warn!("LAN receive loop exited"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::{Candidate, Query, Ri, Sid};

    fn test_config(name: &str) -> ConfigFile {
        ConfigFile {
            name: name.to_string(),
            listenip: "0.0.0.0".to_string(),
            listenport: 0, // OS-assigned, so parallel tests don't collide
            http_port: 8888,
            ..ConfigFile::default()
        }
    }

    fn sample_query() -> Query {
        Query::new(Candidate {
            artist: "Joy Division".to_string(),
            album: None,
            track: "Atmosphere".to_string(),
        })
    }

    struct CountingResolver {
        name: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Resolver for CountingResolver {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start_resolving(&self, _qid: Qid) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn test_platform(resolvers: Vec<Arc<dyn Resolver>>) -> Platform {
        let registry = crate::registry::spawn(Duration::from_secs(60));
        Platform::new(test_config("platform-under-test"), registry, resolvers, None)
    }

    #[tokio::test]
    async fn ping_records_peer_in_node_table() {
        let resolver = LanResolver::bind(&test_config("nodeB")).await.expect("bind");
        let platform = test_platform(vec![]).await;
        let src: SocketAddr = "10.0.0.5:60210".parse().unwrap();

        resolver
            .handle_envelope(
                &platform,
                src,
                Envelope::Ping(Ping {
                    name: "nodeA".to_string(),
                    http_port: 8888,
                }),
            )
            .await;

        let roster = resolver.node_table().roster().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "nodeA");
        assert_eq!(roster[0].ip, src.ip());
        assert_eq!(roster[0].http_port, 8888);
    }

    #[tokio::test]
    async fn pang_removes_the_peer() {
        let resolver = LanResolver::bind(&test_config("nodeB")).await.expect("bind");
        let platform = test_platform(vec![]).await;
        let src: SocketAddr = "10.0.0.5:60210".parse().unwrap();

        resolver
            .handle_envelope(
                &platform,
                src,
                Envelope::Pong(Pong {
                    name: "nodeA".to_string(),
                    http_port: 8888,
                }),
            )
            .await;
        assert_eq!(resolver.node_table().roster().await.len(), 1);

        resolver
            .handle_envelope(
                &platform,
                src,
                Envelope::Pang(Pang {
                    name: "nodeA".to_string(),
                }),
            )
            .await;
        assert!(resolver.node_table().roster().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_rq_is_dropped_without_a_second_dispatch() {
        let resolver = LanResolver::bind(&test_config("nodeA")).await.expect("bind");
        let mock = Arc::new(CountingResolver {
            name: "mock".to_string(),
            calls: AtomicUsize::new(0),
        });
        let platform = test_platform(vec![mock.clone()]).await;

        let query = sample_query();
        let qid = query.qid();
        // Simulate node A having already dispatched this query locally.
        let (registered_qid, outcome) = platform.registry().register(query.clone()).await;
        assert_eq!(registered_qid, qid);
        assert_eq!(outcome, crate::registry::RegisterOutcome::Created);

        let sender: SocketAddr = "10.0.0.9:60210".parse().unwrap();
        resolver
            .handle_rq(
                &platform,
                sender,
                Rq {
                    qid,
                    query,
                    http_port: 8888,
                },
            )
            .await;

        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
        assert!(platform.registry().origin_responder(qid).await.is_none());
    }

    #[tokio::test]
    async fn remote_result_is_rewritten_to_the_senders_sid_url() {
        let resolver = LanResolver::bind(&test_config("nodeA")).await.expect("bind");
        let platform = test_platform(vec![]).await;

        let query = sample_query();
        let (qid, _) = platform.registry().register(query).await;

        let sender: SocketAddr = "10.0.0.2:54321".parse().unwrap();
        let ri = Ri {
            source: "nodeB".to_string(),
            score: 0.95,
            bitrate: 320,
            duration_ms: 210_000,
            size_bytes: 8_000_000,
            mimetype: "audio/mpeg".to_string(),
            artist: "Joy Division".to_string(),
            album: None,
            track: "Atmosphere".to_string(),
            sid: Sid("s1".to_string()),
            url: None,
        };

        resolver
            .handle_result(
                &platform,
                sender,
                ResultMsg::new(qid, ri, 8889),
            )
            .await;

        let found = platform
            .registry()
            .locate_sid(Sid("s1".to_string()))
            .await
            .expect("result should be registered");
        assert_eq!(found.url.as_deref(), Some("http://10.0.0.2:8889/sid/s1"));
    }

    #[tokio::test]
    async fn result_for_unknown_qid_is_dropped() {
        let resolver = LanResolver::bind(&test_config("nodeA")).await.expect("bind");
        let platform = test_platform(vec![]).await;

        let ri = Ri {
            source: "nodeB".to_string(),
            score: 0.95,
            bitrate: 320,
            duration_ms: 210_000,
            size_bytes: 8_000_000,
            mimetype: "audio/mpeg".to_string(),
            artist: "Joy Division".to_string(),
            album: None,
            track: "Atmosphere".to_string(),
            sid: Sid("s1".to_string()),
            url: None,
        };
        let bogus_qid = Qid(uuid::Uuid::new_v4());
        resolver
            .handle_result(
                &platform,
                "10.0.0.2:54321".parse().unwrap(),
                ResultMsg::new(bogus_qid, ri, 8889),
            )
            .await;

        assert!(platform.registry().locate_sid(Sid("s1".to_string())).await.is_none());
    }

    #[tokio::test]
    async fn ping_with_own_name_is_ignored_even_from_an_unrecognized_address() {
        let resolver = LanResolver::bind(&test_config("nodeA")).await.expect("bind");
        let platform = test_platform(vec![]).await;
        // An address not in `local_addrs`, so only the name check can catch this.
        let src: SocketAddr = "10.0.0.77:60210".parse().unwrap();

        resolver
            .handle_envelope(
                &platform,
                src,
                Envelope::Ping(Ping {
                    name: "nodeA".to_string(),
                    http_port: 8888,
                }),
            )
            .await;

        assert!(resolver.node_table().roster().await.is_empty());
    }

    #[tokio::test]
    async fn handle_rq_echoes_accepted_results_back_to_the_udp_origin() {
        let resolver = LanResolver::bind(&test_config("nodeA")).await.expect("bind");
        let platform = test_platform(vec![]).await;

        let origin_socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind origin socket");
        let origin_addr = origin_socket.local_addr().expect("origin addr");

        let query = sample_query();
        let qid = query.qid();
        resolver
            .handle_rq(
                &platform,
                origin_addr,
                Rq {
                    qid,
                    query,
                    http_port: 8888,
                },
            )
            .await;

        let ri = Ri {
            source: "local".to_string(),
            score: 0.8,
            bitrate: 320,
            duration_ms: 210_000,
            size_bytes: 8_000_000,
            mimetype: "audio/mpeg".to_string(),
            artist: "Joy Division".to_string(),
            album: None,
            track: "Atmosphere".to_string(),
            sid: Sid("s1".to_string()),
            url: None,
        };
        platform.registry().report_results(qid, vec![ri], 1.0).await;

        let mut buf = vec![0u8; 2048];
        let (len, _) =
            tokio::time::timeout(Duration::from_secs(1), origin_socket.recv_from(&mut buf))
                .await
                .expect("echoed result should arrive within the timeout")
                .expect("recv_from");
        let envelope: Envelope = serde_json::from_slice(&buf[..len]).expect("valid JSON");
        match envelope {
            Envelope::Result(result) => {
                assert_eq!(result.qid, qid);
                assert_eq!(result.ri.sid, Sid("s1".to_string()));
                assert!(result.ri.url.is_none(), "url must be stripped on the wire");
            }
            other => panic!("expected a result envelope, got {other:?}"),
        }
    }

    #[test]
    fn encode_refuses_payloads_over_the_outbound_cap() {
        let oversized_name = "x".repeat(MAX_OUTBOUND_PAYLOAD + 1);
        let envelope = Envelope::Ping(Ping {
            name: oversized_name,
            http_port: 8888,
        });
        assert!(LanResolver::encode(&envelope).is_none());
    }
}

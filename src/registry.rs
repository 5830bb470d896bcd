//! The query registry: process-wide map of live queries, their
//! accumulated results, and subscribers. Spec §4.B.
//!
//! Modeled directly on the teacher's `datastore::manager`: a single task
//! owns all mutable state and answers requests sent over an `mpsc` channel,
//! each carrying a `oneshot` responder. No locks, because only one task
//! ever touches the `HashMap`s.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace};

use crate::model::{Qid, Ri, Sid};

/// Broadcast channel capacity for a single query's result stream. Generous
/// enough that a slow subscriber won't be dropped mid-burst in practice;
/// if it lags, it just loses ordering guarantees for the skipped entries,
/// which can't happen once it has caught up to the append-only tail.
const RESULT_CHANNEL_CAPACITY: usize = 256;

type Responder<T> = oneshot::Sender<T>;

/// Outcome of a dedicated `register` vs the query already being live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A fresh live record was created.
    Created,
    /// The QID was already live; nothing changed.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// `accepted` new RIs were appended (duplicates silently dropped);
    /// `solved` reflects the record's solved flag after this report.
    Accepted { accepted: usize, solved: bool },
    UnknownQid,
}

#[derive(Debug)]
pub enum Command {
    Register {
        query: crate::model::Query,
        responder: Option<SocketAddr>,
        resp: Responder<(Qid, RegisterOutcome)>,
    },
    ReportResults {
        qid: Qid,
        results: Vec<Ri>,
        solve_threshold: f32,
        resp: Responder<ReportOutcome>,
    },
    QueryExists {
        qid: Qid,
        resp: Responder<bool>,
    },
    Results {
        qid: Qid,
        resp: Responder<Option<Vec<Ri>>>,
    },
    BestResult {
        qid: Qid,
        resp: Responder<Option<Ri>>,
    },
    /// Subscribe to a query's result stream: returns the current prefix
    /// plus a broadcast receiver for everything accepted from now on.
    /// `None` if the QID isn't (or is no longer) live.
    Subscribe {
        qid: Qid,
        resp: Responder<Option<(Vec<Ri>, broadcast::Receiver<Ri>)>>,
    },
    LocateSid {
        sid: Sid,
        resp: Responder<Option<Ri>>,
    },
    /// The responding UDP endpoint for a query originated remotely, if any.
    OriginResponder {
        qid: Qid,
        resp: Responder<Option<SocketAddr>>,
    },
    /// The original [`crate::model::Query`] a live QID was registered with,
    /// so a resolver can reconstruct what to ask for (e.g. to serialize a
    /// LAN `rq` message).
    GetQuery {
        qid: Qid,
        resp: Responder<Option<crate::model::Query>>,
    },
    /// Record that `resolver` has been (or is about to be) offered this
    /// query, so a second `dispatch` on the same QID doesn't re-offer it.
    MarkOffered {
        qid: Qid,
        resolver: String,
    },
    /// Best-effort cancellation: returns the resolver names the query was
    /// offered to, so the pipeline can forward `cancel_query` to each.
    Cancel {
        qid: Qid,
        resp: Responder<Vec<String>>,
    },
}

struct LiveQuery {
    query: crate::model::Query,
    results: Vec<Ri>,
    seen: HashSet<(String, Sid)>,
    offered_to: HashSet<String>,
    created_at: Instant,
    responder: Option<SocketAddr>,
    solved: bool,
    tx: broadcast::Sender<Ri>,
}

impl LiveQuery {
    fn new(query: crate::model::Query, responder: Option<SocketAddr>) -> Self {
        let (tx, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        LiveQuery {
            query,
            results: Vec::new(),
            seen: HashSet::new(),
            offered_to: HashSet::new(),
            created_at: Instant::now(),
            responder,
            solved: false,
            tx,
        }
    }
}

/// A cheap, cloneable handle to the registry actor. This is the "platform
/// access" resolvers and HTTP handlers are given — they never see the
/// registry's internal maps, only this channel.
#[derive(Clone)]
pub struct Handle {
    tx: mpsc::Sender<Command>,
}

impl Handle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Handle { tx }
    }

    async fn call<T>(&self, make: impl FnOnce(Responder<T>) -> Command) -> T {
        let (resp_tx, resp_rx) = oneshot::channel();
        let cmd = make(resp_tx);
        if self.tx.send(cmd).await.is_err() {
            panic!("registry actor task has stopped");
        }
        resp_rx.await.expect("registry actor dropped responder")
    }

    /// `register(query) -> QID`: idempotent by QID.
    pub async fn register(&self, query: crate::model::Query) -> (Qid, RegisterOutcome) {
        self.register_with_responder(query, None).await
    }

    /// Like [`Self::register`], but also records a UDP endpoint to echo
    /// new results back to (used by the LAN resolver for remote `rq`s).
    pub async fn register_with_responder(
        &self,
        query: crate::model::Query,
        responder: Option<SocketAddr>,
    ) -> (Qid, RegisterOutcome) {
        self.call(|resp| Command::Register {
            query,
            responder,
            resp,
        })
        .await
    }

    pub async fn report_results(
        &self,
        qid: Qid,
        results: Vec<Ri>,
        solve_threshold: f32,
    ) -> ReportOutcome {
        self.call(|resp| Command::ReportResults {
            qid,
            results,
            solve_threshold,
            resp,
        })
        .await
    }

    pub async fn query_exists(&self, qid: Qid) -> bool {
        self.call(|resp| Command::QueryExists { qid, resp }).await
    }

    pub async fn results(&self, qid: Qid) -> Option<Vec<Ri>> {
        self.call(|resp| Command::Results { qid, resp }).await
    }

    pub async fn best_result(&self, qid: Qid) -> Option<Ri> {
        self.call(|resp| Command::BestResult { qid, resp }).await
    }

    pub async fn subscribe(&self, qid: Qid) -> Option<(Vec<Ri>, broadcast::Receiver<Ri>)> {
        self.call(|resp| Command::Subscribe { qid, resp }).await
    }

    pub async fn locate_sid(&self, sid: Sid) -> Option<Ri> {
        self.call(|resp| Command::LocateSid { sid, resp }).await
    }

    pub async fn origin_responder(&self, qid: Qid) -> Option<SocketAddr> {
        self.call(|resp| Command::OriginResponder { qid, resp }).await
    }

    pub async fn get_query(&self, qid: Qid) -> Option<crate::model::Query> {
        self.call(|resp| Command::GetQuery { qid, resp }).await
    }

    pub async fn mark_offered(&self, qid: Qid, resolver: impl Into<String>) {
        let _ = self
            .tx
            .send(Command::MarkOffered {
                qid,
                resolver: resolver.into(),
            })
            .await;
    }

    pub async fn cancel(&self, qid: Qid) -> Vec<String> {
        self.call(|resp| Command::Cancel { qid, resp }).await
    }
}

/// Runs the registry actor until `rx` closes. Owns every live query and a
/// secondary SID index. A reaper sweep runs on a fixed cadence inside the
/// same select loop, so evictions never race a concurrent command.
pub async fn manager(mut rx: mpsc::Receiver<Command>, ttl: Duration) {
    let mut queries: HashMap<Qid, LiveQuery> = HashMap::new();
    let mut sid_index: HashMap<Sid, Qid> = HashMap::new();
    let mut reap_interval = tokio::time::interval(Duration::from_secs(30).min(ttl));
    reap_interval.tick().await; // first tick fires immediately, skip it

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(cmd) => handle_command(cmd, &mut queries, &mut sid_index),
                    None => break,
                }
            }
            _ = reap_interval.tick() => {
                reap(&mut queries, &mut sid_index, ttl);
            }
        }
    }
}

fn handle_command(
    cmd: Command,
    queries: &mut HashMap<Qid, LiveQuery>,
    sid_index: &mut HashMap<Sid, Qid>,
) {
    match cmd {
        Command::Register {
            query,
            responder,
            resp,
        } => {
            let qid = query.qid();
            let outcome = match queries.contains_key(&qid) {
                true => RegisterOutcome::AlreadyExists,
                false => {
                    queries.insert(qid, LiveQuery::new(query, responder));
                    RegisterOutcome::Created
                }
            };
            let _ = resp.send((qid, outcome));
        }
        Command::ReportResults {
            qid,
            results,
            solve_threshold,
            resp,
        } => {
            let Some(live) = queries.get_mut(&qid) else {
                let _ = resp.send(ReportOutcome::UnknownQid);
                return;
            };
            let mut accepted = 0;
            for ri in results {
                let key = ri.dedupe_key();
                if !live.seen.insert(key) {
                    trace!(%qid, source = %ri.source, sid = %ri.sid, "dropping duplicate RI");
                    continue;
                }
                sid_index.insert(ri.sid.clone(), qid);
                if ri.score >= solve_threshold {
                    live.solved = true;
                }
                live.results.push(ri.clone());
                // A lagging/absent subscriber is not an error: the
                // append-only `results` vec is the durable record, the
                // broadcast channel is only a wake-up mechanism.
                let _ = live.tx.send(ri);
                accepted += 1;
            }
            let _ = resp.send(ReportOutcome::Accepted {
                accepted,
                solved: live.solved,
            });
        }
        Command::QueryExists { qid, resp } => {
            let _ = resp.send(queries.contains_key(&qid));
        }
        Command::Results { qid, resp } => {
            let _ = resp.send(queries.get(&qid).map(|q| q.results.clone()));
        }
        Command::BestResult { qid, resp } => {
            let best = queries.get(&qid).and_then(|q| {
                q.results
                    .iter()
                    .cloned()
                    .max_by(|a, b| a.score.total_cmp(&b.score))
            });
            let _ = resp.send(best);
        }
        Command::Subscribe { qid, resp } => {
            let snapshot = queries
                .get(&qid)
                .map(|q| (q.results.clone(), q.tx.subscribe()));
            let _ = resp.send(snapshot);
        }
        Command::LocateSid { sid, resp } => {
            let ri = sid_index
                .get(&sid)
                .and_then(|qid| queries.get(qid))
                .and_then(|q| q.results.iter().find(|r| r.sid == sid).cloned());
            let _ = resp.send(ri);
        }
        Command::OriginResponder { qid, resp } => {
            let _ = resp.send(queries.get(&qid).and_then(|q| q.responder));
        }
        Command::GetQuery { qid, resp } => {
            let _ = resp.send(queries.get(&qid).map(|q| q.query.clone()));
        }
        Command::MarkOffered { qid, resolver } => {
            if let Some(live) = queries.get_mut(&qid) {
                live.offered_to.insert(resolver);
            }
        }
        Command::Cancel { qid, resp } => {
            let offered = queries
                .get(&qid)
                .map(|q| q.offered_to.iter().cloned().collect())
                .unwrap_or_default();
            let _ = resp.send(offered);
        }
    }
}

/// Evicts records older than `ttl`. Dropping a `LiveQuery` drops its
/// `broadcast::Sender`, which cleanly ends any open subscription.
fn reap(queries: &mut HashMap<Qid, LiveQuery>, sid_index: &mut HashMap<Sid, Qid>, ttl: Duration) {
    let now = Instant::now();
    let expired: Vec<Qid> = queries
        .iter()
        .filter(|(_, q)| now.duration_since(q.created_at) > ttl)
        .map(|(qid, _)| *qid)
        .collect();
    for qid in &expired {
        if let Some(live) = queries.remove(qid) {
            for ri in &live.results {
                sid_index.remove(&ri.sid);
            }
        }
    }
    if !expired.is_empty() {
        debug!(count = expired.len(), "reaped expired live queries");
    }
    if queries.is_empty() && !expired.is_empty() {
        trace!("registry is empty after reap sweep");
    }
}

/// Spawns the registry actor task and returns a [`Handle`] to it.
pub fn spawn(ttl: Duration) -> Handle {
    spawn_supervised(ttl).0
}

/// Like [`spawn`], but also returns the actor task's `JoinHandle` so a
/// process supervisor (`crate::servers::Servers`) can notice if it ever
/// exits unexpectedly.
pub fn spawn_supervised(ttl: Duration) -> (Handle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1024);
    let join = tokio::spawn(manager(rx, ttl));
    (Handle::new(tx), join)
}

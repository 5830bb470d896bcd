//! The dispatcher that turns a [`Query`] into fanned-out resolver work, and
//! the redirect-mode bounded wait built on top of it.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info};

use crate::model::{Query, Qid, Ri};
use crate::platform::Platform;
use crate::registry::RegisterOutcome;

/// How long a redirect-mode query waits for a qualifying result before
/// giving up and returning whatever's best so far (possibly nothing).
pub const REDIRECT_WAIT: Duration = Duration::from_secs(3);

/// Registers `query` and, if it's new, offers it to every resolver in
/// descending weight order (ties broken by ascending target time). A
/// `query` that's already live (same QID dispatched twice, whether from
/// two local callers or a duplicate `rq` over the LAN) is not re-offered:
/// the registry is the single source of truth for "have we seen this".
pub async fn dispatch(
    platform: &Platform,
    query: Query,
    responder: Option<SocketAddr>,
) -> Qid {
    let (qid, outcome) = platform
        .registry()
        .register_with_responder(query, responder)
        .await;

    if outcome == RegisterOutcome::AlreadyExists {
        debug!(%qid, "dispatch: query already live, not re-offering");
        return qid;
    }

    let mut resolvers: Vec<_> = platform.resolvers().iter().collect();
    resolvers.sort_by(|a, b| {
        b.weight()
            .cmp(&a.weight())
            .then(a.target_time_ms().cmp(&b.target_time_ms()))
    });

    info!(%qid, resolvers = resolvers.len(), "dispatching query");
    for resolver in resolvers {
        platform.registry().mark_offered(qid, resolver.name()).await;
        resolver.start_resolving(qid).await;
    }
    qid
}

/// Best-effort cancellation: tells every resolver the query was offered to
/// to stop via `cancel_query`. Does not remove the live record; results
/// that arrive after cancellation are still accepted.
pub async fn cancel(platform: &Platform, qid: Qid) {
    let offered_to = platform.registry().cancel(qid).await;
    for resolver in platform.resolvers() {
        if offered_to.iter().any(|name| name == resolver.name()) {
            resolver.cancel_query(qid).await;
        }
    }
}

/// Dispatches `query` and blocks up to [`REDIRECT_WAIT`] for the first
/// result scoring at or above the configured solve threshold, returning it
/// immediately. If none arrives in time, returns the best result seen so
/// far (which may be `None`).
pub async fn resolve_redirect(platform: &Platform, query: Query) -> Option<Ri> {
    let threshold = platform.config().solve_threshold;
    let qid = dispatch(platform, query, None).await;

    let Some((prefix, mut rx)) = platform.registry().subscribe(qid).await else {
        return None;
    };
    if let Some(hit) = prefix.iter().find(|ri| ri.score >= threshold) {
        return Some(hit.clone());
    }

    let deadline = tokio::time::Instant::now() + REDIRECT_WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(ri)) if ri.score >= threshold => return Some(ri),
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break, // sender dropped: query was reaped mid-wait
            Err(_) => break,     // timed out
        }
    }

    platform.registry().best_result(qid).await
}

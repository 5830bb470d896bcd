//! The resolver capability trait.
//!
//! Rust has no virtual inheritance, so the "resolver plugin" base class of
//! the original is a trait object here. `async_trait` lets the trait carry
//! async methods; every real resolver (today: just [`crate::lan::LanResolver`])
//! is handed to the pipeline as a `Box<dyn Resolver>`.

use async_trait::async_trait;
use bytes::Bytes;

use crate::model::{Qid, Sid};
use crate::platform::Platform;

/// Bytes for a single locally-sourced result, as handed back by
/// [`Resolver::open_bytes`]: the content type/length the stream locator
/// should answer with, plus a stream of chunks.
pub struct ByteSource {
    pub mimetype: String,
    pub size_bytes: Option<u64>,
    pub stream: futures::stream::BoxStream<'static, std::io::Result<Bytes>>,
}

/// One source of candidate results for queries. A resolver is given a
/// [`Platform`] handle at startup and runs its own background work (a
/// socket listener, an HTTP poller, whatever); the pipeline only ever
/// calls `start_resolving` and `cancel_query`.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Stable identifier used in logs, `offered_to` bookkeeping, and the
    /// `source` field of any [`crate::model::Ri`] this resolver produces.
    fn name(&self) -> &str;

    /// Relative priority: resolvers are offered a query in descending
    /// weight order. Ties broken by ascending `target_time_ms`.
    fn weight(&self) -> u16 {
        100
    }

    /// How long the dispatcher should expect this resolver to take before
    /// considering the query likely-answered by it, used only to order
    /// concurrent dispatch; it is not a timeout.
    fn target_time_ms(&self) -> u32 {
        1000
    }

    /// Called once at startup, after the resolver's own background tasks
    /// (if any) are spawned. Returning `false` excludes it from dispatch.
    async fn init(&self, platform: Platform) -> bool {
        let _ = platform;
        true
    }

    /// Begin working on `qid`. Must not block: real work happens in the
    /// resolver's own background task(s), reporting results back through
    /// `platform.registry().report_results(...)`.
    async fn start_resolving(&self, qid: Qid);

    /// Best-effort: stop working on `qid` if still in flight. Resolvers
    /// that can't cancel in-flight work (most can't) are free to no-op.
    async fn cancel_query(&self, qid: Qid) {
        let _ = qid;
    }

    /// Open bytes for an `sid` this resolver is the source of, so the
    /// stream locator (§4.F) can serve them without a network round trip.
    /// The LAN resolver never implements this — its results are always
    /// reached by proxying the peer's own `/sid/<sid>` URL — but a local
    /// library-scanning resolver (out of scope here) would.
    async fn open_bytes(&self, sid: &Sid) -> Option<ByteSource> {
        let _ = sid;
        None
    }

    /// Contributes HTTP endpoints under `/<plugin-name>/...`. Returning
    /// `false` (the default) means this resolver has no HTTP surface of
    /// its own; the LAN resolver's roster lives directly under
    /// `/lan/roster` instead of going through this hook, since it predates
    /// per-plugin route mounting in the original implementation.
    async fn http_handler(&self, path: &str) -> bool {
        let _ = path;
        false
    }
}

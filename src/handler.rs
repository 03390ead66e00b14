//! HTTP enforcement handler.
//!
//! Wraps a single upstream peer with the rate limiter: classifies the
//! inbound request, charges matching limits, and either rejects with a
//! `429` or forwards upstream, in both cases emitting `X-Ratelimit-*`
//! headers. Grounded on `river`'s `MyProxy` (`proxy/mod.rs`) for the
//! `ProxyHttp` shape, and its `response_modifiers::ResponseModifyMod` for
//! how header injection hooks into `upstream_response_filter`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use pingora_core::protocols::l4::socket::SocketAddr;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::Result;
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};

use crate::error::LimitError;
use crate::rate_limiter::{RateLimiter, Status};
use crate::request::Request;

/// Builds a [`Request`] view from an inbound pingora session.
fn request_from_session(session: &Session) -> Request {
    let req_header = session.downstream_session.req_header();
    let mut request = Request::new(req_header.uri.path());

    for (name, value) in req_header.headers.iter() {
        if let Ok(v) = value.to_str() {
            request = request.with_header(name.as_str(), v);
        }
    }

    if let Some(SocketAddr::Inet(addr)) = session.downstream_session.client_addr() {
        request = request.with_remoteaddr(addr.ip());
    }

    request
}

/// The four `X-Ratelimit-*` headers for one reported [`Status`].
struct RatelimitHeaders {
    limit: u64,
    remaining: u64,
    reset: u64,
    bucket: Option<String>,
}

impl RatelimitHeaders {
    fn from_status(status: &Status) -> Self {
        Self {
            limit: status.capacity,
            remaining: status.remaining,
            reset: status.reset_unix(),
            bucket: (!status.is_nil()).then(|| status.name.clone()),
        }
    }

    fn apply(&self, header: &mut ResponseHeader) -> Result<()> {
        header.insert_header("X-Ratelimit-Limit", self.limit.to_string())?;
        header.insert_header("X-Ratelimit-Remaining", self.remaining.to_string())?;
        header.insert_header("X-Ratelimit-Reset", self.reset.to_string())?;
        if let Some(bucket) = &self.bucket {
            header.insert_header("X-Ratelimit-Bucket", bucket.clone())?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RateLimitCtx {
    headers: Option<RatelimitHeaders>,
}

/// What to do with a request once its rate-limit decision is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Delegate to the upstream forwarder.
    Forward,
    /// Write a `429` and stop, without contacting upstream.
    Reject,
}

/// Turns a limiter decision into a forward/reject action, given whether the
/// handler is running in passive (observe-only) mode.
///
/// A full bucket rejects unless passive mode is on. A backend failure fails
/// open: the request is forwarded either way, since unreachable storage
/// should not take the proxy down with it.
fn action_for(outcome: &std::result::Result<(), LimitError>, passive: bool) -> Action {
    match outcome {
        Ok(()) => Action::Forward,
        Err(LimitError::Backend(_)) => Action::Forward,
        Err(LimitError::Full) if passive => Action::Forward,
        Err(LimitError::Full) => Action::Reject,
    }
}

/// Composes a [`RateLimiter`] with a single-host reverse-proxy forwarder.
///
/// `limiter` is read fresh on every request via [`ArcSwap::load_full`], so a
/// concurrent [`crate::daemon::Daemon`] reload is observed atomically by
/// in-flight and future requests alike.
pub struct RateLimitProxy {
    pub upstream: HttpPeer,
    pub limiter: Arc<ArcSwap<RateLimiter>>,
    /// Never reject, only observe and report. Used for shadow deployment.
    pub passive: bool,
}

#[async_trait]
impl ProxyHttp for RateLimitProxy {
    type CTX = RateLimitCtx;

    fn new_ctx(&self) -> Self::CTX {
        RateLimitCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let limiter = self.limiter.load_full();
        let request = request_from_session(session);
        let decision = limiter.decide(&request).await;
        let reported = decision.reported();
        ctx.headers = Some(RatelimitHeaders::from_status(&reported));

        if let Err(LimitError::Backend(e)) = &decision.outcome {
            tracing::warn!(error = %e, "rate limit backend unavailable, failing open");
        }

        match action_for(&decision.outcome, self.passive) {
            Action::Forward => Ok(false),
            Action::Reject => {
                let mut header = ResponseHeader::build(429, None)?;
                ctx.headers.as_ref().unwrap().apply(&mut header)?;
                session
                    .downstream_session
                    .write_response_header(Box::new(header), true)
                    .await?;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Ok(Box::new(self.upstream.clone()))
    }

    fn upstream_response_filter(
        &self,
        _session: &mut Session,
        header: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) {
        if let Some(headers) = &ctx.headers {
            if let Err(e) = headers.apply(header) {
                tracing::warn!(error = %e, "failed to set rate-limit headers on response");
            }
        }
    }
}

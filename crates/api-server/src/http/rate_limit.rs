use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::errors::too_many_requests_response;
use super::{AppState, AuthUser};

/// Sliding-window budgets for the write paths that cost model tokens,
/// storage or a full vote recount. Runs behind authentication.
#[derive(Clone, Default)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<BudgetKey, VecDeque<Instant>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Budget {
    /// Messages sent to the assistant, across all of a user's sessions.
    ChatSend,
    /// Vote changes by one user anywhere in the forum.
    Votes,
    /// Vote changes by one user on a single topic or post.
    VoteFlips,
    /// Recounts of one target, whoever asks for them.
    Recount,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BudgetKey {
    budget: Budget,
    subject: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateLimitDecision {
    Allowed,
    Denied {
        budget: Budget,
        retry_after_seconds: u64,
    },
}

const LONGEST_WINDOW: Duration = Duration::from_secs(300);

impl Budget {
    fn name(self) -> &'static str {
        match self {
            Self::ChatSend => "chat_send",
            Self::Votes => "forum_votes",
            Self::VoteFlips => "forum_vote_flips",
            Self::Recount => "score_recount",
            Self::Upload => "file_upload",
        }
    }

    fn limit(self) -> (usize, Duration) {
        match self {
            Self::ChatSend => (20, Duration::from_secs(60)),
            Self::Votes => (60, Duration::from_secs(60)),
            Self::VoteFlips => (10, Duration::from_secs(60)),
            Self::Recount => (10, Duration::from_secs(60)),
            Self::Upload => (10, LONGEST_WINDOW),
        }
    }
}

/// Budgets a request draws from, keyed by the user or the forum target it
/// touches. Reads and unlisted writes draw from none.
fn budgets_for(method: &Method, path: &str, user_id: &str) -> Vec<BudgetKey> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let key = |budget, subject: String| BudgetKey { budget, subject };

    match (method, segments.as_slice()) {
        (&Method::POST, ["v1", "chat", "messages"])
        | (&Method::POST, ["v1", "chat", "sessions", _, "messages" | "stream"]) => {
            vec![key(Budget::ChatSend, user_id.to_string())]
        }
        (&Method::PUT, ["v1", "forum", kind @ ("topics" | "posts"), target_id, "vote"]) => vec![
            key(Budget::Votes, user_id.to_string()),
            key(Budget::VoteFlips, format!("{user_id}:{kind}/{target_id}")),
        ],
        (
            &Method::POST,
            ["v1", "forum", kind @ ("topics" | "posts"), target_id, "score", "recompute"],
        ) => vec![key(Budget::Recount, format!("{kind}/{target_id}"))],
        (&Method::PUT, ["v1", "profile", "photo"])
        | (&Method::POST, ["v1", "readings", _, _, "report"]) => {
            vec![key(Budget::Upload, user_id.to_string())]
        }
        _ => Vec::new(),
    }
}

impl RateLimiter {
    pub fn spawn_pruner(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let windows = Arc::clone(&self.windows);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                prune_idle(&windows, Instant::now());
            }
        })
    }

    /// Charges every budget or none: a denied vote does not eat into the
    /// user's other vote budget.
    fn charge(&self, keys: &[BudgetKey], now: Instant) -> RateLimitDecision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for key in keys {
            let (max_requests, window) = key.budget.limit();
            let cutoff = now.checked_sub(window).unwrap_or(now);
            let Some(hits) = windows.get_mut(key) else {
                continue;
            };
            drop_before(hits, cutoff);
            if hits.len() >= max_requests {
                let retry_after_seconds = hits
                    .front()
                    .map(|oldest| {
                        let elapsed = now.saturating_duration_since(*oldest);
                        window.saturating_sub(elapsed).as_secs().max(1)
                    })
                    .unwrap_or(window.as_secs());
                return RateLimitDecision::Denied {
                    budget: key.budget,
                    retry_after_seconds,
                };
            }
        }

        for key in keys {
            windows.entry(key.clone()).or_default().push_back(now);
        }
        RateLimitDecision::Allowed
    }
}

fn prune_idle(windows: &Mutex<HashMap<BudgetKey, VecDeque<Instant>>>, now: Instant) {
    let cutoff = now.checked_sub(LONGEST_WINDOW).unwrap_or(now);
    let mut windows = windows.lock().unwrap_or_else(PoisonError::into_inner);
    windows.retain(|_, hits| {
        drop_before(hits, cutoff);
        !hits.is_empty()
    });
}

fn drop_before(hits: &mut VecDeque<Instant>, cutoff: Instant) {
    while hits.front().is_some_and(|hit| *hit <= cutoff) {
        hits.pop_front();
    }
}

pub(super) async fn sensitive_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(user_id) = req
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.user_id.clone())
    else {
        return next.run(req).await;
    };
    let keys = budgets_for(req.method(), req.uri().path(), &user_id);
    if keys.is_empty() {
        return next.run(req).await;
    }

    match state.rate_limiter.charge(&keys, Instant::now()) {
        RateLimitDecision::Allowed => next.run(req).await,
        RateLimitDecision::Denied {
            budget,
            retry_after_seconds,
        } => {
            warn!(
                user_id = %user_id,
                budget = budget.name(),
                retry_after_seconds,
                "request denied by rate limit"
            );
            too_many_requests_response(retry_after_seconds)
        }
    }
}

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::aio::ConnectionManager;
use std::net::{IpAddr, SocketAddr};

use crate::{error::AppError, middleware_layer::client::rate_limit_ip, state::AppState};

/// Length of the fixed window in seconds.
const VIEW_WINDOW_SECS: i64 = 60;

/// A fixed-window hit counter.
#[async_trait]
pub trait WindowCounter: Send {
    /// Counts one hit on `key` and returns the total inside the current window.
    async fn hit(&mut self, key: &str, window_secs: i64) -> redis::RedisResult<i64>;

    /// Seconds until the window of `key` resets, if known.
    async fn retry_after(&mut self, key: &str) -> redis::RedisResult<Option<i64>>;
}

#[async_trait]
impl WindowCounter for ConnectionManager {
    async fn hit(&mut self, key: &str, window_secs: i64) -> redis::RedisResult<i64> {
        let count: i64 = redis::cmd("INCR").arg(key).query_async(self).await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(self)
                .await?;
        }
        Ok(count)
    }

    async fn retry_after(&mut self, key: &str) -> redis::RedisResult<Option<i64>> {
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(self).await?;
        Ok((ttl > 0).then_some(ttl))
    }
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny { retry_after: i64 },
}

/// The counter key for a client address.
pub fn view_key(ip: Option<IpAddr>) -> String {
    match ip {
        Some(ip) => format!("rate_limit:view:{}", ip),
        None => "rate_limit:view:unknown".to_string(),
    }
}

/// Counts one hit on `key` and decides whether it fits in `limit`.
pub async fn admit<C: WindowCounter>(
    counter: &mut C,
    key: &str,
    limit: i64,
) -> redis::RedisResult<Admission> {
    let count = counter.hit(key, VIEW_WINDOW_SECS).await?;
    if count <= limit {
        return Ok(Admission::Allow);
    }

    let retry_after = counter
        .retry_after(key)
        .await
        .ok()
        .flatten()
        .unwrap_or(VIEW_WINDOW_SECS)
        .max(1);
    Ok(Admission::Deny { retry_after })
}

/// A middleware that rate limits the public view and heartbeat routes per IP.
///
/// The key is the socket peer. Forwarding headers count only when the peer
/// is one of `TRUSTED_PROXIES`. Without Redis the limit is not enforced, and
/// a Redis failure lets the request through.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The downstream `Response`, or a 429 once the window is full.
pub async fn rate_limit_view(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(mut redis) = state.redis.clone() else {
        return next.run(req).await;
    };

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let key = view_key(rate_limit_ip(
        req.headers(),
        peer,
        &state.config.trusted_proxies,
    ));
    let limit = i64::from(state.config.view_rate_limit_per_minute);

    match admit(&mut redis, &key, limit).await {
        Ok(Admission::Allow) => next.run(req).await,
        Ok(Admission::Deny { retry_after }) => {
            tracing::warn!("🚫 View rate limit hit for {}", key);
            AppError::RateLimitExceeded(format!(
                "Too many requests. Try again in {} seconds",
                retry_after
            ))
            .into_response()
        }
        Err(e) => {
            tracing::warn!("⚠️ View rate limit skipped, Redis error: {}", e);
            next.run(req).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryCounter {
        hits: HashMap<String, i64>,
    }

    #[async_trait]
    impl WindowCounter for MemoryCounter {
        async fn hit(&mut self, key: &str, _window_secs: i64) -> redis::RedisResult<i64> {
            let count = self.hits.entry(key.to_string()).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn retry_after(&mut self, _key: &str) -> redis::RedisResult<Option<i64>> {
            Ok(Some(42))
        }
    }

    fn forwarded_for(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn rotating_forwarded_for_shares_one_window() {
        let mut counter = MemoryCounter::default();
        let peer = Some(SocketAddr::from(([198, 51, 100, 20], 40000)));

        let mut outcomes = Vec::new();
        for n in 1..=5 {
            let headers = forwarded_for(&format!("1.1.1.{n}"));
            let key = view_key(rate_limit_ip(&headers, peer, &[]));
            outcomes.push(admit(&mut counter, &key, 3).await.unwrap());
        }

        assert_eq!(
            outcomes,
            vec![
                Admission::Allow,
                Admission::Allow,
                Admission::Allow,
                Admission::Deny { retry_after: 42 },
                Admission::Deny { retry_after: 42 },
            ]
        );
        assert_eq!(counter.hits.len(), 1);
        assert_eq!(counter.hits["rate_limit:view:198.51.100.20"], 5);
    }

    #[tokio::test]
    async fn clients_behind_a_trusted_proxy_get_their_own_windows() {
        let mut counter = MemoryCounter::default();
        let proxy: IpAddr = "10.0.0.2".parse().unwrap();
        let peer = Some(SocketAddr::new(proxy, 443));

        for client in ["203.0.113.1", "203.0.113.2"] {
            let key = view_key(rate_limit_ip(&forwarded_for(client), peer, &[proxy]));
            assert_eq!(admit(&mut counter, &key, 1).await.unwrap(), Admission::Allow);
        }

        let key = view_key(rate_limit_ip(&forwarded_for("203.0.113.1"), peer, &[proxy]));
        assert_eq!(
            admit(&mut counter, &key, 1).await.unwrap(),
            Admission::Deny { retry_after: 42 }
        );
    }

    #[test]
    fn unknown_clients_share_a_key() {
        assert_eq!(view_key(None), "rate_limit:view:unknown");
    }
}

//! Redis connection pool management.

use bb8_redis::bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tokio::time::sleep;

use crate::queue::error::QueueError;

/// Configuration for the Redis connection pool.
#[derive(Debug, Clone, Copy)]
pub struct RedisPoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// Minimum number of idle connections
    pub min_idle: u32,
    /// Connection timeout
    pub conn_timeout: Duration,
    /// Idle connection timeout
    pub idle_timeout: Duration,
    /// Maximum connection lifetime
    pub max_lifetime: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            min_idle: 5,
            conn_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Build a pool with default configuration and verify it with a PING.
pub async fn create_redis_pool(
    redis_url: &str,
) -> Result<Pool<RedisConnectionManager>, QueueError> {
    create_redis_pool_with_config(redis_url, RedisPoolConfig::default()).await
}

/// Build a pool with custom configuration and verify it with a PING
/// (with retry and exponential backoff).
pub async fn create_redis_pool_with_config(
    redis_url: &str,
    config: RedisPoolConfig,
) -> Result<Pool<RedisConnectionManager>, QueueError> {
    tracing::info!(
        "Redis pool: max_size={}, min_idle={}, timeouts: conn={}s idle={}s life={}s",
        config.max_size,
        config.min_idle,
        config.conn_timeout.as_secs(),
        config.idle_timeout.as_secs(),
        config.max_lifetime.as_secs()
    );

    let manager = RedisConnectionManager::new(redis_url).map_err(|e| {
        QueueError::Configuration(format!("invalid redis url {}: {}", redacted(redis_url), e))
    })?;

    let pool = Pool::builder()
        .max_size(config.max_size)
        .min_idle(Some(config.min_idle))
        .connection_timeout(config.conn_timeout)
        .idle_timeout(Some(config.idle_timeout))
        .max_lifetime(Some(config.max_lifetime))
        .build(manager)
        .await
        .map_err(|e| QueueError::Unavailable(format!("failed to build Redis pool: {}", e)))?;

    // Warm/verify the pool once with retry + exponential backoff
    let mut attempt = 0u32;
    let max_retries = 3u32;
    let base_delay = Duration::from_millis(400);
    loop {
        match verify_pool(&pool).await {
            Ok(()) => return Ok(pool),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                let delay = base_delay.mul_f32(2f32.powi((attempt - 1) as i32));
                tracing::warn!(
                    "redis verify retry {}/{} after error: {}. sleeping {:?}",
                    attempt,
                    max_retries,
                    e,
                    delay
                );
                sleep(delay).await;
            }
            Err(e) => {
                return Err(QueueError::Unavailable(format!(
                    "unable to verify Redis connectivity after retries: {}",
                    e
                )))
            }
        }
    }
}

async fn verify_pool(pool: &Pool<RedisConnectionManager>) -> Result<(), QueueError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| QueueError::Unavailable(format!("get() from pool: {}", e)))?;
    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| QueueError::Unavailable(format!("PING failed: {}", e)))?;
    Ok(())
}

/// Redact credentials in logs.
fn redacted(url: &str) -> String {
    match url.find('@') {
        Some(at) => match url.find("://") {
            Some(scheme_end) => format!("{}://***{}", &url[..scheme_end], &url[at..]),
            None => format!("***{}", &url[at..]),
        },
        None => url.to_string(),
    }
}

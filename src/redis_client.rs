use redis::{aio::MultiplexedConnection, Client};
use tracing::debug;

/// Shared multiplexed Redis connection; clones are cheap handles to it.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    /// Connects and checks the server answers before handing the connection out.
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis answered {}", pong);
        Ok(RedisClient { conn })
    }
}

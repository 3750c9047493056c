use redis::Client;
use redis::aio::ConnectionManager;

/// Create a Redis connection manager for async operations.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}

/// Open a plain Redis client, used for dedicated pub/sub connections that a
/// `ConnectionManager` cannot multiplex.
pub fn open_client(redis_url: &str) -> anyhow::Result<Client> {
    Ok(Client::open(redis_url)?)
}

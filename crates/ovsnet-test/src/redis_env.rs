//! Redis container for integration tests.

use redis::{AsyncCommands, Client};
use std::time::Duration;
use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage,
};

/// Redis test environment with a containerized Redis instance.
///
/// The container is stopped and removed when the environment is dropped.
pub struct RedisTestEnv {
    _container: testcontainers::ContainerAsync<GenericImage>,
    pub client: Client,
    pub host: String,
    pub port: u16,
}

impl RedisTestEnv {
    /// Starts a new Redis container.
    ///
    /// # Errors
    /// Returns error if the container fails to start or the client cannot
    /// be created
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let container = GenericImage::new("redis", "7-alpine")
            .with_exposed_port(ContainerPort::Tcp(6379))
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(6379).await?;
        let client = Client::open(format!("redis://{}:{}", host, port).as_str())?;

        for _ in 0..5 {
            match client.get_connection_with_timeout(Duration::from_secs(1)) {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(Duration::from_millis(200)).await,
            }
        }

        Ok(Self {
            _container: container,
            client,
            host,
            port,
        })
    }

    /// URL for `RedisStore::connect`.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/0", self.host, self.port)
    }

    pub async fn get_async_connection(
        &self,
    ) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Flushes every database.
    pub async fn flush_all(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.get_async_connection().await?;
        redis::cmd("FLUSHALL").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Reads all fields of a hash.
    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, redis::RedisError> {
        let mut conn = self.get_async_connection().await?;
        conn.hgetall(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.get_async_connection().await?;
        conn.exists(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires Docker"]
    async fn test_redis_test_env_start() {
        let env = RedisTestEnv::start().await.expect("Failed to start Redis");
        assert!(env.port > 0);
        assert!(env.url().starts_with("redis://"));
        env.flush_all().await.expect("Failed to flush");
    }
}

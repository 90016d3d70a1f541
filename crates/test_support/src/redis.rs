use anyhow::{Context, Result};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tokio::time::{sleep, Duration};

use crate::unique_name;

const REDIS_PORT: u16 = 6379;
const REDIS_IMAGE: &str = "redis";
const REDIS_TAG: &str = "7-alpine";

#[derive(Debug)]
pub struct RedisContainer {
    _container: ContainerAsync<GenericImage>,
    host_port: u16,
}

impl RedisContainer {
    /// Start a Redis container in the specified network.
    ///
    /// # Errors
    /// Returns an error if the container fails to start or the port cannot be resolved.
    pub async fn start(network: &str) -> Result<Self> {
        crate::runtime::ensure_container_runtime()?;
        let image = GenericImage::new(REDIS_IMAGE, REDIS_TAG)
            .with_exposed_port(REDIS_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .with_network(network)
            .with_container_name(unique_name("redis"));

        let container = image
            .start()
            .await
            .context("Failed to start Redis container")?;
        let host_port = container
            .get_host_port_ipv4(REDIS_PORT.tcp())
            .await
            .context("Failed to resolve Redis host port")?;

        Ok(Self {
            _container: container,
            host_port,
        })
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.host_port)
    }

    /// Wait until Redis answers `PING`.
    ///
    /// # Errors
    /// Returns an error if Redis does not become ready after retries.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let client = redis::Client::open(self.url()).context("Invalid Redis URL")?;
        let mut attempts = 0;

        loop {
            let result = match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => redis::cmd("PING").query_async::<_, String>(&mut conn).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(_) => return Ok(()),
                Err(err) => {
                    attempts += 1;
                    if attempts >= 20 {
                        return Err(err).context("Redis did not become ready");
                    }
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
    }
}

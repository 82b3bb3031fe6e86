use crate::{
    RealtimeManager,
    transport::{Connector, WsConnector},
};
use explorer_realtime_config::RealtimeConfig;
use std::sync::Arc;

/// Errors that can occur while building a [`RealtimeManager`] with a
/// [`RealtimeManagerBuilder`].
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    /// The configuration was not provided.
    #[error("config is required")]
    MissingConfig,
    /// A configured URL could not be parsed.
    #[error("invalid URL provided")]
    Url(#[from] url::ParseError),
    /// The client failed to build.
    #[error("failed to build client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Builder for the [`RealtimeManager`].
#[derive(Default)]
pub struct RealtimeManagerBuilder {
    config: Option<RealtimeConfig>,
    connector: Option<Arc<dyn Connector>>,
    client: Option<reqwest::Client>,
}

impl core::fmt::Debug for RealtimeManagerBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RealtimeManagerBuilder")
            .field("config", &self.config)
            .field("connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

impl RealtimeManagerBuilder {
    /// Set the configuration.
    pub fn with_config(mut self, config: RealtimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the connector used for the upstream socket. Defaults to a
    /// [`WsConnector`] for the configured WebSocket URL.
    ///
    /// A connector enables the socket transport even if no WebSocket URL is
    /// configured.
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Set the [`reqwest::Client`] used for refreshes and polling.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the [`reqwest::Client`] via a [`reqwest::ClientBuilder`]. The
    /// client is built immediately.
    pub fn with_client_builder(self, client: reqwest::ClientBuilder) -> Result<Self, BuilderError> {
        client.build().map(|client| self.with_client(client)).map_err(Into::into)
    }

    /// Build the manager. Nothing is spawned until the first
    /// [`RealtimeManager::subscribe`] or [`RealtimeManager::force_refresh`].
    pub fn build(self) -> Result<RealtimeManager, BuilderError> {
        let config = self.config.ok_or(BuilderError::MissingConfig)?;
        let http_url = config.parsed_http_url()?;

        let connector = match (self.connector, config.parsed_ws_url()?) {
            (Some(connector), _) => Some(connector),
            (None, Some(ws_url)) => Some(Arc::new(WsConnector::new(ws_url)) as Arc<dyn Connector>),
            (None, None) => None,
        };

        Ok(RealtimeManager::new(config, connector, self.client.unwrap_or_default(), http_url))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::MemConnector;

    #[test]
    fn requires_config() {
        assert!(matches!(RealtimeManager::builder().build(), Err(BuilderError::MissingConfig)));
    }

    #[test]
    fn rejects_bad_urls() {
        let config = RealtimeConfig::new("not a url".into());
        assert!(matches!(
            RealtimeManager::builder().with_config(config).build(),
            Err(BuilderError::Url(_))
        ));

        let config = RealtimeConfig::new("http://localhost:8545".into()).with_ws_url("::".into());
        assert!(matches!(
            RealtimeManager::builder().with_config(config).build(),
            Err(BuilderError::Url(_))
        ));
    }

    #[test]
    fn builds_without_runtime() {
        let (connector, _node) = MemConnector::new();
        let manager = RealtimeManager::builder()
            .with_config(RealtimeConfig::new("http://localhost:8545".into()))
            .with_connector(connector)
            .build()
            .unwrap();
        assert!(manager.cached_blocks().is_empty());
        assert_eq!(manager.connection_status(), Default::default());
    }
}

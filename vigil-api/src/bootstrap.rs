//! Startup wiring: connects the configured upstream and builds [`AppState`].

use std::sync::Arc;

use vigil_core::ConfigError;
use vigil_storage::{ArtifactStore, LocalArtifactStore};
use vigil_upstream::{
    Connection, EdgeSource, LedgerSource, RecordSource, RecordStore, RemoteArtifactStore,
    UpstreamConnector,
};

use crate::cached_log::CachedAnomalyLog;
use crate::config::{ArtifactSource, DashboardConfig, UpstreamKind};
use crate::error::ApiResult;
use crate::state::AppState;

/// Connect to every upstream the configuration names and assemble the
/// shared state.
///
/// Connection failures are fatal here: the connector has already retried
/// according to the configured policy.
pub async fn build_state(config: &DashboardConfig) -> ApiResult<AppState> {
    let connector = UpstreamConnector::new(config.retry_policy(), config.call_timeout);

    let (source, edge_conn) = connect_source(&connector, config).await?;
    let artifacts = open_artifacts(&connector, config, edge_conn).await?;

    tracing::info!(
        source = source.name(),
        artifacts = ?config.artifact_source,
        ttl_secs = config.cache_ttl.as_secs(),
        "Dashboard state ready"
    );

    let log = CachedAnomalyLog::new(RecordStore::new(source), config.cache_config());
    Ok(AppState::new(log, artifacts))
}

/// The record source, plus the edge connection when one was opened so the
/// artifact store can share it.
async fn connect_source(
    connector: &UpstreamConnector,
    config: &DashboardConfig,
) -> ApiResult<(Arc<dyn RecordSource>, Option<Arc<dyn Connection>>)> {
    match config.upstream {
        UpstreamKind::Ledger => {
            let contract = config
                .contract_address
                .clone()
                .ok_or_else(|| missing("CONTRACT_ADDRESS"))?;
            let conn = connector
                .connect_ledger(&config.web3_provider, &config.credentials)
                .await?;
            tracing::info!(contract = %contract, endpoint = conn.endpoint(), "Reading anomaly log from ledger");
            Ok((Arc::new(LedgerSource::new(conn, contract)), None))
        }
        UpstreamKind::Edge => {
            let base_url = config
                .edge_base_url
                .as_deref()
                .ok_or_else(|| missing("RPI_BASE_URL"))?;
            let conn = connector.connect_edge(base_url, &config.credentials).await?;
            tracing::info!(endpoint = conn.endpoint(), "Reading anomaly log from edge device");
            Ok((Arc::new(EdgeSource::new(Arc::clone(&conn))), Some(conn)))
        }
    }
}

async fn open_artifacts(
    connector: &UpstreamConnector,
    config: &DashboardConfig,
    edge_conn: Option<Arc<dyn Connection>>,
) -> ApiResult<Arc<dyn ArtifactStore>> {
    match config.artifact_source {
        ArtifactSource::Local => {
            if !config.results_dir.is_dir() {
                tracing::warn!(
                    dir = %config.results_dir.display(),
                    "Artifact directory does not exist; image listing will be empty"
                );
            }
            Ok(Arc::new(LocalArtifactStore::new(config.results_dir.clone())))
        }
        ArtifactSource::Remote => {
            let conn = match edge_conn {
                Some(conn) => conn,
                None => {
                    let base_url = config
                        .edge_base_url
                        .as_deref()
                        .ok_or_else(|| missing("RPI_BASE_URL"))?;
                    connector.connect_edge(base_url, &config.credentials).await?
                }
            };
            Ok(Arc::new(RemoteArtifactStore::new(conn)))
        }
    }
}

fn missing(field: &str) -> ConfigError {
    ConfigError::MissingRequired {
        field: field.to_string(),
    }
}

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use veranda_auth::{AuthorizationFlowManager, HttpIdentityProvider, TokenCache};
use veranda_booking::{
    BookingOps, HttpCalendarClient, HttpInventoryClient, LoggingNotifier, TokioDelay,
    UpgradeCoordinator,
};
use veranda_core::config::{AppConfig, ConfigError, LoadOptions};
use veranda_core::errors::DomainError;
use veranda_core::{ConversationDirectory, FlowStateLog};

pub struct Application {
    pub config: AppConfig,
    pub flow_log: Arc<FlowStateLog>,
    pub directory: Arc<ConversationDirectory>,
    pub auth: Arc<AuthorizationFlowManager>,
    pub ops: Arc<BookingOps>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not construct an outbound client: {0}")]
    Client(#[source] DomainError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let flow_log = Arc::new(FlowStateLog::new());
    let directory = Arc::new(ConversationDirectory::new());

    let provider =
        HttpIdentityProvider::new(config.identity.clone()).map_err(BootstrapError::Client)?;
    let auth = Arc::new(AuthorizationFlowManager::new(
        config.identity.clone(),
        Arc::new(TokenCache::new()),
        Arc::clone(&directory),
        Arc::new(provider),
    ));

    let inventory = Arc::new(
        HttpInventoryClient::new(config.inventory.base_url.clone(), config.inventory.timeout_secs)
            .map_err(BootstrapError::Client)?,
    );
    let calendar = Arc::new(HttpCalendarClient::new().map_err(BootstrapError::Client)?);

    let upgrades = Arc::new(UpgradeCoordinator::new(
        Arc::clone(&auth),
        Arc::clone(&inventory) as Arc<dyn veranda_booking::InventoryClient>,
        Arc::new(LoggingNotifier),
        Arc::clone(&directory),
        config.upgrade.clone(),
        Arc::new(TokioDelay),
    ));

    let ops = Arc::new(BookingOps::new(
        Arc::clone(&flow_log),
        Arc::clone(&directory),
        Arc::clone(&auth),
        inventory,
        calendar,
        upgrades,
    ));

    info!(event_name = "system.bootstrap.ready", "application wiring complete");
    Ok(Application { config, flow_log, directory, auth, ops })
}

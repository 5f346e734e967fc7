use acreblitz::agent::Agent;
use acreblitz::cache::ReferenceCache;
use acreblitz::compact::HistoryCompactor;
use acreblitz::pipeline::ChatPipeline;
use acreblitz::providers::base::Provider;
use acreblitz::providers::factory;
use acreblitz::retry::RetryConfig;
use acreblitz::systems::weather::WeatherSystem;
use acreblitz::token_counter::TokenAccountant;
use acreblitz::weather::NwsClient;
use std::sync::Arc;

use crate::configuration::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn Provider>,
    pub cache: Arc<ReferenceCache>,
    pub accountant: Arc<TokenAccountant>,
    pub weather: Arc<NwsClient>,
    pub compactor: HistoryCompactor,
    pub retry: RetryConfig,
}

impl AppState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let pipeline = &settings.pipeline;
        Ok(Self {
            provider: factory::get_provider(settings.provider.clone())?,
            cache: Arc::new(ReferenceCache::new(pipeline.cache_ttl())),
            accountant: Arc::new(pipeline.accountant()),
            weather: Arc::new(NwsClient::new(settings.weather.clone())?),
            compactor: pipeline.compactor(),
            retry: pipeline.retry_config(),
        })
    }

    /// A pipeline for one request; the cache and accountant are shared across requests
    pub fn pipeline(&self) -> ChatPipeline {
        let mut agent = Agent::new(Arc::clone(&self.provider), Arc::clone(&self.cache))
            .with_accountant(Arc::clone(&self.accountant));
        agent.add_system(Box::new(WeatherSystem::new(Arc::clone(&self.weather))));

        ChatPipeline::new(agent)
            .with_compactor(self.compactor.clone())
            .with_retry(self.retry.clone())
    }
}

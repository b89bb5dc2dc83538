use std::sync::Arc;

use crate::adapters::get_port_lister;
use crate::config::AppConfig;
use crate::core::{
    FirmwareResolver, FlashCoordinator, Flasher, FlasherType, GithubReleases, PortLister,
    ReleaseCache, create_flasher,
};

/// Long-lived services shared by every request handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub releases: Arc<ReleaseCache>,
    pub resolver: Arc<FirmwareResolver>,
    pub coordinator: Arc<FlashCoordinator>,
    pub ports: Arc<dyn PortLister>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let source = Arc::new(GithubReleases::new()?);
        let releases = Arc::new(
            ReleaseCache::new(config.cache_dir.clone(), source)
                .with_version_list(config.release_list_limit, config.release_list_ttl()),
        );

        // Simulation never drives real hardware, whatever the flasher setting says.
        let kind = if config.simulation {
            FlasherType::Simulated
        } else {
            config.flasher
        };
        let flasher = create_flasher(kind, &config.kflash_bin);
        let ports = get_port_lister(config.simulation);
        let resolver = FirmwareResolver::new(releases.clone());

        Ok(Self::from_parts(config, releases, resolver, flasher, ports))
    }

    /// Assemble a context from explicit parts, e.g. in-memory fakes in tests.
    pub fn from_parts(
        config: AppConfig,
        releases: Arc<ReleaseCache>,
        resolver: FirmwareResolver,
        flasher: Arc<dyn Flasher>,
        ports: Arc<dyn PortLister>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            releases,
            resolver: Arc::new(resolver),
            coordinator: Arc::new(FlashCoordinator::new(flasher)),
            ports,
        }
    }
}

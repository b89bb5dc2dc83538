use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::core::FlasherType;
use crate::core::release_cache::{DEFAULT_LIST_LIMIT, DEFAULT_LIST_TTL};

pub const ENV_PREFIX: &str = "KFLASH_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Downloaded release archives and their extracted trees.
    pub cache_dir: PathBuf,
    pub http_port: u16,
    pub flasher: FlasherType,
    /// Program used by the `kflash` flasher.
    pub kflash_bin: PathBuf,
    pub open_browser: bool,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub release_list_limit: usize,
    pub release_list_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./krux_cache"),
            http_port: 8000,
            flasher: FlasherType::default(),
            kflash_bin: PathBuf::from("kflash"),
            open_browser: true,
            simulation: false,
            verbose: false,
            json_logs: false,
            release_list_limit: DEFAULT_LIST_LIMIT,
            release_list_ttl_secs: DEFAULT_LIST_TTL.as_secs(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `KFLASH_*` environment variables, then `cli_args`.
    ///
    /// `cli_args` is any serializable struct whose fields match this one;
    /// fields it skips keep the lower-priority value.
    pub fn new<T: Serialize>(cli_args: Option<&T>) -> anyhow::Result<Self> {
        Ok(Self::figment(cli_args).extract()?)
    }

    pub fn figment<T: Serialize>(cli_args: Option<&T>) -> Figment {
        let env = Env::prefixed(ENV_PREFIX).map(|key| {
            let key = key.as_str();
            let mapped = if key.eq_ignore_ascii_case("web_port") {
                "http_port"
            } else if key.eq_ignore_ascii_case("bin") {
                "kflash_bin"
            } else {
                key
            };
            mapped.to_ascii_lowercase().into()
        });

        let figment = Figment::from(Serialized::defaults(AppConfig::default())).merge(env);
        match cli_args {
            Some(args) => figment.merge(Serialized::defaults(args)),
            None => figment,
        }
    }

    /// The UI is only ever served on loopback.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.http_port))
    }

    pub fn release_list_ttl(&self) -> Duration {
        Duration::from_secs(self.release_list_ttl_secs)
    }
}

pub mod coordinator;
pub mod flasher;
pub mod models;
pub mod ports;
pub mod release_cache;
pub mod release_source;
pub mod resolver;
pub mod version;

pub use coordinator::{FlashCoordinator, FlashPermit, FlashRequest};
pub use flasher::{
    FlashParams, Flasher, FlasherType, KflashCli, LineSink, SimulatedFlasher, create_flasher,
};
pub use models::{BoardEntry, FlashOutcome, FlashRegion, PackageStatus, PortSelection};
pub use ports::{PortLister, SerialPortInfo};
pub use release_cache::{DownloadPermit, ReleaseCache};
pub use release_source::{GithubReleases, ReleaseSource};
pub use resolver::{FirmwareResolver, FirmwareSource, ResolvedFirmware};
pub use version::ReleaseVersion;

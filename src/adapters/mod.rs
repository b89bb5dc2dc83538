use std::sync::Arc;

use crate::core::ports::PortLister;

#[cfg(target_os = "linux")]
mod linux;
mod simulated;

#[cfg(target_os = "linux")]
pub use linux::{LinuxPortLister, TtyEnumerator, TtyRecord, UdevEnumerator};
pub use simulated::{PortSimulator, SimulatedPortLister};

pub fn get_port_lister(simulation: bool) -> Arc<dyn PortLister> {
    if simulation {
        let (lister, controller) = SimulatedPortLister::new();
        controller.add_port("/dev/ttySIM0", "Simulated K210 board");
        return Arc::new(lister);
    }

    #[cfg(target_os = "linux")]
    {
        return Arc::new(LinuxPortLister::with_defaults());
    }

    #[cfg(not(target_os = "linux"))]
    {
        tracing::warn!("Serial port enumeration is only supported on Linux");
        return Arc::new(SimulatedPortLister::new().0);
    }
}

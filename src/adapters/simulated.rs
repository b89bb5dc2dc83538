use std::sync::{Arc, Mutex, PoisonError};

use crate::core::ports::{PortLister, SerialPortInfo};

type PortTable = Arc<Mutex<Vec<SerialPortInfo>>>;

/// Handle for plugging simulated ports in and out.
#[derive(Clone)]
pub struct PortSimulator {
    ports: PortTable,
}

impl PortSimulator {
    pub fn add_port(&self, device: &str, description: &str) {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        ports.retain(|p| p.device != device);
        ports.push(SerialPortInfo {
            device: device.to_string(),
            description: description.to_string(),
            hwid: format!("SIM HWID={device}"),
        });
    }

    pub fn remove_port(&self, device: &str) {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p| p.device != device);
    }
}

pub struct SimulatedPortLister {
    ports: PortTable,
}

impl SimulatedPortLister {
    pub fn new() -> (Self, PortSimulator) {
        let ports: PortTable = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                ports: ports.clone(),
            },
            PortSimulator { ports },
        )
    }
}

impl PortLister for SimulatedPortLister {
    fn list_ports(&self) -> anyhow::Result<Vec<SerialPortInfo>> {
        Ok(self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

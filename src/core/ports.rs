use serde::Serialize;

/// One serial port as reported to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    pub device: String,
    pub description: String,
    pub hwid: String,
}

pub trait PortLister: Send + Sync {
    /// List serial ports currently present on the host.
    /// NOTE: Implementations may perform blocking I/O; call from a blocking
    /// context (e.g., via spawn_blocking).
    fn list_ports(&self) -> anyhow::Result<Vec<SerialPortInfo>>;
}

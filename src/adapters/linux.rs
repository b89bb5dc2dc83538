//! Serial port discovery through udev.
//!
//! Every device in the `tty` subsystem is a candidate. Only ttys backed by a
//! real parent device are reported; USB identity comes from the `ID_*`
//! properties udev attaches to the tty.

use std::collections::HashMap;

use anyhow::Context;
use tracing::debug;

use crate::core::ports::{PortLister, SerialPortInfo};

const NO_HWID: &str = "n/a";

/// One tty as udev reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TtyRecord {
    pub sysname: String,
    pub devnode: Option<String>,
    /// Subsystem of the device the tty hangs off; `None` for virtual ttys.
    pub parent_subsystem: Option<String>,
    pub properties: HashMap<String, String>,
}

impl TtyRecord {
    fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Source of tty records. Blocking.
pub trait TtyEnumerator: Send + Sync {
    fn scan(&self) -> anyhow::Result<Vec<TtyRecord>>;
}

pub struct UdevEnumerator;

impl TtyEnumerator for UdevEnumerator {
    fn scan(&self) -> anyhow::Result<Vec<TtyRecord>> {
        let mut enumerator = udev::Enumerator::new().context("creating udev enumerator")?;
        enumerator
            .match_subsystem("tty")
            .context("filtering udev devices by subsystem")?;
        let devices = enumerator
            .scan_devices()
            .context("scanning udev tty devices")?;

        Ok(devices.map(|device| record_from(&device)).collect())
    }
}

fn record_from(device: &udev::Device) -> TtyRecord {
    let properties = device
        .properties()
        .filter_map(|p| {
            Some((
                p.name().to_str()?.to_owned(),
                p.value().to_str()?.to_owned(),
            ))
        })
        .collect();

    TtyRecord {
        sysname: device.sysname().to_string_lossy().into_owned(),
        devnode: device
            .devnode()
            .map(|path| path.to_string_lossy().into_owned()),
        parent_subsystem: device
            .parent()
            .and_then(|parent| parent.subsystem().map(|s| s.to_string_lossy().into_owned())),
        properties,
    }
}

pub struct LinuxPortLister<E = UdevEnumerator> {
    enumerator: E,
}

impl LinuxPortLister<UdevEnumerator> {
    pub fn with_defaults() -> Self {
        Self::new(UdevEnumerator)
    }
}

impl<E: TtyEnumerator> LinuxPortLister<E> {
    pub fn new(enumerator: E) -> Self {
        Self { enumerator }
    }
}

impl<E: TtyEnumerator> PortLister for LinuxPortLister<E> {
    fn list_ports(&self) -> anyhow::Result<Vec<SerialPortInfo>> {
        let mut ports: Vec<SerialPortInfo> = self
            .enumerator
            .scan()?
            .iter()
            .filter_map(describe)
            .collect();

        ports.sort_by(|a, b| a.device.cmp(&b.device));
        debug!(count = ports.len(), "Enumerated serial ports");
        Ok(ports)
    }
}

fn describe(tty: &TtyRecord) -> Option<SerialPortInfo> {
    let subsystem = tty.parent_subsystem.as_deref()?;
    // Legacy 8250 placeholders show up for every kernel, plugged in or not.
    if subsystem == "platform" {
        return None;
    }

    let hwid = match (tty.property("ID_VENDOR_ID"), tty.property("ID_MODEL_ID")) {
        (Some(vid), Some(pid)) => match tty.property("ID_SERIAL_SHORT") {
            Some(serial) => format!("USB VID:PID={vid}:{pid} SER={serial}"),
            None => format!("USB VID:PID={vid}:{pid}"),
        },
        _ => NO_HWID.to_string(),
    };

    let description = tty
        .property("ID_MODEL_FROM_DATABASE")
        .map(str::to_owned)
        .or_else(|| tty.property("ID_MODEL").map(|m| m.replace('_', " ")))
        .or_else(|| tty.property("ID_VENDOR_FROM_DATABASE").map(str::to_owned))
        .unwrap_or_else(|| tty.sysname.clone());

    let device = tty
        .devnode
        .clone()
        .unwrap_or_else(|| format!("/dev/{}", tty.sysname));

    Some(SerialPortInfo {
        device,
        description,
        hwid,
    })
}

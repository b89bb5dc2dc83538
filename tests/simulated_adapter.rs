//! Simulated port lister used in simulation mode and tests.

use kflashd::adapters::{SimulatedPortLister, get_port_lister};
use kflashd::core::PortLister;

#[test]
fn lister_reflects_plugged_ports() {
    let (lister, simulator) = SimulatedPortLister::new();
    assert!(lister.list_ports().unwrap().is_empty());

    simulator.add_port("/dev/ttyUSB0", "Sipeed Maix Amigo");
    simulator.add_port("/dev/ttyUSB1", "M5StickV");
    let devices: Vec<_> = lister
        .list_ports()
        .unwrap()
        .into_iter()
        .map(|p| p.device)
        .collect();
    assert_eq!(devices, ["/dev/ttyUSB0", "/dev/ttyUSB1"]);

    simulator.remove_port("/dev/ttyUSB0");
    let ports = lister.list_ports().unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].description, "M5StickV");
}

#[test]
fn replugging_a_port_replaces_its_entry() {
    let (lister, simulator) = SimulatedPortLister::new();
    simulator.add_port("/dev/ttyUSB0", "old");
    simulator.add_port("/dev/ttyUSB0", "new");

    let ports = lister.list_ports().unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].description, "new");
    assert_eq!(ports[0].hwid, "SIM HWID=/dev/ttyUSB0");
}

#[test]
fn simulation_mode_exposes_a_fake_board() {
    let ports = get_port_lister(true).list_ports().unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].device, "/dev/ttySIM0");
}

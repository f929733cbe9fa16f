//! Port discovery and metadata-sentinel behavior.

use std::sync::Arc;

use serialguard::backend::{MockBackend, MockDevice};
use serialguard::{get_port_by_name, list_ports, BackendRef, Port, Status, Transport};

fn mock(devices: Vec<MockDevice>) -> (Arc<MockBackend>, BackendRef) {
    let backend = Arc::new(MockBackend::new(devices));
    let shared: BackendRef = backend.clone();
    (backend, shared)
}

#[test]
fn unresolvable_name_is_invalid_argument() {
    let (_, backend) = mock(vec![MockDevice::native("/dev/ttyS0")]);

    let err = get_port_by_name(&backend, "/dev/ttyNONE").expect_err("no such device");
    assert_eq!(err.status(), Status::InvalidArgument);
}

#[test]
fn invalid_port_accessors_return_sentinels() {
    let port = Port::invalid();

    assert!(!port.is_valid());
    assert_eq!(port.name(), "");
    assert_eq!(port.description(), "");
    assert_eq!(port.transport(), Transport::Native);
    assert_eq!(port.usb_bus_address().bus, -1);
    assert_eq!(port.usb_bus_address().address, -1);
    assert_eq!(port.usb_vid_pid().vid, -1);
    assert_eq!(port.usb_vid_pid().pid, -1);
    assert_eq!(port.usb_manufacturer(), "");
    assert_eq!(port.usb_product(), "");
    assert_eq!(port.usb_serial_number(), "");
    assert_eq!(port.bluetooth_address(), "");
}

#[test]
fn default_port_is_the_invalid_sentinel() {
    assert!(!Port::default().is_valid());
}

#[test]
fn enumeration_preserves_backend_order() {
    let (_, backend) = mock(vec![
        MockDevice::native("/dev/ttyS0"),
        MockDevice::usb("/dev/ttyUSB0", 0x2e8a, 0xa02f),
        MockDevice::bluetooth("/dev/rfcomm0", "00:11:22:33:44:55"),
    ]);

    let ports = list_ports(&backend).expect("enumeration succeeds");
    let names: Vec<String> = ports.iter().map(|p| p.name()).collect();
    assert_eq!(names, ["/dev/ttyS0", "/dev/ttyUSB0", "/dev/rfcomm0"]);
}

#[test]
fn empty_result_and_failure_are_distinguishable() {
    let (mock, backend) = mock(Vec::new());

    // No devices: an empty list, not an error.
    let ports = list_ports(&backend).expect("empty enumeration is a success");
    assert!(ports.is_empty());

    mock.set_next_status(Status::SystemError);
    let err = list_ports(&backend).expect_err("enumeration failure is an error");
    mock.set_next_status(Status::Ok);
    assert_eq!(err.status(), Status::SystemError);
}

#[test]
fn usb_metadata_is_exposed_for_usb_ports() {
    let (_, backend) = mock(vec![MockDevice::usb("/dev/ttyUSB0", 0x2e8a, 0xa02f)]);

    let port = get_port_by_name(&backend, "/dev/ttyUSB0").expect("port resolves");
    assert_eq!(port.transport(), Transport::Usb);
    assert_eq!(port.usb_vid_pid().vid, 0x2e8a);
    assert_eq!(port.usb_vid_pid().pid, 0xa02f);
    assert_eq!(port.usb_manufacturer(), "Mock Industries");
    assert_eq!(port.usb_product(), "Mock Serial");
    assert_eq!(port.usb_serial_number(), "MOCK-0001");
    assert_eq!(port.bluetooth_address(), "");
}

#[test]
fn usb_sentinels_apply_to_other_transports() {
    let (_, backend) = mock(vec![MockDevice::bluetooth("/dev/rfcomm0", "00:11:22:33:44:55")]);

    let port = get_port_by_name(&backend, "/dev/rfcomm0").expect("port resolves");
    assert_eq!(port.transport(), Transport::Bluetooth);
    assert_eq!(port.bluetooth_address(), "00:11:22:33:44:55");
    assert_eq!(port.usb_vid_pid().vid, -1);
    assert_eq!(port.usb_bus_address().bus, -1);
    assert_eq!(port.usb_manufacturer(), "");
}

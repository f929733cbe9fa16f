//! Resource-lifetime tests against the allocation-counting mock backend.

use std::sync::Arc;

use serialguard::backend::{MockBackend, MockDevice};
use serialguard::{get_port_by_name, list_ports, BackendRef, Connection, Mode, PortConfig, Status};

fn mock(devices: Vec<MockDevice>) -> (Arc<MockBackend>, BackendRef) {
    let backend = Arc::new(MockBackend::new(devices));
    let shared: BackendRef = backend.clone();
    (backend, shared)
}

#[test]
fn port_list_container_is_freed_immediately() {
    let (mock, backend) = mock(vec![
        MockDevice::native("/dev/ttyS0"),
        MockDevice::native("/dev/ttyS1"),
    ]);

    let ports = list_ports(&backend).expect("enumeration succeeds");
    assert_eq!(ports.len(), 2);
    assert_eq!(mock.allocated_lists(), 0, "container must not outlive the call");
    assert_eq!(mock.allocated_ports(), 2, "one allocation per returned port");

    drop(ports);
    assert_eq!(mock.allocated_ports(), 0);
}

#[test]
fn port_handle_is_freed_on_last_release() {
    let (mock, backend) = mock(vec![MockDevice::native("/dev/ttyS0")]);

    let port = get_port_by_name(&backend, "/dev/ttyS0").expect("port resolves");
    assert_eq!(mock.allocated_ports(), 1);

    // Clones share the one allocation.
    let alias = port.clone();
    assert_eq!(mock.allocated_ports(), 1);

    drop(port);
    assert_eq!(mock.allocated_ports(), 1, "an owner is still alive");
    drop(alias);
    assert_eq!(mock.allocated_ports(), 0);
}

#[test]
fn config_objects_never_outlive_their_call() {
    let (mock, backend) = mock(vec![MockDevice::native("/dev/ttyS0")]);

    {
        let port = get_port_by_name(&backend, "/dev/ttyS0").expect("port resolves");
        let mut conn =
            Connection::open(port, Mode::ReadWrite, &PortConfig::default()).expect("opens");

        let cfg = conn.get_config().expect("get_config succeeds");
        assert_eq!(mock.allocated_configs(), 0);
        conn.set_config(&cfg).expect("set_config succeeds");
        assert_eq!(mock.allocated_configs(), 0);

        let _ = conn.flush(serialguard::Buffers::Both);
    }
    assert_eq!(mock.allocated_configs(), 0);
    assert_eq!(mock.open_sessions(), 0);
    assert_eq!(mock.allocated_ports(), 0);
}

#[test]
fn static_error_messages_allocate_nothing() {
    let (mock, backend) = mock(Vec::new());

    let err = get_port_by_name(&backend, "/dev/ttyNONE").expect_err("cannot resolve");
    assert_eq!(err.status(), Status::InvalidArgument);
    assert_eq!(mock.allocated_messages(), 0);

    let message = err.message();
    assert_eq!(message.as_str(), "invalid argument");
    drop(message);
    drop(err);
    assert_eq!(mock.allocated_messages(), 0);
}

#[test]
fn system_error_message_is_freed_on_last_release() {
    let (mock, backend) = mock(vec![MockDevice::native("/dev/ttyS0")]);
    mock.set_system_error("device handle lost");
    mock.set_next_status(Status::SystemError);

    let err = get_port_by_name(&backend, "/dev/ttyS0").expect_err("injected failure");
    mock.set_next_status(Status::Ok);
    assert_eq!(err.status(), Status::SystemError);
    assert_eq!(mock.allocated_messages(), 1, "exactly one outstanding message");

    let message = err.message();
    assert_eq!(message.as_str(), "device handle lost");
    drop(err);
    assert_eq!(mock.allocated_messages(), 1, "a clone still owns the string");
    drop(message);
    assert_eq!(mock.allocated_messages(), 0);
}

#[test]
fn partial_enumeration_is_discarded_without_leaks() {
    let (mock, backend) = mock(vec![
        MockDevice::native("/dev/ttyS0"),
        MockDevice::native("/dev/ttyS1"),
    ]);
    mock.set_next_status(Status::SystemError);
    mock.set_partial_enumeration(true);

    let err = list_ports(&backend).expect_err("cut-short enumeration fails");
    mock.set_next_status(Status::Ok);
    assert_eq!(err.status(), Status::SystemError);
    assert_eq!(mock.allocated_lists(), 0);
    assert_eq!(mock.allocated_ports(), 0, "partial results are released");

    drop(err);
    assert_eq!(mock.allocated_messages(), 0);
}

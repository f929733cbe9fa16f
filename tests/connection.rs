//! Connection state machine, configuration round-trips, and the I/O
//! contract, driven through the loopback mock backend.

use std::sync::Arc;
use std::time::Duration;

use serialguard::backend::{MockBackend, MockDevice};
use serialguard::{
    get_port_by_name, BackendRef, Buffers, Connection, Mode, Parity, Port, PortConfig, Status,
};

const TIMEOUT: Duration = Duration::from_millis(1000);

fn mock_with_port() -> (Arc<MockBackend>, BackendRef, Port) {
    let backend = Arc::new(MockBackend::new(vec![MockDevice::native("/dev/ttyS0")]));
    let shared: BackendRef = backend.clone();
    let port = get_port_by_name(&shared, "/dev/ttyS0").expect("port resolves");
    (backend, shared, port)
}

#[test]
fn failed_open_retains_nothing() {
    let (mock, _, port) = mock_with_port();
    mock.set_system_error("open: device busy");
    mock.set_next_status(Status::SystemError);

    let err = Connection::open(port.clone(), Mode::ReadWrite, &PortConfig::default())
        .expect_err("injected open failure");
    mock.set_next_status(Status::Ok);

    assert_eq!(err.status(), Status::SystemError);
    assert_eq!(err.message().as_str(), "open: device busy");
    assert_eq!(mock.open_sessions(), 0);
    assert_eq!(mock.close_calls(), 0, "nothing was opened, nothing to close");

    drop(err);
    drop(port);
    assert_eq!(mock.allocated_ports(), 0);
}

#[test]
fn opening_the_invalid_port_is_rejected() {
    let err = Connection::open(Port::invalid(), Mode::ReadWrite, &PortConfig::default())
        .expect_err("invalid port cannot be opened");
    assert_eq!(err.status(), Status::InvalidArgument);
}

#[test]
fn one_session_per_port_handle() {
    let (_, _, port) = mock_with_port();

    let _conn =
        Connection::open(port.clone(), Mode::ReadWrite, &PortConfig::default()).expect("opens");
    let err = Connection::open(port.clone(), Mode::ReadWrite, &PortConfig::default())
        .expect_err("handle is already open");
    assert_eq!(err.status(), Status::InvalidArgument);

    // The port value itself stays usable as a discovery result.
    assert_eq!(port.name(), "/dev/ttyS0");
}

#[test]
fn config_round_trip_after_open() {
    let (_, _, port) = mock_with_port();
    let cfg = PortConfig {
        baud_rate: 115200,
        bits: 8,
        stop_bits: 1,
        parity: Parity::None,
    };

    let conn = Connection::open(port, Mode::ReadWrite, &cfg).expect("opens");
    assert_eq!(conn.get_config().expect("get_config succeeds"), cfg);
}

#[test]
fn sentinel_fields_do_not_overwrite_device_settings() {
    let (_, _, port) = mock_with_port();

    // Mock devices come up at 9600/8/1/none.
    let conn =
        Connection::open(port, Mode::ReadWrite, &PortConfig::default()).expect("opens");
    let initial = conn.get_config().expect("get_config succeeds");
    assert_eq!(initial.baud_rate, 9600);

    conn.set_config(&PortConfig {
        baud_rate: 115200,
        ..PortConfig::default()
    })
    .expect("set_config succeeds");

    let updated = conn.get_config().expect("get_config succeeds");
    assert_eq!(updated.baud_rate, 115200);
    assert_eq!(updated.bits, initial.bits);
    assert_eq!(updated.stop_bits, initial.stop_bits);
    assert_eq!(updated.parity, initial.parity);
}

#[test]
fn empty_buffer_is_rejected_before_the_backend() {
    let (mock, _, port) = mock_with_port();
    let mut conn =
        Connection::open(port, Mode::ReadWrite, &PortConfig::default()).expect("opens");

    // Were the backend contacted, the injected status would surface instead.
    mock.set_next_status(Status::SystemError);
    let err = conn.write_blocking(&[], TIMEOUT).expect_err("empty write");
    assert_eq!(err.status(), Status::InvalidArgument);
    let err = conn.read_blocking(&mut [], TIMEOUT).expect_err("empty read");
    assert_eq!(err.status(), Status::InvalidArgument);
    mock.set_next_status(Status::Ok);

    assert_eq!(mock.allocated_messages(), 0);
}

#[test]
fn loopback_write_then_read() {
    let (_, _, port) = mock_with_port();
    let mut conn =
        Connection::open(port, Mode::ReadWrite, &PortConfig::default()).expect("opens");

    let sent = b"Hello!";
    assert_eq!(conn.write_blocking(sent, TIMEOUT).expect("write"), 6);

    let mut received = [0u8; 6];
    assert_eq!(conn.read_blocking(&mut received, TIMEOUT).expect("read"), 6);
    assert_eq!(&received, sent);
}

#[test]
fn read_next_returns_whatever_arrived_first() {
    let (_, _, port) = mock_with_port();
    let mut conn =
        Connection::open(port, Mode::ReadWrite, &PortConfig::default()).expect("opens");

    conn.write_blocking(b"abc", TIMEOUT).expect("write");

    let mut buf = [0u8; 6];
    let n = conn.read_next_blocking(&mut buf, TIMEOUT).expect("read_next");
    assert_eq!(n, 3);
    assert_eq!(&buf[..n], b"abc");
}

#[test]
fn nonblocking_io_and_buffer_accounting() {
    let (_, _, port) = mock_with_port();
    let mut conn =
        Connection::open(port, Mode::ReadWrite, &PortConfig::default()).expect("opens");

    let mut buf = [0u8; 4];
    assert_eq!(conn.read_nonblocking(&mut buf).expect("empty read"), 0);
    assert_eq!(conn.input_waiting().expect("input_waiting"), 0);

    assert_eq!(conn.write_nonblocking(b"data").expect("write"), 4);
    assert_eq!(conn.input_waiting().expect("input_waiting"), 4);
    assert_eq!(conn.output_waiting().expect("output_waiting"), 0);

    conn.flush(Buffers::Input).expect("flush");
    assert_eq!(conn.input_waiting().expect("input_waiting"), 0);
    conn.drain().expect("drain");
}

#[test]
fn mode_restricts_transfer_direction() {
    let shared: BackendRef = Arc::new(MockBackend::new(vec![
        MockDevice::native("/dev/ttyS0"),
        MockDevice::native("/dev/ttyS1"),
    ]));

    let reader_port = get_port_by_name(&shared, "/dev/ttyS0").expect("port resolves");
    let mut reader =
        Connection::open(reader_port, Mode::Read, &PortConfig::default()).expect("opens");
    let err = reader.write_blocking(b"x", TIMEOUT).expect_err("read-only");
    assert_eq!(err.status(), Status::InvalidArgument);

    let writer_port = get_port_by_name(&shared, "/dev/ttyS1").expect("port resolves");
    let mut writer =
        Connection::open(writer_port, Mode::Write, &PortConfig::default()).expect("opens");
    assert_eq!(writer.write_blocking(b"x", TIMEOUT).expect("write"), 1);
    let mut buf = [0u8; 1];
    let err = writer.read_blocking(&mut buf, TIMEOUT).expect_err("write-only");
    assert_eq!(err.status(), Status::InvalidArgument);
}

#[test]
fn drop_closes_exactly_once_even_after_failed_io() {
    let (mock, _, port) = mock_with_port();

    {
        let mut conn =
            Connection::open(port.clone(), Mode::ReadWrite, &PortConfig::default())
                .expect("opens");

        mock.set_next_status(Status::SystemError);
        let mut buf = [0u8; 4];
        let err = conn.read_blocking(&mut buf, TIMEOUT).expect_err("injected failure");
        mock.set_next_status(Status::Ok);
        assert_eq!(err.status(), Status::SystemError);
    }

    assert_eq!(mock.close_calls(), 1);
    assert_eq!(mock.open_sessions(), 0);

    drop(port);
    assert_eq!(mock.allocated_ports(), 0);
    assert_eq!(mock.allocated_messages(), 0);
}

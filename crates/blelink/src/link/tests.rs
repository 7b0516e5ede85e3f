//! Tests for the peripheral link against a scripted stack

use crate::config::{LinkConfig, StackProfile};
use crate::constants::{CCC_DESCRIPTOR_UUID, DEFAULT_MTU};
use crate::error::{LinkError, StackError};
use crate::link::{EventSink, Peripheral, PeripheralEvent};
use crate::stack::{BleStack, StackEvent};
use crate::status::{GattStatus, HciStatus};
use crate::types::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(80);

const CHAR_A: u16 = 0x0010;
const CHAR_B: u16 = 0x0020;
const CHAR_X: u16 = 0x0030;
const CHAR_N: u16 = 0x0040;
const CCC_N: u16 = 0x0041;
const USER_DESC_N: u16 = 0x0042;
const CHAR_I: u16 = 0x0050;
const CCC_I: u16 = 0x0051;
const CHAR_M: u16 = 0x0060;

/// A submission the link made to the stack
#[derive(Debug, Clone, PartialEq)]
enum Call {
    Connect { auto_connect: bool },
    Disconnect,
    Close,
    DiscoverServices,
    ReadCharacteristic(u16),
    WriteCharacteristic(u16, Vec<u8>, WriteType),
    ReadDescriptor(u16),
    WriteDescriptor(u16, Vec<u8>),
    SetNotification(u16, bool),
    ReadRssi,
    RequestMtu(u16),
    ConnectionPriority(ConnectionPriority),
    SetPhy(Phy, Phy),
    ReadPhy,
    CreateBond,
}

impl Call {
    fn is_gatt_command(&self) -> bool {
        !matches!(
            self,
            Call::Connect { .. } | Call::Disconnect | Call::Close | Call::DiscoverServices
        )
    }
}

/// Mock stack that records every submission
struct MockStack {
    calls: Mutex<Sender<Call>>,
    services: Mutex<Vec<Service>>,
    bond: Mutex<BondState>,
    fail_dispatch: AtomicBool,
}

impl MockStack {
    fn new(calls: Sender<Call>) -> Self {
        Self {
            calls: Mutex::new(calls),
            services: Mutex::new(fixture_services()),
            bond: Mutex::new(BondState::NotBonded),
            fail_dispatch: AtomicBool::new(false),
        }
    }

    fn record(&self, call: Call) -> Result<(), StackError> {
        let fails = self.fail_dispatch.load(Ordering::SeqCst) && call.is_gatt_command();
        let _ = self.calls.lock().unwrap().send(call);
        if fails {
            Err(StackError::Busy)
        } else {
            Ok(())
        }
    }

    fn set_bond_state(&self, state: BondState) {
        *self.bond.lock().unwrap() = state;
    }
}

impl BleStack for MockStack {
    fn connect(
        &self,
        _address: BdAddr,
        auto_connect: bool,
        _transport: Transport,
    ) -> Result<(), StackError> {
        self.record(Call::Connect { auto_connect })
    }

    fn disconnect(&self) -> Result<(), StackError> {
        self.record(Call::Disconnect)
    }

    fn close(&self) {
        let _ = self.record(Call::Close);
    }

    fn discover_services(&self) -> Result<(), StackError> {
        self.record(Call::DiscoverServices)
    }

    fn read_characteristic(&self, handle: u16) -> Result<(), StackError> {
        self.record(Call::ReadCharacteristic(handle))
    }

    fn write_characteristic(
        &self,
        handle: u16,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), StackError> {
        self.record(Call::WriteCharacteristic(handle, value.to_vec(), write_type))
    }

    fn read_descriptor(&self, handle: u16) -> Result<(), StackError> {
        self.record(Call::ReadDescriptor(handle))
    }

    fn write_descriptor(&self, handle: u16, value: &[u8]) -> Result<(), StackError> {
        self.record(Call::WriteDescriptor(handle, value.to_vec()))
    }

    fn set_characteristic_notification(&self, handle: u16, enable: bool) -> Result<(), StackError> {
        self.record(Call::SetNotification(handle, enable))
    }

    fn read_remote_rssi(&self) -> Result<(), StackError> {
        self.record(Call::ReadRssi)
    }

    fn request_mtu(&self, mtu: u16) -> Result<(), StackError> {
        self.record(Call::RequestMtu(mtu))
    }

    fn request_connection_priority(&self, priority: ConnectionPriority) -> Result<(), StackError> {
        self.record(Call::ConnectionPriority(priority))
    }

    fn set_preferred_phy(&self, tx: Phy, rx: Phy, _options: PhyOptions) -> Result<(), StackError> {
        self.record(Call::SetPhy(tx, rx))
    }

    fn read_phy(&self) -> Result<(), StackError> {
        self.record(Call::ReadPhy)
    }

    fn create_bond(&self) -> Result<(), StackError> {
        self.record(Call::CreateBond)
    }

    fn services(&self) -> Vec<Service> {
        self.services.lock().unwrap().clone()
    }

    fn bond_state(&self) -> BondState {
        *self.bond.lock().unwrap()
    }

    fn name(&self) -> Option<String> {
        Some("Mock HRM".to_string())
    }
}

fn characteristic(
    handle: u16,
    properties: CharacteristicProperties,
    descriptors: Vec<Descriptor>,
) -> Characteristic {
    Characteristic {
        uuid: Uuid::from_u16(0x2A00 + handle),
        handle,
        properties,
        descriptors,
    }
}

fn ccc(handle: u16) -> Descriptor {
    Descriptor {
        uuid: Uuid::from_u16(CCC_DESCRIPTOR_UUID),
        handle,
    }
}

fn fixture_services() -> Vec<Service> {
    use CharacteristicProperties as P;
    vec![Service {
        uuid: Uuid::from_u16(0x180D),
        is_primary: true,
        characteristics: vec![
            characteristic(CHAR_A, P::READ | P::WRITE, vec![]),
            characteristic(CHAR_B, P::WRITE, vec![]),
            characteristic(CHAR_X, P::READ, vec![]),
            characteristic(
                CHAR_N,
                P::NOTIFY,
                vec![
                    ccc(CCC_N),
                    Descriptor {
                        uuid: Uuid::from_u16(0x2901),
                        handle: USER_DESC_N,
                    },
                ],
            ),
            characteristic(CHAR_I, P::INDICATE, vec![ccc(CCC_I)]),
            characteristic(CHAR_M, P::NOTIFY, vec![]),
        ],
    }]
}

fn test_config() -> LinkConfig {
    LinkConfig {
        bond_lost_delay: Duration::from_millis(20),
        cancel_grace_delay: Duration::from_millis(20),
        timeout_synthesis_delay: Duration::from_millis(20),
        ..LinkConfig::default()
    }
}

struct Harness {
    peripheral: Peripheral,
    stack: Arc<MockStack>,
    sink: EventSink,
    calls: Receiver<Call>,
    events: Receiver<PeripheralEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::build(test_config(), |_| {})
    }

    fn with_config(config: LinkConfig) -> Self {
        Self::build(config, |_| {})
    }

    fn build(config: LinkConfig, setup: impl FnOnce(&MockStack)) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let (call_tx, calls) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();
        let stack = Arc::new(MockStack::new(call_tx));
        setup(&stack);

        let address = BdAddr::new([0x55, 0x44, 0x33, 0x22, 0x11, 0x00]);
        let peripheral = Peripheral::new(
            address,
            stack.clone(),
            config,
            Box::new(move |event| {
                let _ = event_tx.send(event);
            }),
        )
        .unwrap();
        let sink = peripheral.event_sink();

        Self {
            peripheral,
            stack,
            sink,
            calls,
            events,
        }
    }

    fn char(&self, handle: u16) -> Characteristic {
        fixture_services()[0]
            .characteristics
            .iter()
            .find(|c| c.handle == handle)
            .cloned()
            .unwrap()
    }

    fn descriptor(&self, handle: u16) -> Descriptor {
        fixture_services()[0]
            .characteristics
            .iter()
            .flat_map(|c| c.descriptors.iter())
            .find(|d| d.handle == handle)
            .cloned()
            .unwrap()
    }

    fn deliver(&self, event: StackEvent) {
        assert!(self.sink.deliver(event));
    }

    fn expect_call(&self, expected: Call) {
        let call = self
            .calls
            .recv_timeout(WAIT)
            .unwrap_or_else(|_| panic!("expected {:?}, stack saw nothing", expected));
        assert_eq!(call, expected);
    }

    fn expect_no_call(&self) {
        if let Ok(call) = self.calls.recv_timeout(QUIET) {
            panic!("unexpected stack call {:?}", call);
        }
    }

    fn expect_event(&self, expected: PeripheralEvent) {
        let event = self
            .events
            .recv_timeout(WAIT)
            .unwrap_or_else(|_| panic!("expected {:?}, observer saw nothing", expected));
        assert_eq!(event, expected);
    }

    fn expect_no_event(&self) {
        if let Ok(event) = self.events.recv_timeout(QUIET) {
            panic!("unexpected event {:?}", event);
        }
    }

    fn connect_link(&self) {
        self.peripheral.connect().unwrap();
        self.expect_call(Call::Connect {
            auto_connect: false,
        });
        self.deliver(StackEvent::ConnectionStateChanged {
            connected: true,
            status: HciStatus::Success,
        });
    }

    fn connect_and_discover(&self) {
        self.connect_link();
        self.expect_call(Call::DiscoverServices);
        self.deliver(StackEvent::ServicesDiscovered {
            status: GattStatus::Success,
        });
        self.expect_event(PeripheralEvent::Connected);
        assert_eq!(self.peripheral.connection_state(), ConnectionState::Connected);
    }

    fn read_ok(&self, handle: u16, value: &[u8]) {
        self.deliver(StackEvent::CharacteristicRead {
            handle,
            value: value.to_vec(),
            status: GattStatus::Success,
        });
        self.expect_event(PeripheralEvent::CharacteristicRead {
            handle,
            value: value.to_vec(),
            status: GattStatus::Success,
        });
    }

    /// Deliver a successful read that is not expected to be reported
    fn read_ok_silently(&self, handle: u16) {
        self.deliver(StackEvent::CharacteristicRead {
            handle,
            value: vec![0xFF],
            status: GattStatus::Success,
        });
    }

    fn read_failed(&self, handle: u16, status: GattStatus) {
        self.deliver(StackEvent::CharacteristicRead {
            handle,
            value: Vec::new(),
            status,
        });
    }

    fn disconnected(&self, status: HciStatus) {
        self.deliver(StackEvent::ConnectionStateChanged {
            connected: false,
            status,
        });
    }
}

#[test]
fn test_connected_reported_after_discovery() {
    let h = Harness::new();
    h.connect_link();
    h.expect_call(Call::DiscoverServices);
    h.expect_no_event();

    h.deliver(StackEvent::ServicesDiscovered {
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::Connected);
    assert_eq!(h.peripheral.name().as_deref(), Some("Mock HRM"));
}

#[test]
fn test_auto_connect() {
    let h = Harness::new();
    h.peripheral.auto_connect().unwrap();
    h.expect_call(Call::Connect { auto_connect: true });
}

#[test]
fn test_commands_run_one_at_a_time_in_order() {
    let h = Harness::new();
    h.connect_and_discover();

    let (a, b, x) = (h.char(CHAR_A), h.char(CHAR_B), h.char(CHAR_X));
    h.peripheral.read_characteristic(&a).unwrap();
    h.peripheral
        .write_characteristic(&b, b"hi", WriteType::WithResponse)
        .unwrap();
    h.peripheral.read_characteristic(&x).unwrap();

    h.expect_call(Call::ReadCharacteristic(CHAR_A));
    h.expect_no_call();

    h.read_ok(CHAR_A, &[0x01]);
    h.expect_call(Call::WriteCharacteristic(
        CHAR_B,
        b"hi".to_vec(),
        WriteType::WithResponse,
    ));
    h.expect_no_call();

    h.deliver(StackEvent::CharacteristicWrite {
        handle: CHAR_B,
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::CharacteristicWrite {
        handle: CHAR_B,
        value: b"hi".to_vec(),
        status: GattStatus::Success,
    });
    h.expect_call(Call::ReadCharacteristic(CHAR_X));
}

#[test]
fn test_consecutive_writes_report_their_own_payload() {
    let h = Harness::new();
    h.connect_and_discover();

    let a = h.char(CHAR_A);
    h.peripheral
        .write_characteristic(&a, &[0x01, 0x02], WriteType::WithResponse)
        .unwrap();
    h.peripheral
        .write_characteristic(&a, &[0x03], WriteType::WithResponse)
        .unwrap();

    for value in [vec![0x01, 0x02], vec![0x03]] {
        h.expect_call(Call::WriteCharacteristic(
            CHAR_A,
            value.clone(),
            WriteType::WithResponse,
        ));
        h.deliver(StackEvent::CharacteristicWrite {
            handle: CHAR_A,
            status: GattStatus::Success,
        });
        h.expect_event(PeripheralEvent::CharacteristicWrite {
            handle: CHAR_A,
            value,
            status: GattStatus::Success,
        });
    }
}

#[test]
fn test_set_notify_enable_and_disable() {
    let h = Harness::new();
    h.connect_and_discover();
    let n = h.char(CHAR_N);

    h.peripheral.set_notify(&n, true).unwrap();
    h.expect_call(Call::SetNotification(CHAR_N, true));
    h.expect_call(Call::WriteDescriptor(CCC_N, vec![0x01, 0x00]));
    h.deliver(StackEvent::DescriptorWrite {
        handle: CCC_N,
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::NotificationStateUpdated {
        handle: CHAR_N,
        enabled: true,
        status: GattStatus::Success,
    });
    assert!(h.peripheral.is_notifying(&n));
    assert_eq!(h.peripheral.notifying_characteristics(), vec![CHAR_N]);

    h.peripheral.set_notify(&n, false).unwrap();
    h.expect_call(Call::SetNotification(CHAR_N, false));
    h.expect_call(Call::WriteDescriptor(CCC_N, vec![0x00, 0x00]));
    h.deliver(StackEvent::DescriptorWrite {
        handle: CCC_N,
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::NotificationStateUpdated {
        handle: CHAR_N,
        enabled: false,
        status: GattStatus::Success,
    });
    assert!(h.peripheral.notifying_characteristics().is_empty());
}

#[test]
fn test_set_notify_uses_indication_when_notify_unsupported() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral.set_notify(&h.char(CHAR_I), true).unwrap();
    h.expect_call(Call::SetNotification(CHAR_I, true));
    h.expect_call(Call::WriteDescriptor(CCC_I, vec![0x02, 0x00]));
}

#[test]
fn test_failed_ccc_write_keeps_notify_state() {
    let h = Harness::new();
    h.connect_and_discover();
    let n = h.char(CHAR_N);

    h.peripheral.set_notify(&n, true).unwrap();
    h.expect_call(Call::SetNotification(CHAR_N, true));
    h.expect_call(Call::WriteDescriptor(CCC_N, vec![0x01, 0x00]));
    h.deliver(StackEvent::DescriptorWrite {
        handle: CCC_N,
        status: GattStatus::WriteNotPermitted,
    });
    h.expect_event(PeripheralEvent::NotificationStateUpdated {
        handle: CHAR_N,
        enabled: false,
        status: GattStatus::WriteNotPermitted,
    });
    assert!(!h.peripheral.is_notifying(&n));
}

#[test]
fn test_too_many_notifying() {
    let mut config = test_config();
    config.max_notifying = 1;
    let h = Harness::with_config(config);
    h.connect_and_discover();

    let n = h.char(CHAR_N);
    h.peripheral.set_notify(&n, true).unwrap();
    h.expect_call(Call::SetNotification(CHAR_N, true));
    h.expect_call(Call::WriteDescriptor(CCC_N, vec![0x01, 0x00]));
    h.deliver(StackEvent::DescriptorWrite {
        handle: CCC_N,
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::NotificationStateUpdated {
        handle: CHAR_N,
        enabled: true,
        status: GattStatus::Success,
    });

    assert_eq!(
        h.peripheral.set_notify(&h.char(CHAR_I), true),
        Err(LinkError::TooManyNotifying(1))
    );
    // Re-enabling an already notifying characteristic is not a new subscription
    assert!(h.peripheral.set_notify(&n, true).is_ok());
}

#[test]
fn test_admission_errors() {
    let h = Harness::new();
    let (a, b, x) = (h.char(CHAR_A), h.char(CHAR_B), h.char(CHAR_X));

    assert_eq!(h.peripheral.read_characteristic(&a), Err(LinkError::NotConnected));
    assert_eq!(h.peripheral.cancel_connection(), Err(LinkError::NotConnected));

    h.connect_and_discover();
    assert_eq!(h.peripheral.connect(), Err(LinkError::NotDisconnected));

    assert!(matches!(
        h.peripheral.read_characteristic(&b),
        Err(LinkError::UnsupportedProperty { handle: CHAR_B, .. })
    ));
    assert!(matches!(
        h.peripheral.set_notify(&x, true),
        Err(LinkError::UnsupportedProperty { handle: CHAR_X, .. })
    ));
    assert_eq!(
        h.peripheral.set_notify(&h.char(CHAR_M), true),
        Err(LinkError::MissingCccDescriptor(CHAR_M))
    );
    assert!(matches!(
        h.peripheral
            .write_characteristic(&a, &[0x01], WriteType::WithoutResponse),
        Err(LinkError::UnsupportedProperty { .. })
    ));
    assert_eq!(
        h.peripheral.write_characteristic(&a, &[], WriteType::WithResponse),
        Err(LinkError::EmptyValue)
    );
    assert_eq!(
        h.peripheral
            .write_characteristic(&a, &[0u8; 513], WriteType::WithResponse),
        Err(LinkError::ValueTooLong {
            length: 513,
            max: 512
        })
    );
    assert_eq!(
        h.peripheral.write_descriptor(&h.descriptor(CCC_N), &[0x01, 0x00]),
        Err(LinkError::CccWriteNotAllowed(CCC_N))
    );
    assert!(matches!(
        h.peripheral.request_mtu(DEFAULT_MTU - 1),
        Err(LinkError::InvalidArgument(_))
    ));

    let unknown = characteristic(0x0099, CharacteristicProperties::READ, vec![]);
    assert_eq!(
        h.peripheral.read_characteristic(&unknown),
        Err(LinkError::CharacteristicNotFound(0x0099))
    );

    h.expect_no_call();
}

#[test]
fn test_unsupported_on_old_stack() {
    let mut config = test_config();
    config.profile = StackProfile::for_api_level(19);
    let h = Harness::with_config(config);
    h.connect_and_discover();

    assert!(matches!(
        h.peripheral
            .request_connection_priority(ConnectionPriority::High),
        Err(LinkError::Unsupported(_))
    ));
    assert!(matches!(
        h.peripheral
            .set_preferred_phy(Phy::Le2M, Phy::Le2M, PhyOptions::NoPreferred),
        Err(LinkError::Unsupported(_))
    ));
    assert!(matches!(h.peripheral.read_phy(), Err(LinkError::Unsupported(_))));
}

#[test]
fn test_disconnect_drains_queue() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.peripheral.read_characteristic(&h.char(CHAR_X)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_A));

    h.disconnected(HciStatus::RemoteUserTerminated);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::Disconnected {
        status: HciStatus::RemoteUserTerminated,
    });
    assert_eq!(h.peripheral.connection_state(), ConnectionState::Disconnected);

    // A late completion for the flushed read is not reported
    h.read_ok_silently(CHAR_A);
    h.expect_no_event();
    h.expect_no_call();
}

#[test]
fn test_user_disconnect() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral.cancel_connection().unwrap();
    h.expect_call(Call::Disconnect);
    h.disconnected(HciStatus::LocalHostTerminated);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::Disconnected {
        status: HciStatus::LocalHostTerminated,
    });
}

#[test]
fn test_bonding_failure_retried_once() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.peripheral.read_characteristic(&h.char(CHAR_X)).unwrap();

    h.expect_call(Call::ReadCharacteristic(CHAR_A));
    h.read_failed(CHAR_A, GattStatus::InsufficientAuthentication);
    h.expect_call(Call::ReadCharacteristic(CHAR_A));
    h.expect_no_event();

    h.read_failed(CHAR_A, GattStatus::InsufficientAuthentication);
    h.expect_event(PeripheralEvent::CharacteristicRead {
        handle: CHAR_A,
        value: Vec::new(),
        status: GattStatus::InsufficientAuthentication,
    });
    h.expect_call(Call::ReadCharacteristic(CHAR_X));
}

#[test]
fn test_no_retry_when_bonded() {
    let h = Harness::build(test_config(), |stack| stack.set_bond_state(BondState::Bonded));
    h.connect_and_discover();

    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_A));
    h.read_failed(CHAR_A, GattStatus::InsufficientEncryption);
    h.expect_event(PeripheralEvent::CharacteristicRead {
        handle: CHAR_A,
        value: Vec::new(),
        status: GattStatus::InsufficientEncryption,
    });
    h.expect_no_call();
}

#[test]
fn test_other_failures_not_retried() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_A));
    h.read_failed(CHAR_A, GattStatus::ReadNotPermitted);
    h.expect_event(PeripheralEvent::CharacteristicRead {
        handle: CHAR_A,
        value: Vec::new(),
        status: GattStatus::ReadNotPermitted,
    });
    h.expect_no_call();
}

#[test]
fn test_retry_waits_for_bonding() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_A));

    h.deliver(StackEvent::BondStateChanged(BondState::Bonding));
    h.expect_event(PeripheralEvent::BondingStarted);
    h.read_failed(CHAR_A, GattStatus::InsufficientAuthentication);
    h.expect_no_call();

    h.deliver(StackEvent::BondStateChanged(BondState::Bonded));
    h.expect_event(PeripheralEvent::BondingSucceeded);
    h.expect_call(Call::ReadCharacteristic(CHAR_A));
    h.read_ok(CHAR_A, &[0x2A]);
}

#[test]
fn test_queue_held_while_bonding() {
    let h = Harness::new();
    h.connect_and_discover();

    h.deliver(StackEvent::BondStateChanged(BondState::Bonding));
    h.expect_event(PeripheralEvent::BondingStarted);
    h.peripheral.read_characteristic(&h.char(CHAR_X)).unwrap();
    h.expect_no_call();

    h.deliver(StackEvent::BondStateChanged(BondState::NotBonded));
    h.expect_event(PeripheralEvent::BondingFailed);
    h.expect_call(Call::ReadCharacteristic(CHAR_X));
}

#[test]
fn test_create_bond() {
    let h = Harness::new();
    h.peripheral.create_bond().unwrap();
    h.expect_call(Call::CreateBond);

    h.connect_and_discover();
    h.peripheral.create_bond().unwrap();
    h.peripheral.read_characteristic(&h.char(CHAR_X)).unwrap();
    h.expect_call(Call::CreateBond);
    h.expect_no_call();

    h.deliver(StackEvent::BondStateChanged(BondState::Bonding));
    h.expect_event(PeripheralEvent::BondingStarted);
    h.deliver(StackEvent::BondStateChanged(BondState::Bonded));
    h.expect_event(PeripheralEvent::BondingSucceeded);
    h.expect_call(Call::ReadCharacteristic(CHAR_X));
    assert_eq!(h.peripheral.bond_state(), BondState::Bonded);
}

#[test]
fn test_discovery_waits_for_bonding() {
    let h = Harness::build(test_config(), |stack| stack.set_bond_state(BondState::Bonding));
    h.connect_link();
    h.expect_no_call();

    h.deliver(StackEvent::BondStateChanged(BondState::Bonded));
    h.expect_event(PeripheralEvent::BondingSucceeded);
    h.expect_call(Call::DiscoverServices);
    h.deliver(StackEvent::ServicesDiscovered {
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::Connected);
}

#[test]
fn test_bonding_failure_during_connect() {
    let h = Harness::build(test_config(), |stack| stack.set_bond_state(BondState::Bonding));
    h.connect_link();

    h.deliver(StackEvent::BondStateChanged(BondState::NotBonded));
    h.expect_event(PeripheralEvent::BondingFailed);
    h.expect_call(Call::Disconnect);

    h.disconnected(HciStatus::LocalHostTerminated);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::ConnectFailed {
        status: HciStatus::LocalHostTerminated,
    });
}

#[test]
fn test_bond_lost_reported_as_connect_failure() {
    let h = Harness::build(test_config(), |stack| stack.set_bond_state(BondState::Bonded));
    h.connect_and_discover();

    h.deliver(StackEvent::BondStateChanged(BondState::NotBonded));
    h.expect_event(PeripheralEvent::BondLost);
    h.expect_no_call();

    h.disconnected(HciStatus::AuthenticationFailure);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::ConnectFailed {
        status: HciStatus::AuthenticationFailure,
    });
    assert_eq!(h.peripheral.connection_state(), ConnectionState::Disconnected);
}

#[test]
fn test_empty_discovery_fails_connection() {
    let h = Harness::build(test_config(), |stack| stack.services.lock().unwrap().clear());
    h.connect_link();
    h.expect_call(Call::DiscoverServices);
    h.deliver(StackEvent::ServicesDiscovered {
        status: GattStatus::Success,
    });
    h.expect_call(Call::Disconnect);

    h.disconnected(HciStatus::LocalHostTerminated);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::ConnectFailed {
        status: HciStatus::LocalHostTerminated,
    });
}

#[test]
fn test_connection_timeout_synthesizes_failure() {
    let mut config = test_config();
    config.connection_timeout = Duration::from_millis(30);
    let connection_timeout = config.connection_timeout;
    let h = Harness::with_config(config);

    let started = Instant::now();
    h.peripheral.connect().unwrap();
    h.expect_call(Call::Connect {
        auto_connect: false,
    });
    h.expect_call(Call::Disconnect);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::ConnectFailed {
        status: HciStatus::ConnectionFailedEstablishment,
    });
    assert!(started.elapsed() >= connection_timeout);
    assert_eq!(h.peripheral.connection_state(), ConnectionState::Disconnected);

    // A late disconnect from the stack does not produce a second report
    h.disconnected(HciStatus::Error);
    h.expect_no_event();
    h.expect_no_call();

    assert_eq!(
        h.peripheral.read_characteristic(&h.char(CHAR_A)),
        Err(LinkError::NotConnected)
    );
    h.expect_no_call();
}

#[test]
fn test_reconnect_during_bond_lost_delay() {
    let mut config = test_config();
    config.bond_lost_delay = Duration::from_millis(200);
    let h = Harness::build(config, |stack| stack.set_bond_state(BondState::Bonded));
    h.connect_and_discover();

    h.deliver(StackEvent::BondStateChanged(BondState::NotBonded));
    h.expect_event(PeripheralEvent::BondLost);
    h.stack.set_bond_state(BondState::NotBonded);

    h.disconnected(HciStatus::AuthenticationFailure);
    h.expect_call(Call::Close);
    wait_for(|| h.peripheral.connection_state() == ConnectionState::Disconnected);

    h.peripheral.connect().unwrap();
    h.expect_event(PeripheralEvent::ConnectFailed {
        status: HciStatus::AuthenticationFailure,
    });
    h.expect_call(Call::Connect {
        auto_connect: false,
    });

    // Reported once, not again when the delay would have expired
    thread::sleep(Duration::from_millis(250));
    h.expect_no_event();
    assert_eq!(h.peripheral.connection_state(), ConnectionState::Connecting);
}

#[test]
fn test_back_to_back_connect_starts_one_attempt() {
    let h = Harness::new();
    let first = h.peripheral.connect();
    let second = h.peripheral.connect();
    assert!(first.is_ok());
    assert!(matches!(second, Ok(()) | Err(LinkError::NotDisconnected)));

    h.expect_call(Call::Connect {
        auto_connect: false,
    });
    h.expect_no_call();
    h.expect_no_event();
    assert_eq!(h.peripheral.connect(), Err(LinkError::NotDisconnected));
}

#[test]
fn test_cancel_while_connecting() {
    let h = Harness::new();
    h.peripheral.connect().unwrap();
    h.expect_call(Call::Connect {
        auto_connect: false,
    });
    wait_for(|| h.peripheral.connection_state() == ConnectionState::Connecting);

    h.peripheral.cancel_connection().unwrap();
    h.expect_call(Call::Disconnect);
    // No callback from the stack; the grace timer completes the cancel
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::Disconnected {
        status: HciStatus::Success,
    });
}

#[test]
fn test_connect_failure_classification() {
    let mut config = test_config();
    config.failure_threshold = Duration::ZERO;
    let h = Harness::with_config(config);

    h.peripheral.connect().unwrap();
    h.expect_call(Call::Connect {
        auto_connect: false,
    });
    thread::sleep(Duration::from_millis(5));
    h.disconnected(HciStatus::Error);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::ConnectFailed {
        status: HciStatus::ConnectionFailedEstablishment,
    });

    let h = Harness::new();
    h.peripheral.connect().unwrap();
    h.expect_call(Call::Connect {
        auto_connect: false,
    });
    h.disconnected(HciStatus::Error);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::ConnectFailed {
        status: HciStatus::Error,
    });
}

#[test]
fn test_duplicate_completion_ignored() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.peripheral.read_characteristic(&h.char(CHAR_X)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_A));

    h.read_ok(CHAR_A, &[0x01]);
    h.expect_call(Call::ReadCharacteristic(CHAR_X));
    h.read_ok_silently(CHAR_A);
    h.expect_no_event();

    h.read_ok(CHAR_X, &[0x02]);
}

#[test]
fn test_dispatch_failure_reports_error() {
    let h = Harness::new();
    h.connect_and_discover();

    h.stack.fail_dispatch.store(true, Ordering::SeqCst);
    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_A));
    h.expect_event(PeripheralEvent::CharacteristicRead {
        handle: CHAR_A,
        value: Vec::new(),
        status: GattStatus::Error,
    });

    h.stack.fail_dispatch.store(false, Ordering::SeqCst);
    h.peripheral.read_characteristic(&h.char(CHAR_X)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_X));
}

#[test]
fn test_command_deadline() {
    let mut config = test_config();
    config.command_timeout = Some(Duration::from_millis(30));
    let h = Harness::with_config(config);
    h.connect_and_discover();

    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.peripheral.read_characteristic(&h.char(CHAR_X)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_A));
    h.expect_event(PeripheralEvent::CharacteristicRead {
        handle: CHAR_A,
        value: Vec::new(),
        status: GattStatus::Error,
    });
    h.expect_call(Call::ReadCharacteristic(CHAR_X));
}

#[test]
fn test_notification_bypasses_queue() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral.read_characteristic(&h.char(CHAR_A)).unwrap();
    h.expect_call(Call::ReadCharacteristic(CHAR_A));

    h.deliver(StackEvent::CharacteristicChanged {
        handle: CHAR_N,
        value: vec![0x00, 0x48],
    });
    h.expect_event(PeripheralEvent::CharacteristicChanged {
        handle: CHAR_N,
        value: vec![0x00, 0x48],
    });
    h.read_ok(CHAR_A, &[0x01]);
}

#[test]
fn test_mtu_request() {
    let h = Harness::new();
    h.connect_and_discover();
    assert_eq!(h.peripheral.mtu(), DEFAULT_MTU);

    h.peripheral.request_mtu(247).unwrap();
    h.expect_call(Call::RequestMtu(247));
    h.deliver(StackEvent::MtuChanged {
        mtu: 247,
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::MtuChanged {
        mtu: 247,
        status: GattStatus::Success,
    });
    assert_eq!(h.peripheral.mtu(), 247);

    h.disconnected(HciStatus::RemoteUserTerminated);
    h.expect_call(Call::Close);
    h.expect_event(PeripheralEvent::Disconnected {
        status: HciStatus::RemoteUserTerminated,
    });
    assert_eq!(h.peripheral.mtu(), DEFAULT_MTU);
}

#[test]
fn test_connection_priority_completes_immediately() {
    let h = Harness::new();
    h.connect_and_discover();

    h.peripheral
        .request_connection_priority(ConnectionPriority::High)
        .unwrap();
    h.peripheral.read_characteristic(&h.char(CHAR_X)).unwrap();

    h.expect_call(Call::ConnectionPriority(ConnectionPriority::High));
    h.expect_event(PeripheralEvent::ConnectionPriorityRequested {
        priority: ConnectionPriority::High,
        status: GattStatus::Success,
    });
    h.expect_call(Call::ReadCharacteristic(CHAR_X));
}

#[test]
fn test_descriptor_rssi_and_phy() {
    let h = Harness::new();
    h.connect_and_discover();
    let user_desc = h.descriptor(USER_DESC_N);

    h.peripheral.read_descriptor(&user_desc).unwrap();
    h.expect_call(Call::ReadDescriptor(USER_DESC_N));
    h.deliver(StackEvent::DescriptorRead {
        handle: USER_DESC_N,
        value: b"bpm".to_vec(),
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::DescriptorRead {
        handle: USER_DESC_N,
        value: b"bpm".to_vec(),
        status: GattStatus::Success,
    });

    h.peripheral.write_descriptor(&user_desc, b"rate").unwrap();
    h.expect_call(Call::WriteDescriptor(USER_DESC_N, b"rate".to_vec()));
    h.deliver(StackEvent::DescriptorWrite {
        handle: USER_DESC_N,
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::DescriptorWrite {
        handle: USER_DESC_N,
        value: b"rate".to_vec(),
        status: GattStatus::Success,
    });

    h.peripheral.read_remote_rssi().unwrap();
    h.expect_call(Call::ReadRssi);
    h.deliver(StackEvent::RemoteRssi {
        rssi: -61,
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::RemoteRssi {
        rssi: -61,
        status: GattStatus::Success,
    });

    h.peripheral
        .set_preferred_phy(Phy::Le2M, Phy::Le2M, PhyOptions::NoPreferred)
        .unwrap();
    h.expect_call(Call::SetPhy(Phy::Le2M, Phy::Le2M));
    h.deliver(StackEvent::PhyUpdated {
        tx: Phy::Le2M,
        rx: Phy::Le2M,
        status: GattStatus::Success,
    });
    h.expect_event(PeripheralEvent::PhyUpdated {
        tx: Phy::Le2M,
        rx: Phy::Le2M,
        status: GattStatus::Success,
    });

    h.peripheral.read_phy().unwrap();
    h.expect_call(Call::ReadPhy);
}

#[test]
fn test_drop_shuts_down_link() {
    let h = Harness::new();
    h.connect_and_discover();

    let Harness {
        peripheral,
        sink,
        calls,
        ..
    } = h;
    let clone = peripheral.clone();
    drop(peripheral);
    assert!(calls.recv_timeout(QUIET).is_err());

    drop(clone);
    assert_eq!(calls.recv_timeout(WAIT), Ok(Call::Disconnect));
    assert_eq!(calls.recv_timeout(WAIT), Ok(Call::Close));

    wait_for(|| {
        !sink.deliver(StackEvent::ServicesDiscovered {
            status: GattStatus::Success,
        })
    });
}

fn wait_for(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(2));
    }
}

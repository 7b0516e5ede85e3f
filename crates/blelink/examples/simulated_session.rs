use blelink::{
    BdAddr, BleStack, BondState, Characteristic, CharacteristicProperties, ConnectionPriority,
    Descriptor, EventSink, GattStatus, HciStatus, LinkConfig, Manufacturer, Peripheral,
    PeripheralEvent, Phy, PhyOptions, Service, StackError, StackEvent, Transport, Uuid, WriteType,
};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HEART_RATE_SERVICE: u16 = 0x180D;
const HEART_RATE_MEASUREMENT: u16 = 0x2A37;
const BODY_SENSOR_LOCATION: u16 = 0x2A38;

/// In-process stand-in for a platform stack talking to a heart rate monitor.
/// Every request completes immediately with a canned response.
struct SimulatedStack {
    sink: Mutex<Option<EventSink>>,
}

impl SimulatedStack {
    fn post(&self, event: StackEvent) -> Result<(), StackError> {
        let sink = self.sink.lock().map_err(|_| StackError::InvalidHandle)?;
        match sink.as_ref() {
            Some(sink) if sink.deliver(event) => Ok(()),
            _ => Err(StackError::InvalidHandle),
        }
    }
}

impl BleStack for SimulatedStack {
    fn connect(
        &self,
        _address: BdAddr,
        _auto: bool,
        _transport: Transport,
    ) -> Result<(), StackError> {
        self.post(StackEvent::ConnectionStateChanged {
            connected: true,
            status: HciStatus::Success,
        })
    }

    fn disconnect(&self) -> Result<(), StackError> {
        self.post(StackEvent::ConnectionStateChanged {
            connected: false,
            status: HciStatus::LocalHostTerminated,
        })
    }

    fn discover_services(&self) -> Result<(), StackError> {
        self.post(StackEvent::ServicesDiscovered {
            status: GattStatus::Success,
        })
    }

    fn read_characteristic(&self, handle: u16) -> Result<(), StackError> {
        // Body sensor location: chest
        self.post(StackEvent::CharacteristicRead {
            handle,
            value: vec![0x01],
            status: GattStatus::Success,
        })
    }

    fn write_characteristic(
        &self,
        handle: u16,
        _value: &[u8],
        _write_type: WriteType,
    ) -> Result<(), StackError> {
        self.post(StackEvent::CharacteristicWrite {
            handle,
            status: GattStatus::Success,
        })
    }

    fn read_descriptor(&self, handle: u16) -> Result<(), StackError> {
        self.post(StackEvent::DescriptorRead {
            handle,
            value: vec![0x00, 0x00],
            status: GattStatus::Success,
        })
    }

    fn write_descriptor(&self, handle: u16, _value: &[u8]) -> Result<(), StackError> {
        self.post(StackEvent::DescriptorWrite {
            handle,
            status: GattStatus::Success,
        })?;
        // Start streaming measurements once subscribed
        for bpm in [72u8, 75, 74] {
            self.post(StackEvent::CharacteristicChanged {
                handle: 0x0003,
                value: vec![0x00, bpm],
            })?;
        }
        Ok(())
    }

    fn set_characteristic_notification(
        &self,
        _handle: u16,
        _enable: bool,
    ) -> Result<(), StackError> {
        Ok(())
    }

    fn read_remote_rssi(&self) -> Result<(), StackError> {
        self.post(StackEvent::RemoteRssi {
            rssi: -58,
            status: GattStatus::Success,
        })
    }

    fn request_mtu(&self, mtu: u16) -> Result<(), StackError> {
        self.post(StackEvent::MtuChanged {
            mtu: mtu.min(185),
            status: GattStatus::Success,
        })
    }

    fn request_connection_priority(&self, _priority: ConnectionPriority) -> Result<(), StackError> {
        Ok(())
    }

    fn set_preferred_phy(&self, tx: Phy, rx: Phy, _options: PhyOptions) -> Result<(), StackError> {
        self.post(StackEvent::PhyUpdated {
            tx,
            rx,
            status: GattStatus::Success,
        })
    }

    fn read_phy(&self) -> Result<(), StackError> {
        self.post(StackEvent::PhyRead {
            tx: Phy::Le1M,
            rx: Phy::Le1M,
            status: GattStatus::Success,
        })
    }

    fn create_bond(&self) -> Result<(), StackError> {
        self.post(StackEvent::BondStateChanged(BondState::Bonding))?;
        self.post(StackEvent::BondStateChanged(BondState::Bonded))
    }

    fn services(&self) -> Vec<Service> {
        vec![Service {
            uuid: Uuid::from_u16(HEART_RATE_SERVICE),
            is_primary: true,
            characteristics: vec![
                Characteristic {
                    uuid: Uuid::from_u16(HEART_RATE_MEASUREMENT),
                    handle: 0x0003,
                    properties: CharacteristicProperties::NOTIFY,
                    descriptors: vec![Descriptor {
                        uuid: Uuid::from_u16(0x2902),
                        handle: 0x0004,
                    }],
                },
                Characteristic {
                    uuid: Uuid::from_u16(BODY_SENSOR_LOCATION),
                    handle: 0x0006,
                    properties: CharacteristicProperties::READ,
                    descriptors: Vec::new(),
                },
            ],
        }]
    }

    fn bond_state(&self) -> BondState {
        BondState::NotBonded
    }

    fn name(&self) -> Option<String> {
        Some("Simulated HRM".to_string())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let stack = Arc::new(SimulatedStack {
        sink: Mutex::new(None),
    });
    let address = BdAddr::parse("C0:FF:EE:00:00:01").ok_or("Invalid MAC address format")?;
    let config = LinkConfig::for_device(Manufacturer::Other, 33);

    let (tx, events) = mpsc::channel();
    let peripheral = Peripheral::new(
        address,
        stack.clone(),
        config,
        Box::new(move |event| {
            println!("  event: {:?}", event);
            let _ = tx.send(event);
        }),
    )?;
    *stack.sink.lock().map_err(|_| "stack lock poisoned")? = Some(peripheral.event_sink());

    type Wanted = fn(&PeripheralEvent) -> bool;
    let wait_for = |wanted: Wanted| -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let event = events.recv_timeout(Duration::from_secs(5))?;
            if wanted(&event) {
                return Ok(());
            }
        }
    };

    println!("Connecting to {}...", address);
    peripheral.connect()?;
    wait_for(|e| matches!(e, PeripheralEvent::Connected))?;
    println!("Connected to {:?}", peripheral.name());

    let heart_rate = Uuid::from_u16(HEART_RATE_SERVICE);
    let measurement = peripheral
        .characteristic(&heart_rate, &Uuid::from_u16(HEART_RATE_MEASUREMENT))
        .ok_or("heart rate measurement not found")?;
    let location = peripheral
        .characteristic(&heart_rate, &Uuid::from_u16(BODY_SENSOR_LOCATION))
        .ok_or("body sensor location not found")?;

    // These are queued and run one at a time
    peripheral.request_mtu(247)?;
    peripheral.read_characteristic(&location)?;
    peripheral.read_remote_rssi()?;
    peripheral.set_notify(&measurement, true)?;
    wait_for(|e| matches!(e, PeripheralEvent::NotificationStateUpdated { .. }))?;
    println!(
        "MTU is {}, notifying on {:?}",
        peripheral.mtu(),
        peripheral.notifying_characteristics()
    );

    println!("Disconnecting...");
    peripheral.cancel_connection()?;
    wait_for(|e| matches!(e, PeripheralEvent::Disconnected { .. }))?;

    println!("Done!");
    Ok(())
}

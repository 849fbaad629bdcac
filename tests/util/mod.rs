#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use std::{
    collections::HashMap,
    io::{Error, ErrorKind, Result},
    sync::{Mutex, Once},
    time::Duration,
};
use tokio::{task::yield_now, time::sleep};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use si700x::{
    control::req,
    sensor::{CONFIG_START, CONFIG_TEMP, REG_CONFIG, REG_DATA, REG_ID, REG_STATUS, STATUS_NOT_READY},
    ControlTransport, TransferPacket, Transport, XferStatus, PACKET_SIZE,
};

pub fn init_log() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();
        tracing_log::LogTracer::init().unwrap();
    });
}

/// Value of a register without special meaning.
pub fn scratch_value(address: u8, register: u8) -> u8 {
    register.wrapping_mul(3) ^ address
}

/// Simulated Si7005 behind the board firmware.
#[derive(Debug, Clone, Default)]
pub struct MockSensor {
    pub config: u8,
    /// Status reads reporting not ready after each conversion start.
    pub busy_polls: u32,
    pub temperature: [u8; 2],
    pub humidity: [u8; 2],
    pub id: u8,
    pub status_reads: u32,
    pub config_writes: Vec<u8>,
    remaining_busy: u32,
}

impl MockSensor {
    fn write_config(&mut self, value: u8) {
        self.config = value;
        self.config_writes.push(value);
        if value & CONFIG_START != 0 {
            self.remaining_busy = self.busy_polls;
        }
    }

    fn current(&self) -> [u8; 2] {
        if self.config & CONFIG_TEMP != 0 {
            self.temperature
        } else {
            self.humidity
        }
    }

    fn read(&mut self, address: u8, register: u8) -> u8 {
        match register {
            REG_STATUS => {
                self.status_reads += 1;
                if self.remaining_busy > 0 {
                    self.remaining_busy -= 1;
                    STATUS_NOT_READY
                } else {
                    0
                }
            }
            REG_DATA => self.current()[0],
            r if r == REG_DATA + 1 => self.current()[1],
            REG_CONFIG => self.config,
            REG_ID => self.id,
            other => scratch_value(address, other),
        }
    }
}

#[derive(Default)]
struct MockState {
    sensors: HashMap<u8, MockSensor>,
    reply: Option<Vec<u8>>,
    requests: Vec<TransferPacket>,
    rejects: Vec<(u8, Option<u8>, XferStatus)>,
    fail_out: Option<ErrorKind>,
    fail_in: Option<ErrorKind>,
    delay_in: Option<Duration>,
    short_reply: bool,
    misroute_reply: bool,
    controls: Vec<(u8, u16, u16)>,
    fail_control: Option<ErrorKind>,
    short_control_reply: bool,
    version: u16,
    port_count: u8,
    board_id: u8,
}

impl MockState {
    fn process(&mut self, request: &[u8]) -> Vec<u8> {
        let packet = TransferPacket::decode(request).expect("host sent malformed packet");
        self.requests.push(packet);

        let mut reply = request.to_vec();
        let data = *packet.raw_data();
        let address = packet.address;

        let rejected = self.rejects.iter().find(|(register, value, _)| {
            !packet.is_empty() && data[0] == *register && value.is_none_or(|v| packet.len() >= 2 && data[1] == v)
        });

        let status = match (self.sensors.get_mut(&address), rejected) {
            (None, _) => XferStatus::AddrNak,
            (Some(_), Some((_, _, status))) => *status,
            (Some(sensor), None) => match packet.kind {
                si700x::TransferKind::Write => {
                    if packet.len() >= 2 && data[0] == REG_CONFIG {
                        sensor.write_config(data[1]);
                    }
                    XferStatus::Success
                }
                si700x::TransferKind::WriteRead => {
                    reply[4..].copy_from_slice(&[sensor.read(address, data[0]), 0, 0, 0]);
                    XferStatus::Success
                }
                si700x::TransferKind::Read => {
                    reply[4..].copy_from_slice(&[0; 4]);
                    XferStatus::Success
                }
            },
        };
        reply[1] = status as u8;

        if std::mem::take(&mut self.misroute_reply) {
            reply[2] ^= 0x01;
        }
        if std::mem::take(&mut self.short_reply) {
            reply.truncate(5);
        }

        reply
    }
}

/// Evaluation board firmware with scripted faults.
///
/// Holds a single reply like the real firmware: a second request overwrites
/// the reply of the first.
#[derive(Default)]
pub struct MockBoard {
    state: Mutex<MockState>,
}

impl MockBoard {
    pub fn new() -> Self {
        let board = Self::default();
        {
            let mut state = board.state.lock().unwrap();
            state.version = 0x0102;
            state.port_count = 4;
            state.board_id = 7;
        }
        board
    }

    pub fn with_sensor(self, address: u8) -> Self {
        self.state.lock().unwrap().sensors.insert(address, MockSensor::default());
        self
    }

    pub fn sensor<R>(&self, address: u8, f: impl FnOnce(&mut MockSensor) -> R) -> R {
        f(self.state.lock().unwrap().sensors.get_mut(&address).expect("no such sensor"))
    }

    /// Transfers whose first data byte is `register` get `status`.
    pub fn reject_register(&self, register: u8, status: XferStatus) {
        self.state.lock().unwrap().rejects.push((register, None, status));
    }

    /// Writes of `value` to `register` get `status`.
    pub fn reject_write(&self, register: u8, value: u8, status: XferStatus) {
        self.state.lock().unwrap().rejects.push((register, Some(value), status));
    }

    pub fn clear_rejects(&self) {
        self.state.lock().unwrap().rejects.clear();
    }

    pub fn fail_next_out(&self, kind: ErrorKind) {
        self.state.lock().unwrap().fail_out = Some(kind);
    }

    pub fn fail_next_in(&self, kind: ErrorKind) {
        self.state.lock().unwrap().fail_in = Some(kind);
    }

    pub fn fail_next_control(&self, kind: ErrorKind) {
        self.state.lock().unwrap().fail_control = Some(kind);
    }

    /// The next bulk in waits `delay` before it takes the reply.
    pub fn delay_next_in(&self, delay: Duration) {
        self.state.lock().unwrap().delay_in = Some(delay);
    }

    pub fn short_next_reply(&self) {
        self.state.lock().unwrap().short_reply = true;
    }

    pub fn misroute_next_reply(&self) {
        self.state.lock().unwrap().misroute_reply = true;
    }

    pub fn short_next_control_reply(&self) {
        self.state.lock().unwrap().short_control_reply = true;
    }

    pub fn set_port_count(&self, port_count: u8) {
        self.state.lock().unwrap().port_count = port_count;
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<TransferPacket> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Control requests received so far.
    pub fn controls(&self) -> Vec<(u8, u16, u16)> {
        self.state.lock().unwrap().controls.clone()
    }
}

impl Transport for MockBoard {
    async fn bulk_out(&self, data: Bytes) -> Result<usize> {
        yield_now().await;

        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.fail_out.take() {
            return Err(Error::new(kind, "injected bulk out failure"));
        }
        assert_eq!(data.len(), PACKET_SIZE, "host sent wrong packet size");

        let reply = state.process(&data);
        state.reply = Some(reply);
        Ok(data.len())
    }

    async fn bulk_in(&self, len: usize) -> Result<BytesMut> {
        yield_now().await;
        let delay = self.state.lock().unwrap().delay_in.take();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.fail_in.take() {
            return Err(Error::new(kind, "injected bulk in failure"));
        }

        match state.reply.take() {
            Some(mut reply) => {
                reply.truncate(len);
                Ok(BytesMut::from(&reply[..]))
            }
            None => Err(Error::new(ErrorKind::TimedOut, "no reply pending")),
        }
    }
}

impl ControlTransport for MockBoard {
    async fn control_out(&self, request: u8, value: u16, index: u16) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.fail_control.take() {
            return Err(Error::new(kind, "injected control failure"));
        }
        state.controls.push((request, value, index));
        Ok(())
    }

    async fn control_in(&self, request: u8, value: u16, index: u16, len: usize) -> Result<BytesMut> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.fail_control.take() {
            return Err(Error::new(kind, "injected control failure"));
        }
        state.controls.push((request, value, index));

        let mut reply = match request {
            req::GET_VERSION => state.version.to_le_bytes().to_vec(),
            req::GET_PORT_COUNT => vec![state.port_count],
            req::GET_BOARD_ID => vec![state.board_id],
            _ => return Err(Error::new(ErrorKind::BrokenPipe, "stall")),
        };
        reply.truncate(len);
        if std::mem::take(&mut state.short_control_reply) {
            reply.pop();
        }
        Ok(BytesMut::from(&reply[..]))
    }
}

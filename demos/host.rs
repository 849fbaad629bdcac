//! Reads all sensors of an attached evaluation board.

use std::{sync::Once, time::Duration};
use tokio::time::sleep;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use si700x::host::UsbTransport;

/// Time for the ports to come out of sleep.
const WAKE_DELAY: Duration = Duration::from_secs(10);

fn init_log() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();
        tracing_log::LogTracer::init().unwrap();
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_log();

    let transport = UsbTransport::open().expect("cannot open evaluation board");
    println!("Using board {}", transport.id());
    let board = transport.into_board();
    let control = board.control();

    control.set_led(true).await.expect("cannot switch LED on");
    println!("Version: {}", control.version().await.expect("cannot read version"));
    println!("Board id: {}", control.board_id().await.expect("cannot read board id"));

    let ports = board.wake().await.expect("cannot wake ports");
    println!("{ports} ports awake");
    sleep(WAKE_DELAY).await;

    println!("Scanning...");
    let addresses = board.scan().await.expect("scan failed");
    if addresses.is_empty() {
        println!("No sensor found");
    }

    for address in addresses {
        let sensor = board.sensor(address);
        println!("Sensor at {address:#04x}");

        match sensor.device_id().await {
            Ok(id) => println!("  device id: {id:x}"),
            Err(err) => println!("  cannot read device id: {err}"),
        }

        match sensor.measure(si700x::Quantity::Temperature).await {
            Ok(temperature) => println!("  temperature: {temperature}"),
            Err(err) => println!("  cannot read temperature: {err}"),
        }

        match sensor.measure(si700x::Quantity::Humidity).await {
            Ok(humidity) => println!("  humidity: {humidity}"),
            Err(err) => println!("  cannot read humidity: {err}"),
        }
    }

    control.set_led(false).await.expect("cannot switch LED off");
}

//! Interactive console against a terminal or the built-in simulator
//!
//! ```text
//! poslink-demo --host 192.168.1.50 --company "ACME Retail"
//! RUST_LOG=poslink=debug poslink-demo --simulate x30tr
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use poslink::{DeviceClass, SessionConfig, SessionManager, Simulator};
use poslink_core::constants::DEFAULT_PORT;

#[derive(Debug, Parser)]
#[command(name = "poslink-demo", version, about = "Drive an X30TR / 300TR terminal from the console")]
struct Args {
    /// Terminal address; the built-in simulator is used when omitted
    #[arg(long)]
    host: Option<String>,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Company name sent when connecting
    #[arg(long, default_value = "poslink-demo")]
    company: String,

    /// Device class played by the simulator
    #[arg(long, value_enum, default_value_t = SimulatedDevice::T300tr)]
    simulate: SimulatedDevice,

    /// JSON session configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SimulatedDevice {
    X30tr,
    #[value(name = "300tr")]
    T300tr,
}

impl From<SimulatedDevice> for DeviceClass {
    fn from(device: SimulatedDevice) -> Self {
        match device {
            SimulatedDevice::X30tr => DeviceClass::X30TR,
            SimulatedDevice::T300tr => DeviceClass::T300TR,
        }
    }
}

const X30TR_BASKET: &str = r#"{
    "basketID": "a123ca24-ca2c-401c-8134-f0de2ec25c25",
    "documentType": 9008,
    "customerInfo": { "taxID": "11111111111" },
    "items": [
        { "name": "İLAÇ", "price": 1000, "quantity": 1000, "sectionNo": 2, "taxPercent": 2000, "type": 0 }
    ],
    "taxFreeAmount": 5000,
    "paymentItems": [
        { "amount": 6000, "description": "Cash", "type": 1 }
    ]
}"#;

const T300TR_BASKET: &str = r#"{
    "basketID": "a123ca24-ca2c-401c-8134-f0de2ec25c25",
    "documentType": 0,
    "customerInfo": { "taxID": "11111111111" },
    "items": [
        { "name": "İLAÇ", "price": 1000, "quantity": 1000, "sectionNo": 1, "taxPercent": 1000, "type": 0 }
    ],
    "taxFreeAmount": 5000
}"#;

const T300TR_PAYMENT: &str = r#"{"amount":6000,"description":"Nakit","type":1}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };

    // The simulator must outlive the manager's link
    let (manager, _simulator) = match &args.host {
        Some(host) => (SessionManager::tcp(host.clone(), args.port, config)?, None),
        None => {
            let (transport, simulator) = Simulator::memory(args.simulate.into());
            println!("No --host given, using a simulated {}", simulator.device_class().name());
            (SessionManager::new(transport, config)?, Some(simulator))
        }
    };

    let _serial = manager.register_serial_handler(|tag, data| {
        println!("Serial input [{}]:\n{}", tag, data);
        Ok(())
    });
    let _state = manager.register_state_handler(|connected, device_id| {
        let state = if connected { "connected" } else { "disconnected" };
        println!("Device {}: {}", state, device_id);
        Ok(())
    });

    let info = manager
        .connect(args.company.as_str())
        .await
        .context("connecting to terminal")?;
    println!("Connected to {} (index {})", info.device_id, info.device_index());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_menu();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "0" => println!("Active Device Index: {}", manager.active_device_index()),
            "1" => send_example_basket(&manager).await,
            "2" => send_example_payment(&manager).await,
            "3" => match manager.get_fiscal_info_json().await {
                Ok(json) => println!("Fiscal info:\n{}", json),
                Err(e) => println!("Fiscal info failed: {} ({})", e, e.status()),
            },
            "r" => match manager.reconnect().await {
                Ok(info) => println!("Reconnected to {} (index {})", info.device_id, info.device_index()),
                Err(e) => println!("Reconnect failed: {}", e),
            },
            "q" => break,
            "" => continue,
            other => println!("Invalid input '{}'. Try again.", other),
        }
        print_menu();
    }

    manager.teardown().await;
    Ok(())
}

fn print_menu() {
    println!();
    println!("0: Get Active Device");
    println!("1: Send Example Basket");
    println!("2: Send Example Payment (300TR only)");
    println!("3: Get Fiscal Info");
    println!("r: Reconnect");
    println!("q: Quit");
}

async fn send_example_basket(manager: &SessionManager) {
    let basket = match DeviceClass::try_from(manager.active_device_index()) {
        Ok(DeviceClass::X30TR) => X30TR_BASKET,
        Ok(DeviceClass::T300TR) => T300TR_BASKET,
        Err(_) => {
            println!("No active device");
            return;
        }
    };
    println!("basketResult: {}", manager.send_basket_json(basket).await);
}

async fn send_example_payment(manager: &SessionManager) {
    match DeviceClass::try_from(manager.active_device_index()) {
        Ok(class) if class.supports_standalone_payment() => {
            println!("paymentResult: {}", manager.send_payment_json(T300TR_PAYMENT).await);
        }
        Ok(class) => println!("{} takes payments inside the basket", class.name()),
        Err(_) => println!("No active device"),
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use dongle_link::serial::{ByteCodes, TextReply, TextReplyKind};
use dongle_link::{
    AppConfig, DeviceEvent, DeviceManager, DeviceRegistry, DeviceSignature, PortBackend, Trace,
};

/// Interactive terminal for a LoRa/satellite dongle
#[derive(Debug, Parser)]
#[command(name = "dongle-term", version)]
struct Args {
    /// JSON configuration with a `devices` list
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vendor id of the device to look for (used when no config is given)
    #[arg(long, default_value = "0x2E8A")]
    vid: String,

    /// Product id of the device to look for (used when no config is given)
    #[arg(long, default_value = "0x000A")]
    pid: String,

    /// List serial ports and exit
    #[arg(long)]
    list: bool,
}

fn render_event(event: &DeviceEvent) -> String {
    match event {
        DeviceEvent::Connected { port } => format!("[System] Device connected on {}", port),
        DeviceEvent::ConnectionError { port, detail } => {
            format!("[System] Could not connect to {}: {}", port, detail)
        }
        DeviceEvent::Disconnected { port } => format!("[System] Device on {} disconnected", port),
        DeviceEvent::DataReceived(frame) if ByteCodes::is_ack(frame) => "[In]: ACK".to_string(),
        DeviceEvent::DataReceived(frame) => match TextReply::parse(frame) {
            Ok(reply) => match reply.kind {
                TextReplyKind::Message => format!("[In]: {}    {}", reply.command, reply.timestamp),
                TextReplyKind::Response if reply.param_count == 0 => {
                    format!("[In]: {}    {}", reply.command, reply.timestamp)
                }
                TextReplyKind::Response => format!(
                    "[In]: {} (Params): {}    {}",
                    reply.command,
                    reply.params.join(", "),
                    reply.timestamp
                ),
            },
            Err(_) => format!("[In]: {}", hex::encode_upper(frame)),
        },
        DeviceEvent::SystemMessage(message) => {
            format!("[System] {}", String::from_utf8_lossy(message).trim())
        }
        DeviceEvent::FrameError(message) => {
            format!("[System] Frame error: {}", String::from_utf8_lossy(message).trim())
        }
        DeviceEvent::ReadError(detail) => format!("[System] Error while reading from the device: {}", detail),
        DeviceEvent::WriteCompleted { .. } => "[System] Message correctly sent.".to_string(),
        DeviceEvent::WriteError(detail) => format!("[System] Error while writing on the device: {}", detail),
        DeviceEvent::NotConnected => "[System] Device is not connected, can't send command.".to_string(),
    }
}

/// Turn one input line into a trace: `text CMD [params]`, `bin CMDHEX [PARAMHEX]`, `reboot`
fn parse_command(line: &str) -> anyhow::Result<Trace> {
    let mut parts = line.splitn(3, char::is_whitespace);
    let verb = parts.next().unwrap_or_default();

    match verb {
        "reboot" => Ok(Trace::reboot()),
        "text" => {
            let command = parts.next().context("usage: text <COMMAND> [params]")?;
            Ok(Trace::text(command, parts.next().unwrap_or_default().trim()))
        }
        "bin" => {
            let code = parts.next().context("usage: bin <cmd-hex> [param-hex]")?;
            let command_code = hex::decode(code).context("command code is not hex")?;
            let params = match parts.next() {
                Some(p) => hex::decode(p.trim()).context("parameters are not hex")?,
                None => Vec::new(),
            };
            Ok(Trace::binary(code, command_code, params))
        }
        other => bail!("unknown command '{}'", other),
    }
}

fn registry_from_args(args: &Args, config: Option<&AppConfig>) -> anyhow::Result<DeviceRegistry> {
    match config {
        Some(config) => Ok(config.registry()?),
        None => Ok(DeviceRegistry::new().with(DeviceSignature::from_hex("dongle", &args.vid, &args.pid)?)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list {
        for port in dongle_link::serial::SystemBackend::new().available_ports()? {
            println!("{}\t{}\t{}", port.port_name, port.description, port.hwid);
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Some(AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?),
        None => None,
    };
    let registry = registry_from_args(&args, config.as_ref())?;
    let link = config.map(|c| c.link).unwrap_or_default();

    let (tx, mut rx) = mpsc::unbounded_channel::<DeviceEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", render_event(&event));
        }
    });

    let mut device = DeviceManager::connect_with(
        registry,
        Arc::new(tx),
        Arc::new(dongle_link::serial::SystemBackend::new()),
        link,
    )
    .await;

    if !device.is_connected() {
        println!("[System] No devices found.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" => break,
            "connect" => {
                if let Err(e) = device.reconnect().await {
                    println!("[System] {}", e);
                }
            }
            "info" => match device.port_data() {
                Ok(port) => println!("[System] {} {} {}", port.port_name, port.description, port.hwid),
                Err(e) => println!("[System] {}", e),
            },
            _ => match parse_command(line) {
                Ok(trace) => device.write(&trace).await,
                Err(e) => println!("[System] {}", e),
            },
        }
    }

    device.close().await;
    drop(device);
    let _ = printer.await;
    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use can_portable as can;
use can_portable::{CanDriver, CanEvent, EventArg};

#[derive(Parser, Debug)]
#[command(
    name = "canmgr",
    version,
    about = "Portable CAN interface manager",
    disable_help_subcommand = true
)]
struct Cli {
    /// JSON file with `manager` and `can` sections
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Slcan,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available CAN interfaces
    List {
        /// Backend to query
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
    },
    /// Wire two mock interfaces together and exercise the manager
    Demo,
    /// Queue a CAN frame and pump until the driver takes it
    Send {
        #[arg(long, default_value = "mock0")]
        device: String,
        /// CAN ID in hex (e.g., 0x123)
        #[arg(long)]
        id: String,
        /// Data bytes as hex, space-separated (e.g., "01 02 03")
        #[arg(long, value_delimiter = ' ')]
        data: Vec<String>,
        /// Backend to use
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
        /// Bitrate override
        #[arg(long, value_enum)]
        bitrate: Option<Bitrate>,
        /// Pump cycles to wait for the driver to accept the frame
        #[arg(long, default_value_t = 50u32)]
        retries: u32,
    },
    /// Sniff frames through a background pump
    Sniff {
        /// Interface name (e.g., /dev/ttyACM0)
        #[arg(long, default_value = "mock0")]
        device: String,
        /// Number of frames to read before exiting
        #[arg(long, default_value_t = 10)]
        count: u32,
        /// Backend to use
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
        /// Bitrate override
        #[arg(long, value_enum)]
        bitrate: Option<Bitrate>,
        /// Pump period in milliseconds
        #[arg(long, default_value_t = 5u64)]
        interval_ms: u64,
        /// Give up after this many milliseconds without reaching --count
        #[arg(long, default_value_t = 5000u64)]
        timeout_ms: u64,
        /// Write frames to a .canlog (NDJSON) file
        #[arg(long)]
        to: Option<String>,
    },
    /// Detect the bus bitrate in listen-only mode
    Autobaud {
        #[arg(long, default_value = "mock0")]
        device: String,
        /// Backend to use
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
        /// Candidate bitrates in priority order, comma-separated
        #[arg(long, value_delimiter = ',', default_values_t = can::DEFAULT_BITRATES.to_vec())]
        rates: Vec<u32>,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let file_cfg = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List { backend } => can_list_backend(backend),
        Commands::Demo => can_demo(&file_cfg),
        Commands::Send {
            device,
            id,
            data,
            backend,
            bitrate,
            retries,
        } => can_send_backend(&file_cfg, backend, &device, &id, &data, bitrate, retries),
        Commands::Sniff {
            device,
            count,
            backend,
            bitrate,
            interval_ms,
            timeout_ms,
            to,
        } => can_sniff_backend(
            &file_cfg,
            backend,
            &device,
            count,
            bitrate,
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
            to.as_deref(),
        ),
        Commands::Autobaud {
            device,
            backend,
            rates,
        } => can_autobaud_backend(&file_cfg, backend, &device, &rates),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    manager: can::ManagerConfig,
    can: can::CanConfig,
}

fn load_config(path: Option<&str>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("cannot open config {path}: {e}"))?;
    let cfg: FileConfig = serde_json::from_reader(file)?;
    cfg.manager.validate()?;
    info!(path, "loaded configuration");
    Ok(cfg)
}

/// Driver for `backend`, plus the scripting handle when it is the mock.
fn open_driver(backend: Backend, device: &str) -> (Box<dyn CanDriver>, Option<can::MockHandle>) {
    match backend {
        Backend::Mock => {
            let (drv, handle) = can::MockDriver::new(device);
            let drv: Box<dyn CanDriver> = Box::new(drv);
            (drv, Some(handle))
        }
        Backend::Slcan => {
            let drv: Box<dyn CanDriver> = Box::new(can::SlcanDriver::new(device));
            (drv, None)
        }
    }
}

fn can_config(file_cfg: &FileConfig, bitrate: Option<Bitrate>) -> can::CanConfig {
    let mut cfg = file_cfg.can;
    if let Some(b) = bitrate {
        cfg.bitrate = b.bps();
    }
    cfg
}

fn can_list_backend(backend: Backend) -> Result<()> {
    let buses = match backend {
        Backend::Mock => can::MockDriver::list()?,
        Backend::Slcan => can::SlcanDriver::list()?,
    };
    for bus in buses {
        println!("{}\t{}", bus.name, bus.driver);
    }
    Ok(())
}

fn can_demo(file_cfg: &FileConfig) -> Result<()> {
    let config = can::CanConfig {
        mode: can::CanMode::Loopback,
        filter_id: 0x100,
        filter_mask: 0x700,
        ..file_cfg.can
    };

    let mut mgr = can::CanManager::new(file_cfg.manager.clone())?;
    let (drv0, _h0) = can::MockDriver::new("mock0");
    let (drv1, h1) = can::MockDriver::new("mock1");
    let id0 = mgr.register(Box::new(drv0), Some(&config))?;
    let id1 = mgr.register(Box::new(drv1), Some(&config))?;
    println!("interfaces {id0} {id1} added");

    mgr.register_callback(
        id0,
        CanEvent::Rx,
        Some(Box::new(|inst: can::InstanceId, _ev: CanEvent, arg: &EventArg| {
            if let Some(msg) = arg.message() {
                print!("{inst} rx callback: ");
                print_frame(msg);
            }
        })),
    );
    mgr.register_callback(
        id0,
        CanEvent::TxComplete,
        Some(Box::new(|inst: can::InstanceId, _ev: CanEvent, arg: &EventArg| {
            if let Some(msg) = arg.message() {
                println!("{inst} tx complete: {}", msg.id);
            }
        })),
    );

    let id = can::CanId::standard(0x123).ok_or_else(|| anyhow::anyhow!("invalid CAN id"))?;
    let msg = can::CanMessage::new(id, &[0x55]).ok_or_else(|| anyhow::anyhow!("invalid frame"))?;
    mgr.enqueue_send(id0, &msg)?;
    let report = mgr.pump();
    println!(
        "pump: sent={} received={} dropped={}",
        report.sent, report.received, report.dropped
    );
    while let Some(rx) = mgr.dequeue_receive(id0)? {
        print!("{id0} dequeued: ");
        print_frame(&rx);
    }

    let rate = mgr.detect_bitrate(id0, &can::DEFAULT_BITRATES)?;
    println!("{id0} autobaud: {rate} bit/s");

    h1.set_bus_bitrate(None);
    match mgr.start_autobaud(id1, &can::DEFAULT_BITRATES) {
        Ok(rate) => println!("{id1} autobaud: {rate} bit/s"),
        Err(e) => println!("{id1} autobaud: {e}"),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn can_send_backend(
    file_cfg: &FileConfig,
    backend: Backend,
    device: &str,
    id_str: &str,
    data_hex: &[String],
    bitrate: Option<Bitrate>,
    retries: u32,
) -> Result<()> {
    let id = parse_id(id_str).ok_or_else(|| anyhow::anyhow!("invalid CAN id: {id_str}"))?;
    let bytes = parse_hex_bytes(data_hex)?;
    let msg =
        can::CanMessage::new(id, &bytes).ok_or_else(|| anyhow::anyhow!("invalid frame length"))?;

    let mut mgr = can::CanManager::new(file_cfg.manager.clone())?;
    let (drv, _handle) = open_driver(backend, device);
    let inst = mgr.register(drv, Some(&can_config(file_cfg, bitrate)))?;
    mgr.enqueue_send(inst, &msg)?;
    for _ in 0..retries.max(1) {
        mgr.pump();
        if mgr.tx_pending(inst)? == 0 {
            info!(device, "sent frame ({backend:?})");
            return Ok(());
        }
        thread::sleep(Duration::from_millis(10));
    }
    Err(anyhow::anyhow!(
        "driver did not accept the frame after {retries} pump cycles"
    ))
}

#[allow(clippy::too_many_arguments)]
fn can_sniff_backend(
    file_cfg: &FileConfig,
    backend: Backend,
    device: &str,
    count: u32,
    bitrate: Option<Bitrate>,
    period: Duration,
    timeout: Duration,
    to: Option<&str>,
) -> Result<()> {
    let mut writer = match to {
        Some(path) => {
            let mut w = BufWriter::new(File::create(path)?);
            let header = canlog_header_line(backend, device, bitrate);
            w.write_all(header.as_bytes())?;
            w.write_all(b"\n")?;
            Some(w)
        }
        None => None,
    };

    let shared = can::SharedManager::new(can::CanManager::new(file_cfg.manager.clone())?);
    let (drv, mock) = open_driver(backend, device);
    let inst = shared.with(|m| m.register(drv, Some(&can_config(file_cfg, bitrate))))??;
    let pump = shared.spawn_pump(period)?;

    let deadline = Instant::now() + timeout;
    let mut seen = 0u32;
    while seen < count && Instant::now() < deadline {
        if let Some(handle) = &mock {
            // Simulated peer heartbeat so the mock has traffic to show
            handle.inject_raw(0x700, &[0x05])?;
        }
        while let Some(frame) = shared.with(|m| m.dequeue_receive(inst))?? {
            print_frame(&frame);
            if let Some(w) = writer.as_mut() {
                w.write_all(canlog_record_line(&frame).as_bytes())?;
                w.write_all(b"\n")?;
            }
            seen += 1;
            if seen >= count {
                break;
            }
        }
        thread::sleep(period);
    }
    pump.stop();

    if let Some(w) = writer.as_mut() {
        w.flush()?;
    }
    if seen < count {
        warn!(seen, count, "sniff timed out");
    }
    Ok(())
}

fn can_autobaud_backend(
    file_cfg: &FileConfig,
    backend: Backend,
    device: &str,
    rates: &[u32],
) -> Result<()> {
    let mut mgr = can::CanManager::new(file_cfg.manager.clone())?;
    let (drv, _handle) = open_driver(backend, device);
    let inst = mgr.register(drv, Some(&file_cfg.can))?;
    match mgr.detect_bitrate(inst, rates) {
        Ok(rate) => println!("{device}\t{rate}"),
        Err(e) => {
            eprintln!("{device}\tno bitrate detected ({e})");
            return Err(e.into());
        }
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Bitrate {
    #[value(name = "10k")]
    B10k,
    #[value(name = "20k")]
    B20k,
    #[value(name = "50k")]
    B50k,
    #[value(name = "100k")]
    B100k,
    #[value(name = "125k")]
    B125k,
    #[value(name = "250k")]
    B250k,
    #[value(name = "500k")]
    B500k,
    #[value(name = "800k")]
    B800k,
    #[value(name = "1m")]
    B1M,
}

impl Bitrate {
    fn bps(self) -> u32 {
        match self {
            Bitrate::B10k => 10_000,
            Bitrate::B20k => 20_000,
            Bitrate::B50k => 50_000,
            Bitrate::B100k => 100_000,
            Bitrate::B125k => 125_000,
            Bitrate::B250k => 250_000,
            Bitrate::B500k => 500_000,
            Bitrate::B800k => 800_000,
            Bitrate::B1M => 1_000_000,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Bitrate::B10k => "10k",
            Bitrate::B20k => "20k",
            Bitrate::B50k => "50k",
            Bitrate::B100k => "100k",
            Bitrate::B125k => "125k",
            Bitrate::B250k => "250k",
            Bitrate::B500k => "500k",
            Bitrate::B800k => "800k",
            Bitrate::B1M => "1m",
        }
    }
}

fn parse_id(s: &str) -> Option<can::CanId> {
    let s_trim = s.trim();
    let no_prefix = s_trim.strip_prefix("0x").unwrap_or(s_trim);
    let parsed = u32::from_str_radix(no_prefix, 16).ok()?;
    can::CanId::from_raw(parsed)
}

fn parse_hex_bytes(items: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(items.len());
    for s in items {
        let t = s.trim();
        if t.is_empty() {
            continue;
        }
        let no_prefix = t.strip_prefix("0x").unwrap_or(t);
        let b = u8::from_str_radix(no_prefix, 16)
            .map_err(|e| anyhow::anyhow!("invalid hex byte '{t}': {e}"))?;
        out.push(b);
    }
    Ok(out)
}

fn format_ts(f: &can::CanMessage) -> String {
    f.timestamp
        .map(|t| {
            t.0.format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "".into())
        })
        .unwrap_or_default()
}

fn print_frame(f: &can::CanMessage) {
    let data_s = f
        .payload()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "{id}\tlen={len}\t{data}\t{ts}",
        id = f.id,
        len = f.dlc,
        data = data_s,
        ts = format_ts(f)
    );
}

fn canlog_header_line(backend: Backend, device: &str, bitrate: Option<Bitrate>) -> String {
    let header = CanlogHeader {
        format: "canlog".to_string(),
        version: 1,
        backend: format!("{backend:?}"),
        device: device.to_string(),
        bitrate: bitrate.map(|b| b.as_str().to_string()),
    };
    serde_json::to_string(&header).unwrap_or_else(|_| "{}".to_string())
}

fn canlog_record_line(f: &can::CanMessage) -> String {
    let rec = CanlogRecord {
        ts: format_ts(f),
        id: format!("{}", f.id),
        ext: f.id.is_extended(),
        len: usize::from(f.dlc),
        data: f.payload().iter().map(|b| format!("{b:02X}")).collect(),
    };
    serde_json::to_string(&rec).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Serialize, Deserialize)]
struct CanlogHeader {
    format: String,
    version: u32,
    backend: String,
    device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bitrate: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct CanlogRecord {
    ts: String,
    id: String,
    ext: bool,
    len: usize,
    data: String,
}

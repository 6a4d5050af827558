use crate::{
    BusInfo, CanConfig, CanDriver, CanId, CanMessage, CanMode, Capabilities, Result,
    TransportError, DEFAULT_BITRATE,
};
use serialport::{SerialPort, SerialPortType};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::num::ParseIntError;
use std::time::Duration;
use tracing::{debug, info};

/// Polls per candidate bitrate before giving up on it.
const PROBE_ATTEMPTS: usize = 100;
const POLL_TIMEOUT: Duration = Duration::from_millis(2);
const REPLY_TIMEOUT: Duration = Duration::from_millis(200);

/// SLCAN text protocol over serial (common on macOS USB-CAN dongles)
pub struct SlcanDriver {
    path: String,
    port: Option<Box<dyn SerialPort>>,
    bitrate: SlcanBitrate,
    mode: CanMode,
    acc: Vec<u8>,
    /// Data frames read while waiting for a command reply.
    pending: VecDeque<CanMessage>,
}

impl SlcanDriver {
    /// Driver for the adapter at `path`. The port is opened by `init`.
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            port: None,
            bitrate: SlcanBitrate::B500k,
            mode: CanMode::Normal,
            acc: Vec::with_capacity(64),
            pending: VecDeque::new(),
        }
    }

    pub fn list() -> Result<Vec<BusInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
            match p.port_type {
                SerialPortType::UsbPort(_u) => {
                    out.push(BusInfo {
                        name: p.port_name,
                        driver: "slcan-serial".to_string(),
                    });
                }
                _ => {
                    // Still include other serial ports; user can pick
                    out.push(BusInfo {
                        name: p.port_name,
                        driver: "serial".to_string(),
                    });
                }
            }
        }
        Ok(out)
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or(TransportError::Driver("slcan port not open".to_string()))
    }

    /// Close the channel, program the bitrate, reopen normal or listen-only.
    fn reopen(&mut self, bitrate: SlcanBitrate, mode: CanMode) -> Result<()> {
        let open_cmd: &[u8] = match mode {
            CanMode::Normal => b"O\r",
            CanMode::Silent | CanMode::Autobaud => b"L\r",
            CanMode::Loopback => return Err(TransportError::Unsupported("slcan loopback")),
        };
        let port = self.port()?;
        // Closing an already closed channel is answered with BELL; ignore it
        let _ = Self::write_cmd(port.as_mut(), b"C\r");
        Self::write_cmd(port.as_mut(), &[b'S', bitrate.code(), b'\r'])?;
        Self::write_cmd(port.as_mut(), open_cmd)?;
        self.bitrate = bitrate;
        self.mode = mode;
        self.acc.clear();
        self.pending.clear();
        Ok(())
    }

    fn encode_frame(msg: &CanMessage) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(32);
        if msg.id.is_extended() {
            out.push(b'T');
            out.extend_from_slice(format!("{:08X}", msg.id.raw()).as_bytes());
        } else {
            out.push(b't');
            out.extend_from_slice(format!("{:03X}", msg.id.raw()).as_bytes());
        }
        if msg.dlc > 8 {
            return Err(TransportError::InvalidFrame("dlc > 8"));
        }
        out.push(b'0' + msg.dlc);
        for byte in msg.payload() {
            out.extend_from_slice(format!("{byte:02X}").as_bytes());
        }
        out.push(b'\r');
        Ok(out)
    }

    fn parse_hex<T>(digits: &[u8], parse: fn(&str, u32) -> Result<T, ParseIntError>) -> Result<T> {
        let s = std::str::from_utf8(digits).map_err(|_| TransportError::InvalidFrame("utf8"))?;
        parse(s, 16).map_err(|_| TransportError::InvalidFrame("hex"))
    }

    fn parse_frame(line: &[u8]) -> Result<CanMessage> {
        let (id_len, extended) = match line.first() {
            Some(b't') => (3, false),
            Some(b'T') => (8, true),
            Some(b'r') | Some(b'R') => return Err(TransportError::Unsupported("RTR frames")),
            Some(_) => return Err(TransportError::InvalidFrame("unknown header")),
            None => return Err(TransportError::InvalidFrame("empty")),
        };
        if line.len() < 1 + id_len + 1 {
            return Err(TransportError::InvalidFrame("short header"));
        }
        let raw = Self::parse_hex(&line[1..1 + id_len], u32::from_str_radix)?;
        let id = if extended {
            CanId::extended(raw)
        } else {
            u16::try_from(raw).ok().and_then(CanId::standard)
        }
        .ok_or(TransportError::InvalidFrame("id range"))?;

        let dlc = line[1 + id_len].wrapping_sub(b'0');
        if dlc > 8 {
            return Err(TransportError::InvalidFrame("dlc > 8"));
        }
        let mut data = [0u8; 8];
        let mut idx = 2 + id_len;
        for slot in data.iter_mut().take(usize::from(dlc)) {
            let end = idx + 2;
            if end > line.len() {
                return Err(TransportError::InvalidFrame("short data"));
            }
            *slot = Self::parse_hex(&line[idx..end], u8::from_str_radix)?;
            idx = end;
        }
        let mut msg = CanMessage {
            id,
            dlc,
            data,
            timestamp: None,
        };
        msg.stamp();
        Ok(msg)
    }

    /// Pull one `\r`-terminated line out of the adapter, waiting at most `timeout`.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }
        if self.fill(timeout)? {
            Ok(self.take_line())
        } else {
            Ok(None)
        }
    }

    /// Append whatever the adapter sends within `timeout`; false on timeout.
    fn fill(&mut self, timeout: Duration) -> Result<bool> {
        let port = self.port()?;
        port.set_timeout(timeout)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let mut buf = [0u8; 128];
        match port.read(&mut buf) {
            Ok(n) => {
                self.acc.extend_from_slice(&buf[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }

    /// Scan buffered lines for a status (`F`) reply. Data frames met on the
    /// way are queued for `receive` in arrival order.
    fn buffered_status(&mut self) -> Result<Option<u32>> {
        while let Some(line) = self.take_line() {
            match line.first() {
                Some(b'F') if line.len() >= 3 => {
                    let flags = Self::parse_hex(&line[1..3], u8::from_str_radix)?;
                    return Ok(Some(u32::from(flags)));
                }
                Some(b't') | Some(b'T') => match Self::parse_frame(&line) {
                    Ok(msg) => self.pending.push_back(msg),
                    Err(e) => debug!(error = %e, "slcan: dropping malformed frame"),
                },
                _ => {}
            }
        }
        Ok(None)
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.acc.iter().position(|&b| b == b'\r' || b == 0x07)?;
        let line = self.acc.drain(..=pos).collect::<Vec<u8>>();
        // Drop terminator
        Some(line[..line.len().saturating_sub(1)].to_vec())
    }

    fn write_cmd(port: &mut dyn SerialPort, cmd: &[u8]) -> Result<()> {
        port.write_all(cmd)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }
}

impl CanDriver for SlcanDriver {
    fn info(&self) -> BusInfo {
        BusInfo {
            name: self.path.clone(),
            driver: "slcan".to_string(),
        }
    }

    fn capabilities(&self) -> Capabilities {
        // SLCAN hardware filters are not standardized; no interrupts over serial
        Capabilities {
            set_filter: false,
            interrupts: false,
            ..Capabilities::ALL
        }
    }

    fn init(&mut self, config: Option<&CanConfig>) -> Result<()> {
        let port = serialport::new(&self.path, 115200)
            .timeout(REPLY_TIMEOUT)
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.port = Some(port);
        let bps = config.map(|c| c.bitrate).unwrap_or(DEFAULT_BITRATE);
        let bitrate = SlcanBitrate::from_bps(bps)
            .ok_or_else(|| TransportError::Config(format!("unsupported slcan bitrate {bps}")))?;
        let mode = config.map(|c| c.mode).unwrap_or_default();
        self.reopen(bitrate, mode)?;
        info!(path = %self.path, bitrate = bitrate.bps(), ?mode, "slcan channel open");
        Ok(())
    }

    fn send(&mut self, msg: &CanMessage, _timeout_ms: u32) -> Result<()> {
        if self.mode.is_listen_only() {
            return Err(TransportError::Driver(
                "channel opened listen-only".to_string(),
            ));
        }
        let line = Self::encode_frame(msg)?;
        self.port()?
            .write_all(&line)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<CanMessage>> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }
        while let Some(line) = self.read_line(POLL_TIMEOUT)? {
            match line.first() {
                Some(b't') | Some(b'T') => return Self::parse_frame(&line).map(Some),
                // command acks, transmit acks ('z'/'Z') and status replies
                _ => continue,
            }
        }
        Ok(None)
    }

    fn set_mode(&mut self, mode: CanMode) -> Result<()> {
        self.reopen(self.bitrate, mode)
    }

    fn error_state(&mut self) -> Result<u32> {
        Self::write_cmd(self.port()?.as_mut(), b"F\r")?;
        loop {
            if let Some(flags) = self.buffered_status()? {
                return Ok(flags);
            }
            if !self.fill(REPLY_TIMEOUT)? {
                return Err(TransportError::Timeout);
            }
        }
    }

    fn auto_baud_detect(&mut self, rates: &[u32]) -> Result<u32> {
        for &bps in rates {
            let Some(candidate) = SlcanBitrate::from_bps(bps) else {
                debug!(bitrate = bps, "slcan autobaud: no Sx code, skipping");
                continue;
            };
            self.reopen(candidate, CanMode::Silent)?;
            debug!(bitrate = bps, "slcan autobaud: listening");
            for _ in 0..PROBE_ATTEMPTS {
                if self.receive()?.is_some() {
                    return Ok(bps);
                }
            }
        }
        Err(TransportError::BitrateNotDetected)
    }
}

/// Supported SLCAN bitrates (mapped to Sx codes)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlcanBitrate {
    B10k,  // S0
    B20k,  // S1
    B50k,  // S2
    B100k, // S3
    B125k, // S4
    B250k, // S5
    B500k, // S6
    B800k, // S7
    B1M,   // S8
}

impl SlcanBitrate {
    pub fn code(self) -> u8 {
        match self {
            SlcanBitrate::B10k => b'0',
            SlcanBitrate::B20k => b'1',
            SlcanBitrate::B50k => b'2',
            SlcanBitrate::B100k => b'3',
            SlcanBitrate::B125k => b'4',
            SlcanBitrate::B250k => b'5',
            SlcanBitrate::B500k => b'6',
            SlcanBitrate::B800k => b'7',
            SlcanBitrate::B1M => b'8',
        }
    }

    pub fn bps(self) -> u32 {
        match self {
            SlcanBitrate::B10k => 10_000,
            SlcanBitrate::B20k => 20_000,
            SlcanBitrate::B50k => 50_000,
            SlcanBitrate::B100k => 100_000,
            SlcanBitrate::B125k => 125_000,
            SlcanBitrate::B250k => 250_000,
            SlcanBitrate::B500k => 500_000,
            SlcanBitrate::B800k => 800_000,
            SlcanBitrate::B1M => 1_000_000,
        }
    }

    pub fn from_bps(bps: u32) -> Option<Self> {
        [
            SlcanBitrate::B10k,
            SlcanBitrate::B20k,
            SlcanBitrate::B50k,
            SlcanBitrate::B100k,
            SlcanBitrate::B125k,
            SlcanBitrate::B250k,
            SlcanBitrate::B500k,
            SlcanBitrate::B800k,
            SlcanBitrate::B1M,
        ]
        .into_iter()
        .find(|b| b.bps() == bps)
    }
}

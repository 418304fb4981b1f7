// *****************************************************************************
// Modbus polling client library
// Copyright (c) 2021 by the authors, see LICENSE
//
// This program is free software; you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation; either version 2 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program; if not, write to the Free Software Foundation, Inc.,
// 59 Temple Place, Suite 330, Boston, MA  02111-1307  USA
//
// Module authors:
//   Georg Brandl <g.brandl@fz-juelich.de>
//
// *****************************************************************************

//! Link and polling options.

use std::time::Duration;

use log::LevelFilter;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};
use crate::batch::Limits;
use crate::codec::WordOrder;
use crate::proto::{Connector, MIN_TIMEOUT};
use crate::proto::modbus::TcpConnector;

static TCP_ADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^modbus://([^:/]+)(?::(\d+))?(?:/(\d+)?)?$")
        .expect("invalid regex")
});
const TCP_ADDR_FMT: &str = "modbus://host[:port][/unit]";

static RTU_ADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rtu://(COM\d+|/dev/tty\w+)(?::(\d+))?(?:,([78])([NEO])([12]))?(?:/(\d+)?)?$")
        .expect("invalid regex")
});
const RTU_ADDR_FMT: &str = "rtu://device[:baud][,8N1][/unit]";

static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:[0-9]{1,3}\.){3}[0-9]{1,3}|[A-Za-z0-9]([A-Za-z0-9.-]*[A-Za-z0-9])?)$")
        .expect("invalid regex")
});
static DEVICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(COM\d+|/dev/tty\w+)$").expect("invalid regex")
});

const MB_PORT: u16 = 502;
const BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200];
const MAX_INTERVAL: Duration = Duration::from_secs(60);
/// Largest register count a single read may request.
pub const MAX_READ_REGISTERS: u16 = 125;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParityMode {
    None,
    Even,
    Odd,
}

/// Serial line parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Framing {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: ParityMode,
    pub stop_bits: u8,
}

impl Default for Framing {
    fn default() -> Self {
        Self { baud_rate: 9600, data_bits: 8, parity: ParityMode::None, stop_bits: 1 }
    }
}

/// The physical link a poller talks over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Link {
    Tcp { host: String, port: u16 },
    Serial { device: String, framing: Framing },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    pub link: Link,
    pub unit_id: u8,
    /// Interval between refreshes of a wanted value.
    pub read_rate: Duration,
    /// Pause after each transaction before the link is used again.
    pub delay: Duration,
    pub swap_word: bool,
    pub swap_dword: bool,
    pub swap_bytes: bool,
    /// Use the single-point write functions for single values.
    pub single_write: bool,
    pub max_registers: u16,
    pub max_unused: u16,
    /// How long a value keeps being polled after it was last asked for.
    pub keep_alive: Duration,
    pub log_level: LevelFilter,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            link: Link::Tcp { host: "127.0.0.1".into(), port: MB_PORT },
            unit_id: 1,
            read_rate: Duration::from_millis(1000),
            delay: Duration::from_millis(20),
            swap_word: false,
            swap_dword: false,
            swap_bytes: true,
            single_write: true,
            max_registers: 32,
            max_unused: 5,
            keep_alive: Duration::from_secs(60),
            log_level: LevelFilter::Info,
        }
    }
}

impl Options {
    /// Builds default options for a link given as `modbus://host[:port][/unit]`
    /// or `rtu://device[:baud][,8N1][/unit]`.
    pub fn from_url(addr: &str) -> Result<Self> {
        let mut options = Options::default();
        if addr.starts_with("rtu://") {
            let err0 = || Error::InvalidAddress(RTU_ADDR_FMT);
            let caps = RTU_ADDR_RE.captures(addr).ok_or_else(err0)?;
            let mut framing = Framing::default();
            if let Some(baud) = caps.get(2) {
                framing.baud_rate = baud.as_str().parse().map_err(|_| err0())?;
            }
            if let (Some(data), Some(parity), Some(stop)) = (caps.get(3), caps.get(4), caps.get(5)) {
                framing.data_bits = data.as_str().parse().map_err(|_| err0())?;
                framing.parity = match parity.as_str() {
                    "E" => ParityMode::Even,
                    "O" => ParityMode::Odd,
                    _ => ParityMode::None,
                };
                framing.stop_bits = stop.as_str().parse().map_err(|_| err0())?;
            }
            if let Some(unit) = caps.get(6) {
                options.unit_id = unit.as_str().parse().map_err(|_| err0())?;
            }
            options.link = Link::Serial { device: caps[1].into(), framing };
        } else {
            let err0 = || Error::InvalidAddress(TCP_ADDR_FMT);
            let caps = TCP_ADDR_RE.captures(addr).ok_or_else(err0)?;
            let port = if let Some(port) = caps.get(2) {
                port.as_str().parse().map_err(|_| err0())?
            } else {
                MB_PORT
            };
            if let Some(unit) = caps.get(3) {
                options.unit_id = unit.as_str().parse().map_err(|_| err0())?;
            }
            options.link = Link::Tcp { host: caps[1].into(), port };
        }
        Ok(options)
    }

    /// Checks all values for plausibility.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(msg));
        match &self.link {
            Link::Tcp { host, port } => {
                if !HOST_RE.is_match(host) {
                    return fail(format!("illegal host {:?}", host));
                }
                if *port == 0 {
                    return fail("port must be in 1..=65535".into());
                }
            }
            Link::Serial { device, framing } => {
                if !DEVICE_RE.is_match(device) {
                    return fail(format!("illegal serial device {:?}", device));
                }
                if !BAUD_RATES.contains(&framing.baud_rate) {
                    return fail(format!("unsupported baud rate {}", framing.baud_rate));
                }
                if framing.data_bits != 7 && framing.data_bits != 8 {
                    return fail(format!("unsupported data bits {}", framing.data_bits));
                }
                if framing.stop_bits != 1 && framing.stop_bits != 2 {
                    return fail(format!("unsupported stop bits {}", framing.stop_bits));
                }
            }
        }
        if !(1..=247).contains(&self.unit_id) {
            return fail(format!("unit id {} not in 1..=247", self.unit_id));
        }
        if self.read_rate > MAX_INTERVAL || self.delay > MAX_INTERVAL {
            return fail("read rate and delay must not exceed 60 s".into());
        }
        if self.max_registers == 0 || self.max_registers > MAX_READ_REGISTERS {
            return fail(format!("max registers {} not in 1..={}", self.max_registers, MAX_READ_REGISTERS));
        }
        if self.max_unused > MAX_READ_REGISTERS {
            return fail(format!("max unused {} exceeds {}", self.max_unused, MAX_READ_REGISTERS));
        }
        Ok(())
    }

    /// Identity of the physical link; pollers are shared per key.
    pub fn link_key(&self) -> String {
        match &self.link {
            Link::Tcp { host, port } => format!("{}:{}", host, port),
            Link::Serial { device, .. } => device.clone(),
        }
    }

    /// Bound for connect attempts and single transactions.
    pub fn timeout(&self) -> Duration {
        self.read_rate.max(MIN_TIMEOUT)
    }

    pub fn word_order(&self) -> WordOrder {
        WordOrder { swap_word: self.swap_word, swap_dword: self.swap_dword, swap_bytes: self.swap_bytes }
    }

    pub fn limits(&self) -> Limits {
        Limits { max_registers: self.max_registers, max_unused: self.max_unused }
    }

    /// Creates the connector matching the configured link.
    pub fn connector(&self) -> Result<Box<dyn Connector>> {
        match &self.link {
            Link::Tcp { host, port } => Ok(Box::new(TcpConnector::new(host, *port, self.unit_id))),
            #[cfg(feature = "serial")]
            Link::Serial { device, framing } =>
                Ok(Box::new(crate::proto::rtu::RtuConnector::new(device, *framing))),
            #[cfg(not(feature = "serial"))]
            Link::Serial { .. } =>
                Err(Error::Config("serial links need the `serial` feature".into())),
        }
    }
}

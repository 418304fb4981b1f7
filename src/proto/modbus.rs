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

//! Modbus/TCP links.

use std::time::Duration;

use modbus::{Client, Coil, tcp::Config};

use crate::Result;
use crate::proto::{Connector, Transport};

pub struct TcpConnector {
    host: String,
    port: u16,
    unit: u8,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, unit: u8) -> Self {
        Self { host: host.into(), port, unit }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, timeout: Duration) -> Result<Box<dyn Transport>> {
        let client = open(&self.host, self.port, self.unit, timeout)?;
        log::info!("connected to {}:{}", self.host, self.port);
        Ok(Box::new(TcpLink {
            host: self.host.clone(),
            port: self.port,
            unit: self.unit,
            timeout,
            client,
        }))
    }

    fn describe(&self) -> String {
        format!("modbus://{}:{}", self.host, self.port)
    }
}

/// An open Modbus/TCP connection.
///
/// The unit id is fixed per connection by the underlying client, so a
/// request for another unit reopens the socket with that id.
pub struct TcpLink {
    host: String,
    port: u16,
    unit: u8,
    timeout: Duration,
    client: modbus::Transport,
}

impl TcpLink {
    fn client(&mut self, unit: u8) -> Result<&mut modbus::Transport> {
        if self.unit != unit {
            log::debug!("reconnecting to {}:{} for unit {}", self.host, self.port, unit);
            self.client = open(&self.host, self.port, unit, self.timeout)?;
            self.unit = unit;
        }
        Ok(&mut self.client)
    }
}

fn open(host: &str, port: u16, unit: u8, timeout: Duration) -> Result<modbus::Transport> {
    let config = Config {
        tcp_port: port,
        modbus_uid: unit,
        tcp_connect_timeout: Some(timeout),
        tcp_read_timeout: Some(timeout),
        tcp_write_timeout: Some(timeout),
    };
    Ok(modbus::Transport::new_with_cfg(host, config)?)
}

fn from_coils(coils: Vec<Coil>) -> Vec<bool> {
    coils.into_iter().map(|c| c == Coil::On).collect()
}

fn to_coil(bit: bool) -> Coil {
    if bit { Coil::On } else { Coil::Off }
}

impl Transport for TcpLink {
    fn read_coils(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        Ok(from_coils(self.client(unit)?.read_coils(addr, count)?))
    }

    fn read_discrete_inputs(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        Ok(from_coils(self.client(unit)?.read_discrete_inputs(addr, count)?))
    }

    fn read_holding_registers(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        Ok(self.client(unit)?.read_holding_registers(addr, count)?)
    }

    fn read_input_registers(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        Ok(self.client(unit)?.read_input_registers(addr, count)?)
    }

    fn write_single_coil(&mut self, unit: u8, addr: u16, value: bool) -> Result<()> {
        Ok(self.client(unit)?.write_single_coil(addr, to_coil(value))?)
    }

    fn write_single_register(&mut self, unit: u8, addr: u16, value: u16) -> Result<()> {
        Ok(self.client(unit)?.write_single_register(addr, value)?)
    }

    fn write_multiple_coils(&mut self, unit: u8, addr: u16, values: &[bool]) -> Result<()> {
        let coils: Vec<Coil> = values.iter().map(|&b| to_coil(b)).collect();
        Ok(self.client(unit)?.write_multiple_coils(addr, &coils)?)
    }

    fn write_multiple_registers(&mut self, unit: u8, addr: u16, values: &[u16]) -> Result<()> {
        Ok(self.client(unit)?.write_multiple_registers(addr, values)?)
    }
}

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

//! Modbus/RTU links over a serial port.

use std::io::{Read, Write};
use std::time::Duration;

use rmodbus::{client::ModbusRequest, guess_response_frame_len, ErrorKind, ModbusProto};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::{Error, ExceptionCode, Result};
use crate::options::{Framing, ParityMode};
use crate::proto::{Connector, Transport};

pub struct RtuConnector {
    path: String,
    framing: Framing,
}

impl RtuConnector {
    pub fn new(path: &str, framing: Framing) -> Self {
        Self { path: path.into(), framing }
    }
}

fn serial_error(err: serialport::Error) -> Error {
    Error::Serial(err.to_string())
}

impl Connector for RtuConnector {
    fn connect(&self, timeout: Duration) -> Result<Box<dyn Transport>> {
        let data_bits = if self.framing.data_bits == 7 { DataBits::Seven } else { DataBits::Eight };
        let parity = match self.framing.parity {
            ParityMode::None => Parity::None,
            ParityMode::Even => Parity::Even,
            ParityMode::Odd => Parity::Odd,
        };
        let stop_bits = if self.framing.stop_bits == 2 { StopBits::Two } else { StopBits::One };
        let port = serialport::new(&self.path, self.framing.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(timeout)
            .open()
            .map_err(serial_error)?;
        log::info!("opened {} at {} baud", self.path, self.framing.baud_rate);
        Ok(Box::new(RtuLink { port }))
    }

    fn describe(&self) -> String {
        format!("rtu://{}:{}", self.path, self.framing.baud_rate)
    }
}

fn rtu_error(err: ErrorKind) -> Error {
    let code = match err {
        ErrorKind::IllegalFunction => ExceptionCode::IllegalFunction,
        ErrorKind::IllegalDataAddress => ExceptionCode::IllegalDataAddress,
        ErrorKind::IllegalDataValue => ExceptionCode::IllegalDataValue,
        ErrorKind::SlaveDeviceFailure => ExceptionCode::ServerDeviceFailure,
        ErrorKind::Acknowledge => ExceptionCode::Acknowledge,
        ErrorKind::SlaveDeviceBusy => ExceptionCode::ServerDeviceBusy,
        ErrorKind::NegativeAcknowledge => ExceptionCode::NegativeAcknowledge,
        ErrorKind::MemoryParityError => ExceptionCode::MemoryParityError,
        ErrorKind::GatewayPathUnavailable => ExceptionCode::GatewayPathUnavailable,
        ErrorKind::GatewayTargetFailed => ExceptionCode::GatewayTargetFailedToRespond,
        other => return Error::Serial(format!("{:?}", other)),
    };
    Error::Exception(code)
}

/// An open serial line; one request/response at a time.
pub struct RtuLink {
    port: Box<dyn SerialPort>,
}

impl RtuLink {
    fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.port.clear(ClearBuffer::Input).map_err(serial_error)?;
        self.port.write_all(request)?;
        let mut response = vec![0; 3];
        self.port.read_exact(&mut response)?;
        let len = guess_response_frame_len(&response, ModbusProto::Rtu).map_err(rtu_error)? as usize;
        if len > response.len() {
            response.resize(len, 0);
            self.port.read_exact(&mut response[3..])?;
        }
        Ok(response)
    }

    fn read_bits(&mut self, unit: u8, addr: u16, count: u16, discrete: bool) -> Result<Vec<bool>> {
        let mut mreq = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut request = Vec::new();
        if discrete {
            mreq.generate_get_discretes(addr, count, &mut request).map_err(rtu_error)?;
        } else {
            mreq.generate_get_coils(addr, count, &mut request).map_err(rtu_error)?;
        }
        let response = self.transact(&request)?;
        let mut result = Vec::new();
        mreq.parse_bool(&response, &mut result).map_err(rtu_error)?;
        result.truncate(count as usize);
        Ok(result)
    }

    fn read_words(&mut self, unit: u8, addr: u16, count: u16, input: bool) -> Result<Vec<u16>> {
        let mut mreq = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut request = Vec::new();
        if input {
            mreq.generate_get_inputs(addr, count, &mut request).map_err(rtu_error)?;
        } else {
            mreq.generate_get_holdings(addr, count, &mut request).map_err(rtu_error)?;
        }
        let response = self.transact(&request)?;
        let mut result = Vec::new();
        mreq.parse_u16(&response, &mut result).map_err(rtu_error)?;
        Ok(result)
    }

    fn confirm(&mut self, mreq: &mut ModbusRequest, request: &[u8]) -> Result<()> {
        let response = self.transact(request)?;
        mreq.parse_ok(&response).map_err(rtu_error)
    }
}

impl Transport for RtuLink {
    fn read_coils(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        self.read_bits(unit, addr, count, false)
    }

    fn read_discrete_inputs(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        self.read_bits(unit, addr, count, true)
    }

    fn read_holding_registers(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(unit, addr, count, false)
    }

    fn read_input_registers(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(unit, addr, count, true)
    }

    fn write_single_coil(&mut self, unit: u8, addr: u16, value: bool) -> Result<()> {
        let mut mreq = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut request = Vec::new();
        mreq.generate_set_coil(addr, value, &mut request).map_err(rtu_error)?;
        self.confirm(&mut mreq, &request)
    }

    fn write_single_register(&mut self, unit: u8, addr: u16, value: u16) -> Result<()> {
        let mut mreq = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut request = Vec::new();
        mreq.generate_set_holding(addr, value, &mut request).map_err(rtu_error)?;
        self.confirm(&mut mreq, &request)
    }

    fn write_multiple_coils(&mut self, unit: u8, addr: u16, values: &[bool]) -> Result<()> {
        let mut mreq = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut request = Vec::new();
        mreq.generate_set_coils_bulk(addr, values, &mut request).map_err(rtu_error)?;
        self.confirm(&mut mreq, &request)
    }

    fn write_multiple_registers(&mut self, unit: u8, addr: u16, values: &[u16]) -> Result<()> {
        let mut mreq = ModbusRequest::new(unit, ModbusProto::Rtu);
        let mut request = Vec::new();
        mreq.generate_set_holdings_bulk(addr, values, &mut request).map_err(rtu_error)?;
        self.confirm(&mut mreq, &request)
    }
}

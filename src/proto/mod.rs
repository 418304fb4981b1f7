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

pub mod modbus;
#[cfg(feature = "serial")]
pub mod rtu;

use std::time::Duration;

use crate::Result;
use crate::ledger::{Points, ReadFunction, Signature};

/// Lower bound for connect and transaction timeouts.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Write function codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteFunction {
    SingleCoil = 5,
    SingleRegister = 6,
    MultipleCoils = 15,
    MultipleRegisters = 16,
}

impl WriteFunction {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            5 => Some(WriteFunction::SingleCoil),
            6 => Some(WriteFunction::SingleRegister),
            15 => Some(WriteFunction::MultipleCoils),
            16 => Some(WriteFunction::MultipleRegisters),
            _ => None,
        }
    }

    /// Chooses the write function for `count` points of a readable table.
    /// Returns None for read-only tables.
    pub fn select(table: ReadFunction, count: usize, single_write: bool) -> Option<Self> {
        let single = count == 1 && single_write;
        match table {
            ReadFunction::Coils if single => Some(WriteFunction::SingleCoil),
            ReadFunction::Coils => Some(WriteFunction::MultipleCoils),
            ReadFunction::HoldingRegisters if single => Some(WriteFunction::SingleRegister),
            ReadFunction::HoldingRegisters => Some(WriteFunction::MultipleRegisters),
            _ => None,
        }
    }

    pub fn is_single(self) -> bool {
        matches!(self, WriteFunction::SingleCoil | WriteFunction::SingleRegister)
    }

    pub fn is_bits(self) -> bool {
        matches!(self, WriteFunction::SingleCoil | WriteFunction::MultipleCoils)
    }
}

/// One open link to a Modbus server or bus.
///
/// Errors for which `Error::is_transport` is true mean the link is unusable
/// and will be dropped; exception responses leave it open.
pub trait Transport: Send {
    fn read_coils(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<bool>>;
    fn read_discrete_inputs(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<bool>>;
    fn read_holding_registers(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<u16>>;
    fn read_input_registers(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<u16>>;

    fn write_single_coil(&mut self, unit: u8, addr: u16, value: bool) -> Result<()>;
    fn write_single_register(&mut self, unit: u8, addr: u16, value: u16) -> Result<()>;
    fn write_multiple_coils(&mut self, unit: u8, addr: u16, values: &[bool]) -> Result<()>;
    fn write_multiple_registers(&mut self, unit: u8, addr: u16, values: &[u16]) -> Result<()>;

    /// Runs the read transaction described by `sig`.
    fn read(&mut self, sig: &Signature) -> Result<Points> {
        let Signature { unit, function, start, count } = *sig;
        Ok(match function {
            ReadFunction::Coils => Points::Bits(self.read_coils(unit, start, count)?),
            ReadFunction::DiscreteInputs => Points::Bits(self.read_discrete_inputs(unit, start, count)?),
            ReadFunction::HoldingRegisters => Points::Words(self.read_holding_registers(unit, start, count)?),
            ReadFunction::InputRegisters => Points::Words(self.read_input_registers(unit, start, count)?),
        })
    }

    /// Writes `values` starting at `addr`.  Single-point functions issue one
    /// transaction per value with increasing address; a failure stops the
    /// sequence, leaving earlier values written.
    fn write(&mut self, unit: u8, function: WriteFunction, addr: u16, values: &Points) -> Result<()> {
        match function {
            WriteFunction::SingleCoil => {
                for (i, &bit) in values.to_bits().iter().enumerate() {
                    self.write_single_coil(unit, addr.wrapping_add(i as u16), bit)?;
                }
                Ok(())
            }
            WriteFunction::SingleRegister => {
                for (i, &word) in values.to_words().iter().enumerate() {
                    self.write_single_register(unit, addr.wrapping_add(i as u16), word)?;
                }
                Ok(())
            }
            WriteFunction::MultipleCoils => self.write_multiple_coils(unit, addr, &values.to_bits()),
            WriteFunction::MultipleRegisters => self.write_multiple_registers(unit, addr, &values.to_words()),
        }
    }
}

/// Opens transports for one physical link.
pub trait Connector: Send + Sync {
    fn connect(&self, timeout: Duration) -> Result<Box<dyn Transport>>;

    /// Human readable link description for log messages.
    fn describe(&self) -> String;
}

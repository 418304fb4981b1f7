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

//! Shared polling access to Modbus units.
//!
//! Many independent data items are read and written over one physical link
//! per unit.  Reads are served from a cache that a background poller keeps
//! fresh, coalescing neighbouring items into as few transactions as possible.

#[macro_use]
pub mod logging;
pub mod batch;
pub mod codec;
pub mod device;
pub mod ledger;
pub mod options;
pub mod poller;
pub mod proto;
pub mod registry;
pub mod store;

use std::fmt;

use thiserror::Error;

pub use codec::{Kind, Value, WordOrder};
pub use device::{DataItem, Device};
pub use ledger::{Points, ReadFunction, Signature};
pub use options::{Link, Options};
pub use poller::{Poller, Tick};
pub use proto::WriteFunction;
pub use registry::Registry;


#[derive(Debug, Error)]
pub enum Error {
    // malformed link address
    #[error("invalid address, must be {0}")]
    InvalidAddress(&'static str),
    // rejected options or data item table
    #[error("invalid configuration: {0}")]
    Config(String),

    // demanded data has not been fetched yet
    #[error("value not yet available")]
    NotYetAvailable,
    // store lock held by a competing operation
    #[error("device busy")]
    Busy,
    // connection could not be (re)established
    #[error("not connected")]
    NotConnected,

    // Modbus exception response from the remote
    #[error("Modbus exception: {0}")]
    Exception(ExceptionCode),

    // general IO error
    #[error(transparent)]
    IO(#[from] std::io::Error),
    // Modbus specific error
    #[error("Modbus error: {0}")]
    Modbus(modbus::Error),
    // serial line error
    #[error("serial error: {0}")]
    Serial(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unknown data item {0:?}")]
    UnknownItem(String),

    // error with annotation
    #[error("during {1}: {0}")]
    Wrapped(#[source] Box<Error>, &'static str),
}

impl Error {
    /// Whether the error means the link itself can no longer be trusted.
    ///
    /// Exception responses and local errors leave the connection usable.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::IO(_) | Error::Modbus(_) | Error::Serial(_) | Error::NotConnected => true,
            Error::Wrapped(inner, _) => inner.is_transport(),
            _ => false,
        }
    }

    /// The exception code, if this is (or wraps) a Modbus exception response.
    pub fn exception(&self) -> Option<ExceptionCode> {
        match self {
            Error::Exception(code) => Some(*code),
            Error::Wrapped(inner, _) => inner.exception(),
            _ => None,
        }
    }
}

impl From<modbus::Error> for Error {
    fn from(err: modbus::Error) -> Self {
        match err {
            modbus::Error::Exception(code) => Error::Exception(ExceptionCode::from(code as u8)),
            other => Error::Modbus(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;


/// Exception codes a Modbus server may answer with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Unknown(u8),
}

impl From<u8> for ExceptionCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::ServerDeviceBusy,
            0x07 => ExceptionCode::NegativeAcknowledge,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailedToRespond,
            _ => ExceptionCode::Unknown(value),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> Self {
        match code {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::NegativeAcknowledge => 0x07,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailedToRespond => 0x0B,
            ExceptionCode::Unknown(value) => value,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            ExceptionCode::IllegalFunction => "illegal function",
            ExceptionCode::IllegalDataAddress => "illegal data address",
            ExceptionCode::IllegalDataValue => "illegal data value",
            ExceptionCode::ServerDeviceFailure => "server device failure",
            ExceptionCode::Acknowledge => "acknowledge",
            ExceptionCode::ServerDeviceBusy => "server device busy",
            ExceptionCode::NegativeAcknowledge => "negative acknowledge",
            ExceptionCode::MemoryParityError => "memory parity error",
            ExceptionCode::GatewayPathUnavailable => "gateway path unavailable",
            ExceptionCode::GatewayTargetFailedToRespond => "gateway target failed to respond",
            ExceptionCode::Unknown(code) => return write!(f, "unknown exception code {}", code),
        };
        write!(f, "{} ({})", text, u8::from(*self))
    }
}

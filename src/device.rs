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

//! Named, typed data items on top of a shared poller.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Error, ExceptionCode, Result};
use crate::codec::{self, Kind, Value};
use crate::ledger::{Points, ReadFunction};
use crate::options::Options;
use crate::poller::Poller;
use crate::proto::{Connector, WriteFunction};
use crate::registry::Registry;

/// A typed value at a fixed address of one of the four tables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DataItem {
    pub function: ReadFunction,
    pub address: u16,
    pub kind: Kind,
    pub scale: f64,
}

impl DataItem {
    pub fn new(function: ReadFunction, address: u16, kind: Kind) -> Self {
        Self { function, address, kind, scale: 1.0 }
    }

    pub fn scaled(self, scale: f64) -> Self {
        Self { scale, ..self }
    }

    /// Number of points the item occupies in its table.
    pub fn count(&self) -> u16 {
        if self.function.is_bits() { 1 } else { self.kind.word_count() as u16 }
    }

    pub fn validate(&self) -> Result<()> {
        if self.function.is_bits() && self.kind != Kind::Bool {
            return Err(Error::Config(format!("{:?} items must be Bool, not {:?}",
                                             self.function, self.kind)));
        }
        match self.kind {
            Kind::Str(0) => return Err(Error::Config("string items need a length".into())),
            Kind::Str(len) if len > 2 * u16::MAX as usize =>
                return Err(Error::Config(format!("string length {} too large", len))),
            _ => {}
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(Error::Config(format!("invalid scale {}", self.scale)));
        }
        if self.address as u32 + self.count() as u32 > 0x10000 {
            return Err(Error::Config(format!("item at {} exceeds the address space", self.address)));
        }
        Ok(())
    }
}

/// A set of named data items on one unit.
///
/// The poller is shared with every other device on the same link; dropping
/// the device gives up its share.
pub struct Device {
    options: Options,
    items: HashMap<String, DataItem>,
    poller: Arc<Poller>,
    registry: Registry,
    key: String,
}

impl Device {
    pub fn new(options: Options, items: HashMap<String, DataItem>) -> Result<Self> {
        Self::with_registry(&Registry::global(), options, items)
    }

    pub fn with_registry(registry: &Registry, options: Options,
                         items: HashMap<String, DataItem>) -> Result<Self> {
        check(&options, &items)?;
        let poller = registry.acquire(&options)?;
        Ok(Self::bind(registry, options, items, poller))
    }

    /// Binds using `connector` if the link has no poller yet.
    pub fn with_connector(registry: &Registry, options: Options, items: HashMap<String, DataItem>,
                          connector: Box<dyn Connector>) -> Result<Self> {
        check(&options, &items)?;
        let poller = registry.acquire_with(&options, move || Ok(connector))?;
        Ok(Self::bind(registry, options, items, poller))
    }

    fn bind(registry: &Registry, options: Options, items: HashMap<String, DataItem>,
            poller: Arc<Poller>) -> Self {
        let key = options.link_key();
        Self { options, items, poller, registry: registry.clone(), key }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    pub fn is_connected(&self) -> bool {
        self.poller.is_connected()
    }

    pub fn item(&self, name: &str) -> Result<&DataItem> {
        self.items.get(name).ok_or_else(|| Error::UnknownItem(name.into()))
    }

    /// Returns the last polled value of the item.
    pub fn get(&self, name: &str) -> Result<Value> {
        let item = *self.item(name)?;
        let points = self.poller.get(self.options.unit_id, item.function, item.address, item.count())?;
        match points {
            Points::Bits(bits) => Ok(Value::Bool(bits.first().copied().unwrap_or(false))),
            Points::Words(words) =>
                codec::decode(&words, 0, item.kind, item.scale, self.options.word_order()),
        }
    }

    pub fn set(&self, name: &str, value: &Value) -> Result<()> {
        let item = *self.item(name)?;
        let points = if item.function.is_bits() {
            let bit = value.as_bool().ok_or_else(
                || Error::InvalidValue(format!("{} is not a boolean", value)))?;
            Points::Bits(vec![bit])
        } else {
            Points::Words(codec::encode(value, item.kind, item.scale, self.options.word_order())?)
        };
        let function = WriteFunction::select(item.function, points.len(), self.options.single_write)
            .ok_or(Error::Exception(ExceptionCode::IllegalFunction))?;
        self.poller.set(self.options.unit_id, function, item.address, &points)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

fn check(options: &Options, items: &HashMap<String, DataItem>) -> Result<()> {
    options.validate()?;
    for (name, item) in items {
        item.validate().map_err(|e| Error::Config(format!("item {:?}: {}", name, e)))?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_validation() {
        use ReadFunction::*;
        assert!(DataItem::new(Coils, 10, Kind::Bool).validate().is_ok());
        assert!(DataItem::new(DiscreteInputs, 0, Kind::U16).validate().is_err());
        assert!(DataItem::new(HoldingRegisters, 0, Kind::Str(0)).validate().is_err());
        assert!(DataItem::new(HoldingRegisters, 0xFFFE, Kind::F64).validate().is_err());
        assert!(DataItem::new(HoldingRegisters, 0xFFFC, Kind::F64).validate().is_ok());
        assert!(DataItem::new(InputRegisters, 0, Kind::I16).scaled(0.0).validate().is_err());
    }

    #[test]
    fn item_counts() {
        use ReadFunction::*;
        assert_eq!(DataItem::new(Coils, 0, Kind::Bool).count(), 1);
        assert_eq!(DataItem::new(HoldingRegisters, 0, Kind::U32).count(), 2);
        assert_eq!(DataItem::new(HoldingRegisters, 0, Kind::Str(5)).count(), 3);
        assert_eq!(DataItem::new(InputRegisters, 0, Kind::Bool).count(), 1);
    }
}

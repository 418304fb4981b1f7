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

//! Register space backed by named values, for the serving side of a link.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::{Error, Result};
use crate::codec::{self, Value, WordOrder};
use crate::device::DataItem;
use crate::ledger::ReadFunction;

const LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Named values a point store reads from and writes into.
pub trait Values: Send {
    fn value(&self, name: &str) -> Option<Value>;
    fn set_value(&mut self, name: &str, value: Value);
}

impl Values for HashMap<String, Value> {
    fn value(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn set_value(&mut self, name: &str, value: Value) {
        self.insert(name.into(), value);
    }
}

/// Serves one register table from a set of bound data items.
pub struct PointStore<V> {
    items: BTreeMap<u16, (String, DataItem)>,
    values: Arc<Mutex<V>>,
    order: WordOrder,
}

impl<V: Values> PointStore<V> {
    /// Binds the items of `table` to `values`; items of other tables are
    /// ignored.
    pub fn new(table: ReadFunction, items: &HashMap<String, DataItem>, values: V) -> Result<Self> {
        if table.is_bits() {
            return Err(Error::Config(format!("{:?} is not a register table", table)));
        }
        let mut bound = BTreeMap::new();
        for (name, item) in items.iter().filter(|(_, item)| item.function == table) {
            item.validate()?;
            if let Some((other, _)) = bound.insert(item.address, (name.clone(), *item)) {
                return Err(Error::Config(format!("items {:?} and {:?} share address {}",
                                                 other, name, item.address)));
            }
        }
        let order = WordOrder { swap_word: false, swap_dword: false, swap_bytes: true };
        Ok(Self { items: bound, values: Arc::new(Mutex::new(values)), order })
    }

    /// Handle to the backing values, for updates from the owning side.
    pub fn values(&self) -> Arc<Mutex<V>> {
        self.values.clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, V>> {
        self.values.try_lock_for(LOCK_TIMEOUT).ok_or(Error::Busy)
    }

    /// Reads `count` registers from `start`.  Unbound registers and items
    /// without a value read as zero.
    pub fn read_points(&self, start: u16, count: u16) -> Result<Vec<u16>> {
        let values = self.lock()?;
        let end = start as usize + count as usize;
        let mut out = vec![0u16; count as usize];
        let mut addr = start as usize;
        while addr < end {
            let (name, item) = match self.items.get(&(addr as u16)) {
                Some(entry) => entry,
                None => {
                    addr += 1;
                    continue;
                }
            };
            let width = item.kind.word_count();
            if let Some(value) = values.value(name) {
                let words = codec::encode(&value, item.kind, item.scale, self.order)?;
                for (i, word) in words.into_iter().enumerate().take(end - addr) {
                    out[addr - start as usize + i] = word;
                }
            }
            addr += width;
        }
        Ok(out)
    }

    /// Stores `words` starting at `start` into the bound items.  Items only
    /// partially covered by the range are left alone.
    pub fn write_points(&self, start: u16, words: &[u16]) -> Result<()> {
        let mut values = self.lock()?;
        let end = start as usize + words.len();
        let mut addr = start as usize;
        while addr < end {
            let (name, item) = match self.items.get(&(addr as u16)) {
                Some(entry) => entry,
                None => {
                    addr += 1;
                    continue;
                }
            };
            let width = item.kind.word_count();
            if addr + width <= end {
                let value = codec::decode(words, addr - start as usize, item.kind, item.scale, self.order)?;
                log::trace!("store {} = {}", name, value);
                values.set_value(name, value);
            }
            addr += width;
        }
        Ok(())
    }
}

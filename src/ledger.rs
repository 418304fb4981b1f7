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

//! Bookkeeping of which register windows are wanted, and their last values.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// The read function codes the poller can service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadFunction {
    Coils = 1,
    DiscreteInputs = 2,
    HoldingRegisters = 3,
    InputRegisters = 4,
}

impl ReadFunction {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ReadFunction::Coils),
            2 => Some(ReadFunction::DiscreteInputs),
            3 => Some(ReadFunction::HoldingRegisters),
            4 => Some(ReadFunction::InputRegisters),
            _ => None,
        }
    }

    /// Whether the function transfers single bits instead of registers.
    pub fn is_bits(self) -> bool {
        matches!(self, ReadFunction::Coils | ReadFunction::DiscreteInputs)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, ReadFunction::Coils | ReadFunction::HoldingRegisters)
    }
}

/// Shape of one read transaction.  Ordering sorts by unit, function,
/// start address and count, in that order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    pub unit: u8,
    pub function: ReadFunction,
    pub start: u16,
    pub count: u16,
}

impl Signature {
    pub fn new(unit: u8, function: ReadFunction, start: u16, count: u16) -> Self {
        Self { unit, function, start, count }
    }

    /// One past the last address covered.
    pub fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }
}

/// Window during which a signature is actively wanted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lifespan {
    pub next_service: Instant,
    pub expiry: Instant,
}

/// Raw result of a read: bits for coils and discrete inputs, else registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Points {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

impl Points {
    pub fn len(&self) -> usize {
        match self {
            Points::Bits(v) => v.len(),
            Points::Words(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cuts out `count` points starting at `offset`.
    pub fn slice(&self, offset: usize, count: usize) -> Option<Points> {
        Some(match self {
            Points::Bits(v) => Points::Bits(v.get(offset..offset + count)?.to_vec()),
            Points::Words(v) => Points::Words(v.get(offset..offset + count)?.to_vec()),
        })
    }

    /// Register view; bits become 0 or 1.
    pub fn to_words(&self) -> Vec<u16> {
        match self {
            Points::Bits(v) => v.iter().map(|&b| b as u16).collect(),
            Points::Words(v) => v.clone(),
        }
    }

    /// Bit view; registers are true when nonzero.
    pub fn to_bits(&self) -> Vec<bool> {
        match self {
            Points::Bits(v) => v.clone(),
            Points::Words(v) => v.iter().map(|&w| w != 0).collect(),
        }
    }
}

/// Demand windows and cached results, keyed by signature.
///
/// Both maps always cover the same signatures: a cache entry is only stored
/// while its demand exists, and eviction removes both.
pub struct Ledger {
    read_rate: Duration,
    keep_alive: Duration,
    demands: DashMap<Signature, Lifespan>,
    cache: DashMap<Signature, Points>,
}

impl Ledger {
    pub fn new(read_rate: Duration, keep_alive: Duration) -> Self {
        Self { read_rate, keep_alive, demands: DashMap::new(), cache: DashMap::new() }
    }

    /// Records that `sig` is wanted.  New signatures are due immediately;
    /// known ones only get their expiry pushed out.
    pub fn register_demand(&self, sig: Signature, now: Instant) {
        let expiry = now + self.keep_alive + self.read_rate;
        self.demands.entry(sig)
            .and_modify(|span| if span.expiry < expiry { span.expiry = expiry })
            .or_insert(Lifespan { next_service: now, expiry });
    }

    /// All signatures whose next service time has come.
    pub fn due(&self, now: Instant) -> Vec<(Signature, Lifespan)> {
        self.demands.iter()
            .filter(|entry| entry.value().next_service <= now)
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Marks `sig` as serviced by a transaction finished at `at`.  Returns
    /// false if the signature had expired and was evicted instead.
    pub fn serviced(&self, sig: &Signature, at: Instant) -> bool {
        let expired = match self.demands.get_mut(sig) {
            Some(mut span) if span.expiry >= at => {
                span.next_service = at + self.read_rate;
                false
            }
            Some(_) => true,
            None => return false,
        };
        if expired {
            self.evict(sig);
        }
        !expired
    }

    /// Removes every signature whose expiry has passed.  Returns how many.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let expired: Vec<Signature> = self.demands.iter()
            .filter(|entry| entry.value().expiry < now)
            .map(|entry| *entry.key())
            .collect();
        for sig in &expired {
            self.evict(sig);
        }
        expired.len()
    }

    fn evict(&self, sig: &Signature) {
        self.demands.remove(sig);
        self.cache.remove(sig);
    }

    pub fn lifespan(&self, sig: &Signature) -> Option<Lifespan> {
        self.demands.get(sig).map(|span| *span)
    }

    pub fn contains(&self, sig: &Signature) -> bool {
        self.demands.contains_key(sig)
    }

    pub fn len(&self) -> usize {
        self.demands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.demands.is_empty()
    }

    pub fn cached(&self, sig: &Signature) -> Option<Points> {
        self.cache.get(sig).map(|points| points.clone())
    }

    /// Stores a fresh result.  Ignored if the demand is gone.
    pub fn store(&self, sig: Signature, points: Points) -> bool {
        if !self.demands.contains_key(&sig) {
            return false;
        }
        self.cache.insert(sig, points);
        true
    }

    /// Drops the cached result but keeps the demand.
    pub fn forget(&self, sig: &Signature) {
        self.cache.remove(sig);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

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

//! Sharing of pollers between users of the same physical link.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::Result;
use crate::options::Options;
use crate::poller::Poller;
use crate::proto::Connector;

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

struct Entry {
    poller: Arc<Poller>,
    refs: usize,
}

/// Reference counted pollers keyed by link identity.
///
/// The last `release` for a key shuts the poller down.  Cloning yields a
/// handle to the same table.
#[derive(Clone, Default)]
pub struct Registry {
    pollers: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Registry {
        GLOBAL.clone()
    }

    /// Returns the poller for the options' link, creating and starting it
    /// with the link's default connector if needed.
    pub fn acquire(&self, options: &Options) -> Result<Arc<Poller>> {
        self.acquire_with(options, || options.connector())
    }

    /// Like `acquire`, with a custom connector for newly created pollers.
    pub fn acquire_with<F>(&self, options: &Options, connector: F) -> Result<Arc<Poller>>
        where F: FnOnce() -> Result<Box<dyn Connector>>
    {
        let key = options.link_key();
        let mut pollers = self.pollers.lock();
        if let Some(entry) = pollers.get_mut(&key) {
            entry.refs += 1;
            log::debug!("sharing poller for {} ({} users)", key, entry.refs);
            return Ok(entry.poller.clone());
        }
        let poller = Arc::new(Poller::spawn(options.clone(), connector()?)?);
        pollers.insert(key.clone(), Entry { poller: poller.clone(), refs: 1 });
        log::debug!("created poller for {}", key);
        Ok(poller)
    }

    /// Drops one reference; returns true if the poller was shut down.
    ///
    /// The shutdown completes under the table lock, so a concurrent
    /// `acquire` for the same key only opens a new link after the old one
    /// is closed.
    pub fn release(&self, key: &str) -> bool {
        let mut pollers = self.pollers.lock();
        match pollers.get_mut(key) {
            Some(entry) if entry.refs > 1 => {
                entry.refs -= 1;
                false
            }
            Some(_) => {
                if let Some(entry) = pollers.remove(key) {
                    log::debug!("shutting down poller for {}", key);
                    entry.poller.shutdown();
                }
                true
            }
            None => false,
        }
    }

    pub fn ref_count(&self, key: &str) -> usize {
        self.pollers.lock().get(key).map_or(0, |entry| entry.refs)
    }

    pub fn len(&self) -> usize {
        self.pollers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

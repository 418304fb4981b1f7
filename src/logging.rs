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

//! Per-poller event stream.
//!
//! Every event goes to the `log` facade.  Events at or above the configured
//! level are additionally handed to subscribed listeners with a timestamp.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Local};
use log::{Level, LevelFilter};
use parking_lot::RwLock;

pub type Listener = Box<dyn Fn(Level, DateTime<Local>, &str) + Send + Sync>;

pub struct EventLog {
    source: String,
    filter: LevelFilter,
    listeners: RwLock<Vec<(usize, Listener)>>,
    next_id: AtomicUsize,
}

impl EventLog {
    pub fn new(source: impl Into<String>, filter: LevelFilter) -> Self {
        Self {
            source: source.into(),
            filter,
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn filter(&self) -> LevelFilter {
        self.filter
    }

    /// Registers a listener; the returned id removes it again.
    pub fn subscribe<F>(&self, listener: F) -> usize
        where F: Fn(Level, DateTime<Local>, &str) + Send + Sync + 'static
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: usize) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn emit(&self, level: Level, args: fmt::Arguments) {
        log::log!(level, "[{}] {}", self.source, args);
        if level > self.filter {
            return;
        }
        let listeners = self.listeners.read();
        if listeners.is_empty() {
            return;
        }
        let message = args.to_string();
        let now = Local::now();
        for (_, listener) in listeners.iter() {
            listener(level, now, &message);
        }
    }
}

macro_rules! event {
    ($log:expr, $level:expr, $($arg:tt)+) => {
        $log.emit($level, format_args!($($arg)+))
    };
}

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

//! The poller owns one physical link and serializes all traffic over it.
//!
//! Reads never touch the wire directly: `get` registers a demand and answers
//! from the cache, while a timer thread ticks every 100 ms and fetches due
//! demands in merged transactions.  Writes run synchronously in the caller.
//! A single gate (the mutex around the link) admits one transaction at a
//! time; ticks skip when it is taken, writes wait for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::Level;
use parking_lot::{Mutex, MutexGuard};

use crate::{Error, ExceptionCode, Result};
use crate::batch::optimize;
use crate::ledger::{Ledger, Points, ReadFunction, Signature};
use crate::logging::EventLog;
use crate::options::Options;
use crate::proto::{Connector, Transport, WriteFunction};

/// Period of the background timer.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// What a single tick did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tick {
    /// The gate was taken by another transaction.
    Skipped,
    /// Nothing was due, or nothing due could be batched.
    Idle,
    /// Something was due but the link could not be opened.
    ConnectFailed,
    /// A read completed and refreshed `serviced` signatures.
    Read { window: Signature, serviced: usize },
    /// The remote rejected the read.
    Rejected { window: Signature, code: ExceptionCode },
    /// The link failed during the read and was dropped.
    Failed,
}

type Link = Option<Box<dyn Transport>>;

struct Shared {
    options: Options,
    connector: Box<dyn Connector>,
    gate: Mutex<Link>,
    connected: AtomicBool,
    ledger: Ledger,
    log: EventLog,
}

pub struct Poller {
    shared: Arc<Shared>,
    timer: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl Poller {
    /// Creates a poller without a timer; ticks must be driven with `tick`.
    pub fn new(options: Options, connector: Box<dyn Connector>) -> Self {
        let log = EventLog::new(connector.describe(), options.log_level);
        let ledger = Ledger::new(options.read_rate, options.keep_alive);
        let shared = Shared {
            options,
            connector,
            gate: Mutex::new(None),
            connected: AtomicBool::new(false),
            ledger,
            log,
        };
        Self { shared: Arc::new(shared), timer: Mutex::new(None) }
    }

    /// Creates a poller and starts its timer thread.
    pub fn spawn(options: Options, connector: Box<dyn Connector>) -> Result<Self> {
        let poller = Self::new(options, connector);
        poller.start()?;
        Ok(poller)
    }

    /// Starts the timer thread, if not running yet.
    pub fn start(&self) -> Result<()> {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("poller {}", self.shared.options.link_key()))
            .spawn(move || loop {
                match rx.recv_timeout(TICK_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => { shared.tick(); }
                    _ => break,
                }
            })?;
        *timer = Some((tx, handle));
        Ok(())
    }

    /// Stops the timer and closes the link.
    pub fn shutdown(&self) {
        if let Some((tx, handle)) = self.timer.lock().take() {
            let _ = tx.send(());
            if handle.join().is_err() {
                log::error!("poller thread for {} panicked", self.shared.options.link_key());
            }
        }
        let mut link = self.shared.gate.lock();
        if link.take().is_some() {
            event!(self.shared.log, Level::Info, "connection closed");
        }
        self.shared.connected.store(false, Ordering::Relaxed);
        self.shared.ledger.clear_cache();
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    pub fn ledger(&self) -> &Ledger {
        &self.shared.ledger
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    pub fn subscribe<F>(&self, listener: F) -> usize
        where F: Fn(Level, DateTime<Local>, &str) + Send + Sync + 'static
    {
        self.shared.log.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: usize) -> bool {
        self.shared.log.unsubscribe(id)
    }

    /// Runs one tick body.
    pub fn tick(&self) -> Tick {
        self.shared.tick()
    }

    /// Returns the last fetched points for the given window.
    ///
    /// The window is registered for background polling; until the first
    /// successful fetch this fails with `Error::NotYetAvailable`.
    pub fn get(&self, unit: u8, function: ReadFunction, addr: u16, count: u16) -> Result<Points> {
        check_range(addr, count)?;
        let sig = Signature::new(unit, function, addr, count);
        self.shared.ledger.register_demand(sig, Instant::now());
        self.shared.ledger.cached(&sig).ok_or(Error::NotYetAvailable)
    }

    /// Writes `values` starting at `addr`, waiting for the gate.
    pub fn set(&self, unit: u8, function: WriteFunction, addr: u16, values: &Points) -> Result<()> {
        if values.len() > u16::MAX as usize {
            return Err(Error::InvalidValue("too many values".into()));
        }
        check_range(addr, values.len() as u16)?;
        self.shared.write(unit, function, addr, values)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_range(addr: u16, count: u16) -> Result<()> {
    if count == 0 || addr as u32 + count as u32 > 0x10000 {
        return Err(Error::InvalidValue(format!("{} points at address {} out of range", count, addr)));
    }
    Ok(())
}

fn settle(until: Instant) {
    let now = Instant::now();
    if until > now {
        thread::sleep(until - now);
    }
}

impl Shared {
    fn connect(&self, link: &mut MutexGuard<Link>) -> Result<()> {
        match self.connector.connect(self.options.timeout()) {
            Ok(transport) => {
                **link = Some(transport);
                self.connected.store(true, Ordering::Relaxed);
                event!(self.log, Level::Info, "connected");
                Ok(())
            }
            Err(e) => {
                event!(self.log, Level::Warn, "connect failed: {}", e);
                Err(e)
            }
        }
    }

    fn disconnect(&self, link: &mut MutexGuard<Link>, reason: &Error) {
        **link = None;
        self.connected.store(false, Ordering::Relaxed);
        self.ledger.clear_cache();
        event!(self.log, Level::Warn, "disconnected: {}", reason);
    }

    fn tick(&self) -> Tick {
        let mut link = match self.gate.try_lock() {
            Some(link) => link,
            None => return Tick::Skipped,
        };

        let now = Instant::now();
        let evicted = self.ledger.evict_expired(now);
        if evicted > 0 {
            event!(self.log, Level::Trace, "{} demands expired", evicted);
        }
        let due = self.ledger.due(now);
        if due.is_empty() {
            return Tick::Idle;
        }

        if link.is_none() && self.connect(&mut link).is_err() {
            self.ledger.clear_cache();
            return Tick::ConnectFailed;
        }
        let batch = match optimize(&due, self.options.limits()) {
            Some(batch) => batch,
            None => return Tick::Idle,
        };
        let transport = match link.as_mut() {
            Some(transport) => transport,
            None => return Tick::ConnectFailed,
        };

        event!(self.log, Level::Debug, "reading {:?} for {} demands", batch.window, batch.members.len());
        let until = Instant::now() + self.options.delay;
        let outcome = match transport.read(&batch.window) {
            Ok(points) => {
                let done = Instant::now();
                for member in &batch.members {
                    match points.slice(batch.offset_of(member), member.count as usize) {
                        Some(slice) => { self.ledger.store(*member, slice); }
                        None => self.ledger.forget(member),
                    }
                    self.ledger.serviced(member, done);
                }
                Tick::Read { window: batch.window, serviced: batch.members.len() }
            }
            Err(e) if e.is_transport() => {
                self.disconnect(&mut link, &Error::Wrapped(Box::new(e), "read"));
                return Tick::Failed;
            }
            Err(e) => {
                event!(self.log, Level::Warn, "read of {:?} rejected: {}", batch.window, e);
                let done = Instant::now();
                for member in &batch.members {
                    self.ledger.forget(member);
                    self.ledger.serviced(member, done);
                }
                let code = e.exception().unwrap_or(ExceptionCode::ServerDeviceFailure);
                Tick::Rejected { window: batch.window, code }
            }
        };
        settle(until);
        outcome
    }

    fn write(&self, unit: u8, function: WriteFunction, addr: u16, values: &Points) -> Result<()> {
        let mut link = self.gate.lock();
        if link.is_none() {
            self.connect(&mut link).map_err(|e| Error::Wrapped(Box::new(e), "connect"))?;
        }
        let transport = link.as_mut().ok_or(Error::NotConnected)?;

        event!(self.log, Level::Debug, "writing {} points at {} with function {}",
               values.len(), addr, function.code());
        let until = Instant::now() + self.options.delay;
        let result = match transport.write(unit, function, addr, values) {
            Err(e) if e.is_transport() => {
                let e = Error::Wrapped(Box::new(e), "write");
                self.disconnect(&mut link, &e);
                Err(e)
            }
            Err(e) => {
                event!(self.log, Level::Warn, "write at {} rejected: {}", addr, e);
                Err(e)
            }
            Ok(()) => Ok(()),
        };
        settle(until);
        result
    }
}

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use mbpoll::{DataItem, Device, Error, ExceptionCode, Kind, Options, Points, Poller, ReadFunction,
             Registry, Result, Signature, Tick, Value, WriteFunction};
use mbpoll::proto::{Connector, Transport};

#[derive(Default)]
struct State {
    registers: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    connects: usize,
    refuse_connect: bool,
    break_link: bool,
    reject: Option<ExceptionCode>,
    reject_write_at: Option<u16>,
    reads: Vec<(u8, u16, u16)>,
    writes: Vec<(u8, u16, u16)>,
}

#[derive(Clone, Default)]
struct Scripted(Arc<Mutex<State>>);

impl Scripted {
    fn state(&self) -> parking_lot::MutexGuard<State> {
        self.0.lock()
    }
}

impl Connector for Scripted {
    fn connect(&self, _timeout: Duration) -> Result<Box<dyn Transport>> {
        let mut state = self.0.lock();
        if state.refuse_connect {
            return Err(Error::IO(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")));
        }
        state.connects += 1;
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

impl Scripted {
    fn check(&self, addr: u16) -> Result<()> {
        let state = self.0.lock();
        if state.break_link {
            return Err(Error::IO(io::Error::new(io::ErrorKind::BrokenPipe, "link broken")));
        }
        if let Some(code) = state.reject {
            return Err(Error::Exception(code));
        }
        if state.reject_write_at == Some(addr) {
            return Err(Error::Exception(ExceptionCode::IllegalDataAddress));
        }
        Ok(())
    }

    fn read_words(&mut self, function: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.check(addr)?;
        let mut state = self.0.lock();
        state.reads.push((function, addr, count));
        Ok((addr..addr + count).map(|a| state.registers.get(&a).copied().unwrap_or(0)).collect())
    }

    fn read_bits(&mut self, function: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        self.check(addr)?;
        let mut state = self.0.lock();
        state.reads.push((function, addr, count));
        Ok((addr..addr + count).map(|a| state.coils.get(&a).copied().unwrap_or(false)).collect())
    }

    fn store_words(&mut self, function: u8, addr: u16, values: &[u16]) -> Result<()> {
        self.check(addr)?;
        let mut state = self.0.lock();
        state.writes.push((function, addr, values.len() as u16));
        for (i, &v) in values.iter().enumerate() {
            state.registers.insert(addr + i as u16, v);
        }
        Ok(())
    }

    fn store_bits(&mut self, function: u8, addr: u16, values: &[bool]) -> Result<()> {
        self.check(addr)?;
        let mut state = self.0.lock();
        state.writes.push((function, addr, values.len() as u16));
        for (i, &v) in values.iter().enumerate() {
            state.coils.insert(addr + i as u16, v);
        }
        Ok(())
    }
}

impl Transport for Scripted {
    fn read_coils(&mut self, _unit: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        self.read_bits(1, addr, count)
    }
    fn read_discrete_inputs(&mut self, _unit: u8, addr: u16, count: u16) -> Result<Vec<bool>> {
        self.read_bits(2, addr, count)
    }
    fn read_holding_registers(&mut self, _unit: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(3, addr, count)
    }
    fn read_input_registers(&mut self, _unit: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(4, addr, count)
    }
    fn write_single_coil(&mut self, _unit: u8, addr: u16, value: bool) -> Result<()> {
        self.store_bits(5, addr, &[value])
    }
    fn write_single_register(&mut self, _unit: u8, addr: u16, value: u16) -> Result<()> {
        self.store_words(6, addr, &[value])
    }
    fn write_multiple_coils(&mut self, _unit: u8, addr: u16, values: &[bool]) -> Result<()> {
        self.store_bits(15, addr, values)
    }
    fn write_multiple_registers(&mut self, _unit: u8, addr: u16, values: &[u16]) -> Result<()> {
        self.store_words(16, addr, values)
    }
}

fn options(read_rate_ms: u64) -> Options {
    Options {
        read_rate: Duration::from_millis(read_rate_ms),
        delay: Duration::from_millis(0),
        ..Options::default()
    }
}

fn poller(options: Options) -> (Poller, Scripted) {
    let link = Scripted::default();
    (Poller::new(options, Box::new(link.clone())), link)
}

const HR: ReadFunction = ReadFunction::HoldingRegisters;

#[test]
fn miss_then_hit() {
    let (poller, link) = poller(options(1000));
    link.state().registers.insert(10, 42);

    assert!(matches!(poller.get(1, HR, 10, 1), Err(Error::NotYetAvailable)));
    assert_eq!(poller.tick(), Tick::Read { window: Signature::new(1, HR, 10, 1), serviced: 1 });
    assert_eq!(poller.get(1, HR, 10, 1).unwrap(), Points::Words(vec![42]));
    assert!(poller.is_connected());

    // not due again before the read rate has passed
    assert_eq!(poller.tick(), Tick::Idle);
    assert_eq!(link.state().reads.len(), 1);
}

#[test]
fn neighbours_share_one_transaction() {
    let (poller, link) = poller(options(1000));
    for addr in 0..8 {
        link.state().registers.insert(addr, addr * 10);
    }
    let _ = poller.get(1, HR, 0, 2);
    let _ = poller.get(1, HR, 4, 2);
    let _ = poller.get(1, HR, 100, 1);

    assert_eq!(poller.tick(), Tick::Read { window: Signature::new(1, HR, 0, 6), serviced: 2 });
    assert_eq!(poller.get(1, HR, 4, 2).unwrap(), Points::Words(vec![40, 50]));
    assert!(matches!(poller.get(1, HR, 100, 1), Err(Error::NotYetAvailable)));

    assert_eq!(poller.tick(), Tick::Read { window: Signature::new(1, HR, 100, 1), serviced: 1 });
    assert_eq!(link.state().reads, [(3, 0, 6), (3, 100, 1)]);
}

#[test]
fn transport_failure_clears_cache_and_reconnects() {
    let (poller, link) = poller(options(10));
    link.state().registers.insert(0, 1);
    let _ = poller.get(1, HR, 0, 1);
    assert!(matches!(poller.tick(), Tick::Read { .. }));
    assert_eq!(poller.ledger().cache_len(), 1);

    link.state().break_link = true;
    thread::sleep(Duration::from_millis(20));
    assert_eq!(poller.tick(), Tick::Failed);
    assert!(!poller.is_connected());
    assert_eq!(poller.ledger().cache_len(), 0);
    assert_eq!(poller.ledger().len(), 1);
    assert!(matches!(poller.get(1, HR, 0, 1), Err(Error::NotYetAvailable)));

    link.state().break_link = false;
    assert!(matches!(poller.tick(), Tick::Read { .. }));
    assert_eq!(poller.get(1, HR, 0, 1).unwrap(), Points::Words(vec![1]));
    assert_eq!(link.state().connects, 2);
}

#[test]
fn connect_failure_keeps_demands() {
    let (poller, link) = poller(options(1000));
    link.state().refuse_connect = true;
    let _ = poller.get(1, HR, 0, 1);
    assert_eq!(poller.tick(), Tick::ConnectFailed);
    assert_eq!(poller.ledger().len(), 1);

    link.state().refuse_connect = false;
    assert!(matches!(poller.tick(), Tick::Read { .. }));
}

#[test]
fn rejected_read_keeps_link() {
    let (poller, link) = poller(options(1000));
    link.state().reject = Some(ExceptionCode::IllegalDataAddress);
    let _ = poller.get(1, HR, 500, 2);
    assert_eq!(poller.tick(), Tick::Rejected { window: Signature::new(1, HR, 500, 2),
                                               code: ExceptionCode::IllegalDataAddress });
    assert!(poller.is_connected());
    assert_eq!(poller.tick(), Tick::Idle);
}

#[test]
fn rejected_write_carries_code() {
    let (poller, link) = poller(options(1000));
    link.state().reject = Some(ExceptionCode::IllegalDataValue);
    let err = poller.set(1, WriteFunction::MultipleRegisters, 0, &Points::Words(vec![1, 2]))
                    .unwrap_err();
    assert_eq!(err.exception(), Some(ExceptionCode::IllegalDataValue));
    assert!(!err.is_transport());
    assert!(poller.is_connected());
}

#[test]
fn broken_write_disconnects() {
    let (poller, link) = poller(options(1000));
    poller.set(1, WriteFunction::SingleRegister, 3, &Points::Words(vec![7])).unwrap();
    assert!(poller.is_connected());

    link.state().break_link = true;
    let err = poller.set(1, WriteFunction::SingleRegister, 3, &Points::Words(vec![8])).unwrap_err();
    assert!(err.is_transport());
    assert!(matches!(err, Error::Wrapped(_, "write")));
    assert!(!poller.is_connected());
}

#[test]
fn single_writes_stop_at_first_failure() {
    let (poller, link) = poller(options(1000));
    link.state().reject_write_at = Some(11);
    let result = poller.set(1, WriteFunction::SingleRegister, 10, &Points::Words(vec![1, 2, 3]));
    assert!(result.is_err());
    let state = link.state();
    assert_eq!(state.writes, [(6, 10, 1)]);
    assert_eq!(state.registers.get(&10), Some(&1));
    assert_eq!(state.registers.get(&12), None);
}

#[test]
fn multiple_coils_in_one_transaction() {
    let (poller, link) = poller(options(1000));
    poller.set(1, WriteFunction::MultipleCoils, 4, &Points::Bits(vec![true, false, true])).unwrap();
    let state = link.state();
    assert_eq!(state.writes, [(15, 4, 3)]);
    assert_eq!(state.coils.get(&6), Some(&true));
}

#[test]
fn demands_expire() {
    let opts = Options { keep_alive: Duration::from_millis(0), ..options(10) };
    let (poller, _link) = poller(opts);
    let _ = poller.get(1, HR, 0, 1);
    assert!(matches!(poller.tick(), Tick::Read { .. }));
    thread::sleep(Duration::from_millis(40));
    assert_eq!(poller.tick(), Tick::Idle);
    assert!(poller.ledger().is_empty());
    assert_eq!(poller.ledger().cache_len(), 0);
}

#[test]
fn invalid_ranges_are_rejected() {
    let (poller, _link) = poller(options(1000));
    assert!(matches!(poller.get(1, HR, 0xFFFF, 2), Err(Error::InvalidValue(_))));
    assert!(matches!(poller.get(1, HR, 0, 0), Err(Error::InvalidValue(_))));
    assert!(poller.ledger().is_empty());
}

fn items() -> HashMap<String, DataItem> {
    let mut items = HashMap::new();
    items.insert("speed".to_owned(), DataItem::new(HR, 0, Kind::U16));
    items.insert("power".to_owned(), DataItem::new(HR, 2, Kind::I32).scaled(0.5));
    items.insert("enable".to_owned(), DataItem::new(ReadFunction::Coils, 0, Kind::Bool));
    items.insert("temp".to_owned(), DataItem::new(ReadFunction::InputRegisters, 0, Kind::I16));
    items
}

fn wait_for(device: &Device, name: &str) -> Value {
    for _ in 0..100 {
        if let Ok(value) = device.get(name) {
            return value;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("no value for {}", name);
}

#[test]
fn devices_share_pollers() {
    let registry = Registry::new();
    let link = Scripted::default();
    let opts = options(50);
    let key = opts.link_key();

    let first = Device::with_connector(&registry, opts.clone(), items(), Box::new(link.clone())).unwrap();
    let second = Device::with_connector(&registry, opts, items(), Box::new(link.clone())).unwrap();
    assert!(Arc::ptr_eq(first.poller(), second.poller()));
    assert_eq!(registry.ref_count(&key), 2);

    drop(first);
    assert_eq!(registry.ref_count(&key), 1);
    assert_eq!(registry.len(), 1);

    drop(second);
    assert_eq!(registry.ref_count(&key), 0);
    assert!(registry.is_empty());
}

#[test]
fn device_reads_and_writes_items() {
    let registry = Registry::new();
    let link = Scripted::default();
    {
        let mut state = link.state();
        state.registers.insert(0, 1500);
        state.registers.insert(2, 0xFFF6);
        state.registers.insert(3, 0xFFFF);
    }
    let device = Device::with_connector(&registry, options(50), items(), Box::new(link.clone())).unwrap();

    assert_eq!(wait_for(&device, "speed"), Value::U16(1500));
    assert_eq!(wait_for(&device, "power"), Value::F64(-5.0));
    assert_eq!(wait_for(&device, "enable"), Value::Bool(false));

    device.set("power", &Value::F64(100.0)).unwrap();
    device.set("enable", &Value::Bool(true)).unwrap();
    {
        let state = link.state();
        assert_eq!(state.registers.get(&2), Some(&200));
        assert_eq!(state.registers.get(&3), Some(&0));
        assert_eq!(state.coils.get(&0), Some(&true));
        assert!(state.writes.contains(&(16, 2, 2)));
        assert!(state.writes.contains(&(5, 0, 1)));
    }

    let err = device.set("temp", &Value::I16(1)).unwrap_err();
    assert_eq!(err.exception(), Some(ExceptionCode::IllegalFunction));
    assert!(matches!(device.get("nope"), Err(Error::UnknownItem(_))));
}

#[test]
fn device_rejects_bad_items() {
    let registry = Registry::new();
    let mut bad = items();
    bad.insert("flag".to_owned(), DataItem::new(ReadFunction::DiscreteInputs, 0, Kind::U16));
    let result = Device::with_connector(&registry, options(50), bad, Box::new(Scripted::default()));
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(registry.is_empty());
}

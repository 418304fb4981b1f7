use std::collections::HashMap;
use std::{env, thread, time::Duration};

use mbpoll::{DataItem, Device, Kind, Options, ReadFunction, Value};

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let url = env::args().nth(1).unwrap_or_else(|| "modbus://127.0.0.1:5002/1".into());
    let options = Options { read_rate: Duration::from_millis(250), ..Options::from_url(&url)? };

    let mut items = HashMap::new();
    items.insert("status".to_owned(), DataItem::new(ReadFunction::HoldingRegisters, 0, Kind::U16));
    items.insert("target".to_owned(), DataItem::new(ReadFunction::HoldingRegisters, 2, Kind::F32));
    items.insert("temp".to_owned(), DataItem::new(ReadFunction::InputRegisters, 0, Kind::I16).scaled(0.1));
    items.insert("enable".to_owned(), DataItem::new(ReadFunction::Coils, 0, Kind::Bool));

    let device = Device::new(options, items)?;
    device.poller().subscribe(|level, time, msg| println!("{} {:5} {}", time.format("%H:%M:%S%.3f"), level, msg));

    device.set("target", &Value::F32(21.5))?;
    for _ in 0..10 {
        for name in &["status", "target", "temp", "enable"] {
            match device.get(name) {
                Ok(value) => log::info!("{} = {}", name, value),
                Err(e) => log::warn!("{}: {}", name, e),
            }
        }
        thread::sleep(Duration::from_millis(500));
    }
    Ok(())
}

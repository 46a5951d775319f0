use crate::clock::Clock;
use crate::config::{Config, KeyboardConfig};
use crate::consts::*;
use crate::features::KeyEvent;
use crate::io::{create_virtual_keyboard, emit};
use crate::pipeline::{Pipeline, default_features};
use crate::registers::{FileStorage, LogNotify, ModeRegisters, Notification};
use anyhow::{Result, bail};
use crossbeam_channel::{select, unbounded};
use evdev::Device as EvDevDevice;
use evdev::{EventType, InputEvent, KeyCode};
use log::{debug, info, warn};
use std::time::Duration;
use udev::Enumerator;

pub(crate) struct Keyboard {
    pub name: String,
    pub device: EvDevDevice,
    pub config: KeyboardConfig,
}

pub(crate) fn open_keyboard_devices(config: &Config) -> Result<Vec<Keyboard>> {
    debug!("Detecting keyboards");

    let mut enumerator = Enumerator::new()?;
    enumerator.match_subsystem("input")?;
    enumerator.match_property("ID_INPUT_KEYBOARD", "1")?;

    let mut keyboards = Vec::new();

    for device in enumerator.scan_devices()? {
        if let Some(devnode) = device.devnode()
            && let Ok(mut keyboard) = EvDevDevice::open(devnode)
        {
            let Some((name, keyboard_config)) = keyboard
                .name()
                .and_then(|name| config.keyboards.get_key_value(name))
            else {
                debug!("Keyboard ignored: {:?}", keyboard.name());
                continue;
            };

            // Grabbing with keys down leaves them stuck on the host
            let mut first = true;
            while keyboard.get_key_state()?.iter().next().is_some() {
                if first {
                    first = false;
                    warn!("Waiting for keys to be released");
                }
                std::thread::sleep(Duration::from_millis(20));
            }

            keyboard.grab()?;
            info!("Keyboard monitored: {}", name);

            keyboards.push(Keyboard {
                name: name.clone(),
                device: keyboard,
                config: keyboard_config.clone(),
            });
        }
    }

    if keyboards.is_empty() {
        bail!("No keyboards found");
    } else {
        Ok(keyboards)
    }
}

/// Runs one keyboard until its device goes away.
pub(crate) fn process(keyboard: Keyboard, config: &Config) -> Result<()> {
    let mut virt = create_virtual_keyboard(&keyboard.name)?;
    let mut device = keyboard.device;
    let no_emit = config.globals.no_emit;
    let tick = Duration::from_millis(config.globals.tick as u64);

    let storage = FileStorage::new(
        config
            .globals
            .state_file
            .clone()
            .unwrap_or_else(FileStorage::default_path),
    );
    let registers = ModeRegisters::load(
        keyboard.config.layout,
        Box::new(storage),
        Box::new(LogNotify),
    );
    info!(
        "{}: {} layout",
        keyboard.name,
        registers.default_layout()
    );
    registers.notify(Notification::Startup);

    let mut pipeline = Pipeline::new(
        keyboard.config,
        Duration::from_millis(config.globals.tapping_term as u64),
        registers,
        default_features(),
    );

    let clock = Clock::new();
    let (tx, rx) = unbounded::<InputEvent>();

    std::thread::spawn(move || {
        while let Ok(events) = device.fetch_events() {
            for event in events {
                if tx.send(event).is_err() {
                    return;
                }
            }
        }
    });

    loop {
        select! {
            recv(rx) -> ev => {
                let event = match ev { Ok(e) => e, Err(_) => break };
                if event.event_type() != EventType::KEY { continue; }
                // Kernel autorepeat
                if event.value() > PRESS { continue; }

                let event = KeyEvent {
                    key: KeyCode(event.code()),
                    pressed: event.value() == PRESS,
                    time: clock.now(),
                };
                let out = pipeline.process_event(event)?;
                emit(&mut virt, &out, no_emit)?;
            },
            default(tick) => {
                let out = pipeline.tick(clock.now())?;
                emit(&mut virt, &out, no_emit)?;
            },
        }
    }

    info!("Keyboard disconnected: {}", keyboard.name);

    Ok(())
}

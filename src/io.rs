use crate::consts::*;
use crate::features::OutputEvent;
use anyhow::{Result, anyhow};
use colored::Colorize;
use evdev::KeyCode;
use log::debug;
use uinput::device::Device as UInputDevice;

pub fn create_virtual_keyboard(name: &str) -> Result<UInputDevice> {
    let device = uinput::default()
        .map_err(|e| anyhow!("Failed to open /dev/uinput (sudo modprobe uinput): {e}"))?
        .name(format!("{} dancekeys", name))?
        .event(uinput::event::Keyboard::All)?
        .create()?;
    Ok(device)
}

/// Writes `events` to the virtual keyboard, or only logs them with `no_emit`.
pub fn emit(device: &mut UInputDevice, events: &[OutputEvent], no_emit: bool) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }

    for event in events {
        match event {
            OutputEvent::Press(key) => write(device, *key, PRESS, no_emit)?,
            OutputEvent::Release(key) => write(device, *key, RELEASE, no_emit)?,
            OutputEvent::PressMany(keys) => {
                for key in keys {
                    write(device, *key, PRESS, no_emit)?;
                }
            }
            OutputEvent::ReleaseMany(keys) => {
                for key in keys.iter().rev() {
                    write(device, *key, RELEASE, no_emit)?;
                }
            }
        }
    }

    if !no_emit {
        device.synchronize()?;
    }

    Ok(())
}

fn write(device: &mut UInputDevice, key: KeyCode, state: i32, no_emit: bool) -> Result<()> {
    if !no_emit {
        device.write(EV_KEY, key.0 as i32, state)?;
    }
    debug!(
        "{}[{}] {:?}",
        if is_modifier(&key) { "    " } else { "" },
        if state == PRESS {
            "↓".green().bold()
        } else {
            "↑".red().bold()
        },
        key,
    );
    Ok(())
}

fn is_modifier(key: &KeyCode) -> bool {
    matches!(
        *key,
        KeyCode::KEY_LEFTSHIFT
            | KeyCode::KEY_RIGHTSHIFT
            | KeyCode::KEY_LEFTCTRL
            | KeyCode::KEY_RIGHTCTRL
            | KeyCode::KEY_LEFTALT
            | KeyCode::KEY_RIGHTALT
            | KeyCode::KEY_LEFTMETA
            | KeyCode::KEY_RIGHTMETA
    )
}

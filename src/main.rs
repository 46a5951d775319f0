mod clock;
mod config;
mod consts;
mod features;
mod io;
mod keyboard;
mod layouts;
mod pipeline;
mod registers;

use crate::{
    config::config,
    keyboard::{open_keyboard_devices, process},
};
use anyhow::{Result, anyhow};
use log::error;
use std::thread;

fn main() -> Result<()> {
    env_logger::init();
    let config = config()?;
    let keyboards = open_keyboard_devices(&config)?;

    let mut handles = Vec::new();
    for keyboard in keyboards {
        let config = config.clone();
        let name = keyboard.name.clone();

        let handle = thread::spawn(move || {
            if let Err(e) = process(keyboard, &config) {
                error!("{name}: {e:#}");
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("Keyboard thread panicked"))?;
    }

    Ok(())
}

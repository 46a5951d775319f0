use crate::layouts::Layout;
use anyhow::Result;
use colored::Colorize;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persistent flags, the EEPROM of the keyboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    #[serde(default)]
    pub default_layout: Layout,
    #[serde(default)]
    pub nkro: bool,
}

pub trait Storage {
    fn read(&self) -> Result<Option<Registers>>;
    fn write(&mut self, registers: &Registers) -> Result<()>;
}

/// Registers kept as TOML on disk.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::config_dir)
            .unwrap_or_else(|| PathBuf::from("~/.local/state"))
            .join("dancekeys")
            .join("registers.toml")
    }
}

impl Storage for FileStorage {
    fn read(&self) -> Result<Option<Registers>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(toml::from_str(&content)?))
    }

    fn write(&mut self, registers: &Registers) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string(registers)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Startup,
    Layout(Layout),
    Steno,
    StenoExit,
}

/// Fire and forget, stands in for the tone player.
pub trait Notify {
    fn notify(&self, notification: Notification);
}

pub struct LogNotify;

impl Notify for LogNotify {
    fn notify(&self, notification: Notification) {
        let text = match notification {
            Notification::Startup => "startup".to_owned(),
            Notification::Layout(layout) => layout.to_string(),
            Notification::Steno => "steno".to_owned(),
            Notification::StenoExit => "steno goodbye".to_owned(),
        };
        info!("{} {}", "♪".yellow().bold(), text.bright_blue());
    }
}

pub struct ModeRegisters {
    registers: Registers,
    steno: bool,
    storage: Box<dyn Storage + Send>,
    notify: Box<dyn Notify + Send>,
}

impl ModeRegisters {
    pub fn new(
        registers: Registers,
        storage: Box<dyn Storage + Send>,
        notify: Box<dyn Notify + Send>,
    ) -> Self {
        Self {
            registers,
            steno: false,
            storage,
            notify,
        }
    }

    /// Reads the stored registers, falling back to `fallback` as the default
    /// layout when nothing usable is stored.
    pub fn load(
        fallback: Layout,
        storage: Box<dyn Storage + Send>,
        notify: Box<dyn Notify + Send>,
    ) -> Self {
        let registers = match storage.read() {
            Ok(Some(registers)) => registers,
            Ok(None) => Registers {
                default_layout: fallback,
                ..Default::default()
            },
            Err(e) => {
                warn!("Registers unreadable, using defaults: {e}");
                Registers {
                    default_layout: fallback,
                    ..Default::default()
                }
            }
        };
        Self::new(registers, storage, notify)
    }

    pub fn registers(&self) -> Registers {
        self.registers
    }

    pub fn default_layout(&self) -> Layout {
        self.registers.default_layout
    }

    pub fn persist_default_layout(&mut self, layout: Layout) {
        self.registers.default_layout = layout;
        self.save();
    }

    pub fn set_nkro(&mut self, nkro: bool) {
        if self.registers.nkro != nkro {
            self.registers.nkro = nkro;
            self.save();
        }
    }

    pub fn steno(&self) -> bool {
        self.steno
    }

    /// Returns true when the steno flag changed.
    pub fn set_steno(&mut self, steno: bool) -> bool {
        let changed = self.steno != steno;
        self.steno = steno;
        changed
    }

    pub fn notify(&self, notification: Notification) {
        self.notify.notify(notification);
    }

    fn save(&mut self) {
        if let Err(e) = self.storage.write(&self.registers) {
            warn!("Failed to persist registers: {e}");
        }
    }
}

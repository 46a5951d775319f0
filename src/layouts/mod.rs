mod colemak;

use evdev::KeyCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base letter arrangement, the always active bottom of the layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Layout {
    #[default]
    Colemak,
    Qwerty,
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "colemak" => Ok(Layout::Colemak),
            "qwerty" => Ok(Layout::Qwerty),
            _ => Err(format!("invalid layout: {}", s)),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Colemak => write!(f, "colemak"),
            Layout::Qwerty => write!(f, "qwerty"),
        }
    }
}

impl Layout {
    /// Physical (qwerty position) key to the key this layout produces there.
    pub fn resolve(self, key: &KeyCode) -> KeyCode {
        match self {
            Layout::Colemak => colemak::resolve(key),
            Layout::Qwerty => *key,
        }
    }
}

use crate::features::{Context, Feature, FeatureResult, KeyEvent, OutputEvent};
use anyhow::Result;
use evdev::KeyCode;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Ctrl,
    Gui,
    Alt,
}

impl Modifier {
    /// Registration order when re-wrapping a keystroke.
    pub const ALL: [Modifier; 3] = [Modifier::Ctrl, Modifier::Gui, Modifier::Alt];

    pub fn key(self) -> KeyCode {
        match self {
            Modifier::Ctrl => KeyCode::KEY_LEFTCTRL,
            Modifier::Gui => KeyCode::KEY_LEFTMETA,
            Modifier::Alt => KeyCode::KEY_LEFTALT,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Modifier::Ctrl => 1,
            Modifier::Gui => 1 << 1,
            Modifier::Alt => 1 << 2,
        }
    }
}

/// Virtual modifiers logically held by modifier keys, independent of what the
/// tap dance engine does to live modifier state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModMask(u8);

impl ModMask {
    pub fn set(&mut self, modifier: Modifier) {
        self.0 |= modifier.bit();
    }

    pub fn clear(&mut self, modifier: Modifier) {
        self.0 &= !modifier.bit();
    }

    pub fn contains(self, modifier: Modifier) -> bool {
        self.0 & modifier.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Modifiers set in both masks.
    pub fn intersect(self, other: ModMask) -> ModMask {
        ModMask(self.0 & other.0)
    }

    pub fn keys(self) -> Vec<KeyCode> {
        Modifier::ALL
            .into_iter()
            .filter(|m| self.contains(*m))
            .map(Modifier::key)
            .collect()
    }
}

/// Modifiers applied to exactly the next plain keystroke.
#[derive(Clone, Debug, Default)]
pub struct OneShot {
    keys: Vec<KeyCode>,
    /// Modifiers some held key keeps down on the device, one entry per holder
    pinned: Vec<KeyCode>,
}

impl OneShot {
    pub fn arm(&mut self, key: KeyCode) {
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    /// Spends the armed modifiers. Pinned ones are already down, so the
    /// caller must neither press nor release them.
    pub fn take(&mut self) -> Vec<KeyCode> {
        let mut keys = std::mem::take(&mut self.keys);
        keys.retain(|key| !self.pinned.contains(key));
        keys
    }

    pub fn pin(&mut self, keys: &[KeyCode]) {
        self.pinned.extend_from_slice(keys);
    }

    pub fn unpin(&mut self, keys: &[KeyCode]) {
        for key in keys {
            if let Some(idx) = self.pinned.iter().position(|k| k == key) {
                self.pinned.swap_remove(idx);
            }
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Modifier keys: feed the accumulator while held, arm a one-shot when
/// tapped alone.
pub struct ModsFeature {
    /// Held modifier keys, and whether another key was pressed meanwhile
    down: HashMap<KeyCode, bool>,
}

impl ModsFeature {
    pub fn new() -> Self {
        Self {
            down: HashMap::new(),
        }
    }
}

impl Feature for ModsFeature {
    fn name(&self) -> &'static str {
        "mods"
    }

    fn before_event(&mut self, event: KeyEvent, _ctx: &mut Context) -> Result<()> {
        if event.pressed {
            for (key, used) in self.down.iter_mut() {
                if *key != event.key {
                    *used = true;
                }
            }
        }
        Ok(())
    }

    fn on_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<FeatureResult> {
        let Some(modifier) = ctx.action().and_then(|(_, action)| action.modifier) else {
            return Ok(FeatureResult::Continue(event));
        };

        if event.pressed {
            ctx.mods.set(modifier);
            // Pending layer-tap and mod-tap keys become holds
            ctx.timer.reset();
            self.down.insert(event.key, false);
            ctx.oneshot.pin(&[modifier.key()]);
            ctx.out.push(OutputEvent::Press(modifier.key()));
        } else {
            ctx.mods.clear(modifier);
            ctx.out.push(OutputEvent::Release(modifier.key()));
            if let Some(used) = self.down.remove(&event.key) {
                ctx.oneshot.unpin(&[modifier.key()]);
                if !used {
                    debug!("One-shot {:?}", modifier);
                    ctx.oneshot.arm(modifier.key());
                }
            }
        }

        Ok(FeatureResult::Consume)
    }
}

pub mod dance;
pub mod layers;
pub mod modes;
pub mod mods;
pub mod taps;
pub mod thumbs;

use crate::clock::{SharedTapTimer, Time};
use crate::config::{KeyAction, KeyboardConfig};
use crate::features::layers::LayerStack;
use crate::features::mods::{ModMask, OneShot};
use crate::registers::ModeRegisters;
use anyhow::Result;
use evdev::KeyCode;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeyCode,
    pub pressed: bool,
    pub time: Time,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputEvent {
    Press(KeyCode),
    Release(KeyCode),
    PressMany(Vec<KeyCode>),
    ReleaseMany(Vec<KeyCode>),
}

pub enum FeatureResult {
    Continue(KeyEvent),
    Consume,
}

/// What the physical key of the current event resolved to.
#[derive(Clone, Debug)]
pub enum Target<'a> {
    Keys(Vec<KeyCode>),
    Action(&'a str, &'a KeyAction),
}

/// Engine state threaded through every feature for one event.
pub struct Context<'a> {
    pub device_config: &'a KeyboardConfig,
    pub target: Target<'a>,
    pub layers: &'a mut LayerStack,
    pub mods: &'a mut ModMask,
    pub oneshot: &'a mut OneShot,
    pub timer: &'a mut SharedTapTimer,
    pub registers: &'a mut ModeRegisters,
    pub tapping_term: Duration,
    pub now: Time,
    pub out: Vec<OutputEvent>,
}

impl<'a> Context<'a> {
    pub fn action(&self) -> Option<(&'a str, &'a KeyAction)> {
        match &self.target {
            Target::Action(name, action) => Some((*name, *action)),
            Target::Keys(_) => None,
        }
    }

    pub fn press(&mut self, keys: &[KeyCode]) {
        if !keys.is_empty() {
            self.out.push(OutputEvent::PressMany(keys.to_vec()));
        }
    }

    pub fn release(&mut self, keys: &[KeyCode]) {
        if !keys.is_empty() {
            self.out.push(OutputEvent::ReleaseMany(keys.to_vec()));
        }
    }

    /// Press then release a chord.
    pub fn tap(&mut self, keys: &[KeyCode]) {
        self.press(keys);
        self.release(keys);
    }

    pub fn tap_shifted(&mut self, key: KeyCode, shift: bool) {
        if shift {
            self.tap(&[KeyCode::KEY_LEFTSHIFT, key]);
        } else {
            self.tap(&[key]);
        }
    }

    pub fn layer_on(&mut self, name: &str) {
        self.layers.activate_named(name);
    }

    pub fn layer_off(&mut self, name: &str) {
        self.layers.deactivate_named(name);
    }
}

pub trait Feature {
    fn name(&self) -> &'static str;

    /// Sees every event before the chain runs, whatever consumes it later.
    fn before_event(&mut self, _event: KeyEvent, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn on_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<FeatureResult>;

    /// Idle poll, lets pending decisions time out without another key event.
    fn on_tick(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{Actions, LayerConfig};
    use crate::layouts::Layout;
    use crate::registers::tests::{MemoryStorage, RecordingNotify};
    use crate::registers::Registers;

    pub(crate) const TERM: Duration = Duration::from_millis(200);

    pub(crate) fn press(key: KeyCode, time: u32) -> KeyEvent {
        KeyEvent {
            key,
            pressed: true,
            time: Time(time),
        }
    }

    pub(crate) fn release(key: KeyCode, time: u32) -> KeyEvent {
        KeyEvent {
            key,
            pressed: false,
            time: Time(time),
        }
    }

    pub(crate) fn layers(names: &[&str]) -> Vec<LayerConfig> {
        names
            .iter()
            .map(|name| LayerConfig {
                name: (*name).to_owned(),
                ..Default::default()
            })
            .collect()
    }

    /// Owns everything a [`Context`] borrows so feature tests can drive
    /// single features without a pipeline.
    pub(crate) struct TestContext {
        pub device_config: KeyboardConfig,
        pub layers: LayerStack,
        pub mods: ModMask,
        pub oneshot: OneShot,
        pub timer: SharedTapTimer,
        pub registers: ModeRegisters,
        pub notify: RecordingNotify,
    }

    impl TestContext {
        pub(crate) fn with_actions(actions: Actions, layer_names: &[&str]) -> Self {
            let device_config = KeyboardConfig {
                layers: layers(layer_names),
                actions,
                ..Default::default()
            };
            let notify = RecordingNotify::default();
            let registers = ModeRegisters::new(
                Registers::default(),
                Box::new(MemoryStorage::default()),
                Box::new(notify.clone()),
            );
            Self {
                layers: LayerStack::new(&device_config.layers, Layout::Qwerty),
                device_config,
                mods: ModMask::default(),
                oneshot: OneShot::default(),
                timer: SharedTapTimer::default(),
                registers,
                notify,
            }
        }

        /// Context for `event`, targeting the action named `action` if any.
        pub(crate) fn context(&mut self, action: Option<&str>, now: u32) -> Context<'_> {
            let target = match action.and_then(|name| self.device_config.actions.get_key_value(name)) {
                Some((name, action)) => Target::Action(name.as_str(), action),
                None => Target::Keys(Vec::new()),
            };
            Context {
                device_config: &self.device_config,
                target,
                layers: &mut self.layers,
                mods: &mut self.mods,
                oneshot: &mut self.oneshot,
                timer: &mut self.timer,
                registers: &mut self.registers,
                tapping_term: TERM,
                now: Time(now),
                out: Vec::new(),
            }
        }

        pub(crate) fn is_active(&self, layer: &str) -> bool {
            self.layers.is_active_named(layer)
        }
    }

    /// Feeds `event` through `feature`, returning the result and the emitted output.
    pub(crate) fn run<F: Feature>(
        feature: &mut F,
        test_ctx: &mut TestContext,
        action: Option<&str>,
        event: KeyEvent,
    ) -> (FeatureResult, Vec<OutputEvent>) {
        let mut ctx = test_ctx.context(action, event.time.0);
        feature.before_event(event, &mut ctx).unwrap();
        let result = feature.on_event(event, &mut ctx).unwrap();
        (result, ctx.out)
    }

    pub(crate) fn tick<F: Feature>(
        feature: &mut F,
        test_ctx: &mut TestContext,
        now: u32,
    ) -> Vec<OutputEvent> {
        let mut ctx = test_ctx.context(None, now);
        feature.on_tick(&mut ctx).unwrap();
        ctx.out
    }

    pub(crate) fn tapped(keys: &[KeyCode]) -> Vec<OutputEvent> {
        vec![
            OutputEvent::PressMany(keys.to_vec()),
            OutputEvent::ReleaseMany(keys.to_vec()),
        ]
    }
}

use crate::clock::Time;
use crate::config::{Dance, KeyAction, KeyboardConfig};
use crate::features::mods::ModMask;
use crate::features::{Context, Feature, FeatureResult, KeyEvent};
use anyhow::Result;
use colored::Colorize;
use evdev::KeyCode;
use log::debug;
use std::collections::HashMap;

/// What a resolved hold branch left registered until the key comes up.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Held {
    Layer(String),
    Keys(Vec<KeyCode>),
}

/// Per dance key recognizer state.
#[derive(Clone, Debug, Default)]
pub struct DanceState {
    /// Presses after the first one in the current sequence
    pub tap_count: u8,
    pub is_held: bool,
    /// Last press of the sequence in flight, `None` when idle
    pub last_event_time: Option<Time>,
    /// Accumulator snapshot taken when the sequence began
    mods: ModMask,
    held: Vec<Held>,
}

impl DanceState {
    pub fn in_flight(&self) -> bool {
        self.last_event_time.is_some()
    }

    fn reset(&mut self) {
        self.tap_count = 0;
        self.is_held = false;
        self.last_event_time = None;
    }
}

fn max_presses(dance: &Dance) -> u8 {
    match dance {
        Dance::TapShift { .. } | Dance::Pair { .. } => 3,
        Dance::Insert { repeat, .. } => {
            if repeat.is_some() {
                3
            } else {
                2
            }
        }
        Dance::Caps => 2,
    }
}

/// Tap dance recognizers, one per dance action.
///
/// A sequence resolves when its term runs out (checked on the next event of
/// any key and on idle ticks), when another key is pressed, or on release once
/// no further tap could change the outcome.
pub struct DanceFeature {
    states: HashMap<String, DanceState>,
}

impl DanceFeature {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self, name: &str) -> Option<&DanceState> {
        self.states.get(name)
    }

    fn expire(&mut self, ctx: &mut Context) {
        let now = ctx.now;
        let term = ctx.tapping_term;
        let expired = self.in_flight(|state| {
            state
                .last_event_time
                .is_some_and(|last| !now.within(last, term))
        });
        for name in expired {
            self.finish(&name, ctx);
        }
    }

    /// Another key went down: every sequence still waiting resolves now.
    fn interrupt(&mut self, ctx: &mut Context) {
        let current = ctx.action().map(|(name, _)| name);
        let waiting = self.in_flight(|_| true);
        for name in waiting {
            if Some(name.as_str()) != current {
                self.finish(&name, ctx);
            }
        }
    }

    fn in_flight(&self, pred: impl Fn(&DanceState) -> bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .states
            .iter()
            .filter(|(_, state)| state.in_flight() && pred(state))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn finish(&mut self, name: &str, ctx: &mut Context) {
        let config: &KeyboardConfig = ctx.device_config;
        let Some(state) = self.states.get_mut(name) else {
            return;
        };
        if let Some(action) = config.actions.get(name)
            && let Some(dance) = &action.dance
        {
            resolve(name, action, dance, state, ctx);
        } else {
            state.reset();
        }
    }
}

fn resolve(name: &str, action: &KeyAction, dance: &Dance, state: &mut DanceState, ctx: &mut Context) {
    let presses = state.tap_count.saturating_add(1);
    let held = state.is_held;
    debug!(
        "{} {}: {} x{}{}",
        "⋯".cyan().bold(),
        "DANCE".yellow(),
        name.bright_blue(),
        presses,
        if held { " held" } else { "" },
    );

    match dance {
        Dance::TapShift { key } => {
            let layer = action.layer.as_deref();
            if presses >= 3 {
                if held {
                    hold(vec![*key], state, ctx);
                } else {
                    ctx.tap(&[*key]);
                }
            } else if presses == 2 {
                ctx.tap(&[*key]);
                if let Some(layer) = layer {
                    if held {
                        ctx.layer_on(layer);
                        state.held.push(Held::Layer(layer.to_owned()));
                    } else if let Some(id) = ctx.layers.id(layer) {
                        ctx.layers.set_oneshot(id);
                    }
                }
            } else if held {
                if let Some(layer) = layer {
                    ctx.layer_on(layer);
                    state.held.push(Held::Layer(layer.to_owned()));
                }
            } else {
                ordinary(*key, state.mods, ctx);
            }
        }
        Dance::Pair {
            left,
            right,
            shift,
            close,
            modifier,
        } => {
            if presses >= 2 {
                ctx.tap_shifted(*left, shift.double());
                ctx.tap_shifted(*right, shift.double());
                if presses >= 3 {
                    ctx.tap(&[KeyCode::KEY_LEFT]);
                }
            } else if let (true, Some(modifier)) = (held, modifier) {
                hold(vec![*modifier], state, ctx);
            } else {
                ctx.tap_shifted(if *close { *right } else { *left }, shift.single());
            }
        }
        Dance::Insert {
            single,
            double,
            repeat,
        } => {
            if let (true, true, Some(repeat)) = (presses >= 3, held, repeat) {
                hold(repeat.clone(), state, ctx);
            } else {
                let strokes = if presses >= 2 { double } else { single };
                for stroke in strokes {
                    ctx.tap(stroke);
                }
            }
        }
        Dance::Caps => {
            if presses >= 2 {
                ctx.tap(&[KeyCode::KEY_CAPSLOCK]);
            } else {
                ctx.oneshot.arm(KeyCode::KEY_LEFTSHIFT);
                if held {
                    hold(vec![KeyCode::KEY_LEFTSHIFT], state, ctx);
                }
            }
        }
    }

    state.reset();
}

/// Plain keystroke wrapped in the modifiers held when the sequence began,
/// then whatever of them is still logically held is pressed again.
fn ordinary(key: KeyCode, snapshot: ModMask, ctx: &mut Context) {
    let wrap = snapshot.keys();
    ctx.press(&wrap);
    ctx.tap(&[key]);
    ctx.release(&wrap);
    ctx.press(&snapshot.intersect(*ctx.mods).keys());
}

/// Keys stay down until the dance key comes up, and one-shot wrapping leaves
/// them alone meanwhile.
fn hold(keys: Vec<KeyCode>, state: &mut DanceState, ctx: &mut Context) {
    ctx.press(&keys);
    ctx.oneshot.pin(&keys);
    state.held.push(Held::Keys(keys));
}

fn undo(held: Vec<Held>, ctx: &mut Context) {
    for held in held.into_iter().rev() {
        match held {
            Held::Layer(layer) => ctx.layer_off(&layer),
            Held::Keys(keys) => {
                ctx.oneshot.unpin(&keys);
                ctx.release(&keys);
            }
        }
    }
}

impl Feature for DanceFeature {
    fn name(&self) -> &'static str {
        "dance"
    }

    fn before_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<()> {
        self.expire(ctx);
        if event.pressed {
            self.interrupt(ctx);
        }
        Ok(())
    }

    fn on_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<FeatureResult> {
        let Some((name, action)) = ctx.action() else {
            return Ok(FeatureResult::Continue(event));
        };
        let Some(dance) = &action.dance else {
            return Ok(FeatureResult::Continue(event));
        };

        // Momentary layer straight away. Thumb keys get theirs from the thumbs
        // feature and tap-shift resolves its layer itself.
        let tap_layer = action
            .layer
            .as_deref()
            .filter(|_| action.thumb.is_none() && !matches!(dance, Dance::TapShift { .. }));

        if event.pressed {
            if let Some(layer) = tap_layer {
                ctx.layer_on(layer);
            }

            let state = self.states.entry(name.to_owned()).or_default();
            let within = state
                .last_event_time
                .is_some_and(|last| ctx.now.within(last, ctx.tapping_term));
            if state.in_flight() && !within {
                self.finish(name, ctx);
            }

            let state = self.states.entry(name.to_owned()).or_default();
            if !state.held.is_empty() {
                // Lost release, clean up before starting over
                let held = std::mem::take(&mut state.held);
                undo(held, ctx);
            }
            if state.in_flight() {
                state.tap_count = state.tap_count.saturating_add(1);
            } else {
                state.tap_count = 0;
                state.mods = *ctx.mods;
            }
            state.is_held = true;
            state.last_event_time = Some(ctx.now);
        } else {
            if let Some(layer) = tap_layer {
                ctx.layer_off(layer);
            }

            let state = self.states.entry(name.to_owned()).or_default();
            if !state.held.is_empty() {
                let held = std::mem::take(&mut state.held);
                undo(held, ctx);
                state.reset();
            } else if state.in_flight() {
                state.is_held = false;
                if state.tap_count.saturating_add(1) >= max_presses(dance) {
                    self.finish(name, ctx);
                }
            } else {
                state.reset();
            }
        }

        Ok(FeatureResult::Consume)
    }

    fn on_tick(&mut self, ctx: &mut Context) -> Result<()> {
        self.expire(ctx);
        Ok(())
    }
}

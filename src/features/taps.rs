use crate::config::{Chord, KeyAction};
use crate::features::{Context, Feature, FeatureResult, KeyEvent};
use anyhow::Result;
use evdev::KeyCode;
use std::collections::HashMap;

#[derive(Clone, Debug)]
struct ActiveTap {
    tap: Chord,
    hold: Chord,
    layer: Option<String>,
}

/// Layer-tap and mod-tap keys whose tap chord may carry its own modifiers,
/// e.g. a shifted keycode.
///
/// Hold side effects happen on press. The tap is decided on release against
/// the shared tap timer, which any other timed key restarts.
pub struct TapsFeature {
    /// Keys currently down and what they set up on press
    active: HashMap<KeyCode, ActiveTap>,
}

impl TapsFeature {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
        }
    }

    fn handles(action: &KeyAction) -> bool {
        action.thumb.is_none()
            && action.dance.is_none()
            && action.modifier.is_none()
            && action.mode.is_none()
            && (action.tap.is_some() || action.hold.is_some() || action.layer.is_some())
    }
}

impl Feature for TapsFeature {
    fn name(&self) -> &'static str {
        "taps"
    }

    fn on_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<FeatureResult> {
        let Some((_, action)) = ctx.action().filter(|(_, action)| Self::handles(action)) else {
            return Ok(FeatureResult::Continue(event));
        };

        if event.pressed {
            let active = ActiveTap {
                tap: action.tap.clone().unwrap_or_default(),
                hold: action.hold.clone().unwrap_or_default(),
                layer: action.layer.clone(),
            };
            if let Some(layer) = &active.layer {
                ctx.layer_on(layer);
            }
            ctx.press(&active.hold);
            ctx.oneshot.pin(&active.hold);
            ctx.timer.start(ctx.now);
            self.active.insert(event.key, active);
        } else if let Some(active) = self.active.remove(&event.key) {
            if let Some(layer) = &active.layer {
                ctx.layer_off(layer);
            }
            ctx.oneshot.unpin(&active.hold);
            ctx.release(&active.hold);
            if ctx.timer.within(ctx.now, ctx.tapping_term) {
                ctx.tap(&active.tap);
            }
            if active.layer.is_some() {
                ctx.oneshot.clear();
            }
            ctx.timer.reset();
        }

        Ok(FeatureResult::Consume)
    }
}

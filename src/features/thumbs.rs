use crate::config::{KeyAction, Side};
use crate::features::layers::LayerId;
use crate::features::{Context, Feature, FeatureResult, KeyEvent};
use anyhow::Result;
use colored::Colorize;
use log::debug;

/// Layers of the thumb action held on one side.
#[derive(Clone, Copy, Debug, Default)]
struct HeldThumb {
    layer: Option<LayerId>,
    combined: Option<LayerId>,
}

/// Two-bit "which thumb is down" register plus the layer selected by holding
/// both.
#[derive(Clone, Debug, Default)]
pub struct ThumbState {
    pub left_held: bool,
    pub right_held: bool,
    /// Combination layer in effect, `None` means back to the both-down default
    pub override_layer: Option<LayerId>,
    /// Sides that lost their tap to another key
    preempted: [bool; 2],
    sides: [HeldThumb; 2],
}

impl ThumbState {
    pub fn held(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left_held,
            Side::Right => self.right_held,
        }
    }

    fn set_held(&mut self, side: Side, held: bool) {
        match side {
            Side::Left => self.left_held = held,
            Side::Right => self.right_held = held,
        }
    }

    fn preempted(&mut self, side: Side) -> &mut bool {
        &mut self.preempted[side as usize]
    }

    fn side(&mut self, side: Side) -> &mut HeldThumb {
        &mut self.sides[side as usize]
    }

    /// Whether a thumb still down owns `id` as its own layer.
    fn owns(&self, id: LayerId) -> bool {
        [Side::Left, Side::Right]
            .into_iter()
            .any(|side| self.held(side) && self.sides[side as usize].layer == Some(id))
    }
}

/// Dual thumb layer-tap keys. Each one alone is a momentary layer with a
/// fallback tap; both together select a composite layer whose unwinding
/// depends on release order.
pub struct ThumbsFeature {
    state: ThumbState,
}

impl ThumbsFeature {
    pub fn new() -> Self {
        Self {
            state: ThumbState::default(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ThumbState {
        &self.state
    }

    fn on_press(&mut self, side: Side, action: &KeyAction, ctx: &mut Context) {
        if let Some(layer) = &action.layer {
            ctx.layer_on(layer);
        }
        ctx.timer.start(ctx.now);
        self.state.set_held(side, true);
        *self.state.side(side) = HeldThumb {
            layer: action.layer.as_deref().and_then(|name| ctx.layers.id(name)),
            combined: action.combined.as_deref().and_then(|name| ctx.layers.id(name)),
        };
        *self.state.preempted(side) = false;

        if self.state.held(side.opposite()) {
            self.drop_override(ctx);
            if let Some(both) = &ctx.device_config.both_down
                && let Some(id) = ctx.layers.id(both)
            {
                debug!("{} {}", "⇅".magenta().bold(), "BOTH THUMBS".yellow());
                ctx.layers.activate(id);
                self.state.override_layer = Some(id);
            }
            *self.state.preempted(side) = true;
            *self.state.preempted(side.opposite()) = true;
        }
    }

    fn on_release(&mut self, side: Side, action: &KeyAction, ctx: &mut Context) {
        let was_held = self.state.held(side);
        self.state.set_held(side, false);
        *self.state.side(side) = HeldThumb::default();

        if let Some(layer) = &action.layer {
            ctx.layer_off(layer);
        }
        self.drop_override(ctx);

        let tapped = was_held
            && !*self.state.preempted(side)
            && ctx.timer.within(ctx.now, ctx.tapping_term);
        let other = side.opposite();
        match &action.tap {
            Some(tap) if tapped => ctx.tap(tap),
            _ => {
                if self.state.held(other)
                    && let Some(combined) = self.state.side(other).combined
                {
                    ctx.layers.activate(combined);
                    self.state.override_layer = Some(combined);
                }
            }
        }

        ctx.oneshot.clear();
        *self.state.preempted(side) = false;
        ctx.timer.reset();
    }

    /// Retires the combination layer in effect, unless a held thumb needs it
    /// as its own layer.
    fn drop_override(&mut self, ctx: &mut Context) {
        if let Some(id) = self.state.override_layer.take()
            && !self.state.owns(id)
        {
            ctx.layers.deactivate(id);
        }
    }
}

impl Feature for ThumbsFeature {
    fn name(&self) -> &'static str {
        "thumbs"
    }

    /// Any other key going down while a thumb is held takes away its tap.
    fn before_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<()> {
        let is_thumb = ctx.action().is_some_and(|(_, action)| action.thumb.is_some());
        if event.pressed && !is_thumb {
            for side in [Side::Left, Side::Right] {
                if self.state.held(side) {
                    *self.state.preempted(side) = true;
                }
            }
        }
        Ok(())
    }

    fn on_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<FeatureResult> {
        let Some((_, action)) = ctx.action() else {
            return Ok(FeatureResult::Continue(event));
        };
        let Some(side) = action.thumb else {
            return Ok(FeatureResult::Continue(event));
        };

        if event.pressed {
            self.on_press(side, action, ctx);
        } else {
            self.on_release(side, action, ctx);
        }

        // Dance thumbs still feed their recognizer
        if action.dance.is_some() {
            Ok(FeatureResult::Continue(event))
        } else {
            Ok(FeatureResult::Consume)
        }
    }
}

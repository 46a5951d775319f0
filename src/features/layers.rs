use crate::config::{Binding, KeyboardConfig, LayerConfig};
use crate::features::{Context, Feature, FeatureResult, KeyEvent, Target};
use crate::layouts::Layout;
use anyhow::Result;
use colored::Colorize;
use evdev::KeyCode;
use log::{debug, warn};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(pub usize);

/// Base layout plus ordered overlay layers; the highest active layer wins.
pub struct LayerStack {
    base: Layout,
    names: Vec<String>,
    active: Vec<bool>,
    oneshot: Option<LayerId>,
}

impl LayerStack {
    pub fn new(layers: &[LayerConfig], base: Layout) -> Self {
        Self {
            base,
            names: layers.iter().map(|l| l.name.clone()).collect(),
            active: vec![false; layers.len()],
            oneshot: None,
        }
    }

    pub fn id(&self, name: &str) -> Option<LayerId> {
        self.names.iter().position(|n| n == name).map(LayerId)
    }

    pub fn base(&self) -> Layout {
        self.base
    }

    pub fn set_base(&mut self, layout: Layout) {
        self.base = layout;
    }

    pub fn is_active(&self, id: LayerId) -> bool {
        self.active.get(id.0).copied().unwrap_or(false)
    }

    pub fn is_active_named(&self, name: &str) -> bool {
        self.id(name).is_some_and(|id| self.is_active(id))
    }

    pub fn activate(&mut self, id: LayerId) {
        if let Some(flag) = self.active.get_mut(id.0)
            && !*flag
        {
            *flag = true;
            log_layer(&self.names[id.0], true);
        }
    }

    pub fn deactivate(&mut self, id: LayerId) {
        if let Some(flag) = self.active.get_mut(id.0)
            && *flag
        {
            *flag = false;
            log_layer(&self.names[id.0], false);
        }
        if self.oneshot == Some(id) {
            self.oneshot = None;
        }
    }

    pub fn activate_named(&mut self, name: &str) {
        match self.id(name) {
            Some(id) => self.activate(id),
            None => warn!("Unknown layer {name}"),
        }
    }

    pub fn deactivate_named(&mut self, name: &str) {
        match self.id(name) {
            Some(id) => self.deactivate(id),
            None => warn!("Unknown layer {name}"),
        }
    }

    /// Everything off, leaving only the base layout.
    pub fn deactivate_all(&mut self) {
        for id in 0..self.active.len() {
            self.deactivate(LayerId(id));
        }
        self.oneshot = None;
    }

    /// Active until the next plain keystroke.
    pub fn set_oneshot(&mut self, id: LayerId) {
        self.activate(id);
        self.oneshot = Some(id);
    }

    pub fn clear_oneshot(&mut self) {
        if let Some(id) = self.oneshot.take() {
            self.deactivate(id);
        }
    }

    pub fn oneshot(&self) -> Option<LayerId> {
        self.oneshot
    }

    /// Keycode lookup: active layers from the top, then base bindings, then
    /// the base layout.
    pub fn resolve(&self, key: KeyCode, config: &KeyboardConfig) -> Binding {
        for (idx, layer) in config.layers.iter().enumerate().rev() {
            if self.is_active(LayerId(idx))
                && let Some(binding) = layer.keys.get(&key)
            {
                return binding.clone();
            }
        }

        if let Some(action) = config.bindings.get(&key) {
            return Binding::Action(action.clone());
        }

        Binding::Keys(vec![self.base.resolve(&key)])
    }
}

/// Last stage: plain chords, wrapped with any armed one-shot modifiers.
pub struct LayersFeature {
    /// One-shot modifiers to release along with the key that consumed them
    wrapped: HashMap<KeyCode, Vec<KeyCode>>,
}

impl LayersFeature {
    pub fn new() -> Self {
        Self {
            wrapped: HashMap::new(),
        }
    }
}

impl Feature for LayersFeature {
    fn name(&self) -> &'static str {
        "layers"
    }

    fn on_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<FeatureResult> {
        let chord = match &ctx.target {
            Target::Keys(chord) => chord.clone(),
            Target::Action(name, _) => {
                debug!("Action {name} has nothing to do");
                return Ok(FeatureResult::Consume);
            }
        };

        if event.pressed {
            let extra = ctx.oneshot.take();
            ctx.press(&extra);
            ctx.press(&chord);
            if !extra.is_empty() {
                self.wrapped.insert(event.key, extra);
            }
            ctx.layers.clear_oneshot();
        } else {
            ctx.release(&chord);
            if let Some(extra) = self.wrapped.remove(&event.key) {
                ctx.release(&extra);
            }
        }

        Ok(FeatureResult::Consume)
    }
}

fn log_layer(layer: &str, active: bool) {
    debug!(
        "{} {}: {}",
        if active {
            "↓".green().bold()
        } else {
            "↑".red().bold()
        },
        "LAYER".purple(),
        layer.bright_blue(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Actions;
    use crate::features::OutputEvent;
    use crate::features::tests::{TestContext, layers, press, release};
    use proptest::prelude::*;

    fn config() -> KeyboardConfig {
        let mut layers = layers(&["shift", "symbol", "navigation"]);
        layers[0]
            .keys
            .insert(KeyCode::KEY_A, Binding::Keys(vec![KeyCode::KEY_LEFTSHIFT, KeyCode::KEY_A]));
        layers[1]
            .keys
            .insert(KeyCode::KEY_J, Binding::Action("lparen".to_owned()));
        layers[2]
            .keys
            .insert(KeyCode::KEY_J, Binding::Keys(vec![KeyCode::KEY_DOWN]));
        KeyboardConfig {
            layers,
            bindings: HashMap::from([(KeyCode::KEY_SPACE, "space".to_owned())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_highest_active_layer_wins() {
        let config = config();
        let mut stack = LayerStack::new(&config.layers, Layout::Qwerty);

        assert_eq!(
            stack.resolve(KeyCode::KEY_J, &config),
            Binding::Keys(vec![KeyCode::KEY_J])
        );
        stack.activate_named("symbol");
        assert_eq!(
            stack.resolve(KeyCode::KEY_J, &config),
            Binding::Action("lparen".to_owned())
        );
        stack.activate_named("navigation");
        assert_eq!(
            stack.resolve(KeyCode::KEY_J, &config),
            Binding::Keys(vec![KeyCode::KEY_DOWN])
        );
        // Transparent where the top layer has no entry
        stack.activate_named("shift");
        assert_eq!(
            stack.resolve(KeyCode::KEY_A, &config),
            Binding::Keys(vec![KeyCode::KEY_LEFTSHIFT, KeyCode::KEY_A])
        );
    }

    #[test]
    fn test_base_bindings_and_layout() {
        let config = config();
        let mut stack = LayerStack::new(&config.layers, Layout::Colemak);
        assert_eq!(
            stack.resolve(KeyCode::KEY_SPACE, &config),
            Binding::Action("space".to_owned())
        );
        assert_eq!(
            stack.resolve(KeyCode::KEY_K, &config),
            Binding::Keys(vec![KeyCode::KEY_E])
        );
        stack.set_base(Layout::Qwerty);
        assert_eq!(
            stack.resolve(KeyCode::KEY_K, &config),
            Binding::Keys(vec![KeyCode::KEY_K])
        );
    }

    #[test]
    fn test_unknown_layer_is_ignored() {
        let config = config();
        let mut stack = LayerStack::new(&config.layers, Layout::Qwerty);
        stack.activate_named("missing");
        stack.deactivate_named("missing");
        assert!(!stack.is_active(LayerId(7)));
    }

    #[test]
    fn test_oneshot_layer_clears() {
        let config = config();
        let mut stack = LayerStack::new(&config.layers, Layout::Qwerty);
        let shift = stack.id("shift").unwrap();
        stack.set_oneshot(shift);
        assert!(stack.is_active(shift));
        stack.clear_oneshot();
        assert!(!stack.is_active(shift));
        assert_eq!(stack.oneshot(), None);
    }

    #[test]
    fn test_plain_key_takes_oneshot_mods() {
        let mut test_ctx = TestContext::with_actions(Actions::new(), &["shift"]);
        let mut feature = LayersFeature::new();
        test_ctx.oneshot.arm(KeyCode::KEY_LEFTCTRL);
        let shift = test_ctx.layers.id("shift").unwrap();
        test_ctx.layers.set_oneshot(shift);

        let out = {
            let mut ctx = test_ctx.context(None, 0);
            ctx.target = Target::Keys(vec![KeyCode::KEY_C]);
            feature.on_event(press(KeyCode::KEY_C, 0), &mut ctx).unwrap();
            ctx.out
        };
        assert_eq!(
            out,
            vec![
                OutputEvent::PressMany(vec![KeyCode::KEY_LEFTCTRL]),
                OutputEvent::PressMany(vec![KeyCode::KEY_C]),
            ]
        );

        let out = {
            let mut ctx = test_ctx.context(None, 10);
            ctx.target = Target::Keys(vec![KeyCode::KEY_C]);
            feature.on_event(release(KeyCode::KEY_C, 10), &mut ctx).unwrap();
            ctx.out
        };
        assert_eq!(
            out,
            vec![
                OutputEvent::ReleaseMany(vec![KeyCode::KEY_C]),
                OutputEvent::ReleaseMany(vec![KeyCode::KEY_LEFTCTRL]),
            ]
        );
        assert!(test_ctx.oneshot.is_empty());
        assert!(!test_ctx.is_active("shift"));
    }

    proptest! {
        #[test]
        fn prop_deactivate_all_restores_base(ops in proptest::collection::vec((0usize..3, any::<bool>()), 0..32)) {
            let config = config();
            let mut stack = LayerStack::new(&config.layers, Layout::Qwerty);
            for (id, on) in ops {
                if on {
                    stack.activate(LayerId(id));
                } else {
                    stack.deactivate(LayerId(id));
                }
            }
            stack.deactivate_all();
            for id in 0..3 {
                prop_assert!(!stack.is_active(LayerId(id)));
            }
            prop_assert_eq!(stack.base(), Layout::Qwerty);
            prop_assert_eq!(stack.resolve(KeyCode::KEY_J, &config), Binding::Keys(vec![KeyCode::KEY_J]));
        }
    }
}

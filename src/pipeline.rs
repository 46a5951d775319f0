use crate::{
    clock::{SharedTapTimer, Time},
    config::{Binding, KeyboardConfig},
    features::{
        Context, Feature, FeatureResult, KeyEvent, OutputEvent, Target,
        dance::DanceFeature,
        layers::{LayerStack, LayersFeature},
        modes::ModesFeature,
        mods::{ModMask, ModsFeature, OneShot},
        taps::TapsFeature,
        thumbs::ThumbsFeature,
    },
    registers::ModeRegisters,
};
use anyhow::Result;
use evdev::KeyCode;
use log::{trace, warn};
use std::collections::HashMap;
use std::time::Duration;

/// State shared by every feature, one per keyboard.
pub struct Engine {
    pub layers: LayerStack,
    pub mods: ModMask,
    pub oneshot: OneShot,
    pub timer: SharedTapTimer,
    pub registers: ModeRegisters,
}

impl Engine {
    pub fn new(config: &KeyboardConfig, registers: ModeRegisters) -> Self {
        Self {
            layers: LayerStack::new(&config.layers, registers.default_layout()),
            mods: ModMask::default(),
            oneshot: OneShot::default(),
            timer: SharedTapTimer::default(),
            registers,
        }
    }

    fn context<'a>(
        &'a mut self,
        device_config: &'a KeyboardConfig,
        target: Target<'a>,
        tapping_term: Duration,
        now: Time,
    ) -> Context<'a> {
        Context {
            device_config,
            target,
            layers: &mut self.layers,
            mods: &mut self.mods,
            oneshot: &mut self.oneshot,
            timer: &mut self.timer,
            registers: &mut self.registers,
            tapping_term,
            now,
            out: Vec::new(),
        }
    }
}

/// Feature order: modifier keys feed the accumulator first, plain chords go
/// out last.
pub fn default_features() -> Vec<Box<dyn Feature + Send>> {
    vec![
        Box::new(ModsFeature::new()),
        Box::new(ModesFeature::new()),
        Box::new(ThumbsFeature::new()),
        Box::new(TapsFeature::new()),
        Box::new(DanceFeature::new()),
        Box::new(LayersFeature::new()),
    ]
}

fn target<'a>(config: &'a KeyboardConfig, binding: &Binding, key: KeyCode) -> Option<Target<'a>> {
    match binding {
        Binding::Keys(keys) => Some(Target::Keys(keys.clone())),
        Binding::Action(name) => match config.actions.get_key_value(name) {
            Some((name, action)) => Some(Target::Action(name.as_str(), action)),
            None => {
                warn!("{:?} bound to unknown action {}", key, name);
                None
            }
        },
    }
}

pub struct Pipeline {
    config: KeyboardConfig,
    tapping_term: Duration,
    engine: Engine,
    features: Vec<Box<dyn Feature + Send>>,
    /// Binding each physical key had when it went down
    held: HashMap<KeyCode, Binding>,
}

impl Pipeline {
    pub fn new(
        config: KeyboardConfig,
        tapping_term: Duration,
        registers: ModeRegisters,
        features: Vec<Box<dyn Feature + Send>>,
    ) -> Self {
        Self {
            engine: Engine::new(&config, registers),
            config,
            tapping_term,
            features,
            held: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Releases resolve through the binding captured at press, so a layer
    /// change in between cannot strand a key.
    fn binding(&mut self, event: KeyEvent) -> Binding {
        if event.pressed {
            let binding = self.engine.layers.resolve(event.key, &self.config);
            self.held.insert(event.key, binding.clone());
            binding
        } else {
            match self.held.remove(&event.key) {
                Some(binding) => binding,
                None => self.engine.layers.resolve(event.key, &self.config),
            }
        }
    }

    pub fn process_event(&mut self, event: KeyEvent) -> Result<Vec<OutputEvent>> {
        let mut binding = self.binding(event);

        // Pending decisions see the key first
        let out = {
            let Some(target) = target(&self.config, &binding, event.key) else {
                return Ok(Vec::new());
            };
            let mut ctx = self
                .engine
                .context(&self.config, target, self.tapping_term, event.time);
            for feature in self.features.iter_mut() {
                feature.before_event(event, &mut ctx)?;
            }
            ctx.out
        };

        // They may have moved layers under a key going down
        if event.pressed {
            binding = self.binding(event);
        }
        let Some(target) = target(&self.config, &binding, event.key) else {
            return Ok(out);
        };
        let is_modifier = matches!(&target, Target::Action(_, action) if action.modifier.is_some());
        let spent = if event.pressed && !is_modifier {
            self.engine.layers.oneshot()
        } else {
            None
        };
        let mut ctx = self
            .engine
            .context(&self.config, target, self.tapping_term, event.time);
        ctx.out = out;

        let mut feature_name = "raw";
        let mut result = FeatureResult::Continue(event);
        for feature in self.features.iter_mut() {
            feature_name = feature.name();
            result = match result {
                FeatureResult::Continue(e) => feature.on_event(e, &mut ctx)?,
                FeatureResult::Consume => break,
            };
        }

        if let FeatureResult::Continue(e) = result {
            trace!("{:?} fell through after {}", e.key, feature_name);
        }

        // A one-shot layer lasts for exactly one key, action keys included
        if spent.is_some() && ctx.layers.oneshot() == spent {
            ctx.layers.clear_oneshot();
        }

        Ok(ctx.out)
    }

    /// Idle poll so pending decisions resolve without another key.
    pub fn tick(&mut self, now: Time) -> Result<Vec<OutputEvent>> {
        let mut ctx = self.engine.context(
            &self.config,
            Target::Keys(Vec::new()),
            self.tapping_term,
            now,
        );
        for feature in self.features.iter_mut() {
            feature.on_tick(&mut ctx)?;
        }
        Ok(ctx.out)
    }
}

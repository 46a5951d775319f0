use crate::config::Mode;
use crate::features::{Context, Feature, FeatureResult, KeyEvent};
use crate::layouts::Layout;
use crate::registers::Notification;
use anyhow::Result;
use colored::Colorize;
use log::{debug, info};

/// Base layout switching and steno mode, acting on press.
pub struct ModesFeature;

impl ModesFeature {
    pub fn new() -> Self {
        Self
    }

    fn switch_layout(layout: Layout, ctx: &mut Context) {
        info!("{} {}", "Layout".yellow(), layout.to_string().bright_blue());
        ctx.registers.notify(Notification::Layout(layout));
        ctx.layers.deactivate_all();
        ctx.registers.persist_default_layout(layout);
        ctx.layers.set_base(layout);
    }

    fn enter_steno(ctx: &mut Context) {
        let config = ctx.device_config;
        ctx.layers.deactivate_all();
        if let Some(layer) = &config.steno_layer {
            ctx.layer_on(layer);
        }
        ctx.registers.set_nkro(true);
        if ctx.registers.set_steno(true) {
            Self::launch(ctx);
        }
        ctx.registers.notify(Notification::Steno);
    }

    fn exit_steno(ctx: &mut Context) {
        let config = ctx.device_config;
        if let Some(layer) = &config.steno_layer {
            ctx.layer_off(layer);
        }
        if ctx.registers.set_steno(false) {
            Self::launch(ctx);
        }
        ctx.registers.notify(Notification::StenoExit);
    }

    /// Toggles the steno application, if a chord for it is configured.
    fn launch(ctx: &mut Context) {
        let config = ctx.device_config;
        if let Some(chord) = &config.steno_launch {
            debug!("Steno launcher {:?}", chord);
            ctx.tap(chord);
        }
    }
}

impl Feature for ModesFeature {
    fn name(&self) -> &'static str {
        "modes"
    }

    fn on_event(&mut self, event: KeyEvent, ctx: &mut Context) -> Result<FeatureResult> {
        let Some(mode) = ctx.action().and_then(|(_, action)| action.mode) else {
            return Ok(FeatureResult::Continue(event));
        };

        if event.pressed {
            match mode {
                Mode::Colemak => Self::switch_layout(Layout::Colemak, ctx),
                Mode::Qwerty => Self::switch_layout(Layout::Qwerty, ctx),
                Mode::Steno => Self::enter_steno(ctx),
                Mode::StenoExit => Self::exit_steno(ctx),
            }
        }

        Ok(FeatureResult::Consume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Actions, KeyAction};
    use crate::features::tests::{TestContext, press, release, run, tapped};
    use crate::registers::tests::MemoryStorage;
    use crate::registers::{ModeRegisters, Registers};
    use evdev::KeyCode;

    fn mode(mode: Mode) -> KeyAction {
        KeyAction {
            mode: Some(mode),
            ..Default::default()
        }
    }

    fn actions() -> Actions {
        Actions::from([
            ("colemak".to_owned(), mode(Mode::Colemak)),
            ("qwerty".to_owned(), mode(Mode::Qwerty)),
            ("steno".to_owned(), mode(Mode::Steno)),
            ("steno_exit".to_owned(), mode(Mode::StenoExit)),
        ])
    }

    fn setup() -> (ModesFeature, TestContext, MemoryStorage) {
        let mut test_ctx = TestContext::with_actions(actions(), &["shift", "steno"]);
        test_ctx.device_config.steno_layer = Some("steno".to_owned());
        test_ctx.device_config.steno_launch =
            Some(vec![KeyCode::KEY_LEFTCTRL, KeyCode::KEY_LEFTALT, KeyCode::KEY_P]);

        let storage = MemoryStorage::default();
        test_ctx.registers = ModeRegisters::new(
            Registers::default(),
            Box::new(storage.clone()),
            Box::new(test_ctx.notify.clone()),
        );
        (ModesFeature::new(), test_ctx, storage)
    }

    #[test]
    fn test_layout_switch_persists_and_clears_layers() {
        let (mut feature, mut test_ctx, storage) = setup();
        test_ctx.layers.activate_named("shift");

        let (result, out) = run(&mut feature, &mut test_ctx, Some("qwerty"), press(KeyCode::KEY_F2, 0));
        assert!(matches!(result, FeatureResult::Consume));
        assert!(out.is_empty());
        assert!(!test_ctx.is_active("shift"));
        assert_eq!(test_ctx.layers.base(), Layout::Qwerty);
        assert_eq!(
            storage.stored.lock().unwrap().map(|r| r.default_layout),
            Some(Layout::Qwerty)
        );
        assert_eq!(
            test_ctx.notify.seen(),
            vec![Notification::Layout(Layout::Qwerty)]
        );

        // Release does nothing
        run(&mut feature, &mut test_ctx, Some("qwerty"), release(KeyCode::KEY_F2, 30));
        assert_eq!(*storage.writes.lock().unwrap(), 1);
    }

    #[test]
    fn test_steno_round_trip() {
        let (mut feature, mut test_ctx, storage) = setup();
        test_ctx.layers.activate_named("shift");
        let launch = [KeyCode::KEY_LEFTCTRL, KeyCode::KEY_LEFTALT, KeyCode::KEY_P];

        let (_, out) = run(&mut feature, &mut test_ctx, Some("steno"), press(KeyCode::KEY_F3, 0));
        assert_eq!(out, tapped(&launch));
        assert!(test_ctx.is_active("steno"));
        assert!(!test_ctx.is_active("shift"));
        assert!(test_ctx.registers.steno());
        assert!(storage.stored.lock().unwrap().is_some_and(|r| r.nkro));

        // Already in steno, no second launch
        let (_, out) = run(&mut feature, &mut test_ctx, Some("steno"), press(KeyCode::KEY_F3, 100));
        assert!(out.is_empty());

        let (_, out) = run(&mut feature, &mut test_ctx, Some("steno_exit"), press(KeyCode::KEY_ESC, 200));
        assert_eq!(out, tapped(&launch));
        assert!(!test_ctx.is_active("steno"));
        assert!(!test_ctx.registers.steno());
        assert_eq!(
            test_ctx.notify.seen(),
            vec![Notification::Steno, Notification::Steno, Notification::StenoExit]
        );
    }

    #[test]
    fn test_other_actions_pass_through() {
        let (mut feature, mut test_ctx, _) = setup();

        let (result, _) = run(&mut feature, &mut test_ctx, None, press(KeyCode::KEY_A, 0));
        assert!(matches!(result, FeatureResult::Continue(_)));
    }
}

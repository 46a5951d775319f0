use crate::features::mods::Modifier;
use crate::layouts::Layout;
use anyhow::{Result, bail};
use evdev::KeyCode;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::{env, fs};

pub(crate) fn config() -> Result<Config> {
    let config_path = match env::args().nth(1) {
        Some(arg_path) => PathBuf::from(arg_path),
        None => dirs::config_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("~/.config"))
            .join("dancekeys")
            .join("config.yml"),
    };

    let config: Config = if !config_path.exists() {
        let config = Config::default();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_yaml::to_string(&config)?;
        fs::write(&config_path, serialized)?;
        info!("Default config written to {}", config_path.display());
        config
    } else {
        let config_content = fs::read_to_string(&config_path)?;
        serde_yaml::from_str(&config_content)?
    };

    for (name, keyboard) in &config.keyboards {
        keyboard
            .validate()
            .map_err(|e| anyhow::anyhow!("Keyboard \"{name}\": {e}"))?;
    }

    debug!("Config: {:#?}", config);

    Ok(config)
}

pub(crate) type Keyboards = HashMap<String, KeyboardConfig>;
pub(crate) type Actions = HashMap<String, KeyAction>;
pub(crate) type Bindings = HashMap<KeyCode, String>;
pub(crate) type Chord = Vec<KeyCode>;

fn default_no_emit() -> bool {
    false
}

fn default_tapping_term() -> u16 {
    crate::consts::TAPPING_TERM
}

fn default_tick() -> u16 {
    crate::consts::TICK
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Config {
    pub globals: Globals,
    #[serde(default = "default_keyboards")]
    pub keyboards: Keyboards,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Globals {
    #[serde(default = "default_no_emit")]
    pub no_emit: bool,
    /// Milliseconds separating a tap from a hold, and bounding multi-tap sequences
    #[serde(default = "default_tapping_term")]
    pub tapping_term: u16,
    /// Idle poll in milliseconds
    #[serde(default = "default_tick")]
    pub tick: u16,
    /// Registers file, defaults to the state dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            no_emit: default_no_emit(),
            tapping_term: default_tapping_term(),
            tick: default_tick(),
            state_file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            globals: Globals::default(),
            keyboards: default_keyboards(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct KeyboardConfig {
    /// Base layout used until the registers say otherwise
    #[serde(default)]
    pub layout: Layout,
    /// Ordered overlay layers, later entries win
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
    /// Base level physical key to action
    #[serde(default)]
    pub bindings: Bindings,
    #[serde(default)]
    pub actions: Actions,
    /// Layer shown while both thumbs are down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub both_down: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steno_layer: Option<String>,
    /// Chord toggling the steno application on enter and exit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steno_launch: Option<Chord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LayerConfig {
    pub name: String,
    #[serde(default)]
    pub keys: HashMap<KeyCode, Binding>,
}

/// What a physical key produces on a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum Binding {
    Keys(Chord),
    Action(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct KeyAction {
    /// Fallback chord when tapped (thumb, layer-tap and mod-tap keys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tap: Option<Chord>,
    /// Modifiers held while down (mod-tap keys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold: Option<Chord>,
    /// Momentary layer while down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<Side>,
    /// Layer landed on when this thumb is still down after the other releases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dance: Option<Dance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifier: Option<Modifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Dance {
    /// Tap for `key`, hold for the action's layer, tap then hold for both,
    /// double tap then hold to auto-repeat `key`
    TapShift { key: KeyCode },
    /// Symbol pair, double tap for both members, triple tap to land between them
    Pair {
        left: KeyCode,
        right: KeyCode,
        #[serde(default)]
        shift: ShiftRule,
        /// Single tap emits the right member
        #[serde(default)]
        close: bool,
        /// Held while a single press is held
        #[serde(skip_serializing_if = "Option::is_none")]
        modifier: Option<KeyCode>,
    },
    /// Stroke sequences for a single and a double tap
    Insert {
        single: Vec<Chord>,
        #[serde(default)]
        double: Vec<Chord>,
        /// Registered while a triple press is held
        #[serde(skip_serializing_if = "Option::is_none")]
        repeat: Option<Chord>,
    },
    /// One-shot shift, double tap for caps lock
    Caps,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ShiftRule {
    #[default]
    Never,
    Single,
    Double,
    Always,
}

impl ShiftRule {
    pub fn single(self) -> bool {
        matches!(self, ShiftRule::Single | ShiftRule::Always)
    }

    pub fn double(self) -> bool {
        matches!(self, ShiftRule::Double | ShiftRule::Always)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Mode {
    Colemak,
    Qwerty,
    Steno,
    StenoExit,
}

impl KeyboardConfig {
    pub fn validate(&self) -> Result<()> {
        let layer_exists = |name: &String| self.layers.iter().any(|l| &l.name == name);

        for name in [&self.both_down, &self.steno_layer].into_iter().flatten() {
            if !layer_exists(name) {
                bail!("unknown layer \"{name}\"");
            }
        }

        for (key, action) in &self.bindings {
            if !self.actions.contains_key(action) {
                bail!("{key:?} is bound to unknown action \"{action}\"");
            }
        }

        for layer in &self.layers {
            for (key, binding) in &layer.keys {
                if let Binding::Action(action) = binding
                    && !self.actions.contains_key(action)
                {
                    bail!(
                        "{key:?} on layer \"{}\" is bound to unknown action \"{action}\"",
                        layer.name
                    );
                }
            }
        }

        for (name, action) in &self.actions {
            for layer in [&action.layer, &action.combined].into_iter().flatten() {
                if !layer_exists(layer) {
                    bail!("action \"{name}\" uses unknown layer \"{layer}\"");
                }
            }
            if action.thumb.is_some() && action.layer.is_none() {
                bail!("thumb action \"{name}\" needs a layer");
            }
            if matches!(action.dance, Some(Dance::TapShift { .. })) && action.layer.is_none() {
                bail!("tap shift dance \"{name}\" needs a layer");
            }
        }

        Ok(())
    }
}

fn layer(name: &str, keys: Vec<(KeyCode, Binding)>) -> LayerConfig {
    LayerConfig {
        name: name.to_owned(),
        keys: keys.into_iter().collect(),
    }
}

fn keys(keys: &[KeyCode]) -> Binding {
    Binding::Keys(keys.to_vec())
}

fn action(name: &str) -> Binding {
    Binding::Action(name.to_owned())
}

fn shifted(key: KeyCode) -> Chord {
    vec![KeyCode::KEY_LEFTSHIFT, key]
}

fn pair(left: KeyCode, right: KeyCode, shift: ShiftRule, close: bool) -> KeyAction {
    KeyAction {
        dance: Some(Dance::Pair {
            left,
            right,
            shift,
            close,
            modifier: None,
        }),
        ..Default::default()
    }
}

fn insert(single: Vec<Chord>, double: Vec<Chord>) -> KeyAction {
    KeyAction {
        dance: Some(Dance::Insert {
            single,
            double,
            repeat: None,
        }),
        ..Default::default()
    }
}

fn default_layers() -> Vec<LayerConfig> {
    use KeyCode as K;

    vec![
        layer(
            "shift",
            vec![
                (K::KEY_COMMA, action("lesser")),
                (K::KEY_DOT, action("greater")),
            ],
        ),
        layer(
            "symbol",
            vec![
                (K::KEY_J, action("lparen")),
                (K::KEY_K, action("rparen")),
                (K::KEY_U, action("lbrace")),
                (K::KEY_I, action("rbrace")),
                (K::KEY_M, action("lcurly")),
                (K::KEY_COMMA, action("rcurly")),
                (K::KEY_L, action("quote")),
                (K::KEY_O, action("doublequote")),
                (K::KEY_SEMICOLON, action("colon")),
                (K::KEY_H, action("comma")),
                (K::KEY_N, action("dot")),
                (K::KEY_GRAVE, action("tilde")),
                (K::KEY_Y, action("grave")),
            ],
        ),
        layer(
            "function",
            vec![
                (K::KEY_F1, action("colemak")),
                (K::KEY_F2, action("qwerty")),
                (K::KEY_F3, action("steno")),
            ],
        ),
        layer(
            "navigation",
            vec![
                (K::KEY_H, keys(&[K::KEY_LEFT])),
                (K::KEY_J, keys(&[K::KEY_DOWN])),
                (K::KEY_K, keys(&[K::KEY_UP])),
                (K::KEY_L, keys(&[K::KEY_RIGHT])),
                (K::KEY_U, keys(&[K::KEY_HOME])),
                (K::KEY_O, keys(&[K::KEY_END])),
                (K::KEY_C, keys(&[K::KEY_LEFTCTRL, K::KEY_C])),
                (K::KEY_V, keys(&[K::KEY_LEFTCTRL, K::KEY_V])),
            ],
        ),
        layer("steno", vec![(K::KEY_ESC, action("steno_exit"))]),
    ]
}

fn default_actions() -> Actions {
    use KeyCode as K;

    HashMap::from([
        (
            "space".to_owned(),
            KeyAction {
                layer: Some("shift".to_owned()),
                thumb: Some(Side::Left),
                combined: Some("shift".to_owned()),
                dance: Some(Dance::TapShift { key: K::KEY_SPACE }),
                ..Default::default()
            },
        ),
        (
            "left".to_owned(),
            KeyAction {
                tap: Some(vec![K::KEY_LEFT]),
                layer: Some("symbol".to_owned()),
                thumb: Some(Side::Right),
                combined: Some("symbol".to_owned()),
                ..Default::default()
            },
        ),
        (
            "enter".to_owned(),
            KeyAction {
                layer: Some("shift".to_owned()),
                dance: Some(Dance::TapShift { key: K::KEY_ENTER }),
                ..Default::default()
            },
        ),
        (
            "tab".to_owned(),
            KeyAction {
                tap: Some(shifted(K::KEY_TAB)),
                layer: Some("function".to_owned()),
                ..Default::default()
            },
        ),
        (
            "caret".to_owned(),
            KeyAction {
                tap: Some(shifted(K::KEY_6)),
                hold: Some(vec![K::KEY_LEFTMETA]),
                ..Default::default()
            },
        ),
        (
            "caps".to_owned(),
            KeyAction {
                dance: Some(Dance::Caps),
                ..Default::default()
            },
        ),
        (
            "ctrl".to_owned(),
            KeyAction {
                modifier: Some(Modifier::Ctrl),
                ..Default::default()
            },
        ),
        (
            "gui".to_owned(),
            KeyAction {
                modifier: Some(Modifier::Gui),
                ..Default::default()
            },
        ),
        (
            "alt".to_owned(),
            KeyAction {
                modifier: Some(Modifier::Alt),
                ..Default::default()
            },
        ),
        (
            "lparen".to_owned(),
            KeyAction {
                dance: Some(Dance::Pair {
                    left: K::KEY_9,
                    right: K::KEY_0,
                    shift: ShiftRule::Always,
                    close: false,
                    modifier: Some(K::KEY_LEFTCTRL),
                }),
                ..Default::default()
            },
        ),
        (
            "rparen".to_owned(),
            pair(K::KEY_9, K::KEY_0, ShiftRule::Always, true),
        ),
        (
            "lbrace".to_owned(),
            pair(K::KEY_LEFTBRACE, K::KEY_RIGHTBRACE, ShiftRule::Never, false),
        ),
        (
            "rbrace".to_owned(),
            pair(K::KEY_LEFTBRACE, K::KEY_RIGHTBRACE, ShiftRule::Never, true),
        ),
        (
            "lcurly".to_owned(),
            pair(K::KEY_LEFTBRACE, K::KEY_RIGHTBRACE, ShiftRule::Always, false),
        ),
        (
            "rcurly".to_owned(),
            pair(K::KEY_LEFTBRACE, K::KEY_RIGHTBRACE, ShiftRule::Always, true),
        ),
        (
            "quote".to_owned(),
            pair(K::KEY_APOSTROPHE, K::KEY_APOSTROPHE, ShiftRule::Never, false),
        ),
        (
            "doublequote".to_owned(),
            pair(K::KEY_APOSTROPHE, K::KEY_APOSTROPHE, ShiftRule::Always, false),
        ),
        (
            "grave".to_owned(),
            pair(K::KEY_GRAVE, K::KEY_GRAVE, ShiftRule::Never, false),
        ),
        (
            "colon".to_owned(),
            insert(
                vec![shifted(K::KEY_SEMICOLON)],
                vec![
                    vec![K::KEY_SPACE],
                    shifted(K::KEY_SEMICOLON),
                    shifted(K::KEY_SEMICOLON),
                    vec![K::KEY_SPACE],
                ],
            ),
        ),
        (
            "comma".to_owned(),
            insert(
                vec![vec![K::KEY_COMMA]],
                vec![vec![K::KEY_COMMA], vec![K::KEY_SPACE]],
            ),
        ),
        (
            "dot".to_owned(),
            insert(vec![vec![K::KEY_DOT]], vec![shifted(K::KEY_SEMICOLON)]),
        ),
        (
            "greater".to_owned(),
            insert(
                vec![shifted(K::KEY_DOT)],
                vec![
                    vec![K::KEY_SPACE],
                    vec![K::KEY_MINUS],
                    shifted(K::KEY_DOT),
                    vec![K::KEY_SPACE],
                ],
            ),
        ),
        (
            "lesser".to_owned(),
            insert(
                vec![shifted(K::KEY_COMMA)],
                vec![
                    vec![K::KEY_SPACE],
                    shifted(K::KEY_COMMA),
                    vec![K::KEY_MINUS],
                    vec![K::KEY_SPACE],
                ],
            ),
        ),
        (
            "tilde".to_owned(),
            KeyAction {
                dance: Some(Dance::Insert {
                    single: vec![shifted(K::KEY_GRAVE)],
                    double: vec![shifted(K::KEY_GRAVE), vec![K::KEY_SLASH]],
                    repeat: Some(shifted(K::KEY_GRAVE)),
                }),
                ..Default::default()
            },
        ),
        (
            "colemak".to_owned(),
            KeyAction {
                mode: Some(Mode::Colemak),
                ..Default::default()
            },
        ),
        (
            "qwerty".to_owned(),
            KeyAction {
                mode: Some(Mode::Qwerty),
                ..Default::default()
            },
        ),
        (
            "steno".to_owned(),
            KeyAction {
                mode: Some(Mode::Steno),
                ..Default::default()
            },
        ),
        (
            "steno_exit".to_owned(),
            KeyAction {
                mode: Some(Mode::StenoExit),
                ..Default::default()
            },
        ),
    ])
}

fn default_bindings() -> Bindings {
    use KeyCode as K;

    [
        (K::KEY_SPACE, "space"),
        (K::KEY_RIGHTALT, "left"),
        (K::KEY_ENTER, "enter"),
        (K::KEY_TAB, "tab"),
        (K::KEY_CAPSLOCK, "caps"),
        (K::KEY_LEFTCTRL, "ctrl"),
        (K::KEY_LEFTMETA, "gui"),
        (K::KEY_LEFTALT, "alt"),
        (K::KEY_6, "caret"),
    ]
    .into_iter()
    .map(|(key, action)| (key, action.to_owned()))
    .collect()
}

fn default_keyboards() -> Keyboards {
    HashMap::from([(
        "AT Translated Set 2 keyboard".to_owned(),
        KeyboardConfig {
            layout: Layout::Colemak,
            layers: default_layers(),
            bindings: default_bindings(),
            actions: default_actions(),
            both_down: Some("navigation".to_owned()),
            steno_layer: Some("steno".to_owned()),
            steno_launch: None,
        },
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        for keyboard in config.keyboards.values() {
            keyboard.validate().unwrap();
        }
    }

    #[test]
    fn test_default_config_round_trips_through_yaml() {
        let config = Config::default();
        let serialized = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&serialized).unwrap();
        let keyboard = &parsed.keyboards["AT Translated Set 2 keyboard"];
        assert_eq!(keyboard.layers.len(), 5);
        assert_eq!(
            keyboard.actions["lparen"].dance,
            config.keyboards["AT Translated Set 2 keyboard"].actions["lparen"].dance
        );
        assert_eq!(parsed.globals.tapping_term, 200);
    }

    #[test]
    fn test_validate_rejects_unknown_layer() {
        let mut keyboard = KeyboardConfig::default();
        keyboard.actions.insert(
            "space".to_owned(),
            KeyAction {
                layer: Some("missing".to_owned()),
                ..Default::default()
            },
        );
        let err = keyboard.validate().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_validate_rejects_thumb_without_layer() {
        let mut keyboard = KeyboardConfig::default();
        keyboard.actions.insert(
            "thumb".to_owned(),
            KeyAction {
                thumb: Some(Side::Left),
                ..Default::default()
            },
        );
        assert!(keyboard.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_binding() {
        let mut keyboard = KeyboardConfig::default();
        keyboard
            .bindings
            .insert(KeyCode::KEY_A, "nothing".to_owned());
        assert!(keyboard.validate().is_err());
    }
}

use evdev::KeyCode as K;

pub(super) fn resolve(key: &K) -> K {
    match *key {
        K::KEY_E => K::KEY_F,
        K::KEY_R => K::KEY_P,
        K::KEY_T => K::KEY_G,
        K::KEY_Y => K::KEY_J,
        K::KEY_U => K::KEY_L,
        K::KEY_I => K::KEY_U,
        K::KEY_O => K::KEY_Y,
        K::KEY_P => K::KEY_SEMICOLON,
        K::KEY_S => K::KEY_R,
        K::KEY_D => K::KEY_S,
        K::KEY_F => K::KEY_T,
        K::KEY_G => K::KEY_D,
        K::KEY_J => K::KEY_N,
        K::KEY_K => K::KEY_E,
        K::KEY_L => K::KEY_I,
        K::KEY_SEMICOLON => K::KEY_O,
        K::KEY_N => K::KEY_K,
        other => other,
    }
}

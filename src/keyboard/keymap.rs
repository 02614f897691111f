//! Key code definitions, display names, and modifier classification

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Represents a physical key code (Linux evdev scancode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Whether this key is a modifier (shift/ctrl/alt/meta/lock).
    ///
    /// Modifiers are exempt from synthetic auto-repeat: repeating a held
    /// Shift would produce a stream of press/release pairs that breaks
    /// chorded input downstream.
    pub fn is_modifier(&self) -> bool {
        MODIFIERS.contains(&self.0)
    }
}

impl From<u16> for KeyCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", key_name(*self))
    }
}

/// Scancodes of modifier and lock keys
static MODIFIERS: LazyLock<HashSet<u16>> = LazyLock::new(|| {
    HashSet::from([
        29,  // LeftCtrl
        42,  // LeftShift
        54,  // RightShift
        56,  // LeftAlt
        58,  // CapsLock
        69,  // NumLock
        70,  // ScrollLock
        97,  // RightCtrl
        100, // RightAlt
        125, // LeftMeta
        126, // RightMeta
    ])
});

/// Display names for the standard US layout
static KEY_NAMES: LazyLock<HashMap<u16, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Function row
    map.insert(1, "Escape");
    for (code, name) in [
        (59, "F1"),
        (60, "F2"),
        (61, "F3"),
        (62, "F4"),
        (63, "F5"),
        (64, "F6"),
        (65, "F7"),
        (66, "F8"),
        (67, "F9"),
        (68, "F10"),
        (87, "F11"),
        (88, "F12"),
    ] {
        map.insert(code, name);
    }

    // Number row
    map.insert(41, "Grave");
    for (code, name) in [
        (2, "1"),
        (3, "2"),
        (4, "3"),
        (5, "4"),
        (6, "5"),
        (7, "6"),
        (8, "7"),
        (9, "8"),
        (10, "9"),
        (11, "0"),
        (12, "Minus"),
        (13, "Equals"),
        (14, "Backspace"),
    ] {
        map.insert(code, name);
    }

    // Letter rows
    for (code, name) in [
        (15, "Tab"),
        (16, "Q"),
        (17, "W"),
        (18, "E"),
        (19, "R"),
        (20, "T"),
        (21, "Y"),
        (22, "U"),
        (23, "I"),
        (24, "O"),
        (25, "P"),
        (26, "LeftBracket"),
        (27, "RightBracket"),
        (43, "Backslash"),
        (30, "A"),
        (31, "S"),
        (32, "D"),
        (33, "F"),
        (34, "G"),
        (35, "H"),
        (36, "J"),
        (37, "K"),
        (38, "L"),
        (39, "Semicolon"),
        (40, "Apostrophe"),
        (28, "Enter"),
        (44, "Z"),
        (45, "X"),
        (46, "C"),
        (47, "V"),
        (48, "B"),
        (49, "N"),
        (50, "M"),
        (51, "Comma"),
        (52, "Period"),
        (53, "Slash"),
    ] {
        map.insert(code, name);
    }

    // Modifiers and bottom row
    for (code, name) in [
        (29, "LeftCtrl"),
        (42, "LeftShift"),
        (54, "RightShift"),
        (56, "LeftAlt"),
        (57, "Space"),
        (58, "CapsLock"),
        (69, "NumLock"),
        (70, "ScrollLock"),
        (97, "RightCtrl"),
        (100, "RightAlt"),
        (125, "LeftMeta"),
        (126, "RightMeta"),
        (127, "Menu"),
    ] {
        map.insert(code, name);
    }

    // Navigation cluster and arrows
    for (code, name) in [
        (102, "Home"),
        (103, "Up"),
        (104, "PageUp"),
        (105, "Left"),
        (106, "Right"),
        (107, "End"),
        (108, "Down"),
        (109, "PageDown"),
        (110, "Insert"),
        (111, "Delete"),
        (119, "Pause"),
        (99, "SysRq"),
    ] {
        map.insert(code, name);
    }

    map
});

/// Get a display name for a key, falling back to the raw scancode
pub fn key_name(code: KeyCode) -> String {
    match KEY_NAMES.get(&code.0) {
        Some(name) => (*name).to_string(),
        None => format!("Key{}", code.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifiers_are_classified() {
        assert!(KeyCode(42).is_modifier()); // LeftShift
        assert!(KeyCode(29).is_modifier()); // LeftCtrl
        assert!(KeyCode(58).is_modifier()); // CapsLock
        assert!(!KeyCode(30).is_modifier()); // A
        assert!(!KeyCode(57).is_modifier()); // Space
    }

    #[test]
    fn known_keys_have_names() {
        assert_eq!(key_name(KeyCode(30)), "A");
        assert_eq!(key_name(KeyCode(57)), "Space");
        assert_eq!(key_name(KeyCode(119)), "Pause");
    }

    #[test]
    fn unknown_keys_fall_back_to_scancode() {
        assert_eq!(key_name(KeyCode(240)), "Key240");
    }
}

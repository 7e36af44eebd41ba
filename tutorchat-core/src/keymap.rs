// ABOUTME: Keyboard chords to engine actions, with "CmdOrCtrl" resolved per platform.
// ABOUTME: Parses strings like "Ctrl+Shift+B"; defaults can be overridden from config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    /// Cmd on macOS, Super/Win elsewhere
    pub meta: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Space,
    Tab,
    Backspace,
    Function(u8),
}

/// A key plus the modifiers held with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl KeyChord {
    pub fn plain(key: Key) -> Self {
        Self {
            modifiers: Modifiers::default(),
            key,
        }
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.modifiers.ctrl {
            parts.push("Ctrl".into());
        }
        if self.modifiers.alt {
            parts.push("Alt".into());
        }
        if self.modifiers.shift {
            parts.push("Shift".into());
        }
        if self.modifiers.meta {
            parts.push("Cmd".into());
        }
        parts.push(match self.key {
            Key::Char(c) => c.to_string(),
            Key::Enter => "Enter".into(),
            Key::Escape => "Escape".into(),
            Key::Space => "Space".into(),
            Key::Tab => "Tab".into(),
            Key::Backspace => "Backspace".into(),
            Key::Function(n) => format!("F{}", n),
        });
        write!(f, "{}", parts.join("+"))
    }
}

/// Parse "Modifier+Modifier+Key". `CmdOrCtrl` (alias `Mod`) becomes Cmd on
/// macOS and Ctrl elsewhere.
pub fn parse_chord(s: &str, platform: Platform) -> anyhow::Result<KeyChord> {
    let parts: Vec<&str> = s.split('+').map(str::trim).collect();
    let mut modifiers = Modifiers::default();
    let mut key = None;

    for (i, part) in parts.iter().enumerate() {
        let is_last = i == parts.len() - 1;
        let is_modifier = match part.to_lowercase().as_str() {
            "ctrl" | "control" => {
                modifiers.ctrl = true;
                true
            }
            "alt" | "option" => {
                modifiers.alt = true;
                true
            }
            "shift" => {
                modifiers.shift = true;
                true
            }
            "cmd" | "command" | "meta" | "super" | "win" => {
                modifiers.meta = true;
                true
            }
            "cmdorctrl" | "mod" => {
                match platform {
                    Platform::MacOs => modifiers.meta = true,
                    Platform::Other => modifiers.ctrl = true,
                }
                true
            }
            _ => false,
        };

        if is_modifier {
            if is_last {
                anyhow::bail!("Key combination '{}' ends with a modifier", s);
            }
        } else {
            if key.is_some() {
                anyhow::bail!("Multiple keys in '{}'", s);
            }
            key = Some(parse_key(part)?);
        }
    }

    let key = key.ok_or_else(|| anyhow::anyhow!("No key in '{}'", s))?;
    Ok(KeyChord { modifiers, key })
}

fn parse_key(s: &str) -> anyhow::Result<Key> {
    let lower = s.to_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Enter,
        "escape" | "esc" => Key::Escape,
        "space" => Key::Space,
        "tab" => Key::Tab,
        "backspace" => Key::Backspace,
        _ => {
            if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                if (1..=24).contains(&n) {
                    return Ok(Key::Function(n));
                }
            }
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Char(c.to_ascii_uppercase()),
                _ => anyhow::bail!("Unknown key: '{}'", s),
            }
        }
    };
    Ok(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ToggleSearch,
    Send,
    ToggleCodeEditor,
    ToggleVoice,
    Export,
    /// Close whichever overlay is open
    Escape,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::ToggleSearch,
        Action::Send,
        Action::ToggleCodeEditor,
        Action::ToggleVoice,
        Action::Export,
        Action::Escape,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToggleSearch => "toggle-search",
            Self::Send => "send",
            Self::ToggleCodeEditor => "toggle-code-editor",
            Self::ToggleVoice => "toggle-voice",
            Self::Export => "export",
            Self::Escape => "escape",
        }
    }

    fn default_chord(&self) -> &'static str {
        match self {
            Self::ToggleSearch => "CmdOrCtrl+K",
            Self::Send => "CmdOrCtrl+Shift+Enter",
            Self::ToggleCodeEditor => "CmdOrCtrl+Shift+B",
            Self::ToggleVoice => "CmdOrCtrl+S",
            Self::Export => "CmdOrCtrl+E",
            Self::Escape => "Escape",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown action: {}", s))
    }
}

#[derive(Debug, Clone)]
pub struct Keymap {
    platform: Platform,
    bindings: HashMap<KeyChord, Action>,
}

impl Keymap {
    pub fn defaults(platform: Platform) -> Self {
        let mut bindings = HashMap::new();
        for action in Action::ALL {
            if let Ok(chord) = parse_chord(action.default_chord(), platform) {
                bindings.insert(chord, action);
            }
        }
        Self { platform, bindings }
    }

    /// Defaults with per-action overrides, keyed by action name
    pub fn with_overrides(
        platform: Platform,
        overrides: &HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let mut keymap = Self::defaults(platform);
        for (name, chord) in overrides {
            let action: Action = name.parse()?;
            let chord = parse_chord(chord, platform)
                .map_err(|e| anyhow::anyhow!("Invalid binding for {}: {}", name, e))?;
            keymap.bind(chord, action);
        }
        Ok(keymap)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Bind a chord, replacing the action's previous chord
    pub fn bind(&mut self, chord: KeyChord, action: Action) {
        self.bindings.retain(|_, a| *a != action);
        if let Some(previous) = self.bindings.insert(chord, action) {
            tracing::warn!(%chord, previous = previous.as_str(), action = action.as_str(), "Binding replaced");
        }
    }

    pub fn lookup(&self, chord: &KeyChord) -> Option<Action> {
        self.bindings.get(chord).copied()
    }

    pub fn chord_for(&self, action: Action) -> Option<KeyChord> {
        self.bindings
            .iter()
            .find(|(_, a)| **a == action)
            .map(|(chord, _)| *chord)
    }
}

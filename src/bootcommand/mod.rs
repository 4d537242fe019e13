//! Boot command: render placeholders, parse directives, replay as input.
//!
//! A boot command is the list of strings from `vnc.boot_command`. The lines
//! are concatenated, `{{ .HTTPIP }}`-style placeholders are substituted, and
//! the result is parsed into a [`KeystrokeSequence`] of waits, text runs,
//! special keys and clicks.

mod inject;
mod parse;
mod template;

use std::fmt;
use std::time::Duration;

pub use inject::inject;
pub use parse::parse;
pub use template::{BootContext, render};

use crate::error::TartbootError;
use crate::vnc::keysym;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKey {
    Enter,
    Escape,
    Tab,
    Backspace,
    Delete,
    Spacebar,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    /// F1 through F12.
    F(u8),
    LeftAlt,
    RightAlt,
    LeftCtrl,
    RightCtrl,
    LeftShift,
    RightShift,
    LeftSuper,
    RightSuper,
    Menu,
}

impl SpecialKey {
    /// Look up a directive name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let key = match lower.as_str() {
            "enter" | "return" => Self::Enter,
            "esc" => Self::Escape,
            "tab" => Self::Tab,
            "bs" => Self::Backspace,
            "del" => Self::Delete,
            "spacebar" => Self::Spacebar,
            "insert" => Self::Insert,
            "home" => Self::Home,
            "end" => Self::End,
            "pageup" => Self::PageUp,
            "pagedown" => Self::PageDown,
            "up" => Self::Up,
            "down" => Self::Down,
            "left" => Self::Left,
            "right" => Self::Right,
            "leftalt" => Self::LeftAlt,
            "rightalt" => Self::RightAlt,
            "leftctrl" => Self::LeftCtrl,
            "rightctrl" => Self::RightCtrl,
            "leftshift" => Self::LeftShift,
            "rightshift" => Self::RightShift,
            "leftsuper" => Self::LeftSuper,
            "rightsuper" => Self::RightSuper,
            "menu" => Self::Menu,
            other => {
                let n: u8 = other.strip_prefix('f')?.parse().ok()?;
                if !(1..=12).contains(&n) {
                    return None;
                }
                Self::F(n)
            }
        };
        Some(key)
    }

    pub fn keysym(self) -> u32 {
        match self {
            Self::Enter => keysym::RETURN,
            Self::Escape => keysym::ESCAPE,
            Self::Tab => keysym::TAB,
            Self::Backspace => keysym::BACKSPACE,
            Self::Delete => keysym::DELETE,
            Self::Spacebar => keysym::SPACE,
            Self::Insert => keysym::INSERT,
            Self::Home => keysym::HOME,
            Self::End => keysym::END,
            Self::PageUp => keysym::PAGE_UP,
            Self::PageDown => keysym::PAGE_DOWN,
            Self::Up => keysym::UP,
            Self::Down => keysym::DOWN,
            Self::Left => keysym::LEFT,
            Self::Right => keysym::RIGHT,
            Self::F(n) => keysym::function_key(n),
            Self::LeftAlt => keysym::ALT_L,
            Self::RightAlt => keysym::ALT_R,
            Self::LeftCtrl => keysym::CONTROL_L,
            Self::RightCtrl => keysym::CONTROL_R,
            Self::LeftShift => keysym::SHIFT_L,
            Self::RightShift => keysym::SHIFT_R,
            Self::LeftSuper => keysym::SUPER_L,
            Self::RightSuper => keysym::SUPER_R,
            Self::Menu => keysym::MENU,
        }
    }
}

impl fmt::Display for SpecialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enter => "enter",
            Self::Escape => "esc",
            Self::Tab => "tab",
            Self::Backspace => "bs",
            Self::Delete => "del",
            Self::Spacebar => "spacebar",
            Self::Insert => "insert",
            Self::Home => "home",
            Self::End => "end",
            Self::PageUp => "pageUp",
            Self::PageDown => "pageDown",
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::F(n) => return write!(f, "f{n}"),
            Self::LeftAlt => "leftAlt",
            Self::RightAlt => "rightAlt",
            Self::LeftCtrl => "leftCtrl",
            Self::RightCtrl => "rightCtrl",
            Self::LeftShift => "leftShift",
            Self::RightShift => "rightShift",
            Self::LeftSuper => "leftSuper",
            Self::RightSuper => "rightSuper",
            Self::Menu => "menu",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Down then up.
    Press,
    Down,
    Up,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Wait(Duration),
    Text(String),
    Key { key: SpecialKey, action: KeyAction },
    Click { x: u16, y: u16 },
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait(d) => write!(f, "wait {d:?}"),
            Self::Text(text) => write!(f, "type {text:?}"),
            Self::Key {
                key,
                action: KeyAction::Press,
            } => write!(f, "press {key}"),
            Self::Key {
                key,
                action: KeyAction::Down,
            } => write!(f, "hold {key}"),
            Self::Key {
                key,
                action: KeyAction::Up,
            } => write!(f, "release {key}"),
            Self::Click { x, y } => write!(f, "click {x},{y}"),
        }
    }
}

/// Parsed boot command, replayed strictly in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeystrokeSequence {
    events: Vec<InputEvent>,
}

impl KeystrokeSequence {
    pub fn new(events: Vec<InputEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[InputEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sum of all explicit waits.
    pub fn total_wait(&self) -> Duration {
        self.events
            .iter()
            .filter_map(|e| match e {
                InputEvent::Wait(d) => Some(*d),
                _ => None,
            })
            .sum()
    }
}

/// Join the configured command lines into one command string.
pub fn flatten(lines: &[String]) -> String {
    lines.concat()
}

/// Flatten, render and parse in one step.
pub fn prepare(lines: &[String], ctx: &BootContext) -> Result<KeystrokeSequence, TartbootError> {
    parse(&render(&flatten(lines), ctx)?)
}

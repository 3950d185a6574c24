//! Modifier and key-name translation
//!
//! Provides the modifier bitmask understood by `RegisterHotKey` and the
//! static table mapping key names to Windows virtual-key codes.

use bitflags::bitflags;

bitflags! {
    /// Modifier flags, numerically identical to the Win32 `MOD_*` values
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u32 {
        /// Either Alt key
        const ALT = 0x0001;
        /// Either Ctrl key
        const CTRL = 0x0002;
        /// Either Shift key
        const SHIFT = 0x0004;
        /// Either Windows key
        const SUPER = 0x0008;
    }
}

impl Modifiers {
    /// Parse a `+` separated modifier list such as `"ctrl+shift"`.
    ///
    /// Names are case-insensitive. Unknown names are ignored rather than
    /// rejected, and repeats collapse into the same flag.
    pub fn parse(list: &str) -> Self {
        list.split('+')
            .map(|part| part.trim().to_ascii_lowercase())
            .fold(Self::empty(), |mods, part| {
                mods | match part.as_str() {
                    "alt" => Self::ALT,
                    "ctrl" => Self::CTRL,
                    "shift" => Self::SHIFT,
                    "super" | "win" => Self::SUPER,
                    _ => Self::empty(),
                }
            })
    }
}

/// Translate a key name into a virtual-key code.
///
/// Returns `None` when the name is not in the table.
pub fn key_code(name: &str) -> Option<u16> {
    let name = name.trim().to_ascii_lowercase();
    if let [c] = name.as_bytes() {
        return match c {
            b'a'..=b'z' => Some(c.to_ascii_uppercase() as u16),
            b'0'..=b'9' => Some(*c as u16),
            _ => None,
        };
    }

    let code = match name.as_str() {
        "backspace" => 0x08,
        "tab" => 0x09,
        "enter" | "return" => 0x0D,
        "escape" | "esc" => 0x1B,
        "space" => 0x20,
        "pageup" => 0x21,
        "pagedown" => 0x22,
        "end" => 0x23,
        "home" => 0x24,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        "insert" => 0x2D,
        "delete" => 0x2E,
        _ => return function_key(&name),
    };
    Some(code)
}

/// `f1`..`f12` map to `VK_F1`..`VK_F12`
fn function_key(name: &str) -> Option<u16> {
    let n: u16 = name.strip_prefix('f')?.parse().ok()?;
    (1..=12).contains(&n).then(|| 0x70 + n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modifiers() {
        assert_eq!(Modifiers::parse("ctrl+alt"), Modifiers::CTRL | Modifiers::ALT);
        assert_eq!(Modifiers::parse(" Shift + WIN "), Modifiers::SHIFT | Modifiers::SUPER);
        assert_eq!(Modifiers::parse("super"), Modifiers::SUPER);
        assert_eq!(Modifiers::parse(""), Modifiers::empty());
    }

    #[test]
    fn test_unknown_modifiers_are_ignored() {
        assert_eq!(Modifiers::parse("ctrl+hyper"), Modifiers::CTRL);
    }

    #[test]
    fn test_duplicate_modifiers_collapse() {
        assert_eq!(Modifiers::parse("ctrl+ctrl+CTRL").bits(), 0x0002);
    }

    #[test]
    fn test_letters_and_digits() {
        assert_eq!(key_code("a"), Some(b'A' as u16));
        assert_eq!(key_code("Z"), Some(b'Z' as u16));
        assert_eq!(key_code("7"), Some(b'7' as u16));
        assert_eq!(key_code("-"), None);
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(key_code("enter"), Some(0x0D));
        assert_eq!(key_code("return"), Some(0x0D));
        assert_eq!(key_code("esc"), Some(0x1B));
        assert_eq!(key_code("down"), Some(0x28));
        assert_eq!(key_code("f1"), Some(0x70));
        assert_eq!(key_code("F12"), Some(0x7B));
    }

    #[test]
    fn test_unknown_keys() {
        assert_eq!(key_code("f13"), None);
        assert_eq!(key_code("f0"), None);
        assert_eq!(key_code("not-a-key"), None);
        assert_eq!(key_code(""), None);
    }
}

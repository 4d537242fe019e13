//! X11 keysyms for the keys a boot command can name.

pub const BACKSPACE: u32 = 0xFF08;
pub const TAB: u32 = 0xFF09;
pub const RETURN: u32 = 0xFF0D;
pub const ESCAPE: u32 = 0xFF1B;
pub const HOME: u32 = 0xFF50;
pub const LEFT: u32 = 0xFF51;
pub const UP: u32 = 0xFF52;
pub const RIGHT: u32 = 0xFF53;
pub const DOWN: u32 = 0xFF54;
pub const PAGE_UP: u32 = 0xFF55;
pub const PAGE_DOWN: u32 = 0xFF56;
pub const END: u32 = 0xFF57;
pub const INSERT: u32 = 0xFF63;
pub const MENU: u32 = 0xFF67;
pub const F1: u32 = 0xFFBE;
pub const SHIFT_L: u32 = 0xFFE1;
pub const SHIFT_R: u32 = 0xFFE2;
pub const CONTROL_L: u32 = 0xFFE3;
pub const CONTROL_R: u32 = 0xFFE4;
pub const ALT_L: u32 = 0xFFE9;
pub const ALT_R: u32 = 0xFFEA;
pub const SUPER_L: u32 = 0xFFEB;
pub const SUPER_R: u32 = 0xFFEC;
pub const DELETE: u32 = 0xFFFF;
pub const SPACE: u32 = 0x0020;

/// Function key `n` (1-based).
pub fn function_key(n: u8) -> u32 {
    F1 + u32::from(n.saturating_sub(1))
}

/// Keysym for a literal character and whether it is typed with Shift held.
pub fn for_char(c: char) -> (u32, bool) {
    match c {
        '\n' | '\r' => (RETURN, false),
        '\t' => (TAB, false),
        c if c.is_ascii() => (c as u32, needs_shift(c)),
        // Latin-1 keysyms coincide with the codepoint
        c if (c as u32) <= 0xFF => (c as u32, false),
        c => (0x0100_0000 | c as u32, false),
    }
}

fn needs_shift(c: char) -> bool {
    c.is_ascii_uppercase() || "~!@#$%^&*()_+{}|:\"<>?".contains(c)
}

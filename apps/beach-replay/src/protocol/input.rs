use bitflags::bitflags;

bitflags! {
    /// Modifier keys held during a local key press.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0000_0001;
        const CTRL  = 0b0000_0010;
        const ALT   = 0b0000_0100;
        const META  = 0b0000_1000;
    }
}

/// A locally typed character, before the host has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub ch: char,
    pub modifiers: Modifiers,
}

impl KeyPress {
    pub fn new(ch: char, modifiers: Modifiers) -> Self {
        Self { ch, modifiers }
    }

    pub fn plain(ch: char) -> Self {
        Self::new(ch, Modifiers::empty())
    }
}

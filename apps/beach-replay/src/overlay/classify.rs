use unicode_general_category::{GeneralCategory, get_general_category};

use crate::protocol::Modifiers;

/// Key presses that never produce a visible glyph in an editor: shortcuts
/// and non-printing characters.
pub fn should_skip(ch: char, modifiers: Modifiers) -> bool {
    if modifiers.intersects(Modifiers::CTRL | Modifiers::ALT | Modifiers::META) {
        return true;
    }
    matches!(
        get_general_category(ch),
        GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::Unassigned
            | GeneralCategory::PrivateUse
            | GeneralCategory::Surrogate
    )
}

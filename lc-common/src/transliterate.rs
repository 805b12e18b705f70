use std::borrow::Cow;

/// Placeholder for characters that have no ASCII transliteration.
const UNKNOWN_CHARACTER: &str = "?";

/// Replace every character above code point 127 with its closest ASCII transliteration.
/// ASCII-only input is returned untouched.
pub fn to_ascii(value: &str) -> Cow<'_, str> {
    if value.is_ascii() {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(deunicode::deunicode_with_tofu(value, UNKNOWN_CHARACTER))
    }
}

/// Keys shorter than this are rejected as malformed.
pub const MIN_API_KEY_LENGTH: usize = 10;

/// Prefix accepted unconditionally when the engine runs in test mode.
pub const TEST_KEY_PREFIX: &str = "test-";

/// Case-insensitive fragments that mark a copy-pasted template value.
const PLACEHOLDER_FRAGMENTS: &[&str] = &[
    "your_",
    "your-",
    "api_key_here",
    "apikeyhere",
    "placeholder",
    "changeme",
    "replace_me",
    "replace-me",
    "insert",
    "example",
    "dummy",
    "xxx",
    "<",
];

pub fn is_usable_api_key(key: Option<&str>, test_mode: bool) -> bool {
    let Some(key) = key.map(str::trim).filter(|value| !value.is_empty()) else {
        return false;
    };
    if test_mode && key.starts_with(TEST_KEY_PREFIX) {
        return true;
    }
    if key.chars().count() < MIN_API_KEY_LENGTH {
        return false;
    }
    !looks_like_placeholder(key)
}

pub fn looks_like_placeholder(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    PLACEHOLDER_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

const MIN_KEY_LEN: usize = 10;

/// Syntactic check of an UptimeRobot API key.
///
/// A missing key is invalid. The key is re-checked before every poll since
/// it can change between polls.
#[must_use]
pub fn validate(secret: Option<&str>) -> bool {
    let Some(key) = secret else {
        return false;
    };

    !key.trim().is_empty() && key.len() > MIN_KEY_LEN && key.chars().all(is_key_char)
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

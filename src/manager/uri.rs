use regex::Regex;
use std::sync::LazyLock;

static URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]+(?:[-_.][A-Za-z0-9]+)*$").expect("uri pattern is valid")
});

static COLOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("color pattern is valid"));

/// Lower-cased, URL-safe slug of a display name.
pub fn slugify(display_name: &str) -> String {
    slug::slugify(display_name.to_lowercase())
}

/// Next candidate after `uri` collided: `work` becomes `work-1`, `work-1`
/// becomes `work-2`. Returns `uri` unchanged when no further candidate exists.
pub fn suggest_uri(uri: &str) -> String {
    if uri.is_empty() {
        return String::new();
    }

    match uri.rsplit_once('-') {
        Some((base, number))
            if !base.is_empty()
                && !number.is_empty()
                && number.bytes().all(|b| b.is_ascii_digit()) =>
        {
            match number.parse::<u32>().ok().and_then(|n| n.checked_add(1)) {
                Some(next) => format!("{}-{}", base, next),
                None => uri.to_string(),
            }
        }
        _ => format!("{}-1", uri),
    }
}

pub fn is_valid_uri(uri: &str) -> bool {
    URI_PATTERN.is_match(uri)
}

pub fn is_valid_color(color: &str) -> bool {
    COLOR_PATTERN.is_match(color)
}

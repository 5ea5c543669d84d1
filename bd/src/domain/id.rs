//! ID generation for daemon-created auxiliary items
//!
//! The store normally assigns ids; the daemon only mints ids for the
//! crash/blocked items it files itself, using the format
//! `{6-char-hex}-{type}-{slug}`.

/// Generate an id from type and title
pub fn generate_id(item_type: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    format!("{}-{}-{}", hex_prefix, item_type, slugify(title))
}

/// Slugify a title for use in ids and commit scopes
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id("bug", "Crash: merge conflict");
        assert!(id.contains("-bug-"));
        assert!(id.ends_with("crash-merge-conflict"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Multiple   Spaces"), "multiple-spaces");
        assert_eq!(slugify("don't stop"), "dont-stop");
        assert_eq!(slugify("Fix OAuth!"), "fix-oauth");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_id("bug", "same title");
        let b = generate_id("bug", "same title");
        assert_ne!(a, b);
    }
}

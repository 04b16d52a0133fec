//! Dotted directory names shared by the event bus and the service registry.
//!
//! A full name is `<owner>.<local>`, where the owner is the plugin that
//! created the entry. Every segment must be non-empty and made of ASCII
//! letters, digits or underscores.

use crate::error::DirectoryError;

/// Checks that `name` is a dot-delimited sequence of non-empty segments.
pub fn validate_name(name: &str) -> Result<(), DirectoryError> {
    if name.is_empty() {
        return Err(DirectoryError::Empty);
    }

    for segment in name.split('.') {
        if segment.is_empty() {
            return Err(DirectoryError::EmptySegment(name.to_string()));
        }
        if let Some(ch) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(DirectoryError::InvalidCharacter {
                name: name.to_string(),
                ch,
            });
        }
    }

    Ok(())
}

/// Checks that `name` is usable as an owner prefix: one valid segment.
pub fn validate_owner(owner: &str) -> Result<(), DirectoryError> {
    validate_name(owner)?;
    if owner.contains('.') {
        return Err(DirectoryError::InvalidCharacter {
            name: owner.to_string(),
            ch: '.',
        });
    }
    Ok(())
}

/// Builds and validates `<owner>.<local>`.
pub fn full_name(owner: &str, local: &str) -> Result<String, DirectoryError> {
    validate_owner(owner)?;
    let name = format!("{owner}.{local}");
    validate_name(&name)?;
    Ok(name)
}

/// Returns whether `name` lives in the namespace of `owner`.
pub fn is_owned_by(name: &str, owner: &str) -> bool {
    name.strip_prefix(owner)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Glob match supporting `*` (any run, including dots) and `?` (one character).
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, n));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            n = matched + 1;
            backtrack = Some((star, n));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_segments() {
        assert_eq!(validate_name(""), Err(DirectoryError::Empty));
        for name in ["....", "a..b", ".a", "a."] {
            assert!(
                matches!(validate_name(name), Err(DirectoryError::EmptySegment(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_accepts_dotted_names() {
        assert!(validate_name("a.b").is_ok());
        assert!(validate_name("a.b.c").is_ok());
        assert!(validate_name("greeter.on_greet_2").is_ok());
    }

    #[test]
    fn test_rejects_invalid_characters() {
        assert!(matches!(
            validate_name("a.b-c"),
            Err(DirectoryError::InvalidCharacter { ch: '-', .. })
        ));
        assert!(validate_name("a b").is_err());
    }

    #[test]
    fn test_full_name() {
        assert_eq!(full_name("greeter", "greet").unwrap(), "greeter.greet");
        assert_eq!(full_name("greeter", "greet.loud").unwrap(), "greeter.greet.loud");
        assert!(full_name("greeter", "").is_err());
        assert!(full_name("a.b", "greet").is_err());
        assert!(full_name("", "greet").is_err());
    }

    #[test]
    fn test_ownership_prefix() {
        assert!(is_owned_by("greeter.greet", "greeter"));
        assert!(!is_owned_by("greeters.greet", "greeter"));
        assert!(!is_owned_by("greeter", "greeter"));
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("greeter.*", "greeter.greet"));
        assert!(matches_pattern("greeter.*", "greeter.greet.loud"));
        assert!(matches_pattern("*.greet", "greeter.greet"));
        assert!(matches_pattern("g?eeter.greet", "greeter.greet"));
        assert!(matches_pattern("*", "anything"));
        assert!(!matches_pattern("greeter.*", "logger.greet"));
        assert!(!matches_pattern("greeter.?", "greeter.greet"));
        assert!(matches_pattern("a*b*c", "a_x_b_y_c"));
        assert!(!matches_pattern("a*b*c", "a_x_b_y"));
    }
}

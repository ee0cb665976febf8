use semver::Version;

/// Convert a display name into a URL-friendly slug
///
/// Runs of anything that is not alphanumeric collapse into a single `-`,
/// letters are lowercased and leading/trailing separators are dropped.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_separator = false;

    for c in input.chars() {
        if c == '@' {
            if !slug.is_empty() {
                slug.push('-');
            }
            slug.push_str("at");
            pending_separator = true;
        } else if c.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    slug
}

/// Parse a version string the way plugin requirement fields are written
///
/// Accepts full semver as well as short forms such as `8.3` or `12`,
/// which are padded with zero components.
pub fn parse_lenient_version(input: &str) -> Option<Version> {
    let trimmed = input.trim().trim_start_matches(['v', 'V']);
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let mut parts = [0u64; 3];
    let components: Vec<&str> = trimmed.split('.').collect();
    if components.len() > 3 {
        return None;
    }
    for (slot, component) in parts.iter_mut().zip(components) {
        *slot = component.parse().ok()?;
    }

    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// `actual >= minimum`, treating an unparseable side as unmet
pub fn version_at_least(actual: &str, minimum: &str) -> bool {
    match (parse_lenient_version(actual), parse_lenient_version(minimum)) {
        (Some(actual), Some(minimum)) => actual >= minimum,
        _ => {
            tracing::warn!(actual, minimum, "Unparseable version in requirement check");
            false
        }
    }
}

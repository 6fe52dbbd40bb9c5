use rand::Rng;

/// Bound on slug regeneration. The reference flow loops until the slug is
/// free; a cap keeps an adversarially exhausted namespace from looping
/// forever.
pub const MAX_SLUG_ATTEMPTS: u32 = 20;

/// Derive one slug candidate from a display name: lowercase, whitespace
/// runs become hyphens, anything not URL-safe is dropped, and a 4-digit
/// random disambiguator is appended. Global uniqueness is the store's
/// job — the builder retries with fresh candidates on collision.
pub fn slug_candidate(display_name: &str) -> String {
    let n: u16 = rand::thread_rng().gen_range(1000..10000);
    format!("{}_{n}", slugify(display_name))
}

fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_whitespace() {
            if !out.ends_with('-') && !out.is_empty() {
                out.push('-');
            }
        } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        }
    }
    let out = out.trim_matches('-');
    if out.is_empty() {
        "agent".to_string()
    } else {
        out.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_is_base_plus_four_digits() {
        let slug = slug_candidate("My Support Bot");
        let (base, suffix) = slug.rsplit_once('_').unwrap();
        assert_eq!(base, "my-support-bot");
        let n: u16 = suffix.parse().unwrap();
        assert!((1000..10000).contains(&n), "suffix out of range: {n}");
    }

    #[test]
    fn whitespace_runs_collapse_to_one_hyphen() {
        assert_eq!(slugify("A   B\tC"), "a-b-c");
    }

    #[test]
    fn non_url_safe_characters_are_dropped() {
        assert_eq!(slugify("Crème Brûlée & Friends!"), "crme-brle-friends");
    }

    #[test]
    fn empty_names_fall_back() {
        assert_eq!(slugify("   "), "agent");
        assert_eq!(slugify("!!!"), "agent");
    }

    #[test]
    fn candidates_vary() {
        let slugs: std::collections::HashSet<String> =
            (0..50).map(|_| slug_candidate("bot")).collect();
        // 50 draws from 9000 suffixes; at least two distinct values.
        assert!(slugs.len() > 1);
    }
}

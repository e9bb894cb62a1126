//! Identifier case conversions shared by the backends.

/// Splits an identifier into lowercase words at underscores, dots and case
/// boundaries: `HTTPServer2Go` becomes `http`, `server2`, `go`.
fn words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '.' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `GetPoint` -> `get_point`
pub fn to_snake_case(name: &str) -> String {
    words(name).join("_")
}

/// `get_point` -> `GetPoint`
pub fn to_pascal_case(name: &str) -> String {
    words(name).iter().map(|w| capitalize(w)).collect()
}

/// `GetPoint` -> `GET_POINT`
pub fn to_screaming_snake_case(name: &str) -> String {
    to_snake_case(name).to_uppercase()
}

/// `Get_Point` -> `getpoint`
pub fn to_flat_lowercase(name: &str) -> String {
    words(name).concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("GetPoint"), "get_point");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("acme.geometry"), "acme_geometry");
        assert_eq!(to_snake_case("Vec3D"), "vec3_d");
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(to_pascal_case("not_found"), "NotFound");
        assert_eq!(to_pascal_case("RED"), "Red");
        assert_eq!(to_pascal_case("DARK_RED"), "DarkRed");
        assert_eq!(to_pascal_case("Point"), "Point");
    }

    #[test]
    fn test_other_cases() {
        assert_eq!(to_screaming_snake_case("maxSize"), "MAX_SIZE");
        assert_eq!(to_flat_lowercase("Acme_Geo"), "acmegeo");
    }
}

/// Splits an optional `@Process:` address prefix off a token.
///
/// Both sync directions share this grammar:
/// - `Speed` -> `(None, "Speed")`
/// - `@active:Speed` -> `(None, "Speed")` (explicitly "whatever is active")
/// - `@EliteDangerous64:Speed` -> `(Some("EliteDangerous64"), "Speed")`
/// - `@Speed` (no `:`) is malformed addressing; the whole token is kept as
///   the name so a sloppy peer still gets an answer.
pub fn parse_address(token: &str) -> (Option<String>, String) {
    let token = token.trim();
    if !token.starts_with('@') {
        return (None, token.to_string());
    }

    let Some((prefix, name)) = token.split_once(':') else {
        tracing::warn!(token, "address prefix without ':', treating whole token as a name");
        return (None, token.to_string());
    };

    let prefix = prefix.trim();
    let name = name.trim().to_string();
    if prefix.eq_ignore_ascii_case("@active") {
        return (None, name);
    }

    let process = prefix.trim_start_matches('@').trim();
    if process.is_empty() {
        (None, name)
    } else {
        (Some(process.to_string()), name)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_address;

    #[test]
    fn unit_bare_token_has_no_override() {
        assert_eq!(parse_address("Speed"), (None, "Speed".to_string()));
        assert_eq!(parse_address("  Speed  "), (None, "Speed".to_string()));
    }

    #[test]
    fn unit_explicit_process_override_is_extracted() {
        assert_eq!(
            parse_address("@EliteDangerous64:Speed"),
            (Some("EliteDangerous64".to_string()), "Speed".to_string())
        );
        assert_eq!(
            parse_address("@ Frontier : Landing Gear "),
            (Some("Frontier".to_string()), "Landing Gear".to_string())
        );
    }

    #[test]
    fn unit_active_alias_resolves_like_no_override() {
        assert_eq!(parse_address("@active:Speed"), (None, "Speed".to_string()));
        assert_eq!(parse_address("@Active:Speed"), (None, "Speed".to_string()));
    }

    #[test]
    fn unit_missing_colon_fails_open_to_a_plain_name() {
        assert_eq!(parse_address("@Speed"), (None, "@Speed".to_string()));
    }

    #[test]
    fn unit_empty_process_segment_falls_back_to_no_override() {
        assert_eq!(parse_address("@:Speed"), (None, "Speed".to_string()));
    }
}

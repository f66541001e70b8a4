use std::env;
use std::str::FromStr;

/// Read an environment variable, treating empty or whitespace-only values as unset.
pub(crate) fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse an environment variable, falling back to `default` when unset.
pub(crate) fn parse_env<T>(name: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| -> Box<dyn std::error::Error> {
                format!("Invalid value for {name} ({raw}): {e}").into()
            }),
        None => Ok(default),
    }
}

/// Read and parse an optional environment variable.
pub(crate) fn parse_env_opt<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| -> Box<dyn std::error::Error> {
                    format!("Invalid value for {name} ({raw}): {e}").into()
                })
        })
        .transpose()
}

/// Parse a boolean flag. Accepts true/false, 1/0, yes/no and on/off.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_bool_env(name: &str, default: bool) -> Result<bool, Box<dyn std::error::Error>> {
    match env_var(name) {
        Some(raw) => parse_bool(&raw).ok_or_else(|| -> Box<dyn std::error::Error> {
            format!("Invalid boolean for {name}: {raw}").into()
        }),
        None => Ok(default),
    }
}

/// Mask a secret for display, keeping only the last four characters.
pub(crate) fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool(" YES "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("short"), "****");
        assert_eq!(redact("sk-1234567890abcd"), "****abcd");
    }
}

use crate::config::ServerConfig;
use rand::Rng;

/// 16 hex chars of randomness, used for participant and stream ids.
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Prefixes the ICE server URL with its scheme when the user left it out.
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_hex_and_distinct() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn keeps_existing_scheme() {
        let cfg = ServerConfig::stun("s", "stun:stun.example.org:3478");
        assert_eq!(add_ice_url_scheme(&cfg), "stun:stun.example.org:3478");
    }

    #[test]
    fn adds_scheme_by_type() {
        let mut cfg = ServerConfig::stun("s", "stun.example.org:3478");
        assert_eq!(add_ice_url_scheme(&cfg), "stun:stun.example.org:3478");
        cfg.r#type = "turn".into();
        assert_eq!(add_ice_url_scheme(&cfg), "turn:stun.example.org:3478");
    }
}

//! Default User-Agent string.

/// Product token sent when no User-Agent is configured.
const PRODUCT: &str = "fetcher";

/// Default User-Agent: product and crate version.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_crate_version() {
        let ua = default_user_agent();
        assert_eq!(
            ua.strip_prefix("fetcher/"),
            Some(env!("CARGO_PKG_VERSION")),
            "unexpected user agent: {ua}"
        );
    }
}

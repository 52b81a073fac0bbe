//! User-Agent string sent with every request.

/// Product token in the User-Agent.
const PRODUCT: &str = "ipums-extract";

/// Default User-Agent identifying the tool and its version.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version} (research-tool; IPUMS CPS extract client)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_product_and_version() {
        let ua = default_user_agent();
        assert_eq!(
            Some(env!("CARGO_PKG_VERSION")),
            ua.strip_prefix("ipums-extract/")
                .and_then(|s| s.split(' ').next()),
            "UA must contain crate version: {ua}"
        );
        assert!(ua.contains("research-tool"));
    }
}

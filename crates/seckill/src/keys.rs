//! Key layouts across the backing stores

/// Config key: campaign on/off switch
pub const CONFIG_ENABLED: &str = "/config/seckill/enabled";
/// Config key: admissions per user per window
pub const CONFIG_RATE_LIMIT: &str = "/config/rate_limit";
/// Config key: whether stock preload is allowed
pub const CONFIG_STOCK_PRELOAD: &str = "/config/stock_preload";
/// Prefix under which config keys are watched
pub const CONFIG_PREFIX: &str = "/config/";
/// Prefix for blacklist entries
pub const BLACKLIST_PREFIX: &str = "/blacklist/";

pub fn blacklist(user_id: i64) -> String {
    format!("{BLACKLIST_PREFIX}{user_id}")
}

/// Parse the user id back out of a blacklist key.
pub fn blacklist_user(key: &str) -> Option<i64> {
    key.strip_prefix(BLACKLIST_PREFIX)?.parse().ok()
}

/// Stock cell for a product in the counter store
pub fn stock(product_id: i64) -> String {
    format!("stock:{product_id}")
}

/// Per-user rate window counter
pub fn rate_window(user_id: i64) -> String {
    format!("rate:{user_id}")
}

/// Session token record
pub fn session_token(token: &str) -> String {
    format!("session_token:{token}")
}

/// Purchase token record
pub fn purchase_token(token_id: &str) -> String {
    format!("purchase_token:{token_id}")
}

/// Per-user commit lease in the coordination store
pub fn user_lease(user_id: i64) -> String {
    format!("lock/user/{user_id}")
}

/// Per-user-product admission lease
pub fn attempt_lease(user_id: i64, product_id: i64) -> String {
    format!("lock/attempt/{user_id}/{product_id}")
}

/// Administrative preload lease
pub fn preload_lease(product_id: i64) -> String {
    format!("lock/preload/{product_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_keys_round_trip() {
        assert_eq!(blacklist(9999), "/blacklist/9999");
        assert_eq!(blacklist_user("/blacklist/9999"), Some(9999));
        assert_eq!(blacklist_user("/config/rate_limit"), None);
        assert_eq!(blacklist_user("/blacklist/not-a-number"), None);
    }
}

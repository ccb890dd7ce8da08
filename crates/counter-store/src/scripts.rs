//! Lua sources for the server-side atomic operations

/// Stock cell operations dispatched on ARGV[1]: `check_and_decr` returns -1
/// when the cell is absent, -2 when it holds no stock, otherwise the value
/// after the decrement; `check_and_set` writes ARGV[2] only if the cell is
/// absent and returns 1 on write; `get_stock` returns -1 when absent.
pub const STOCK_OPERATIONS: &str = r#"
local cmd = ARGV[1]
if cmd == 'check_and_decr' then
    local stock = redis.call('GET', KEYS[1])
    if stock == false then
        return -1
    end
    if tonumber(stock) <= 0 then
        return -2
    end
    return redis.call('DECR', KEYS[1])
elseif cmd == 'check_and_set' then
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
elseif cmd == 'get_stock' then
    local stock = redis.call('GET', KEYS[1])
    if stock == false then
        return -1
    end
    return tonumber(stock)
else
    return -99
end
"#;

/// Tumbling-window rate limiter: ARGV[1] is the limit, ARGV[2] the window in
/// seconds. Returns 1 when the attempt is admitted, 0 when the window is
/// full. The first increment of a window attaches the expiry.
pub const RATE_LIMIT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
    return 0
end
current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 1
"#;

/// Single-use token consumption: ARGV[1] is the expected user id, ARGV[2] the
/// expected product id, ARGV[3] the caller's clock in epoch milliseconds.
/// Returns 1 when the record matched and was deleted, -1 when absent, -2 on
/// user/product mismatch, -3 when expired (the record is deleted), -4 when
/// the record is not valid JSON.
pub const CONSUME_TOKEN: &str = r#"
local raw = redis.call('GET', KEYS[1])
if raw == false then
    return -1
end
local ok, data = pcall(cjson.decode, raw)
if not ok then
    return -4
end
if data.expires_at and tonumber(ARGV[3]) >= tonumber(data.expires_at) then
    redis.call('DEL', KEYS[1])
    return -3
end
if tonumber(data.user_id) ~= tonumber(ARGV[1]) or tonumber(data.product_id) ~= tonumber(ARGV[2]) then
    return -2
end
redis.call('DEL', KEYS[1])
return 1
"#;

//! Request cost in internal billing units.

/// Tokens covered by one billing unit.
pub const TOKENS_PER_UNIT: u64 = 32_000;

/// Units charged for a request of `tokens` tokens.
///
/// Every request costs at least one unit; non-positive counts are charged
/// the minimum.
pub fn cost_units_for_tokens(tokens: i64) -> u64 {
    if tokens <= 0 {
        return 1;
    }
    (tokens as u64).div_ceil(TOKENS_PER_UNIT).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_one_unit() {
        assert_eq!(cost_units_for_tokens(0), 1);
        assert_eq!(cost_units_for_tokens(-5), 1);
        assert_eq!(cost_units_for_tokens(1), 1);
    }

    #[test]
    fn test_rounds_up() {
        assert_eq!(cost_units_for_tokens(32_000), 1);
        assert_eq!(cost_units_for_tokens(32_001), 2);
        assert_eq!(cost_units_for_tokens(96_000), 3);
    }
}

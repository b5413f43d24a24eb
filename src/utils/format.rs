/// Render a smallest-unit amount as a decimal string with trailing zeros trimmed.
///
/// Integer arithmetic only: 18-decimal amounts do not survive a round trip through `f64`.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = amount / scale;
    let fraction = amount % scale;

    if fraction == 0 {
        return whole.to_string();
    }

    let padded = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, padded.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::format_token_amount;

    #[test]
    fn formats_fractional_amounts_exactly() {
        assert_eq!(format_token_amount(20_000_000_000_000_000, 18), "0.02");
        assert_eq!(format_token_amount(1_500_000_000_000_000_000, 18), "1.5");
        assert_eq!(format_token_amount(3_000_000, 6), "3");
        assert_eq!(format_token_amount(1, 18), "0.000000000000000001");
    }
}

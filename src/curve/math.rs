//! Quote math for launchpad bonding curves
//!
//! Pure integer arithmetic over the curve reserves. Products are widened to
//! u128 before division so intermediates cannot overflow. Floats never touch
//! reserves or balances.

use super::accounts::BondingCurveState;
use crate::error::{Error, Result};

/// Protocol fee in basis points (1%)
pub const FEE_BPS: u64 = 100;

/// Basis-point denominator
pub const BPS_DENOMINATOR: u64 = 10_000;

/// A computed buy or sell quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    /// Amount paid in (base units for buys, token units for sells)
    pub amount_in: u64,
    /// Amount received out, capped to the real reserve
    pub amount_out: u64,
    /// Price impact versus spot, in basis points (never negative)
    pub price_impact_bps: u64,
    /// Fee charged, in the input denomination for buys and the output
    /// denomination for sells
    pub fee: u64,
}

impl Quote {
    fn zero(amount_in: u64) -> Self {
        Self {
            amount_in,
            amount_out: 0,
            price_impact_bps: 0,
            fee: 0,
        }
    }
}

/// Quote a buy: base currency in, tokens out.
///
/// The buyer pays the fee on top, so the net base amount entering the curve
/// is `base_in * 10000 / (10000 + FEE_BPS)`. Output is capped to the real
/// token reserves.
pub fn buy_quote(curve: &BondingCurveState, base_in: u64) -> Result<Quote> {
    if base_in == 0 {
        return Ok(Quote::zero(0));
    }
    if curve.virtual_base_reserves == 0 || curve.virtual_token_reserves == 0 {
        return Err(Error::QuoteOverflow);
    }

    let net_base = mul_div(base_in, BPS_DENOMINATOR, BPS_DENOMINATOR + FEE_BPS)?;
    let fee = base_in - net_base;

    let tokens_out = mul_div(
        net_base,
        curve.virtual_token_reserves,
        curve
            .virtual_base_reserves
            .checked_add(net_base)
            .ok_or(Error::QuoteOverflow)?,
    )?;

    let amount_out = tokens_out.min(curve.real_token_reserves);

    let price_impact_bps = buy_price_impact_bps(curve, base_in, amount_out);

    Ok(Quote {
        amount_in: base_in,
        amount_out,
        price_impact_bps,
        fee,
    })
}

/// Quote a sell: tokens in, base currency out.
///
/// The fee comes off the gross proceeds. Output is capped to the real base
/// reserves.
pub fn sell_quote(curve: &BondingCurveState, tokens_in: u64) -> Result<Quote> {
    if tokens_in == 0 {
        return Ok(Quote::zero(0));
    }
    if curve.virtual_base_reserves == 0 || curve.virtual_token_reserves == 0 {
        return Err(Error::QuoteOverflow);
    }

    let gross_base = mul_div(
        tokens_in,
        curve.virtual_base_reserves,
        curve
            .virtual_token_reserves
            .checked_add(tokens_in)
            .ok_or(Error::QuoteOverflow)?,
    )?;

    let net_base = mul_div(gross_base, BPS_DENOMINATOR - FEE_BPS, BPS_DENOMINATOR)?;
    let fee = gross_base - net_base;

    let amount_out = net_base.min(curve.real_base_reserves);

    let price_impact_bps = sell_price_impact_bps(curve, tokens_in, amount_out);

    Ok(Quote {
        amount_in: tokens_in,
        amount_out,
        price_impact_bps,
        fee,
    })
}

/// Trade side for slippage bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Apply a slippage bound to a quoted amount.
///
/// Buy-side returns the maximum acceptable cost; sell-side returns the
/// minimum acceptable receipt.
pub fn apply_slippage(amount: u64, slippage_bps: u64, side: Side) -> u64 {
    let factor = match side {
        Side::Buy => BPS_DENOMINATOR + slippage_bps,
        Side::Sell => BPS_DENOMINATOR.saturating_sub(slippage_bps),
    };
    ((amount as u128 * factor as u128) / BPS_DENOMINATOR as u128) as u64
}

/// Widened multiply-then-divide. Errors if the result does not fit in u64
/// or the divisor is zero.
fn mul_div(a: u64, b: u64, denominator: u64) -> Result<u64> {
    if denominator == 0 {
        return Err(Error::QuoteOverflow);
    }
    let wide = (a as u128)
        .checked_mul(b as u128)
        .ok_or(Error::QuoteOverflow)?
        / denominator as u128;
    u64::try_from(wide).map_err(|_| Error::QuoteOverflow)
}

// Spot price is scaled by 10000 so small reserves don't truncate to zero.
fn spot_price_scaled(curve: &BondingCurveState) -> u128 {
    if curve.virtual_token_reserves == 0 {
        return 0;
    }
    curve.virtual_base_reserves as u128 * BPS_DENOMINATOR as u128
        / curve.virtual_token_reserves as u128
}

fn buy_price_impact_bps(curve: &BondingCurveState, base_in: u64, tokens_out: u64) -> u64 {
    if base_in == 0 || tokens_out == 0 {
        return 0;
    }
    let spot = spot_price_scaled(curve);
    if spot == 0 {
        return 0;
    }
    let exec = base_in as u128 * BPS_DENOMINATOR as u128 / tokens_out as u128;
    if exec <= spot {
        return 0;
    }
    ((exec - spot) * BPS_DENOMINATOR as u128 / spot) as u64
}

fn sell_price_impact_bps(curve: &BondingCurveState, tokens_in: u64, base_out: u64) -> u64 {
    if tokens_in == 0 || base_out == 0 {
        return 0;
    }
    let spot = spot_price_scaled(curve);
    if spot == 0 {
        return 0;
    }
    let exec = base_out as u128 * BPS_DENOMINATOR as u128 / tokens_in as u128;
    if exec >= spot {
        return 0;
    }
    ((spot - exec) * BPS_DENOMINATOR as u128 / spot) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_curve() -> BondingCurveState {
        BondingCurveState::new_for_test(
            30_000_000_000,    // virtual_base_reserves: 30 base units
            1_000_000_000_000, // virtual_token_reserves
            20_000_000_000,    // real_base_reserves
            800_000_000_000,   // real_token_reserves
            1_000_000_000_000, // token_total_supply
            false,             // complete
        )
    }

    #[test]
    fn buy_quote_is_deterministic_and_capped() {
        let curve = test_curve();
        let a = buy_quote(&curve, 1_000_000_000).unwrap();
        let b = buy_quote(&curve, 1_000_000_000).unwrap();
        assert_eq!(a, b);
        assert!(a.amount_out <= curve.real_token_reserves);
        assert!(a.amount_out > 0);
        assert!(a.fee > 0);
    }

    #[test]
    fn zero_input_yields_zero_output() {
        let curve = test_curve();
        let buy = buy_quote(&curve, 0).unwrap();
        assert_eq!(buy.amount_out, 0);
        assert_eq!(buy.price_impact_bps, 0);
        let sell = sell_quote(&curve, 0).unwrap();
        assert_eq!(sell.amount_out, 0);
        assert_eq!(sell.price_impact_bps, 0);
    }

    #[test]
    fn sell_quote_matches_reference_values() {
        let curve = test_curve();
        let quote = sell_quote(&curve, 10_000_000_000).unwrap();

        // gross = 10^10 * 30*10^9 / (10^12 + 10^10) = 297_029_702
        // net   = gross * 9900 / 10000 = 294_059_404
        assert_eq!(quote.amount_in, 10_000_000_000);
        assert_eq!(quote.amount_out, 294_059_404);
        assert_eq!(quote.fee, 297_029_702 - 294_059_404);
        assert!(quote.amount_out <= curve.real_base_reserves);
    }

    #[test]
    fn output_never_exceeds_real_reserves() {
        let mut curve = test_curve();
        curve.real_token_reserves = 1_000;
        let buy = buy_quote(&curve, 100_000_000_000).unwrap();
        assert_eq!(buy.amount_out, 1_000);

        curve.real_base_reserves = 500;
        let sell = sell_quote(&curve, 900_000_000_000).unwrap();
        assert_eq!(sell.amount_out, 500);
    }

    #[test]
    fn buy_price_impact_is_positive_for_large_orders() {
        let curve = test_curve();
        let quote = buy_quote(&curve, 10_000_000_000).unwrap();
        assert!(quote.price_impact_bps > 0);
    }

    #[test]
    fn slippage_identity_at_zero_bps() {
        assert_eq!(apply_slippage(1_000_000, 0, Side::Buy), 1_000_000);
        assert_eq!(apply_slippage(1_000_000, 0, Side::Sell), 1_000_000);
    }

    #[test]
    fn slippage_brackets_the_amount() {
        let amount = 1_000_000u64;
        for bps in [1u64, 100, 2500, 10_000] {
            assert!(apply_slippage(amount, bps, Side::Buy) >= amount);
            assert!(apply_slippage(amount, bps, Side::Sell) <= amount);
        }
        // 25% slippage
        assert_eq!(apply_slippage(amount, 2500, Side::Buy), 1_250_000);
        assert_eq!(apply_slippage(amount, 2500, Side::Sell), 750_000);
    }

    #[test]
    fn zero_virtual_reserves_error_when_active() {
        let mut curve = test_curve();
        curve.virtual_base_reserves = 0;
        assert!(buy_quote(&curve, 1_000).is_err());
        assert!(sell_quote(&curve, 1_000).is_err());
    }
}

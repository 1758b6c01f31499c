//! Launchpad account structures
//!
//! # WARNING: These structures may change without notice
//! The launchpad has modified its account layouts in the past.
//! If deserialization fails, these structures may need updating.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;

use super::program::ACCOUNT_DISCRIMINATORS;
use crate::error::{Error, Result};

/// BondingCurveState account - stores the bonding curve state for a token
///
/// Holds the virtual reserves used for pricing, the real reserves actually
/// held by the curve, and whether the curve has completed (reserve threshold
/// reached, trading migrated off the curve).
#[derive(Debug, Clone, BorshDeserialize, BorshSerialize)]
pub struct BondingCurveState {
    /// Account discriminator (first 8 bytes)
    _discriminator: [u8; 8],

    /// Virtual base-currency reserves for price calculation
    pub virtual_base_reserves: u64,

    /// Virtual token reserves for price calculation
    pub virtual_token_reserves: u64,

    /// Real base-currency reserves (actually held by the curve)
    pub real_base_reserves: u64,

    /// Real token reserves (actually held by the curve)
    pub real_token_reserves: u64,

    /// Total supply of the token
    pub token_total_supply: u64,

    /// Whether the bonding curve is complete
    pub complete: bool,

    /// Token creator, receives the creator-vault fee share
    pub creator: Pubkey,
}

impl BondingCurveState {
    /// Create a new BondingCurveState for testing
    #[cfg(test)]
    pub fn new_for_test(
        virtual_base_reserves: u64,
        virtual_token_reserves: u64,
        real_base_reserves: u64,
        real_token_reserves: u64,
        token_total_supply: u64,
        complete: bool,
    ) -> Self {
        Self {
            _discriminator: ACCOUNT_DISCRIMINATORS::BONDING_CURVE,
            virtual_base_reserves,
            virtual_token_reserves,
            real_base_reserves,
            real_token_reserves,
            token_total_supply,
            complete,
            creator: Pubkey::default(),
        }
    }

    /// Deserialize from account data
    pub fn try_from_slice(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::CurveDecode("Account data too short".to_string()));
        }

        let discriminator: [u8; 8] = data[..8]
            .try_into()
            .map_err(|_| Error::CurveDecode("Invalid discriminator".to_string()))?;

        if discriminator != ACCOUNT_DISCRIMINATORS::BONDING_CURVE {
            return Err(Error::CurveDecode(format!(
                "Wrong discriminator: expected {:?}, got {:?}",
                ACCOUNT_DISCRIMINATORS::BONDING_CURVE,
                discriminator
            )));
        }

        Self::try_from_slice_unchecked(data)
            .map_err(|e| Error::CurveDecode(format!("Borsh decode failed: {}", e)))
    }

    /// Deserialize without checking discriminator (for performance)
    pub fn try_from_slice_unchecked(data: &[u8]) -> std::result::Result<Self, borsh::io::Error> {
        BorshDeserialize::try_from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use borsh::to_vec;

    #[test]
    fn round_trips_through_borsh() {
        let curve = BondingCurveState::new_for_test(
            30_000_000_000,
            1_000_000_000_000,
            0,
            800_000_000_000,
            1_000_000_000_000,
            false,
        );

        let bytes = to_vec(&curve).unwrap();
        let decoded = BondingCurveState::try_from_slice(&bytes).unwrap();
        assert_eq!(decoded.virtual_base_reserves, 30_000_000_000);
        assert_eq!(decoded.real_token_reserves, 800_000_000_000);
        assert!(!decoded.complete);
    }

    #[test]
    fn rejects_wrong_discriminator() {
        let mut data = vec![0u8; 64];
        data[..8].copy_from_slice(&[9, 9, 9, 9, 9, 9, 9, 9]);
        assert!(BondingCurveState::try_from_slice(&data).is_err());
    }

    #[test]
    fn rejects_short_data() {
        assert!(BondingCurveState::try_from_slice(&[1, 2, 3]).is_err());
    }
}

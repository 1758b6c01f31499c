//! Launchpad program constants and discriminators
//!
//! # WARNING: These constants may change without notice
//! The launchpad has historically modified its program behavior. If
//! transactions start failing or parsing breaks, these values may need to
//! be updated.
//!
//! # How discriminators are calculated
//! Anchor uses the first 8 bytes of SHA-256("global:<instruction_name>")
//! as the instruction discriminator.

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// Launchpad program ID
pub const LAUNCHPAD_PROGRAM_ID_STR: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Global config account (PDA of the launchpad program)
pub const GLOBAL_ACCOUNT_STR: &str = "4wTV1YmiEkRvAtNtsSGPtUrqRYQMe5SKy2uB4Jjaxnjf";

/// Protocol fee recipient account
pub const FEE_RECIPIENT_STR: &str = "CebN5WGQ4jvEPvsVU4EoHEpgzq1VV7AbicfhtW4xC9iM";

lazy_static::lazy_static! {
    /// Launchpad program ID as Pubkey
    pub static ref LAUNCHPAD_PROGRAM_ID: Pubkey =
        Pubkey::from_str(LAUNCHPAD_PROGRAM_ID_STR).expect("Invalid launchpad program ID");

    /// Global config account as Pubkey
    pub static ref GLOBAL_ACCOUNT: Pubkey =
        Pubkey::from_str(GLOBAL_ACCOUNT_STR).expect("Invalid global account");

    /// Fee recipient account as Pubkey
    pub static ref FEE_RECIPIENT: Pubkey =
        Pubkey::from_str(FEE_RECIPIENT_STR).expect("Invalid fee recipient");
}

/// Instruction discriminators (first 8 bytes of instruction data)
/// Calculated as: SHA-256("global:<instruction_name>")[0..8]
#[allow(non_snake_case)]
pub mod DISCRIMINATORS {
    /// Create token instruction discriminator
    pub const CREATE: [u8; 8] = [24, 30, 200, 40, 5, 28, 7, 119];

    /// Buy tokens instruction discriminator
    pub const BUY: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];

    /// Sell tokens instruction discriminator
    pub const SELL: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];
}

/// Account discriminators (first 8 bytes of account data)
#[allow(non_snake_case)]
pub mod ACCOUNT_DISCRIMINATORS {
    /// BondingCurveState account discriminator
    pub const BONDING_CURVE: [u8; 8] = [23, 183, 248, 55, 96, 216, 172, 96];

    /// Global config account discriminator
    pub const GLOBAL: [u8; 8] = [167, 232, 232, 177, 200, 108, 114, 127];
}

/// Derive the bonding curve PDA for a mint
pub fn derive_bonding_curve(mint: &Pubkey) -> (Pubkey, u8) {
    let seeds = &[b"bonding-curve".as_ref(), mint.as_ref()];
    Pubkey::find_program_address(seeds, &LAUNCHPAD_PROGRAM_ID)
}

/// Derive the creator vault PDA for a token creator
pub fn derive_creator_vault(creator: &Pubkey) -> (Pubkey, u8) {
    let seeds = &[b"creator-vault".as_ref(), creator.as_ref()];
    Pubkey::find_program_address(seeds, &LAUNCHPAD_PROGRAM_ID)
}

/// Derive associated token account address
pub fn derive_ata(wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
    spl_associated_token_account::get_associated_token_address(wallet, mint)
}

/// Launchpad instruction types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionType {
    Create,
    Buy,
    Sell,
}

/// Check if a discriminator matches an instruction type
pub fn match_discriminator(data: &[u8]) -> Option<InstructionType> {
    if data.len() < 8 {
        return None;
    }

    let discriminator: [u8; 8] = data[..8].try_into().ok()?;

    match discriminator {
        DISCRIMINATORS::CREATE => Some(InstructionType::Create),
        DISCRIMINATORS::BUY => Some(InstructionType::Buy),
        DISCRIMINATORS::SELL => Some(InstructionType::Sell),
        _ => None,
    }
}

/// Calculate instruction discriminator from name
/// This follows Anchor's convention: SHA-256("global:<name>")[0..8]
pub fn calculate_discriminator(name: &str) -> [u8; 8] {
    use sha2::{Digest, Sha256};

    let preimage = format!("global:{}", name);
    let hash = Sha256::digest(preimage.as_bytes());

    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminators_match_anchor_convention() {
        assert_eq!(calculate_discriminator("create"), DISCRIMINATORS::CREATE);
        assert_eq!(calculate_discriminator("buy"), DISCRIMINATORS::BUY);
        assert_eq!(calculate_discriminator("sell"), DISCRIMINATORS::SELL);
    }

    #[test]
    fn matches_known_discriminators() {
        let sell_data = [51, 230, 133, 164, 1, 127, 131, 173, 0, 0];
        assert_eq!(match_discriminator(&sell_data), Some(InstructionType::Sell));
        assert_eq!(match_discriminator(&[0u8; 8]), None);
        assert_eq!(match_discriminator(&[1, 2]), None);
    }

    #[test]
    fn pda_derivation_is_deterministic() {
        let mint = Pubkey::new_unique();
        assert_eq!(derive_bonding_curve(&mint), derive_bonding_curve(&mint));

        let wallet = Pubkey::new_unique();
        assert_eq!(derive_ata(&wallet, &mint), derive_ata(&wallet, &mint));
    }
}

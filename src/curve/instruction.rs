//! Instruction building for launchpad trades

use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use super::program::{
    derive_ata, derive_bonding_curve, derive_creator_vault, DISCRIMINATORS, FEE_RECIPIENT,
    GLOBAL_ACCOUNT, LAUNCHPAD_PROGRAM_ID,
};

/// Compute unit limit requested for curve trades
pub const COMPUTE_UNIT_LIMIT: u32 = 100_000;

/// Accounts resolved for a single trade against the curve
#[derive(Debug, Clone)]
pub struct TradeAccounts {
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub associated_bonding_curve: Pubkey,
    pub user_token_account: Pubkey,
    pub creator_vault: Pubkey,
}

impl TradeAccounts {
    /// Resolve all trade accounts from the mint, the trading wallet and the
    /// token creator.
    pub fn resolve(mint: &Pubkey, user: &Pubkey, creator: &Pubkey) -> Self {
        let (bonding_curve, _) = derive_bonding_curve(mint);
        let (creator_vault, _) = derive_creator_vault(creator);
        Self {
            mint: *mint,
            bonding_curve,
            associated_bonding_curve: derive_ata(&bonding_curve, mint),
            user_token_account: derive_ata(user, mint),
            creator_vault,
        }
    }
}

/// Build a sell instruction with arguments `(token_amount, min_base_output)`.
///
/// Account order must match the launchpad program expectations.
pub fn build_sell(
    accounts: &TradeAccounts,
    seller: &Pubkey,
    token_amount: u64,
    min_base_output: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&DISCRIMINATORS::SELL);
    data.extend_from_slice(&token_amount.to_le_bytes());
    data.extend_from_slice(&min_base_output.to_le_bytes());

    let metas = vec![
        AccountMeta::new_readonly(*GLOBAL_ACCOUNT, false), // global
        AccountMeta::new(*FEE_RECIPIENT, false),           // fees
        AccountMeta::new_readonly(accounts.mint, false),   // mint
        AccountMeta::new(accounts.bonding_curve, false),   // bonding_curve
        AccountMeta::new(accounts.associated_bonding_curve, false), // associated_bonding_curve
        AccountMeta::new(accounts.user_token_account, false), // seller token account
        AccountMeta::new(*seller, true),                   // seller (signer)
        AccountMeta::new_readonly(solana_sdk::system_program::ID, false), // system_program
        AccountMeta::new(accounts.creator_vault, false),   // creator_vault
        AccountMeta::new_readonly(spl_token::ID, false),   // token_program
    ];

    Instruction {
        program_id: *LAUNCHPAD_PROGRAM_ID,
        accounts: metas,
        data,
    }
}

/// Build a buy instruction with arguments `(token_amount, max_base_cost)`.
pub fn build_buy(
    accounts: &TradeAccounts,
    buyer: &Pubkey,
    token_amount: u64,
    max_base_cost: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&DISCRIMINATORS::BUY);
    data.extend_from_slice(&token_amount.to_le_bytes());
    data.extend_from_slice(&max_base_cost.to_le_bytes());

    let metas = vec![
        AccountMeta::new_readonly(*GLOBAL_ACCOUNT, false),
        AccountMeta::new(*FEE_RECIPIENT, false),
        AccountMeta::new_readonly(accounts.mint, false),
        AccountMeta::new(accounts.bonding_curve, false),
        AccountMeta::new(accounts.associated_bonding_curve, false),
        AccountMeta::new(accounts.user_token_account, false),
        AccountMeta::new(*buyer, true),
        AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
        AccountMeta::new(accounts.creator_vault, false),
        AccountMeta::new_readonly(spl_token::ID, false),
    ];

    Instruction {
        program_id: *LAUNCHPAD_PROGRAM_ID,
        accounts: metas,
        data,
    }
}

/// Build the compute-budget prelude: optional priority fee, then the unit
/// limit. Ordering follows the convention of placing budget instructions
/// before the trade instruction.
pub fn compute_budget_prelude(priority_fee_microlamports: u64) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(2);
    if priority_fee_microlamports > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
            priority_fee_microlamports,
        ));
    }
    instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(
        COMPUTE_UNIT_LIMIT,
    ));
    instructions
}

/// Build an idempotent create instruction for the user's associated token
/// account, used on first buys when the ATA does not exist yet.
pub fn build_create_ata(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    spl_associated_token_account::instruction::create_associated_token_account_idempotent(
        payer,
        owner,
        mint,
        &spl_token::ID,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_instruction_encodes_args_little_endian() {
        let mint = Pubkey::new_unique();
        let seller = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let accounts = TradeAccounts::resolve(&mint, &seller, &creator);

        let ix = build_sell(&accounts, &seller, 5_000, 1_234);
        assert_eq!(ix.program_id, *LAUNCHPAD_PROGRAM_ID);
        assert_eq!(&ix.data[..8], &DISCRIMINATORS::SELL);
        assert_eq!(&ix.data[8..16], &5_000u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &1_234u64.to_le_bytes());
        assert_eq!(ix.accounts.len(), 10);
        // seller must be the only signer
        assert!(ix.accounts[6].is_signer);
        assert_eq!(ix.accounts.iter().filter(|m| m.is_signer).count(), 1);
    }

    #[test]
    fn buy_instruction_uses_buy_discriminator() {
        let mint = Pubkey::new_unique();
        let buyer = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let accounts = TradeAccounts::resolve(&mint, &buyer, &creator);

        let ix = build_buy(&accounts, &buyer, 10, 20);
        assert_eq!(&ix.data[..8], &DISCRIMINATORS::BUY);
    }

    #[test]
    fn compute_budget_prelude_skips_zero_fee() {
        assert_eq!(compute_budget_prelude(0).len(), 1);
        assert_eq!(compute_budget_prelude(50_000).len(), 2);
    }
}

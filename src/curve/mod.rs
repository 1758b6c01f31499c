//! Bonding curve module - account codecs, program constants, quote math and
//! instruction builders for the launchpad AMM.

pub mod accounts;
pub mod instruction;
pub mod math;
pub mod program;

pub use accounts::BondingCurveState;
pub use math::{apply_slippage, buy_quote, sell_quote, Quote, Side, FEE_BPS};

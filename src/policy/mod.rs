//! Policy engine - declarative triggers evaluated against engine state for
//! every ingested event.

pub mod engine;
pub mod types;

pub use engine::PolicyEngine;
pub use types::{
    ActionParams, PolicyAction, PolicyDefinition, PolicyEvaluationResult, TriggerType,
};

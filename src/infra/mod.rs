//! Infrastructure clients - relational store, KV store, chain RPC and the
//! reasoning service. Constructed once at startup, shared behind `Arc`, and
//! disconnected in shutdown order.

pub mod db;
pub mod kv;
pub mod llm;
pub mod rpc;

use std::sync::Arc;

pub use db::Db;
pub use kv::KvStore;
pub use llm::LlmClient;
pub use rpc::RpcContext;

/// Shared infrastructure container built during startup
#[derive(Clone)]
pub struct Infra {
    pub db: Arc<Db>,
    pub kv: Arc<KvStore>,
    pub rpc: Arc<RpcContext>,
}

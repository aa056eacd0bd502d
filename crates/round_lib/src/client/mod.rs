pub mod gateway;
pub mod program;
pub mod rpc;

#[cfg(test)]
pub(crate) mod sim;

pub use gateway::{Confirmation, LedgerGateway, RpcLedgerGateway};

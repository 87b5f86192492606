// Interface adapters: backend clients, wire protocol and local session persistence.

pub mod clients;
pub mod protocol;
pub mod session_store;
pub mod state;

//! Types shared between the realm server and its clients: the opcode-tagged
//! JSON protocol, entity snapshots, item definitions and enchantments.

pub mod abilities;
pub mod entities;
pub mod items;
pub mod protocol;

pub use abilities::*;
pub use entities::*;
pub use items::*;
pub use protocol::*;

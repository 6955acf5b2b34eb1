pub mod builders;
pub mod payloads;
pub mod strategies;

pub use builders::*;
pub use payloads::*;

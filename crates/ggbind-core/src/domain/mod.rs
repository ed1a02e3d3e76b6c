//! Domain types for adapter metadata and tokens.

pub mod descriptor;
pub mod token;

pub use descriptor::AdapterDescriptor;
pub use token::Token;

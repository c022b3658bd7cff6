pub mod signature;
pub mod token;

pub use signature::SignatureVerifier;
pub use token::{generate_callback_token, verify_callback_token};

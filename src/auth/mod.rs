pub mod authenticator;
pub mod token;

pub use authenticator::Authenticator;
pub use token::{Credential, TenantTokenMap, TokenStore};

//! Sessions and Authentication
//!
//! - [`provider`]: the identity provider contract and its error mapping
//! - [`validator`]: expiry checks, de-duplicated refresh, background revalidation
//! - [`gateway`]: rate-limited sign-in, sign-up, password reset, OAuth, phone codes

pub mod gateway;
pub mod provider;
pub mod validator;

pub use gateway::AuthGateway;
pub use provider::{
    Credentials, IdentityProvider, ProviderError, ProviderErrorKind, Session,
};
pub use validator::{RevalidationOutcome, SessionConfig, SessionValidator};

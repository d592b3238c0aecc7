pub mod auth;
pub mod base64_serde;
pub mod pubsub;

pub use auth::{
    AuthorizedUserCredentials, CredentialsFile, JwtClaims, ServiceAccountKey, TokenResponse,
};
pub use pubsub::*;

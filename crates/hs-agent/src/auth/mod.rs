//! Authenticated coordinator client
//!
//! Every outbound call to the coordinator goes through [`AuthClient`], which
//! keeps the single [`AccessCredential`] fresh: proactively before a protected
//! request, reactively on `401`, and periodically from the background
//! [`TokenRefresher`].

mod client;
mod credential;
mod refresher;

pub use client::{ApiRequest, ApiResponse, AuthClient, ClientError, REFRESH_PATH};
pub use credential::AccessCredential;
pub use refresher::TokenRefresher;

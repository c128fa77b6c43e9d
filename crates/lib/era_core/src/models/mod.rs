//! Domain models shared by the store, the token issuer, and the API layer.

pub mod auth;

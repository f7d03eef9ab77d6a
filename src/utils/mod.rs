pub mod auth;
pub mod hash;
pub mod keyed_mutex;
pub mod retry;
pub mod validation;

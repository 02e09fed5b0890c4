pub mod account;
pub mod journal;
pub mod oauth_state;
pub mod received_email;

// ─── Session & transport ───
pub mod api;
pub mod identity;
pub mod storage;
pub mod wallet;

// ─── Twitter OAuth popup handshake ───
pub mod callback_server;
pub mod coordinator;
pub mod popup;

// ─── Dashboard flows ───
pub mod controller;
pub mod payment;

// ─── Shared types ───
pub mod errors;
pub mod messages;
pub mod types;

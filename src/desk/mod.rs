//! Helpdesk application: tickets, clients and projects behind a JSON API.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (Router, layers, graceful shutdown)  │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘   JSON   │         │  CurrentUser (auth.rs) per request     │
//!                       │         │                                        │
//!                       │         │ DbHandle::call(|db| service::...)      │
//!                       │         v                                        │
//!                       │  service.rs  (policy checks, validation, audit)  │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  db.rs  (DeskDb over rusqlite)                   │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                            |
//! |-----------|-----------------------------------------------------------|
//! | `models`  | Records and view types: `Ticket`, `Client`, `Dashboard`   |
//! | `auth`    | argon2 passwords, session tokens, `CurrentUser` extractor |
//!
//! ## Typical Request Flow (close a ticket)
//!
//! 1. `POST /api/tickets/{id}/close` → `api::close_ticket()`
//! 2. `CurrentUser` hashes the bearer token and loads the session owner.
//! 3. `service::transition_ticket()` loads the ticket, hides it as 404 when
//!    outside the caller's scope, then asks `policy::check_transition()`
//!    for the target state (permission first, then source state).
//! 4. Status, `closed_at` and the system comment are written in one
//!    transaction.

pub mod api;
pub mod auth;
pub mod db;
pub mod models;
pub mod server;
pub mod service;

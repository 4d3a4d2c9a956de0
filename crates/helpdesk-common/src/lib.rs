//! Shared domain types for the helpdesk.
//!
//! Everything in this crate is pure: no I/O, no clock, no storage. The
//! server crate feeds it facts about the acting user and the record being
//! touched, and gets back a decision.
//!
//! | Module   | Contents                                               |
//! |----------|--------------------------------------------------------|
//! | `role`   | `Role` and the authenticated `Actor`                   |
//! | `ticket` | `TicketStatus`, `Priority`, `Transition` state machine |
//! | `policy` | Permission checks and `TicketScope` record scoping     |

pub mod policy;
pub mod role;
pub mod ticket;

pub use policy::{PolicyError, TicketFacts, TicketScope};
pub use role::{Actor, Role};
pub use ticket::{Priority, TicketStatus, Transition};

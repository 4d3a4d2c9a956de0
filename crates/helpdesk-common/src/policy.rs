//! Who may do what to which record.
//!
//! Every check takes the acting user and the minimal facts about the
//! target record. Permission is always decided before state: a caller
//! without the right to act is told so even when the ticket is also in
//! the wrong state.

use thiserror::Error;

use crate::role::Actor;
use crate::ticket::{TicketStatus, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("{0}")]
    Forbidden(&'static str),

    #[error("Cannot {transition} a ticket that is {from}")]
    InvalidTransition {
        from: TicketStatus,
        transition: Transition,
    },

    #[error("Only open tickets can be assigned (ticket is {status})")]
    NotOpen { status: TicketStatus },
}

/// The facts about a ticket that access decisions depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketFacts {
    pub reporter_id: i64,
    pub client_id: i64,
    pub status: TicketStatus,
}

/// Which tickets an actor is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketScope {
    All,
    ReportedBy(i64),
    Client(i64),
    Nothing,
}

impl TicketScope {
    pub fn for_actor(actor: &Actor) -> Self {
        if actor.can_manage() {
            return Self::All;
        }
        if actor.role.is_reporter() {
            return Self::ReportedBy(actor.id);
        }
        match actor.client_id {
            Some(client_id) => Self::Client(client_id),
            None => Self::Nothing,
        }
    }

    pub fn includes(&self, ticket: &TicketFacts) -> bool {
        match *self {
            Self::All => true,
            Self::ReportedBy(user_id) => ticket.reporter_id == user_id,
            Self::Client(client_id) => ticket.client_id == client_id,
            Self::Nothing => false,
        }
    }
}

pub fn can_view_ticket(actor: &Actor, ticket: &TicketFacts) -> bool {
    TicketScope::for_actor(actor).includes(ticket)
}

/// Tickets are filed by reporters, and the reporter is always the caller.
pub fn check_create_ticket(actor: &Actor) -> Result<(), PolicyError> {
    if actor.role.is_reporter() {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("Only reporters can create tickets"))
    }
}

/// Whether an `assignee_id` supplied at creation is honoured or dropped.
pub fn accepts_assignee_on_create(actor: &Actor) -> bool {
    actor.role.is_reporter() || actor.is_staff
}

pub fn check_edit_ticket(actor: &Actor, ticket: &TicketFacts) -> Result<(), PolicyError> {
    if actor.role.is_client() && !actor.is_staff {
        return Err(PolicyError::Forbidden("Clients cannot edit tickets"));
    }
    if actor.can_manage() || ticket.reporter_id == actor.id {
        Ok(())
    } else {
        Err(PolicyError::Forbidden(
            "Only the reporter or a developer can edit this ticket",
        ))
    }
}

pub fn check_assign(actor: &Actor, ticket: &TicketFacts) -> Result<(), PolicyError> {
    if actor.role.is_client() && !actor.is_staff {
        return Err(PolicyError::Forbidden("Clients cannot assign tickets"));
    }
    if !(actor.can_manage() || ticket.reporter_id == actor.id) {
        return Err(PolicyError::Forbidden(
            "Only the reporter or a developer can assign this ticket",
        ));
    }
    if ticket.status != TicketStatus::Open {
        return Err(PolicyError::NotOpen {
            status: ticket.status,
        });
    }
    Ok(())
}

/// Check that `actor` may apply `transition` and return the target state.
pub fn check_transition(
    actor: &Actor,
    ticket: &TicketFacts,
    transition: Transition,
) -> Result<TicketStatus, PolicyError> {
    if actor.role.is_client() && !actor.is_staff {
        return Err(PolicyError::Forbidden(match transition {
            Transition::Close => "You cannot close this ticket",
            _ => "Clients cannot change ticket status",
        }));
    }

    let allowed = match transition {
        Transition::Start | Transition::Resolve | Transition::Close => actor.can_manage(),
        Transition::Reopen => actor.can_manage() || ticket.reporter_id == actor.id,
    };
    if !allowed {
        return Err(PolicyError::Forbidden(match transition {
            Transition::Reopen => "Only the reporter or a developer can reopen this ticket",
            _ => "Action reserved for developers",
        }));
    }

    ticket
        .status
        .apply(transition)
        .ok_or(PolicyError::InvalidTransition {
            from: ticket.status,
            transition,
        })
}

pub fn check_manage_clients(actor: &Actor) -> Result<(), PolicyError> {
    if actor.role.is_reporter() || actor.is_staff {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("Client records are managed by reporters"))
    }
}

pub fn check_manage_projects(actor: &Actor) -> Result<(), PolicyError> {
    if actor.can_manage() {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("Projects are managed by developers"))
    }
}

/// Deleting clients, projects and creating accounts is for staff only.
pub fn check_staff(actor: &Actor) -> Result<(), PolicyError> {
    if actor.is_staff {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("Staff only"))
    }
}

pub fn check_list_users(actor: &Actor) -> Result<(), PolicyError> {
    if actor.role.is_client() && !actor.is_staff {
        Err(PolicyError::Forbidden("Clients cannot browse users"))
    } else {
        Ok(())
    }
}

/// Client-role users only see projects of their own client.
pub fn can_view_project(actor: &Actor, project_client_id: i64) -> bool {
    if actor.role.is_client() && !actor.is_staff {
        actor.client_id == Some(project_client_id)
    } else {
        true
    }
}

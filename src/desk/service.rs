//! Helpdesk operations.
//!
//! Each function takes the database and the acting user, checks access
//! through `helpdesk_common::policy`, validates input and persists the
//! result. Most are synchronous and meant to run inside a single
//! `DbHandle::call`, so the check and the write see the same state.
//! The few that hash or verify passwords (`login`, `create_user`,
//! `update_user`) take the `DbHandle` themselves and do the argon2 work
//! outside the lock.

use anyhow::Context;
use helpdesk_common::policy;
use helpdesk_common::{Actor, Priority, Role, TicketScope, TicketStatus, Transition};
use tracing::{debug, info};

use super::auth;
use super::db::{DbHandle, DeskDb};
use super::models::*;
use crate::errors::{HelpdeskError, HelpdeskResult};

const MAX_NAME_LEN: usize = 200;
const MAX_PHONE_LEN: usize = 50;
const MAX_USERNAME_LEN: usize = 150;

// ── Validation helpers ────────────────────────────────────────────────

fn required(field: &'static str, value: &str) -> HelpdeskResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(HelpdeskError::validation(field, "must not be empty"));
    }
    Ok(value.to_string())
}

fn bounded(field: &'static str, value: &str, max: usize) -> HelpdeskResult<String> {
    let value = required(field, value)?;
    check_len(field, &value, max)?;
    Ok(value)
}

fn check_len(field: &'static str, value: &str, max: usize) -> HelpdeskResult<()> {
    if value.chars().count() > max {
        return Err(HelpdeskError::validation(
            field,
            format!("must be at most {} characters", max),
        ));
    }
    Ok(())
}

fn check_email(field: &'static str, value: &str) -> HelpdeskResult<String> {
    let value = value.trim();
    if !value.is_empty() && !value.contains('@') {
        return Err(HelpdeskError::validation(field, "is not an email address"));
    }
    Ok(value.to_string())
}

/// The ticket with `id`, if the actor is allowed to see it. Tickets outside
/// the actor's scope are reported as missing.
fn visible_ticket(db: &DeskDb, actor: &Actor, id: i64) -> HelpdeskResult<Ticket> {
    db.get_ticket(id)?
        .filter(|ticket| policy::can_view_ticket(actor, &ticket.facts()))
        .ok_or(HelpdeskError::not_found("Ticket", id))
}

/// An active developer who may be put on a ticket.
fn assignable_developer(db: &DeskDb, id: i64) -> HelpdeskResult<User> {
    match db.get_user(id)? {
        Some(user) if user.role == Role::Developer && user.is_active => Ok(user),
        _ => Err(HelpdeskError::validation(
            "assignee_id",
            format!("user {} is not an active developer", id),
        )),
    }
}

// ── Authentication ────────────────────────────────────────────────────

/// Check credentials and open a session. Unknown users, inactive users and
/// wrong passwords are indistinguishable to the caller, and each costs one
/// password verification.
///
/// Unlike the other operations this runs in three steps: the lookup and
/// the session insert each take the database lock, the argon2 check in
/// between runs on its own blocking task.
pub async fn login(
    db: &DbHandle,
    username: &str,
    password: &str,
    session_ttl_hours: u32,
) -> HelpdeskResult<LoginResponse> {
    let lookup = username.trim().to_string();
    let found = db
        .call(move |db| Ok(db.find_user_credentials(&lookup)?))
        .await?;
    let (user, hash) = match found {
        Some((user, hash)) if user.is_active => (Some(user), hash),
        _ => (None, auth::dummy_hash().to_string()),
    };
    let verified = auth::verify_password_async(password.to_string(), hash).await?;
    let user = match user {
        Some(user) if verified => user,
        _ => {
            debug!(username = %username, "Rejected login");
            return Err(HelpdeskError::Unauthorized);
        }
    };

    let expires_at = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(i64::from(session_ttl_hours)))
        .context("Session lifetime out of range")?
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let token = auth::new_session_token();
    let digest = auth::token_digest(&token);
    let (user_id, expiry) = (user.id, expires_at.clone());
    db.call(move |db| Ok(db.create_session(&digest, user_id, &expiry)?))
        .await?;
    info!(user_id = user.id, username = %user.username, "User logged in");

    Ok(LoginResponse {
        token,
        expires_at,
        user,
    })
}

pub fn logout(db: &DeskDb, token_hash: &str) -> HelpdeskResult<()> {
    db.delete_session(token_hash)?;
    Ok(())
}

// ── Tickets ───────────────────────────────────────────────────────────

/// One page (1-based) of the tickets the actor may see, newest first.
pub fn list_tickets(
    db: &DeskDb,
    actor: &Actor,
    filter: &TicketFilter,
    page: u32,
    page_size: u32,
) -> HelpdeskResult<TicketPage> {
    let page = page.max(1);
    let offset = (page - 1).saturating_mul(page_size);
    let (items, total) = db.list_tickets(TicketScope::for_actor(actor), filter, page_size, offset)?;
    Ok(TicketPage {
        items,
        page,
        page_size,
        total,
    })
}

pub fn get_ticket(db: &DeskDb, actor: &Actor, id: i64) -> HelpdeskResult<TicketDetail> {
    let ticket = visible_ticket(db, actor, id)?;
    let comments = db.list_comments(id)?;
    Ok(TicketDetail { ticket, comments })
}

pub fn create_ticket(db: &DeskDb, actor: &Actor, input: NewTicket) -> HelpdeskResult<Ticket> {
    policy::check_create_ticket(actor)?;
    let title = bounded("title", &input.title, MAX_NAME_LEN)?;
    let description = required("description", &input.description)?;

    let client = db.get_client(input.client_id)?.ok_or_else(|| {
        HelpdeskError::validation("client_id", format!("client {} does not exist", input.client_id))
    })?;
    let project = db.get_project(input.project_id)?.ok_or_else(|| {
        HelpdeskError::validation(
            "project_id",
            format!("project {} does not exist", input.project_id),
        )
    })?;
    if project.client_id != client.id {
        return Err(HelpdeskError::validation(
            "project_id",
            format!("project {} does not belong to client {}", project.name, client.name),
        ));
    }

    let assignee = match input.assignee_id {
        Some(id) if policy::accepts_assignee_on_create(actor) => Some(assignable_developer(db, id)?),
        Some(id) => {
            debug!(assignee_id = id, "Ignoring assignee supplied by {}", actor.username);
            None
        }
        None => None,
    };

    let ticket = db.create_ticket(
        &title,
        &description,
        client.id,
        project.id,
        actor.id,
        assignee.map(|user| user.id),
        input.priority.unwrap_or_default(),
    )?;
    info!(ticket_id = ticket.id, reporter = %actor.username, "Ticket created");
    Ok(ticket)
}

pub fn update_ticket(
    db: &DeskDb,
    actor: &Actor,
    id: i64,
    changes: TicketChanges,
) -> HelpdeskResult<Ticket> {
    let ticket = visible_ticket(db, actor, id)?;
    policy::check_edit_ticket(actor, &ticket.facts())?;

    let title = changes
        .title
        .as_deref()
        .map(|t| bounded("title", t, MAX_NAME_LEN))
        .transpose()?;
    let description = changes
        .description
        .as_deref()
        .map(|d| required("description", d))
        .transpose()?;
    if title.is_none() && description.is_none() && changes.priority.is_none() {
        return Ok(ticket);
    }

    Ok(db.update_ticket(id, title.as_deref(), description.as_deref(), changes.priority)?)
}

/// Put a developer on an open ticket, or take everyone off it with `None`.
pub fn assign_ticket(
    db: &DeskDb,
    actor: &Actor,
    id: i64,
    assignee_id: Option<i64>,
) -> HelpdeskResult<Ticket> {
    let ticket = visible_ticket(db, actor, id)?;
    policy::check_assign(actor, &ticket.facts())?;
    let assignee = assignee_id
        .map(|user_id| assignable_developer(db, user_id))
        .transpose()?;

    db.transaction(|db| -> HelpdeskResult<Ticket> {
        let updated = db.set_ticket_assignee(id, assignee.as_ref().map(|user| user.id))?;
        let note = match &assignee {
            Some(user) => format!("Assigned to {} by {}", user.username, actor.username),
            None => format!("Unassigned by {}", actor.username),
        };
        db.add_comment(id, actor.id, &note, true)?;
        info!(ticket_id = id, assignee = ?assignee_id, "Ticket assignment changed");
        Ok(updated)
    })
}

/// Apply a workflow transition and record it as a system comment.
pub fn transition_ticket(
    db: &DeskDb,
    actor: &Actor,
    id: i64,
    transition: Transition,
) -> HelpdeskResult<Ticket> {
    let ticket = visible_ticket(db, actor, id)?;
    let target = policy::check_transition(actor, &ticket.facts(), transition)?;

    db.transaction(|db| -> HelpdeskResult<Ticket> {
        // Starting an unclaimed ticket claims it.
        if transition == Transition::Start
            && ticket.assignee_id.is_none()
            && actor.role.is_developer()
        {
            db.set_ticket_assignee(id, Some(actor.id))?;
            db.add_comment(
                id,
                actor.id,
                &format!("Assigned to {} by {}", actor.username, actor.username),
                true,
            )?;
        }
        let updated = db.set_ticket_status(id, target)?;
        db.add_comment(
            id,
            actor.id,
            &format!(
                "Status changed from {} to {} by {}",
                ticket.status.label(),
                target.label(),
                actor.username
            ),
            true,
        )?;
        info!(ticket_id = id, from = %ticket.status, to = %target, "Ticket status changed");
        Ok(updated)
    })
}

pub fn add_comment(db: &DeskDb, actor: &Actor, id: i64, body: &str) -> HelpdeskResult<Comment> {
    visible_ticket(db, actor, id)?;
    let body = required("body", body)?;
    Ok(db.add_comment(id, actor.id, &body, false)?)
}

// ── Dashboard ─────────────────────────────────────────────────────────

pub fn dashboard(db: &DeskDb, actor: &Actor) -> HelpdeskResult<Dashboard> {
    let scope = TicketScope::for_actor(actor);
    let by_status = db.count_tickets_by_status(scope)?;
    let by_priority = db.count_tickets_by_priority(scope)?;

    let total_tickets = by_status.iter().map(|(_, count)| count).sum();
    let processed_tickets = by_status
        .iter()
        .filter(|(status, _)| status.is_processed())
        .map(|(_, count)| count)
        .sum();

    let tickets_by_priority = Priority::BY_URGENCY
        .iter()
        .filter_map(|priority| {
            by_priority
                .iter()
                .find(|(p, _)| p == priority)
                .map(|(p, count)| CodeCount {
                    code: p.as_str().to_string(),
                    label: p.label().to_string(),
                    count: *count,
                })
        })
        .collect();
    let tickets_by_status = TicketStatus::ALL
        .iter()
        .filter_map(|status| {
            by_status
                .iter()
                .find(|(s, _)| s == status)
                .map(|(s, count)| CodeCount {
                    code: s.as_str().to_string(),
                    label: s.label().to_string(),
                    count: *count,
                })
        })
        .collect();

    Ok(Dashboard {
        total_tickets,
        processed_tickets,
        tickets_by_priority,
        tickets_by_status,
    })
}

// ── Clients ───────────────────────────────────────────────────────────

pub fn list_clients(db: &DeskDb, actor: &Actor) -> HelpdeskResult<Vec<Client>> {
    policy::check_manage_clients(actor)?;
    Ok(db.list_clients()?)
}

pub fn get_client(db: &DeskDb, actor: &Actor, id: i64) -> HelpdeskResult<ClientDetail> {
    policy::check_manage_clients(actor)?;
    let client = db
        .get_client(id)?
        .ok_or(HelpdeskError::not_found("Client", id))?;
    let projects = db.list_projects(Some(id))?;
    Ok(ClientDetail { client, projects })
}

fn ensure_client_name_free(db: &DeskDb, name: &str, except: Option<i64>) -> HelpdeskResult<()> {
    match db.find_client_by_name(name)? {
        Some(existing) if Some(existing.id) != except => Err(HelpdeskError::validation(
            "name",
            format!("a client named {} already exists", name),
        )),
        _ => Ok(()),
    }
}

pub fn create_client(db: &DeskDb, actor: &Actor, input: NewClient) -> HelpdeskResult<Client> {
    policy::check_manage_clients(actor)?;
    let name = bounded("name", &input.name, MAX_NAME_LEN)?;
    let email = check_email("contact_email", &input.contact_email)?;
    let phone = input.contact_phone.trim().to_string();
    check_len("contact_phone", &phone, MAX_PHONE_LEN)?;
    ensure_client_name_free(db, &name, None)?;

    let client = db.create_client(&name, &email, &phone)?;
    info!(client_id = client.id, name = %client.name, "Client created");
    Ok(client)
}

pub fn update_client(
    db: &DeskDb,
    actor: &Actor,
    id: i64,
    changes: ClientChanges,
) -> HelpdeskResult<Client> {
    policy::check_manage_clients(actor)?;
    if db.get_client(id)?.is_none() {
        return Err(HelpdeskError::not_found("Client", id));
    }
    let name = changes
        .name
        .as_deref()
        .map(|n| bounded("name", n, MAX_NAME_LEN))
        .transpose()?;
    if let Some(name) = &name {
        ensure_client_name_free(db, name, Some(id))?;
    }
    let email = changes
        .contact_email
        .as_deref()
        .map(|e| check_email("contact_email", e))
        .transpose()?;
    let phone = changes.contact_phone.as_deref().map(|p| p.trim().to_string());
    if let Some(phone) = &phone {
        check_len("contact_phone", phone, MAX_PHONE_LEN)?;
    }

    Ok(db.update_client(id, name.as_deref(), email.as_deref(), phone.as_deref())?)
}

pub fn delete_client(db: &DeskDb, actor: &Actor, id: i64) -> HelpdeskResult<()> {
    policy::check_staff(actor)?;
    let client = db
        .get_client(id)?
        .ok_or(HelpdeskError::not_found("Client", id))?;
    let tickets = db.count_tickets_for_client(id)?;
    if tickets > 0 {
        return Err(HelpdeskError::Conflict(format!(
            "Client {} still has {} ticket(s)",
            client.name, tickets
        )));
    }
    db.delete_client(id)?;
    info!(client_id = id, "Client deleted");
    Ok(())
}

// ── Projects ──────────────────────────────────────────────────────────

pub fn list_projects(
    db: &DeskDb,
    actor: &Actor,
    client_id: Option<i64>,
) -> HelpdeskResult<Vec<Project>> {
    if actor.role.is_client() && !actor.is_staff {
        return match (actor.client_id, client_id) {
            (None, _) => Ok(Vec::new()),
            (Some(own), Some(requested)) if own != requested => Ok(Vec::new()),
            (Some(own), _) => Ok(db.list_projects(Some(own))?),
        };
    }
    Ok(db.list_projects(client_id)?)
}

pub fn get_project(db: &DeskDb, actor: &Actor, id: i64) -> HelpdeskResult<Project> {
    db.get_project(id)?
        .filter(|project| policy::can_view_project(actor, project.client_id))
        .ok_or(HelpdeskError::not_found("Project", id))
}

pub fn create_project(db: &DeskDb, actor: &Actor, input: NewProject) -> HelpdeskResult<Project> {
    policy::check_manage_projects(actor)?;
    let name = bounded("name", &input.name, MAX_NAME_LEN)?;
    if db.get_client(input.client_id)?.is_none() {
        return Err(HelpdeskError::validation(
            "client_id",
            format!("client {} does not exist", input.client_id),
        ));
    }
    if db.project_name_taken(input.client_id, &name, None)? {
        return Err(HelpdeskError::validation(
            "name",
            format!("this client already has a project named {}", name),
        ));
    }

    let project = db.create_project(input.client_id, &name, input.description.trim())?;
    info!(project_id = project.id, name = %project.name, "Project created");
    Ok(project)
}

pub fn update_project(
    db: &DeskDb,
    actor: &Actor,
    id: i64,
    changes: ProjectChanges,
) -> HelpdeskResult<Project> {
    policy::check_manage_projects(actor)?;
    let project = db
        .get_project(id)?
        .ok_or(HelpdeskError::not_found("Project", id))?;
    let name = changes
        .name
        .as_deref()
        .map(|n| bounded("name", n, MAX_NAME_LEN))
        .transpose()?;
    if let Some(name) = &name {
        if db.project_name_taken(project.client_id, name, Some(id))? {
            return Err(HelpdeskError::validation(
                "name",
                format!("this client already has a project named {}", name),
            ));
        }
    }
    let description = changes.description.as_deref().map(str::trim);

    Ok(db.update_project(id, name.as_deref(), description)?)
}

pub fn delete_project(db: &DeskDb, actor: &Actor, id: i64) -> HelpdeskResult<()> {
    policy::check_staff(actor)?;
    let project = db
        .get_project(id)?
        .ok_or(HelpdeskError::not_found("Project", id))?;
    let tickets = db.count_tickets_for_project(id)?;
    if tickets > 0 {
        return Err(HelpdeskError::Conflict(format!(
            "Project {} still has {} ticket(s)",
            project.name, tickets
        )));
    }
    db.delete_project(id)?;
    info!(project_id = id, "Project deleted");
    Ok(())
}

// ── Users ─────────────────────────────────────────────────────────────

pub fn list_users(
    db: &DeskDb,
    actor: &Actor,
    role: Option<Role>,
    active_only: bool,
) -> HelpdeskResult<Vec<User>> {
    policy::check_list_users(actor)?;
    Ok(db.list_users(role, active_only)?)
}

/// Create an account on behalf of a staff member. The password is hashed
/// before the database lock is taken.
pub async fn create_user(db: &DbHandle, actor: &Actor, input: NewUser) -> HelpdeskResult<User> {
    policy::check_staff(actor)?;
    check_password(&input.password)?;
    let hash = auth::hash_password_async(input.password.clone()).await?;
    db.call(move |db| insert_user(db, input, &hash)).await
}

/// Create an account without an acting user. Used by the `user create`
/// command, which owns its database outright.
pub fn register_user(db: &DeskDb, input: NewUser) -> HelpdeskResult<User> {
    check_password(&input.password)?;
    let hash = auth::hash_password(&input.password)?;
    insert_user(db, input, &hash)
}

fn check_password(password: &str) -> HelpdeskResult<()> {
    if password.is_empty() {
        return Err(HelpdeskError::validation("password", "must not be empty"));
    }
    Ok(())
}

fn insert_user(db: &DeskDb, input: NewUser, password_hash: &str) -> HelpdeskResult<User> {
    let username = bounded("username", &input.username, MAX_USERNAME_LEN)?;
    if username.chars().any(char::is_whitespace) {
        return Err(HelpdeskError::validation("username", "must not contain spaces"));
    }
    if db.username_exists(&username)? {
        return Err(HelpdeskError::validation(
            "username",
            format!("{} is already taken", username),
        ));
    }
    let email = check_email("email", &input.email)?;
    if let Some(client_id) = input.client_id {
        check_client_exists(db, client_id)?;
    }

    let user = db.create_user(
        &username,
        &email,
        input.role,
        password_hash,
        input.is_staff,
        input.client_id,
    )?;
    info!(user_id = user.id, username = %user.username, role = %user.role, "User created");
    Ok(user)
}

fn check_client_exists(db: &DeskDb, client_id: i64) -> HelpdeskResult<()> {
    if db.get_client(client_id)?.is_none() {
        return Err(HelpdeskError::validation(
            "client_id",
            format!("client {} does not exist", client_id),
        ));
    }
    Ok(())
}

/// Staff edit of an account: contact, role, staff flag, client link,
/// activity and password. Deactivating an account or changing its
/// password ends its open sessions.
pub async fn update_user(
    db: &DbHandle,
    actor: &Actor,
    id: i64,
    changes: UserChanges,
) -> HelpdeskResult<User> {
    policy::check_staff(actor)?;
    if id == actor.id && changes.is_active == Some(false) {
        return Err(HelpdeskError::validation(
            "is_active",
            "you cannot deactivate your own account",
        ));
    }
    let password_hash = match &changes.password {
        Some(password) => {
            check_password(password)?;
            Some(auth::hash_password_async(password.clone()).await?)
        }
        None => None,
    };
    db.call(move |db| apply_user_changes(db, id, changes, password_hash))
        .await
}

fn apply_user_changes(
    db: &DeskDb,
    id: i64,
    changes: UserChanges,
    password_hash: Option<String>,
) -> HelpdeskResult<User> {
    db.get_user(id)?.ok_or(HelpdeskError::not_found("User", id))?;
    let email = changes
        .email
        .as_deref()
        .map(|email| check_email("email", email))
        .transpose()?;
    if let Some(Some(client_id)) = changes.client_id {
        check_client_exists(db, client_id)?;
    }

    let user = db.transaction(|db| -> HelpdeskResult<User> {
        if let Some(is_active) = changes.is_active {
            db.set_user_active(id, is_active)?;
        }
        if let Some(hash) = &password_hash {
            db.set_password_hash(id, hash)?;
        }
        if changes.is_active == Some(false) || password_hash.is_some() {
            db.delete_user_sessions(id)?;
        }
        Ok(db.update_user(
            id,
            email.as_deref(),
            changes.role,
            changes.is_staff,
            changes.client_id,
        )?)
    })?;
    info!(user_id = id, active = user.is_active, "User updated");
    Ok(user)
}

/// Switch an account on or off by username. Used by the `user activate`
/// and `user deactivate` commands.
pub fn set_account_active(db: &DeskDb, username: &str, is_active: bool) -> HelpdeskResult<User> {
    let user = db
        .find_user_by_username(username.trim())?
        .ok_or_else(|| {
            HelpdeskError::validation("username", format!("no user named {}", username.trim()))
        })?;
    db.transaction(|db| -> HelpdeskResult<()> {
        db.set_user_active(user.id, is_active)?;
        if !is_active {
            db.delete_user_sessions(user.id)?;
        }
        Ok(())
    })?;
    info!(user_id = user.id, active = is_active, "User activity changed");
    Ok(User { is_active, ..user })
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Desk {
        db: DeskDb,
        client: Client,
        project: Project,
        reporter: Actor,
        developer: Actor,
    }

    fn actor_of(user: &User) -> Actor {
        Actor {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            is_staff: user.is_staff,
            client_id: user.client_id,
        }
    }

    fn add_user(db: &DeskDb, name: &str, role: Role, client_id: Option<i64>) -> Actor {
        let user = db.create_user(name, "", role, "!", false, client_id).unwrap();
        actor_of(&user)
    }

    fn desk() -> Desk {
        let db = DeskDb::new_in_memory().unwrap();
        let client = db.create_client("Acme", "", "").unwrap();
        let project = db.create_project(client.id, "Portal", "").unwrap();
        let reporter = add_user(&db, "rita", Role::Reporter, None);
        let developer = add_user(&db, "dev", Role::Developer, None);
        Desk {
            db,
            client,
            project,
            reporter,
            developer,
        }
    }

    fn staff(db: &DeskDb) -> Actor {
        let user = db
            .create_user("admin", "", Role::Client, "!", true, None)
            .unwrap();
        actor_of(&user)
    }

    fn file_ticket(d: &Desk) -> Ticket {
        create_ticket(
            &d.db,
            &d.reporter,
            NewTicket {
                title: "Login broken".into(),
                description: "Cannot sign in".into(),
                client_id: d.client.id,
                project_id: d.project.id,
                priority: None,
                assignee_id: None,
            },
        )
        .unwrap()
    }

    fn system_comments(d: &Desk, ticket_id: i64) -> Vec<String> {
        d.db.list_comments(ticket_id)
            .unwrap()
            .into_iter()
            .filter(|c| c.is_system)
            .map(|c| c.body)
            .collect()
    }

    #[test]
    fn reporter_files_ticket_as_themselves() {
        let d = desk();
        let ticket = file_ticket(&d);
        assert_eq!(ticket.reporter_id, d.reporter.id);
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.priority, Priority::Medium);
    }

    #[test]
    fn only_reporters_create_tickets() {
        let d = desk();
        let err = create_ticket(
            &d.db,
            &d.developer,
            NewTicket {
                title: "x".into(),
                description: "y".into(),
                client_id: d.client.id,
                project_id: d.project.id,
                priority: None,
                assignee_id: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, HelpdeskError::Forbidden(_)));
    }

    #[test]
    fn ticket_requires_title_and_description() {
        let d = desk();
        let err = create_ticket(
            &d.db,
            &d.reporter,
            NewTicket {
                title: "   ".into(),
                description: "y".into(),
                client_id: d.client.id,
                project_id: d.project.id,
                priority: None,
                assignee_id: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, HelpdeskError::Validation { field: "title", .. }));
    }

    #[test]
    fn project_must_belong_to_client() {
        let d = desk();
        let other = d.db.create_client("Other", "", "").unwrap();
        let err = create_ticket(
            &d.db,
            &d.reporter,
            NewTicket {
                title: "x".into(),
                description: "y".into(),
                client_id: other.id,
                project_id: d.project.id,
                priority: None,
                assignee_id: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, HelpdeskError::Validation { field: "project_id", .. }));
    }

    #[test]
    fn assignee_on_create_must_be_active_developer() {
        let d = desk();
        let new_ticket = |assignee_id| NewTicket {
            title: "x".into(),
            description: "y".into(),
            client_id: d.client.id,
            project_id: d.project.id,
            priority: Some(Priority::High),
            assignee_id: Some(assignee_id),
        };

        let ticket = create_ticket(&d.db, &d.reporter, new_ticket(d.developer.id)).unwrap();
        assert_eq!(ticket.assignee_id, Some(d.developer.id));
        assert_eq!(ticket.priority, Priority::High);

        let err = create_ticket(&d.db, &d.reporter, new_ticket(d.reporter.id)).unwrap_err();
        assert!(matches!(err, HelpdeskError::Validation { field: "assignee_id", .. }));

        d.db.set_user_active(d.developer.id, false).unwrap();
        let err = create_ticket(&d.db, &d.reporter, new_ticket(d.developer.id)).unwrap_err();
        assert!(matches!(err, HelpdeskError::Validation { field: "assignee_id", .. }));
    }

    #[test]
    fn reporter_sees_only_their_tickets() {
        let d = desk();
        let mine = file_ticket(&d);
        let other = add_user(&d.db, "otto", Role::Reporter, None);

        assert!(matches!(
            get_ticket(&d.db, &other, mine.id),
            Err(HelpdeskError::NotFound { kind: "Ticket", .. })
        ));
        let page = list_tickets(&d.db, &other, &TicketFilter::default(), 1, 20).unwrap();
        assert_eq!(page.total, 0);

        let page = list_tickets(&d.db, &d.reporter, &TicketFilter::default(), 1, 20).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.page, 1);
    }

    #[test]
    fn client_user_sees_tickets_of_their_client() {
        let d = desk();
        let ticket = file_ticket(&d);
        let linked = add_user(&d.db, "carl", Role::Client, Some(d.client.id));
        let unlinked = add_user(&d.db, "cora", Role::Client, None);

        assert_eq!(get_ticket(&d.db, &linked, ticket.id).unwrap().ticket.id, ticket.id);
        assert!(get_ticket(&d.db, &unlinked, ticket.id).is_err());
    }

    #[test]
    fn client_cannot_close_ticket() {
        let d = desk();
        let ticket = file_ticket(&d);
        let client_user = add_user(&d.db, "carl", Role::Client, Some(d.client.id));
        let err = transition_ticket(&d.db, &client_user, ticket.id, Transition::Close).unwrap_err();
        match err {
            HelpdeskError::Forbidden(msg) => assert_eq!(msg, "You cannot close this ticket"),
            other => panic!("Expected Forbidden, got {:?}", other),
        }
    }

    #[test]
    fn full_lifecycle_writes_system_comments() {
        let d = desk();
        let ticket = file_ticket(&d);

        let started = transition_ticket(&d.db, &d.developer, ticket.id, Transition::Start).unwrap();
        assert_eq!(started.status, TicketStatus::InProgress);
        assert_eq!(started.assignee_id, Some(d.developer.id));

        transition_ticket(&d.db, &d.developer, ticket.id, Transition::Resolve).unwrap();
        let closed = transition_ticket(&d.db, &d.developer, ticket.id, Transition::Close).unwrap();
        assert!(closed.closed_at.is_some());

        let reopened = transition_ticket(&d.db, &d.reporter, ticket.id, Transition::Reopen).unwrap();
        assert_eq!(reopened.status, TicketStatus::Open);
        assert!(reopened.closed_at.is_none());

        assert_eq!(
            system_comments(&d, ticket.id),
            [
                "Assigned to dev by dev",
                "Status changed from Open to In progress by dev",
                "Status changed from In progress to Resolved by dev",
                "Status changed from Resolved to Closed by dev",
                "Status changed from Closed to Open by rita",
            ]
        );
    }

    #[test]
    fn invalid_transition_leaves_ticket_untouched() {
        let d = desk();
        let ticket = file_ticket(&d);
        let err = transition_ticket(&d.db, &d.developer, ticket.id, Transition::Resolve).unwrap_err();
        assert!(matches!(err, HelpdeskError::InvalidTransition { .. }));
        assert!(system_comments(&d, ticket.id).is_empty());
        assert_eq!(d.db.get_ticket(ticket.id).unwrap().unwrap().status, TicketStatus::Open);
    }

    #[test]
    fn assigning_non_open_ticket_conflicts() {
        let d = desk();
        let ticket = file_ticket(&d);
        transition_ticket(&d.db, &d.developer, ticket.id, Transition::Start).unwrap();
        let err = assign_ticket(&d.db, &d.developer, ticket.id, None).unwrap_err();
        assert!(matches!(err, HelpdeskError::Conflict(_)));
    }

    #[test]
    fn assign_and_unassign_are_audited() {
        let d = desk();
        let ticket = file_ticket(&d);
        let assigned = assign_ticket(&d.db, &d.reporter, ticket.id, Some(d.developer.id)).unwrap();
        assert_eq!(assigned.assignee_id, Some(d.developer.id));
        let cleared = assign_ticket(&d.db, &d.reporter, ticket.id, None).unwrap();
        assert!(cleared.assignee_id.is_none());
        assert_eq!(
            system_comments(&d, ticket.id),
            ["Assigned to dev by rita", "Unassigned by rita"]
        );
    }

    #[test]
    fn update_ticket_checks_editor() {
        let d = desk();
        let ticket = file_ticket(&d);
        let changed = update_ticket(
            &d.db,
            &d.developer,
            ticket.id,
            TicketChanges {
                priority: Some(Priority::Urgent),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(changed.priority, Priority::Urgent);
        assert_eq!(changed.title, ticket.title);

        let client_user = add_user(&d.db, "carl", Role::Client, Some(d.client.id));
        let err = update_ticket(&d.db, &client_user, ticket.id, TicketChanges::default()).unwrap_err();
        assert!(matches!(err, HelpdeskError::Forbidden(_)));
    }

    #[test]
    fn comments_require_visibility_and_body() {
        let d = desk();
        let ticket = file_ticket(&d);
        let comment = add_comment(&d.db, &d.developer, ticket.id, "  On it  ").unwrap();
        assert_eq!(comment.body, "On it");
        assert!(!comment.is_system);

        assert!(matches!(
            add_comment(&d.db, &d.developer, ticket.id, " "),
            Err(HelpdeskError::Validation { field: "body", .. })
        ));
        let stranger = add_user(&d.db, "otto", Role::Reporter, None);
        assert!(matches!(
            add_comment(&d.db, &stranger, ticket.id, "hi"),
            Err(HelpdeskError::NotFound { .. })
        ));
    }

    #[test]
    fn dashboard_orders_and_scopes_counts() {
        let d = desk();
        let a = file_ticket(&d);
        let b = file_ticket(&d);
        update_ticket(
            &d.db,
            &d.developer,
            b.id,
            TicketChanges {
                priority: Some(Priority::Urgent),
                ..Default::default()
            },
        )
        .unwrap();
        transition_ticket(&d.db, &d.developer, a.id, Transition::Close).unwrap();

        let board = dashboard(&d.db, &d.developer).unwrap();
        assert_eq!(board.total_tickets, 2);
        assert_eq!(board.processed_tickets, 1);
        let priorities: Vec<&str> = board.tickets_by_priority.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(priorities, ["URG", "MED"]);
        let statuses: Vec<&str> = board.tickets_by_status.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(statuses, ["OPEN", "CLO"]);
        assert_eq!(board.tickets_by_status[1].label, "Closed");

        let outsider = add_user(&d.db, "otto", Role::Reporter, None);
        assert_eq!(dashboard(&d.db, &outsider).unwrap().total_tickets, 0);
    }

    #[test]
    fn dashboard_lists_every_priority_and_status_in_order() {
        let d = desk();
        let tickets: Vec<Ticket> = (0..4).map(|_| file_ticket(&d)).collect();
        let priorities = [Priority::High, Priority::Low, Priority::Urgent, Priority::Medium];
        for (ticket, priority) in tickets.iter().zip(priorities) {
            update_ticket(
                &d.db,
                &d.developer,
                ticket.id,
                TicketChanges {
                    priority: Some(priority),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        transition_ticket(&d.db, &d.developer, tickets[0].id, Transition::Close).unwrap();
        transition_ticket(&d.db, &d.developer, tickets[1].id, Transition::Start).unwrap();
        transition_ticket(&d.db, &d.developer, tickets[2].id, Transition::Start).unwrap();
        transition_ticket(&d.db, &d.developer, tickets[2].id, Transition::Resolve).unwrap();

        let board = dashboard(&d.db, &d.developer).unwrap();
        assert_eq!(board.total_tickets, 4);
        assert_eq!(board.processed_tickets, 2);
        let priorities: Vec<&str> = board.tickets_by_priority.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(priorities, ["URG", "HIG", "MED", "LOW"]);
        let statuses: Vec<&str> = board.tickets_by_status.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(statuses, ["OPEN", "WIP", "RES", "CLO"]);
        assert!(board.tickets_by_status.iter().all(|c| c.count == 1));
    }

    #[test]
    fn staff_without_developer_role_drive_the_workflow() {
        let d = desk();
        let ticket = file_ticket(&d);
        let admin = staff(&d.db);

        let started = transition_ticket(&d.db, &admin, ticket.id, Transition::Start).unwrap();
        assert_eq!(started.status, TicketStatus::InProgress);
        // Only developers claim the tickets they start.
        assert!(started.assignee_id.is_none());
        transition_ticket(&d.db, &admin, ticket.id, Transition::Resolve).unwrap();
        let closed = transition_ticket(&d.db, &admin, ticket.id, Transition::Close).unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(
            system_comments(&d, ticket.id).last().map(String::as_str),
            Some("Status changed from Resolved to Closed by admin")
        );

        let other = file_ticket(&d);
        assert!(matches!(
            transition_ticket(&d.db, &d.reporter, other.id, Transition::Start),
            Err(HelpdeskError::Forbidden(_))
        ));
    }

    #[test]
    fn client_names_are_unique() {
        let d = desk();
        let err = create_client(
            &d.db,
            &d.reporter,
            NewClient {
                name: "Acme".into(),
                contact_email: String::new(),
                contact_phone: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, HelpdeskError::Validation { field: "name", .. }));

        let renamed = update_client(
            &d.db,
            &d.reporter,
            d.client.id,
            ClientChanges {
                name: Some("Acme".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(renamed.name, "Acme");
    }

    #[test]
    fn client_management_rights() {
        let d = desk();
        assert!(list_clients(&d.db, &d.developer).is_err());
        let detail = get_client(&d.db, &d.reporter, d.client.id).unwrap();
        assert_eq!(detail.projects.len(), 1);
        assert!(matches!(
            delete_client(&d.db, &d.reporter, d.client.id),
            Err(HelpdeskError::Forbidden(_))
        ));
    }

    #[test]
    fn referenced_records_cannot_be_deleted() {
        let d = desk();
        file_ticket(&d);
        let admin = staff(&d.db);
        assert!(matches!(
            delete_project(&d.db, &admin, d.project.id),
            Err(HelpdeskError::Conflict(_))
        ));
        assert!(matches!(
            delete_client(&d.db, &admin, d.client.id),
            Err(HelpdeskError::Conflict(_))
        ));
    }

    #[test]
    fn staff_deletes_unreferenced_client() {
        let d = desk();
        let admin = staff(&d.db);
        delete_client(&d.db, &admin, d.client.id).unwrap();
        assert!(d.db.get_project(d.project.id).unwrap().is_none());
    }

    #[test]
    fn project_rules() {
        let d = desk();
        let new_project = |name: &str| NewProject {
            client_id: d.client.id,
            name: name.into(),
            description: String::new(),
        };
        assert!(matches!(
            create_project(&d.db, &d.reporter, new_project("API")),
            Err(HelpdeskError::Forbidden(_))
        ));
        assert!(matches!(
            create_project(&d.db, &d.developer, new_project("Portal")),
            Err(HelpdeskError::Validation { field: "name", .. })
        ));
        let api = create_project(&d.db, &d.developer, new_project("API")).unwrap();
        assert!(matches!(
            update_project(
                &d.db,
                &d.developer,
                api.id,
                ProjectChanges {
                    name: Some("Portal".into()),
                    description: None
                }
            ),
            Err(HelpdeskError::Validation { .. })
        ));
    }

    #[test]
    fn client_user_sees_only_own_projects() {
        let d = desk();
        let other = d.db.create_client("Other", "", "").unwrap();
        let foreign = d.db.create_project(other.id, "Secret", "").unwrap();
        let client_user = add_user(&d.db, "carl", Role::Client, Some(d.client.id));

        let visible = list_projects(&d.db, &client_user, None).unwrap();
        assert_eq!(visible, vec![d.project.clone()]);
        assert!(list_projects(&d.db, &client_user, Some(other.id)).unwrap().is_empty());
        assert!(get_project(&d.db, &client_user, foreign.id).is_err());
        assert_eq!(list_projects(&d.db, &d.developer, None).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn login_opens_sessions_for_active_users_only() {
        let d = desk();
        let user = register_user(
            &d.db,
            NewUser {
                username: "nina".into(),
                email: "nina@acme.test".into(),
                role: Role::Developer,
                password: "pw".into(),
                is_staff: false,
                client_id: None,
            },
        )
        .unwrap();
        let db = DbHandle::new(d.db);

        let session = login(&db, " nina ", "pw", 1).await.unwrap();
        assert_eq!(session.user.id, user.id);
        let digest = auth::token_digest(&session.token);
        {
            let guard = db.lock_sync().unwrap();
            let found = guard.find_session_user(&digest).unwrap();
            assert_eq!(found.map(|u| u.id), Some(user.id));
            logout(&guard, &digest).unwrap();
            assert!(guard.find_session_user(&digest).unwrap().is_none());
        }

        assert!(matches!(login(&db, "nina", "nope", 1).await, Err(HelpdeskError::Unauthorized)));
        assert!(matches!(login(&db, "ghost", "pw", 1).await, Err(HelpdeskError::Unauthorized)));

        db.lock_sync().unwrap().set_user_active(user.id, false).unwrap();
        assert!(matches!(login(&db, "nina", "pw", 1).await, Err(HelpdeskError::Unauthorized)));
    }

    #[test]
    fn registration_validates_input() {
        let d = desk();
        let base = || NewUser {
            username: "rita".into(),
            email: String::new(),
            role: Role::Client,
            password: "pw".into(),
            is_staff: false,
            client_id: None,
        };
        assert!(matches!(
            register_user(&d.db, base()),
            Err(HelpdeskError::Validation { field: "username", .. })
        ));
        assert!(matches!(
            register_user(&d.db, NewUser { username: "new".into(), password: String::new(), ..base() }),
            Err(HelpdeskError::Validation { field: "password", .. })
        ));
        assert!(matches!(
            register_user(&d.db, NewUser { username: "new".into(), client_id: Some(999), ..base() }),
            Err(HelpdeskError::Validation { field: "client_id", .. })
        ));
    }

    fn new_developer(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: String::new(),
            role: Role::Developer,
            password: "pw".into(),
            is_staff: false,
            client_id: None,
        }
    }

    #[tokio::test]
    async fn only_staff_create_accounts() {
        let d = desk();
        let admin = staff(&d.db);
        let developer = d.developer.clone();
        let db = DbHandle::new(d.db);

        assert!(matches!(
            create_user(&db, &developer, new_developer("dora")).await,
            Err(HelpdeskError::Forbidden(_))
        ));
        let dora = create_user(&db, &admin, new_developer("dora")).await.unwrap();
        assert_eq!(dora.role, Role::Developer);
        assert!(matches!(
            create_user(&db, &admin, new_developer("dora")).await,
            Err(HelpdeskError::Validation { field: "username", .. })
        ));
        assert!(matches!(
            create_user(&db, &admin, NewUser { password: String::new(), ..new_developer("dan") }).await,
            Err(HelpdeskError::Validation { field: "password", .. })
        ));
        assert_eq!(login(&db, "dora", "pw", 1).await.unwrap().user.id, dora.id);
    }

    #[tokio::test]
    async fn staff_edit_accounts_and_deactivation_ends_sessions() {
        let d = desk();
        let admin = staff(&d.db);
        let globex = d.db.create_client("Globex", "", "").unwrap();
        let carl = d
            .db
            .create_user("carl", "", Role::Client, &auth::hash_password("pw").unwrap(), false, Some(d.client.id))
            .unwrap();
        let reporter = d.reporter.clone();
        let db = DbHandle::new(d.db);
        let digest = auth::token_digest(&login(&db, "carl", "pw", 1).await.unwrap().token);

        assert!(matches!(
            update_user(&db, &reporter, carl.id, UserChanges::default()).await,
            Err(HelpdeskError::Forbidden(_))
        ));
        let moved = update_user(
            &db,
            &admin,
            carl.id,
            UserChanges {
                email: Some("carl@globex.test".into()),
                client_id: Some(Some(globex.id)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(moved.client_id, Some(globex.id));
        assert_eq!(moved.email, "carl@globex.test");
        assert_eq!(moved.role, Role::Client);

        assert!(matches!(
            update_user(&db, &admin, carl.id, UserChanges { client_id: Some(Some(999)), ..Default::default() }).await,
            Err(HelpdeskError::Validation { field: "client_id", .. })
        ));
        assert!(matches!(
            update_user(&db, &admin, 999, UserChanges::default()).await,
            Err(HelpdeskError::NotFound { kind: "User", .. })
        ));
        assert!(matches!(
            update_user(&db, &admin, admin.id, UserChanges { is_active: Some(false), ..Default::default() }).await,
            Err(HelpdeskError::Validation { field: "is_active", .. })
        ));

        let off = update_user(&db, &admin, carl.id, UserChanges { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert!(!off.is_active);
        assert!(matches!(login(&db, "carl", "pw", 1).await, Err(HelpdeskError::Unauthorized)));

        let back = update_user(
            &db,
            &admin,
            carl.id,
            UserChanges {
                is_active: Some(true),
                password: Some("fresh".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(back.is_active);
        // The session from before the deactivation stays dead.
        assert!(db.lock_sync().unwrap().find_session_user(&digest).unwrap().is_none());
        assert!(login(&db, "carl", "pw", 1).await.is_err());
        assert!(login(&db, "carl", "fresh", 1).await.is_ok());
    }

    #[test]
    fn accounts_switch_on_and_off_by_username() {
        let d = desk();
        d.db.create_session("s", d.developer.id, "2999-01-01 00:00:00").unwrap();

        let off = set_account_active(&d.db, "dev", false).unwrap();
        assert!(!off.is_active);
        assert!(!d.db.get_user(d.developer.id).unwrap().unwrap().is_active);

        let on = set_account_active(&d.db, "dev", true).unwrap();
        assert!(on.is_active);
        assert!(d.db.find_session_user("s").unwrap().is_none());

        assert!(matches!(
            set_account_active(&d.db, "ghost", false),
            Err(HelpdeskError::Validation { field: "username", .. })
        ));
    }

    #[test]
    fn user_listing_is_closed_to_clients() {
        let d = desk();
        let client_user = add_user(&d.db, "carl", Role::Client, None);
        assert!(list_users(&d.db, &client_user, None, false).is_err());
        let devs = list_users(&d.db, &d.reporter, Some(Role::Developer), true).unwrap();
        assert_eq!(devs.len(), 1);
        assert_eq!(devs[0].username, "dev");
    }
}

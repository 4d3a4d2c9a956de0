use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use helpdesk_common::{Priority, Role, TicketScope, TicketStatus};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::models::*;
use crate::errors::{HelpdeskError, HelpdeskResult};

/// Async-safe handle to the helpdesk database.
///
/// Wraps `DeskDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. One closure holds the lock
/// for its whole body, so a permission check and the write that follows
/// it cannot interleave with another request.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<DeskDb>>,
}

impl DbHandle {
    pub fn new(db: DeskDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> HelpdeskResult<R>
    where
        F: FnOnce(&DeskDb) -> HelpdeskResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| HelpdeskError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and
    /// tests; never from a request handler.
    pub fn lock_sync(&self) -> HelpdeskResult<std::sync::MutexGuard<'_, DeskDb>> {
        self.inner.lock().map_err(|_| HelpdeskError::LockPoisoned)
    }
}

pub struct DeskDb {
    conn: Connection,
}

const USER_COLUMNS: &str =
    "id, username, email, role, client_id, is_staff, is_active, date_joined";

const TICKET_COLUMNS: &str = "id, title, description, client_id, project_id, reporter_id, assignee_id, status, priority, created_at, updated_at, closed_at";

impl DeskDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS clients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    contact_email TEXT NOT NULL DEFAULT '',
                    contact_phone TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT NOT NULL DEFAULT '',
                    role TEXT NOT NULL DEFAULT 'CLI',
                    client_id INTEGER REFERENCES clients(id) ON DELETE SET NULL,
                    is_staff INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    password_hash TEXT NOT NULL,
                    date_joined TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    UNIQUE(client_id, name)
                );

                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE RESTRICT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE RESTRICT,
                    reporter_id INTEGER NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
                    assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    status TEXT NOT NULL DEFAULT 'OPEN',
                    priority TEXT NOT NULL DEFAULT 'MED',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    closed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
                    author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    body TEXT NOT NULL,
                    is_system INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token_hash TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    expires_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_projects_client ON projects(client_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_reporter ON tickets(reporter_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_client ON tickets(client_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
                CREATE INDEX IF NOT EXISTS idx_comments_ticket ON comments(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Run `f` inside a transaction; any error rolls everything back.
    pub fn transaction<R, E>(&self, f: impl FnOnce(&Self) -> Result<R, E>) -> Result<R, E>
    where
        E: From<anyhow::Error>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let out = f(self)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(out)
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        role: Role,
        password_hash: &str,
        is_staff: bool,
        client_id: Option<i64>,
    ) -> Result<User> {
        self.conn
            .execute(
                "INSERT INTO users (username, email, role, password_hash, is_staff, client_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![username, email, role.as_str(), password_hash, is_staff, client_id],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id],
                UserRow::read,
            )
            .optional()
            .context("Failed to query user")?;
        row.map(UserRow::into_user).transpose()
    }

    /// Look a user up by username, returning the stored password hash too.
    pub fn find_user_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}, password_hash FROM users WHERE username = ?1",
                    USER_COLUMNS
                ),
                params![username],
                |row| Ok((UserRow::read(row)?, row.get::<_, String>(8)?)),
            )
            .optional()
            .context("Failed to query user credentials")?;
        match row {
            Some((user, hash)) => Ok(Some((user.into_user()?, hash))),
            None => Ok(None),
        }
    }

    pub fn username_exists(&self, username: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .context("Failed to check username")?;
        Ok(count > 0)
    }

    pub fn list_users(&self, role: Option<Role>, active_only: bool) -> Result<Vec<User>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(role) = role {
            clauses.push("role = ?");
            values.push(Value::Text(role.as_str().to_string()));
        }
        if active_only {
            clauses.push("is_active = 1");
        }
        let sql = format!(
            "SELECT {} FROM users{} ORDER BY username",
            USER_COLUMNS,
            where_sql(&clauses)
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_users")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), UserRow::read)
            .context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?.into_user()?);
        }
        Ok(users)
    }

    pub fn set_user_active(&self, id: i64, is_active: bool) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET is_active = ?1 WHERE id = ?2",
                params![is_active, id],
            )
            .context("Failed to update user")?;
        Ok(())
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                params![username],
                UserRow::read,
            )
            .optional()
            .context("Failed to query user")?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn update_user(
        &self,
        id: i64,
        email: Option<&str>,
        role: Option<Role>,
        is_staff: Option<bool>,
        client_id: Option<Option<i64>>,
    ) -> Result<User> {
        if let Some(email) = email {
            self.conn
                .execute("UPDATE users SET email = ?1 WHERE id = ?2", params![email, id])
                .context("Failed to update user email")?;
        }
        if let Some(role) = role {
            self.conn
                .execute(
                    "UPDATE users SET role = ?1 WHERE id = ?2",
                    params![role.as_str(), id],
                )
                .context("Failed to update user role")?;
        }
        if let Some(is_staff) = is_staff {
            self.conn
                .execute(
                    "UPDATE users SET is_staff = ?1 WHERE id = ?2",
                    params![is_staff, id],
                )
                .context("Failed to update user staff flag")?;
        }
        if let Some(client_id) = client_id {
            self.conn
                .execute(
                    "UPDATE users SET client_id = ?1 WHERE id = ?2",
                    params![client_id, id],
                )
                .context("Failed to update user client")?;
        }
        self.get_user(id)?.context("User not found after update")
    }

    pub fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![password_hash, id],
            )
            .context("Failed to update password")?;
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────────

    /// `expires_at` uses SQLite's `YYYY-MM-DD HH:MM:SS` UTC format.
    pub fn create_session(&self, token_hash: &str, user_id: i64, expires_at: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token_hash, user_id, expires_at],
            )
            .context("Failed to insert session")?;
        Ok(())
    }

    /// The active user owning an unexpired session, if any.
    pub fn find_session_user(&self, token_hash: &str) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                "SELECT u.id, u.username, u.email, u.role, u.client_id, u.is_staff, u.is_active, u.date_joined
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1 AND s.expires_at > datetime('now') AND u.is_active = 1",
                params![token_hash],
                UserRow::read,
            )
            .optional()
            .context("Failed to query session")?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM sessions WHERE token_hash = ?1",
                params![token_hash],
            )
            .context("Failed to delete session")?;
        Ok(affected > 0)
    }

    /// Drop every session of a user (deactivation, password change).
    pub fn delete_user_sessions(&self, user_id: i64) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])
            .context("Failed to delete user sessions")
    }

    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE expires_at <= datetime('now')", [])
            .context("Failed to purge sessions")
    }

    // ── Clients ───────────────────────────────────────────────────────

    pub fn create_client(&self, name: &str, contact_email: &str, contact_phone: &str) -> Result<Client> {
        self.conn
            .execute(
                "INSERT INTO clients (name, contact_email, contact_phone) VALUES (?1, ?2, ?3)",
                params![name, contact_email, contact_phone],
            )
            .context("Failed to insert client")?;
        let id = self.conn.last_insert_rowid();
        self.get_client(id)?.context("Client not found after insert")
    }

    pub fn get_client(&self, id: i64) -> Result<Option<Client>> {
        self.conn
            .query_row(
                "SELECT id, name, contact_email, contact_phone FROM clients WHERE id = ?1",
                params![id],
                read_client,
            )
            .optional()
            .context("Failed to query client")
    }

    pub fn find_client_by_name(&self, name: &str) -> Result<Option<Client>> {
        self.conn
            .query_row(
                "SELECT id, name, contact_email, contact_phone FROM clients WHERE name = ?1",
                params![name],
                read_client,
            )
            .optional()
            .context("Failed to query client by name")
    }

    pub fn list_clients(&self) -> Result<Vec<Client>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, contact_email, contact_phone FROM clients ORDER BY name")
            .context("Failed to prepare list_clients")?;
        let rows = stmt.query_map([], read_client).context("Failed to query clients")?;
        let mut clients = Vec::new();
        for row in rows {
            clients.push(row.context("Failed to read client row")?);
        }
        Ok(clients)
    }

    pub fn update_client(
        &self,
        id: i64,
        name: Option<&str>,
        contact_email: Option<&str>,
        contact_phone: Option<&str>,
    ) -> Result<Client> {
        if let Some(name) = name {
            self.conn
                .execute("UPDATE clients SET name = ?1 WHERE id = ?2", params![name, id])
                .context("Failed to update client name")?;
        }
        if let Some(email) = contact_email {
            self.conn
                .execute(
                    "UPDATE clients SET contact_email = ?1 WHERE id = ?2",
                    params![email, id],
                )
                .context("Failed to update client email")?;
        }
        if let Some(phone) = contact_phone {
            self.conn
                .execute(
                    "UPDATE clients SET contact_phone = ?1 WHERE id = ?2",
                    params![phone, id],
                )
                .context("Failed to update client phone")?;
        }
        self.get_client(id)?.context("Client not found after update")
    }

    pub fn delete_client(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM clients WHERE id = ?1", params![id])
            .context("Failed to delete client")?;
        Ok(affected > 0)
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(&self, client_id: i64, name: &str, description: &str) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (client_id, name, description) VALUES (?1, ?2, ?3)",
                params![client_id, name, description],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?.context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, client_id, name, description FROM projects WHERE id = ?1",
                params![id],
                read_project,
            )
            .optional()
            .context("Failed to query project")
    }

    pub fn list_projects(&self, client_id: Option<i64>) -> Result<Vec<Project>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(client_id) = client_id {
            clauses.push("client_id = ?");
            values.push(Value::Integer(client_id));
        }
        let sql = format!(
            "SELECT id, client_id, name, description FROM projects{} ORDER BY name, id",
            where_sql(&clauses)
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), read_project)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    /// Whether `client_id` already has a project called `name`, ignoring
    /// the project `except` (used when renaming).
    pub fn project_name_taken(&self, client_id: i64, name: &str, except: Option<i64>) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM projects WHERE client_id = ?1 AND name = ?2 AND id != ?3",
                params![client_id, name, except.unwrap_or(-1)],
                |row| row.get(0),
            )
            .context("Failed to check project name")?;
        Ok(count > 0)
    }

    pub fn update_project(&self, id: i64, name: Option<&str>, description: Option<&str>) -> Result<Project> {
        if let Some(name) = name {
            self.conn
                .execute("UPDATE projects SET name = ?1 WHERE id = ?2", params![name, id])
                .context("Failed to update project name")?;
        }
        if let Some(description) = description {
            self.conn
                .execute(
                    "UPDATE projects SET description = ?1 WHERE id = ?2",
                    params![description, id],
                )
                .context("Failed to update project description")?;
        }
        self.get_project(id)?.context("Project not found after update")
    }

    pub fn delete_project(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(affected > 0)
    }

    // ── Tickets ───────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn create_ticket(
        &self,
        title: &str,
        description: &str,
        client_id: i64,
        project_id: i64,
        reporter_id: i64,
        assignee_id: Option<i64>,
        priority: Priority,
    ) -> Result<Ticket> {
        self.conn
            .execute(
                "INSERT INTO tickets (title, description, client_id, project_id, reporter_id, assignee_id, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    title,
                    description,
                    client_id,
                    project_id,
                    reporter_id,
                    assignee_id,
                    priority.as_str()
                ],
            )
            .context("Failed to insert ticket")?;
        let id = self.conn.last_insert_rowid();
        self.get_ticket(id)?.context("Ticket not found after insert")
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS),
                params![id],
                TicketRow::read,
            )
            .optional()
            .context("Failed to query ticket")?;
        row.map(TicketRow::into_ticket).transpose()
    }

    /// One page of tickets visible under `scope`, newest first, plus the
    /// total number of matches.
    pub fn list_tickets(
        &self,
        scope: TicketScope,
        filter: &TicketFilter,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Ticket>, i64)> {
        let (mut clauses, mut values) = scope_clauses(scope);
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(priority) = filter.priority {
            clauses.push("priority = ?");
            values.push(Value::Text(priority.as_str().to_string()));
        }
        if let Some(client_id) = filter.client_id {
            clauses.push("client_id = ?");
            values.push(Value::Integer(client_id));
        }
        if let Some(project_id) = filter.project_id {
            clauses.push("project_id = ?");
            values.push(Value::Integer(project_id));
        }
        if let Some(assignee_id) = filter.assignee_id {
            clauses.push("assignee_id = ?");
            values.push(Value::Integer(assignee_id));
        }
        if let Some(q) = filter.q.as_deref().filter(|q| !q.is_empty()) {
            clauses.push("title LIKE ? ESCAPE '\\'");
            values.push(Value::Text(format!("%{}%", escape_like(q))));
        }
        let filter_sql = where_sql(&clauses);

        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM tickets{}", filter_sql),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .context("Failed to count tickets")?;

        values.push(Value::Integer(i64::from(limit)));
        values.push(Value::Integer(i64::from(offset)));
        let sql = format!(
            "SELECT {} FROM tickets{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            TICKET_COLUMNS, filter_sql
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_tickets")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), TicketRow::read)
            .context("Failed to query tickets")?;
        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row.context("Failed to read ticket row")?.into_ticket()?);
        }
        Ok((tickets, total))
    }

    pub fn update_ticket(
        &self,
        id: i64,
        title: Option<&str>,
        description: Option<&str>,
        priority: Option<Priority>,
    ) -> Result<Ticket> {
        if let Some(title) = title {
            self.conn
                .execute(
                    "UPDATE tickets SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
                    params![title, id],
                )
                .context("Failed to update ticket title")?;
        }
        if let Some(description) = description {
            self.conn
                .execute(
                    "UPDATE tickets SET description = ?1, updated_at = datetime('now') WHERE id = ?2",
                    params![description, id],
                )
                .context("Failed to update ticket description")?;
        }
        if let Some(priority) = priority {
            self.conn
                .execute(
                    "UPDATE tickets SET priority = ?1, updated_at = datetime('now') WHERE id = ?2",
                    params![priority.as_str(), id],
                )
                .context("Failed to update ticket priority")?;
        }
        self.get_ticket(id)?.context("Ticket not found after update")
    }

    pub fn set_ticket_assignee(&self, id: i64, assignee_id: Option<i64>) -> Result<Ticket> {
        self.conn
            .execute(
                "UPDATE tickets SET assignee_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![assignee_id, id],
            )
            .context("Failed to update ticket assignee")?;
        self.get_ticket(id)?.context("Ticket not found after assignment")
    }

    /// Move a ticket to `status`. `closed_at` is stamped when entering
    /// `CLO` and cleared for every other state.
    pub fn set_ticket_status(&self, id: i64, status: TicketStatus) -> Result<Ticket> {
        let closed_at = match status {
            TicketStatus::Closed => "datetime('now')",
            _ => "NULL",
        };
        self.conn
            .execute(
                &format!(
                    "UPDATE tickets SET status = ?1, closed_at = {}, updated_at = datetime('now') WHERE id = ?2",
                    closed_at
                ),
                params![status.as_str(), id],
            )
            .context("Failed to update ticket status")?;
        self.get_ticket(id)?.context("Ticket not found after status change")
    }

    pub fn count_tickets_for_client(&self, client_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM tickets WHERE client_id = ?1",
                params![client_id],
                |row| row.get(0),
            )
            .context("Failed to count client tickets")
    }

    pub fn count_tickets_for_project(&self, project_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM tickets WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to count project tickets")
    }

    pub fn count_tickets_by_status(&self, scope: TicketScope) -> Result<Vec<(TicketStatus, i64)>> {
        self.count_tickets_grouped(scope, "status")?
            .into_iter()
            .map(|(code, count)| -> Result<(TicketStatus, i64)> {
                let status = TicketStatus::from_str(&code)
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("Failed to parse ticket status")?;
                Ok((status, count))
            })
            .collect()
    }

    pub fn count_tickets_by_priority(&self, scope: TicketScope) -> Result<Vec<(Priority, i64)>> {
        self.count_tickets_grouped(scope, "priority")?
            .into_iter()
            .map(|(code, count)| -> Result<(Priority, i64)> {
                let priority = Priority::from_str(&code)
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("Failed to parse ticket priority")?;
                Ok((priority, count))
            })
            .collect()
    }

    fn count_tickets_grouped(&self, scope: TicketScope, column: &str) -> Result<Vec<(String, i64)>> {
        let (clauses, values) = scope_clauses(scope);
        let sql = format!(
            "SELECT {col}, COUNT(*) FROM tickets{filter} GROUP BY {col}",
            col = column,
            filter = where_sql(&clauses)
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare ticket counts")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to count tickets")?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row.context("Failed to read ticket count row")?);
        }
        Ok(counts)
    }

    // ── Comments ──────────────────────────────────────────────────────

    pub fn add_comment(&self, ticket_id: i64, author_id: i64, body: &str, is_system: bool) -> Result<Comment> {
        self.conn
            .execute(
                "INSERT INTO comments (ticket_id, author_id, body, is_system) VALUES (?1, ?2, ?3, ?4)",
                params![ticket_id, author_id, body, is_system],
            )
            .context("Failed to insert comment")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT c.id, c.ticket_id, c.author_id, u.username, c.body, c.is_system, c.created_at
                 FROM comments c JOIN users u ON u.id = c.author_id WHERE c.id = ?1",
                params![id],
                read_comment,
            )
            .context("Comment not found after insert")
    }

    /// Comments on a ticket, oldest first.
    pub fn list_comments(&self, ticket_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.ticket_id, c.author_id, u.username, c.body, c.is_system, c.created_at
                 FROM comments c JOIN users u ON u.id = c.author_id
                 WHERE c.ticket_id = ?1 ORDER BY c.created_at, c.id",
            )
            .context("Failed to prepare list_comments")?;
        let rows = stmt
            .query_map(params![ticket_id], read_comment)
            .context("Failed to query comments")?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row.context("Failed to read comment row")?);
        }
        Ok(comments)
    }
}

// ── Query helpers ─────────────────────────────────────────────────────

fn scope_clauses(scope: TicketScope) -> (Vec<&'static str>, Vec<Value>) {
    match scope {
        TicketScope::All => (Vec::new(), Vec::new()),
        TicketScope::ReportedBy(user_id) => (vec!["reporter_id = ?"], vec![Value::Integer(user_id)]),
        TicketScope::Client(client_id) => (vec!["client_id = ?"], vec![Value::Integer(client_id)]),
        TicketScope::Nothing => (vec!["0 = 1"], Vec::new()),
    }
}

fn where_sql(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// ── Row mapping ───────────────────────────────────────────────────────

fn read_client(row: &rusqlite::Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        contact_email: row.get(2)?,
        contact_phone: row.get(3)?,
    })
}

fn read_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        client_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

fn read_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        author_id: row.get(2)?,
        author: row.get(3)?,
        body: row.get(4)?,
        is_system: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Intermediate row struct for users; `role` is parsed afterwards.
struct UserRow {
    id: i64,
    username: String,
    email: String,
    role: String,
    client_id: Option<i64>,
    is_staff: bool,
    is_active: bool,
    date_joined: String,
}

impl UserRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            client_id: row.get(4)?,
            is_staff: row.get(5)?,
            is_active: row.get(6)?,
            date_joined: row.get(7)?,
        })
    }

    fn into_user(self) -> Result<User> {
        let role = Role::from_str(&self.role)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse user role")?;
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            role,
            client_id: self.client_id,
            is_staff: self.is_staff,
            is_active: self.is_active,
            date_joined: self.date_joined,
        })
    }
}

/// Intermediate row struct for tickets; status and priority are parsed
/// afterwards.
struct TicketRow {
    id: i64,
    title: String,
    description: String,
    client_id: i64,
    project_id: i64,
    reporter_id: i64,
    assignee_id: Option<i64>,
    status: String,
    priority: String,
    created_at: String,
    updated_at: String,
    closed_at: Option<String>,
}

impl TicketRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            client_id: row.get(3)?,
            project_id: row.get(4)?,
            reporter_id: row.get(5)?,
            assignee_id: row.get(6)?,
            status: row.get(7)?,
            priority: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            closed_at: row.get(11)?,
        })
    }

    fn into_ticket(self) -> Result<Ticket> {
        let status = TicketStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse ticket status")?;
        let priority = Priority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse ticket priority")?;
        Ok(Ticket {
            id: self.id,
            title: self.title,
            description: self.description,
            client_id: self.client_id,
            project_id: self.project_id,
            reporter_id: self.reporter_id,
            assignee_id: self.assignee_id,
            status,
            priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

//! Account management commands (`helpdesk user`).

use std::path::Path;

use anyhow::{Context, Result};
use helpdesk::desk::models::NewUser;
use helpdesk::desk::server::open_database;
use helpdesk::desk::service;
use helpdesk_common::Role;

pub struct UserArgs {
    pub username: String,
    pub role: Role,
    pub email: String,
    pub staff: bool,
    pub client_id: Option<i64>,
    pub password: Option<String>,
}

pub fn cmd_user_create(db_path: &Path, args: UserArgs) -> Result<()> {
    use dialoguer::Password;

    let password = match args.password {
        Some(password) => password,
        None => Password::new()
            .with_prompt(format!("Password for {}", args.username))
            .with_confirmation("Repeat password", "Passwords do not match")
            .interact()
            .context("Failed to read password")?,
    };

    let db = open_database(db_path)?;
    let user = service::register_user(
        &db,
        NewUser {
            username: args.username,
            email: args.email,
            role: args.role,
            password,
            is_staff: args.staff,
            client_id: args.client_id,
        },
    )?;

    println!(
        "{} {} ({}{}) with id {}",
        console::style("Created").green().bold(),
        user.username,
        user.role.label(),
        if user.is_staff { ", staff" } else { "" },
        user.id
    );
    Ok(())
}

pub fn cmd_user_list(db_path: &Path) -> Result<()> {
    let db = open_database(db_path)?;
    let users = db.list_users(None, false)?;

    if users.is_empty() {
        println!("No users found.");
        println!();
        println!("Create one with:");
        println!("  helpdesk user create --username <name> --role <DEV|REP|CLI>");
        return Ok(());
    }

    println!();
    println!("{}", console::style("Users").bold().cyan());
    println!("─────────────────────────");
    for user in &users {
        let mut flags = Vec::new();
        if user.is_staff {
            flags.push("staff");
        }
        if !user.is_active {
            flags.push("inactive");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "  {:>4}  {:<20} {:<10}{}",
            user.id,
            user.username,
            user.role.label(),
            console::style(flags).dim()
        );
    }
    println!();
    println!("{} user(s)", users.len());
    Ok(())
}

pub fn cmd_user_set_active(db_path: &Path, username: &str, is_active: bool) -> Result<()> {
    let db = open_database(db_path)?;
    let user = service::set_account_active(&db, username, is_active)?;
    let state = if user.is_active {
        console::style("active").green()
    } else {
        console::style("inactive").yellow()
    };
    println!("{} is now {}", user.username, state);
    Ok(())
}

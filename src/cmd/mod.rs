//! CLI command implementations.
//!
//! `serve` runs the workflow server; `person` and `grant` administer the
//! contact directory and the approval-grants table (the Permission Store's
//! admin surface). Admin commands open the database directly; they are
//! meant for operators on the host, not for the HTTP path.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use millwright::workflow::db::WorkflowDb;
use millwright::workflow::server::{ServerConfig, start_server};

pub async fn serve(config: ServerConfig) -> Result<()> {
    start_server(config).await
}

fn open_db(path: &Path) -> Result<WorkflowDb> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    WorkflowDb::new(path).context("Failed to open workflow database")
}

pub fn person_add(
    db_path: &Path,
    name: &str,
    email: Option<&str>,
    line_id: Option<&str>,
) -> Result<()> {
    let db = open_db(db_path)?;
    let person = db.create_person(name, email, line_id)?;
    println!(
        "{} person {}: {}",
        style("Added").green(),
        person.id,
        person.name
    );
    Ok(())
}

pub fn person_list(db_path: &Path) -> Result<()> {
    let db = open_db(db_path)?;
    let people = db.list_people()?;
    if people.is_empty() {
        println!("No people in the directory.");
        return Ok(());
    }
    for person in people {
        println!(
            "{:>5}  {}  email={}  line={}",
            person.id,
            person.name,
            person.email.as_deref().unwrap_or("-"),
            person.line_user_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn grant_add(
    db_path: &Path,
    person: i64,
    level: i64,
    plant: Option<&str>,
    area: Option<&str>,
    line: Option<&str>,
    machine: Option<&str>,
) -> Result<()> {
    let db = open_db(db_path)?;
    let grant = db.create_grant(person, level, plant, area, line, machine)?;
    println!(
        "{} level {} to person {} (grant {})",
        style("Granted").green(),
        grant.approval_level,
        grant.person_id,
        grant.id
    );
    Ok(())
}

pub fn grant_list(db_path: &Path, person: Option<i64>) -> Result<()> {
    let db = open_db(db_path)?;
    let grants = db.list_grants(person)?;
    if grants.is_empty() {
        println!("No grants.");
        return Ok(());
    }
    for grant in grants {
        let scope = [
            ("plant", &grant.plant),
            ("area", &grant.area),
            ("line", &grant.line),
            ("machine", &grant.machine),
        ]
        .iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| format!("{}={}", k, v)))
        .collect::<Vec<_>>()
        .join(" ");
        println!(
            "{:>5}  person={}  level={}  {}  {}",
            grant.id,
            grant.person_id,
            grant.approval_level,
            if grant.is_active {
                style("active").green().to_string()
            } else {
                style("revoked").red().to_string()
            },
            if scope.is_empty() {
                "scope=global".to_string()
            } else {
                scope
            },
        );
    }
    Ok(())
}

pub fn grant_revoke(db_path: &Path, id: i64) -> Result<()> {
    let db = open_db(db_path)?;
    if db.revoke_grant(id)? {
        println!("{} grant {}", style("Revoked").yellow(), id);
        Ok(())
    } else {
        anyhow::bail!("Grant {} not found", id)
    }
}

//! `scipion update`: upgrade the core distributions.

use super::version::{check_all_for_updates, OutdatedPackage, CORE_PACKAGES};
use super::{spinner, ui};
use crate::session::Session;
use miette::{IntoDiagnostic, Result};
use scipion_registry::PypiClient;
use scipion_diagnostics::ScipionError;
use std::io::{self, BufRead, Write};
use std::process;

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush().into_diagnostic()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).into_diagnostic()?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn upgrade_command(python: &str, outdated: &[OutdatedPackage]) -> String {
    let names: Vec<&str> = outdated.iter().map(|p| p.name.as_str()).collect();
    format!("{} -m pip install --upgrade {}", python, names.join(" "))
}

pub async fn update(session: &Session, yes: bool) -> Result<bool> {
    let index = PypiClient::new(&session.config.pypi_url);
    let site = session.ctx.site_packages();

    let progress = spinner("Checking for updates...");
    let outdated = check_all_for_updates(&index, &site, &CORE_PACKAGES).await;
    progress.finish_and_clear();

    if outdated.is_empty() {
        ui::success("Scipion is up to date");
        return Ok(true);
    }

    ui::header("Updates available");
    for package in &outdated {
        println!(
            "  {} {} -> {}",
            ui::pkg(&package.name),
            package.current,
            ui::num(&package.latest)
        );
    }
    println!();

    if !yes && !confirm("Update now?")? {
        ui::info("Nothing updated");
        return Ok(true);
    }

    let command = upgrade_command(session.ctx.python(), &outdated);
    tracing::info!("Running {}", command);
    let status = process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status()
        .map_err(|e| ScipionError::python(format!("{}: {}", command, e)))?;

    if status.success() {
        ui::success(format!("Updated {} packages", ui::num(outdated.len())));
        Ok(true)
    } else {
        ui::error(format!("{} failed", command));
        Ok(false)
    }
}

//! `plume list`, `install`, `uninstall` and `check`.

use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use console::style;

use crate::config::HostConfig;
use crate::extensions::{
    ExtensionHost, HeadlessWorkspace, HostCollaborators, ReqwestClient,
};

fn headless_host(config: HostConfig, library: Option<String>) -> (ExtensionHost, Rc<HeadlessWorkspace>) {
    let workspace = Rc::new(match library {
        Some(root) => HeadlessWorkspace::with_library(root),
        None => HeadlessWorkspace::new(),
    });
    let mut collaborators = HostCollaborators::headless(workspace.clone());
    match ReqwestClient::new() {
        Ok(client) => collaborators.http = Rc::new(client),
        Err(e) => tracing::warn!(error = %e, "HTTP client unavailable, downloads disabled"),
    }
    (ExtensionHost::new(config, collaborators), workspace)
}

pub fn run_list(config: HostConfig) -> Result<()> {
    let (host, _) = headless_host(config, None);
    let mut count = 0;
    for record in host.installed() {
        count += 1;
        let version = if record.version.is_empty() {
            String::new()
        } else {
            format!(" v{}", record.version)
        };
        println!(
            "{}{}  {}",
            style(&record.id).bold(),
            style(version).dim(),
            record.dir.display()
        );
    }
    if count == 0 {
        println!("No extensions installed");
    }
    Ok(())
}

pub fn run_install(config: HostConfig, dir: &Path) -> Result<()> {
    let source = dir
        .canonicalize()
        .context(format!("Path not found: {}", dir.display()))?;
    let (mut host, _) = headless_host(config, None);
    let record = host
        .install(&source)
        .with_context(|| format!("Failed to install {}", source.display()))?;
    println!(
        "{} Installed {} to {}",
        style("✓").green(),
        style(&record.name).bold(),
        record.dir.display()
    );
    Ok(())
}

pub fn run_uninstall(config: HostConfig, id: &str) -> Result<()> {
    let (mut host, _) = headless_host(config, None);
    host.uninstall(id)?;
    println!("{} Uninstalled {}", style("✓").green(), style(id).bold());
    Ok(())
}

/// Activate, report registrations, deactivate.
pub fn run_check(config: HostConfig, library: Option<String>, ids: &[String]) -> Result<()> {
    let (mut host, workspace) = headless_host(config, library);
    let targets: Vec<String> = if ids.is_empty() {
        host.installed().map(|r| r.id.clone()).collect()
    } else {
        ids.to_vec()
    };
    if targets.is_empty() {
        println!("No extensions installed");
        return Ok(());
    }

    let mut failed = 0;
    for id in &targets {
        match host.activate_by_id(id) {
            Ok(()) => {
                let inspector = host.inspector();
                println!(
                    "{} {} ({} registrations, {} watches)",
                    style("✓").green(),
                    style(id).bold(),
                    inspector.registrations_for(id),
                    inspector.watch_count(id)
                );
            }
            Err(e) => {
                failed += 1;
                println!("{} {}: {}", style("✗").red(), style(id).bold(), e);
            }
        }
    }

    for (namespace, owner) in host.inspector().api_namespaces() {
        println!("  api {} ← {}", style(namespace).cyan(), owner);
    }
    for panel in host.dock_panels() {
        println!(
            "  panel {}::{} ({:?}, {})",
            panel.extension_id, panel.panel_id, panel.side, panel.size
        );
    }

    for report in host.deactivate_all() {
        if let Some(error) = &report.module_error {
            println!(
                "{} {} deactivate failed: {}",
                style("!").yellow(),
                report.extension_id,
                error
            );
        }
        for failure in &report.failures {
            println!("{} {}: {}", style("!").yellow(), report.extension_id, failure);
        }
    }
    for notice in workspace.notices() {
        println!("  notice [{:?}] {}", notice.level, notice.message);
    }

    if failed > 0 {
        bail!("{failed} of {} extensions failed to activate", targets.len());
    }
    Ok(())
}

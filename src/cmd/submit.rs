// ============================================================================
// src/cmd/submit.rs – Send one event to a running sink (operator/testing aid)
// ============================================================================

use crate::config::Config;
use crate::event::PermissionEvent;
use crate::service::send_events;
use crate::ui::UX;
use anyhow::Result;

pub fn run_submit(ui: &UX, cfg: &Config, event: &PermissionEvent) -> Result<()> {
    let socket = &cfg.service.socket_path;
    send_events(socket, [event])?;
    ui.success(&format!(
        "Handed {} / {} ({}) to {}",
        event.package_name,
        event.permission,
        event.outcome,
        socket.display()
    ));
    Ok(())
}

//! Two devices syncing through an in-process relay.
//!
//! The demo pairs a laptop and a tablet, syncs one chapter between them,
//! takes the tablet offline while both sides edit, and reports whether the
//! replicas converged once it reconnects.

use anyhow::{Context, Result};
use inkwell_sync_client::{EngineConfig, MemoryRelay, RelayBackend, SyncEngine};
use inkwell_sync_core::{canonical_from_visual, Block, EditorSurface, MemoryEditor, PairingRole};
use inkwell_sync_types::{ConnectionStatus, DocumentSlug, ProjectId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEMO_TOKEN: &str = "demo-token";
const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Outcome of a demo run.
#[derive(Debug)]
pub struct DemoReport {
    /// Devices the laptop lists after pairing.
    pub paired_devices: usize,
    /// Final chapter text on the laptop.
    pub laptop_text: String,
    /// Final chapter text on the tablet.
    pub tablet_text: String,
}

impl DemoReport {
    /// True if both replicas hold the same text.
    pub fn converged(&self) -> bool {
        self.laptop_text == self.tablet_text
    }
}

struct Device {
    engine: Arc<SyncEngine<RelayBackend>>,
    editor: MemoryEditor,
}

/// Run the demo command.
pub async fn run(config: EngineConfig) -> Result<()> {
    let report = run_demo(config).await?;

    println!();
    println!("=== inkwell-sync demo ===");
    println!("  Paired devices: {}", report.paired_devices);
    println!();
    println!("Laptop:");
    for line in report.laptop_text.lines() {
        println!("  | {}", line);
    }
    println!("Tablet:");
    for line in report.tablet_text.lines() {
        println!("  | {}", line);
    }
    println!();

    if !report.converged() {
        anyhow::bail!("replicas diverged");
    }
    println!("Replicas converged.");
    Ok(())
}

/// Run the scripted session and return what each device ended with.
pub async fn run_demo(config: EngineConfig) -> Result<DemoReport> {
    let relay = MemoryRelay::new();
    let server_url = config.server.url.clone();
    let project = ProjectId::new("/demo/harbor")?;
    let chapter = DocumentSlug::new("chapter-1")?;

    let laptop = start_device(&relay, &config, "Laptop", &server_url).await?;
    let tablet = start_device(&relay, &config, "Tablet", &server_url).await?;
    let (laptop, tablet) = (&laptop, &tablet);
    let (project, chapter) = (&project, &chapter);

    // Pairing: the laptop shows a code, the tablet scans it.
    let shown = laptop.engine.open_pairing(PairingRole::Initiator);
    let code = shown
        .request_code(&server_url)
        .await?
        .context("pairing code superseded")?;
    info!(code = %code.canonical, "laptop shows pairing code");

    let scanned = canonical_from_visual(&code.visual)?;
    let entry = tablet.engine.open_pairing(PairingRole::Responder);
    tablet.engine.submit_pairing_code(&entry, &scanned).await?;
    wait_for("laptop to see the tablet", || async move {
        laptop.engine.list_paired_devices().len() == 2
    })
    .await?;

    for device in [laptop, tablet] {
        device.engine.open_project(project).await?;
        device
            .engine
            .mount_document(project, chapter.clone(), Arc::new(device.editor.clone()))
            .await?;
        device.engine.enable_project_sync(project).await?;
    }

    // First draft on the laptop.
    laptop.editor.push_block(Block::heading(1, "The Harbor"));
    laptop
        .editor
        .push_block(Block::paragraph("The boats came in at dusk."));
    laptop.engine.flush_document(project, chapter).await?;
    wait_for("tablet to receive the draft", || async move {
        tablet.editor.blocks().len() == 2
    })
    .await?;
    info!("draft synced to tablet");

    // The tablet drops off the network; both keep writing.
    let tablet_id = tablet.engine.device_id();
    relay.drop_connection(&tablet_id);
    wait_for("tablet to go offline", || async move {
        tablet.engine.status() == ConnectionStatus::Reconnecting
    })
    .await?;

    laptop
        .editor
        .push_block(Block::paragraph("Gulls circled the masts."));
    laptop.engine.flush_document(project, chapter).await?;
    tablet
        .editor
        .set_block(1, Block::quote("The boats came in at dusk."));
    tablet.engine.flush_document(project, chapter).await?;
    info!(
        queued = tablet.engine.pending_updates(project),
        "tablet edited offline"
    );

    relay.restore_connection(&tablet_id);
    wait_for("replicas to converge", || async move {
        let a = laptop.engine.document_text(project, chapter).await.ok();
        let b = tablet.engine.document_text(project, chapter).await.ok();
        a.is_some()
            && a == b
            && a == laptop.editor.serialize().ok()
            && a == tablet.editor.serialize().ok()
            && tablet.engine.pending_updates(project) == 0
    })
    .await?;

    let report = DemoReport {
        paired_devices: laptop.engine.list_paired_devices().len(),
        laptop_text: laptop.editor.serialize()?,
        tablet_text: tablet.editor.serialize()?,
    };

    laptop.engine.shutdown().await;
    tablet.engine.shutdown().await;
    Ok(report)
}

async fn start_device(
    relay: &MemoryRelay,
    config: &EngineConfig,
    name: &str,
    server_url: &str,
) -> Result<Device> {
    let backend = relay.register(name);
    let config = config.clone().with_device_name(name);
    let token = config
        .server
        .token
        .clone()
        .unwrap_or_else(|| DEMO_TOKEN.to_string());

    let engine = SyncEngine::start(config, backend.device_id(), backend);
    engine
        .connect(server_url, &token)
        .await
        .with_context(|| format!("{} failed to connect", name))?;

    Ok(Device {
        engine,
        editor: MemoryEditor::new(),
    })
}

async fn wait_for<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll = async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, poll)
        .await
        .with_context(|| format!("timed out waiting for {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_converges() {
        let report = run_demo(EngineConfig::default()).await.unwrap();

        assert_eq!(report.paired_devices, 2);
        assert!(report.converged());
        assert!(report.laptop_text.contains("Gulls circled the masts."));
        assert!(report.laptop_text.contains("> The boats came in at dusk."));
    }
}

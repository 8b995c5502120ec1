//! CRDT document adapter.
//!
//! Keeps one Loro text container and one editor convergent without feedback
//! loops. Each mounted document runs as a single actor task:
//!
//! ```text
//! editor listener ──► EditorChanged ──┐
//! container (import) ► ContainerChanged ├──► actor ──► LoroText / editor
//! handle ───────────► Flush/Shutdown ──┘
//! ```
//!
//! Callbacks from the editor and from Loro only forward into the actor's
//! channel, so the adapter state (`Idle`, `LocalEditPending`, `ApplyingLocal`,
//! `ApplyingRemote`) is only ever changed by the actor.
//!
//! - Local edits are debounced, serialized, and written into the container
//!   as a single splice committed with origin `local-edit`.
//! - Container changes caused by imports are read back and applied to the
//!   editor as a discrete (non-undoable) replacement. Editor notifications
//!   caused by that replacement are drained before a self-addressed release
//!   marker returns the adapter to `Idle`.

use std::sync::Arc;
use std::time::Duration;

use inkwell_sync_core::{
    ConversionError, Debouncer, EditorChange, EditorListener, EditorSurface, TextSplice,
    UpdateKind,
};
use inkwell_sync_types::{DocumentSlug, UpdateOrigin};
use loro::event::DiffEvent;
use loro::{CommitOptions, ContainerTrait, EventTriggerKind, LoroDoc, LoroText, Subscription};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::EVENT_CHANNEL_CAPACITY;
use crate::error::ClientError;

/// Adapter state, owned by the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Editor and container agree.
    Idle,
    /// A local edit is waiting for the debounce timer.
    LocalEditPending,
    /// Writing editor content into the container.
    ApplyingLocal,
    /// Writing container content into the editor.
    ApplyingRemote,
}

/// Where the initial content came from when the adapter was mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapSource {
    /// The container had content; it was applied to the editor.
    Container,
    /// The container was empty; editor content was pushed into it.
    Editor,
    /// Both were empty.
    Empty,
}

/// Observable adapter events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// Initial content was reconciled.
    Bootstrapped {
        /// Which side supplied it.
        source: BootstrapSource,
    },
    /// Editor content was committed to the container.
    Committed {
        /// Commit origin (`local-edit` or `local-init`).
        origin: UpdateOrigin,
    },
    /// Container content was applied to the editor.
    RemoteApplied,
    /// Container content could not be applied to the editor.
    ConversionFailed {
        /// The conversion error.
        error: ConversionError,
    },
}

enum Command {
    EditorChanged(EditorChange),
    ContainerChanged,
    ReleaseRemote,
    Flush(oneshot::Sender<Result<bool, ClientError>>),
    Shutdown(Option<oneshot::Sender<()>>),
}

/// A document adapter that has not been started yet.
///
/// Subscribe before calling [`DocumentAdapter::mount`] to observe the
/// bootstrap event.
pub struct DocumentAdapter {
    doc: Arc<LoroDoc>,
    slug: DocumentSlug,
    editor: Arc<dyn EditorSurface>,
    debounce: Duration,
    events: broadcast::Sender<DocumentEvent>,
}

impl DocumentAdapter {
    /// Prepare an adapter binding `editor` to the container named `slug`.
    pub fn new(
        doc: Arc<LoroDoc>,
        slug: DocumentSlug,
        editor: Arc<dyn EditorSurface>,
        debounce: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            doc,
            slug,
            editor,
            debounce,
            events,
        }
    }

    /// Receive adapter events.
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    /// Bootstrap and start the actor. Must be called within a tokio runtime.
    ///
    /// Fails if the container holds text the editor cannot represent.
    pub fn mount(self) -> Result<DocumentHandle, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let text = self.doc.get_text(self.slug.as_str());

        let container_sub = {
            let tx = tx.clone();
            self.doc.subscribe(
                &text.id(),
                Arc::new(move |event: DiffEvent<'_>| {
                    if event.triggered_by == EventTriggerKind::Import {
                        let _ = tx.send(Command::ContainerChanged);
                    }
                }),
            )
        };

        let (source, last_synced) = bootstrap(&self.doc, &text, self.editor.as_ref())?;
        info!(slug = %self.slug, ?source, "document mounted");
        let _ = self.events.send(DocumentEvent::Bootstrapped { source });
        if source == BootstrapSource::Editor {
            let _ = self.events.send(DocumentEvent::Committed {
                origin: UpdateOrigin::LocalInit,
            });
        }

        let listener: EditorListener = {
            let tx = tx.clone();
            Arc::new(move |change| {
                let _ = tx.send(Command::EditorChanged(change));
            })
        };
        self.editor.set_listener(Some(listener));

        let (state_tx, state_rx) = watch::channel(AdapterState::Idle);
        let actor = Actor {
            doc: self.doc,
            text,
            slug: self.slug.clone(),
            editor: self.editor,
            state: AdapterState::Idle,
            state_tx,
            debouncer: Debouncer::new(self.debounce),
            last_synced,
            remote_depth: 0,
            events: self.events.clone(),
            tx: tx.clone(),
            _container_sub: container_sub,
        };
        let task = tokio::spawn(actor.run(rx));

        Ok(DocumentHandle {
            slug: self.slug,
            tx,
            state: state_rx,
            events: self.events,
            source,
            task: Some(task),
        })
    }
}

fn bootstrap(
    doc: &LoroDoc,
    text: &LoroText,
    editor: &dyn EditorSurface,
) -> Result<(BootstrapSource, String), ClientError> {
    let existing = text.to_string();
    if !existing.is_empty() {
        editor.replace_from_text(&existing, UpdateKind::Discrete)?;
        return Ok((BootstrapSource::Container, existing));
    }
    if editor.is_empty() {
        return Ok((BootstrapSource::Empty, String::new()));
    }

    let content = editor.serialize()?;
    text.insert(0, &content)
        .map_err(|e| ClientError::Crdt(e.to_string()))?;
    doc.commit_with(CommitOptions::new().origin(UpdateOrigin::LocalInit.as_str()));
    Ok((BootstrapSource::Editor, content))
}

/// Handle to a mounted document. Dropping it stops the adapter.
pub struct DocumentHandle {
    slug: DocumentSlug,
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<AdapterState>,
    events: broadcast::Sender<DocumentEvent>,
    source: BootstrapSource,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("slug", &self.slug)
            .field("state", &*self.state.borrow())
            .field("source", &self.source)
            .finish()
    }
}

impl DocumentHandle {
    /// The container this handle is bound to.
    pub fn slug(&self) -> &DocumentSlug {
        &self.slug
    }

    /// Current adapter state.
    pub fn state(&self) -> AdapterState {
        *self.state.borrow()
    }

    /// Watch adapter state changes.
    pub fn watch_state(&self) -> watch::Receiver<AdapterState> {
        self.state.clone()
    }

    /// Where the initial content came from.
    pub fn bootstrap_source(&self) -> BootstrapSource {
        self.source
    }

    /// Receive adapter events.
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    /// Commit any pending local edit now. Returns whether anything was committed.
    pub async fn flush(&self) -> Result<bool, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply))
            .map_err(|_| ClientError::AdapterStopped)?;
        rx.await.map_err(|_| ClientError::AdapterStopped)?
    }

    /// Flush pending edits, release the editor and stop the actor.
    pub async fn shutdown(mut self) {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(Some(ack))).is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.tx.send(Command::Shutdown(None));
        }
    }
}

struct Actor {
    doc: Arc<LoroDoc>,
    text: LoroText,
    slug: DocumentSlug,
    editor: Arc<dyn EditorSurface>,
    state: AdapterState,
    state_tx: watch::Sender<AdapterState>,
    debouncer: Debouncer,
    /// Last text known to be in both the editor and the container.
    last_synced: String,
    /// Remote applications whose release marker has not been processed.
    remote_depth: usize,
    events: broadcast::Sender<DocumentEvent>,
    tx: mpsc::UnboundedSender<Command>,
    _container_sub: Subscription,
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.debouncer.deadline();
            let command = tokio::select! {
                command = rx.recv() => command,
                _ = sleep_until(deadline) => {
                    if self.debouncer.fire_if_due(now()) {
                        self.flush_logged();
                    }
                    continue;
                }
            };

            match command {
                Some(Command::EditorChanged(change)) => self.on_editor_changed(change),
                Some(Command::ContainerChanged) => self.on_container_changed(),
                Some(Command::ReleaseRemote) => self.on_release_remote(),
                Some(Command::Flush(reply)) => {
                    self.debouncer.cancel();
                    let _ = reply.send(self.flush_local(UpdateOrigin::LocalEdit));
                }
                Some(Command::Shutdown(ack)) => {
                    self.teardown();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
                None => {
                    self.teardown();
                    break;
                }
            }
        }
        debug!(slug = %self.slug, "document adapter stopped");
    }

    fn set_state(&mut self, state: AdapterState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn settle(&mut self) {
        let state = if self.remote_depth > 0 {
            AdapterState::ApplyingRemote
        } else if self.debouncer.is_pending() {
            AdapterState::LocalEditPending
        } else {
            AdapterState::Idle
        };
        self.set_state(state);
    }

    fn on_editor_changed(&mut self, change: EditorChange) {
        if self.state == AdapterState::ApplyingRemote {
            debug!(slug = %self.slug, "suppressing editor echo of remote apply");
            return;
        }
        if change.is_noop() {
            return;
        }
        self.debouncer.schedule(now());
        self.set_state(AdapterState::LocalEditPending);
    }

    fn on_container_changed(&mut self) {
        // Unflushed typing goes into the container before the merged text
        // comes back. Its notification may still be queued behind this one.
        self.debouncer.cancel();
        match self.editor.serialize() {
            Ok(current) if current != self.last_synced => self.flush_logged(),
            Ok(_) => {}
            Err(e) => warn!(slug = %self.slug, error = %e, "cannot read editor before remote apply"),
        }
        self.apply_remote();
    }

    fn apply_remote(&mut self) {
        let text = self.text.to_string();
        if text == self.last_synced {
            debug!(slug = %self.slug, "container already matches editor");
            return;
        }

        self.remote_depth += 1;
        self.set_state(AdapterState::ApplyingRemote);

        match self.editor.replace_from_text(&text, UpdateKind::Discrete) {
            Ok(()) => {
                self.last_synced = text;
                let _ = self.events.send(DocumentEvent::RemoteApplied);
            }
            Err(error) => {
                warn!(slug = %self.slug, error = %error, "cannot apply remote text to editor");
                let _ = self.events.send(DocumentEvent::ConversionFailed { error });
            }
        }

        // Queued behind every notification the replacement produced.
        let _ = self.tx.send(Command::ReleaseRemote);
    }

    fn on_release_remote(&mut self) {
        self.remote_depth = self.remote_depth.saturating_sub(1);
        if self.remote_depth > 0 {
            return;
        }

        // Edits typed while the remote apply was in progress were suppressed.
        if let Ok(current) = self.editor.serialize() {
            if current != self.last_synced && !self.debouncer.is_pending() {
                self.debouncer.schedule(now());
            }
        }
        self.settle();
    }

    fn flush_logged(&mut self) {
        if let Err(e) = self.flush_local(UpdateOrigin::LocalEdit) {
            warn!(slug = %self.slug, error = %e, "local flush failed");
        }
    }

    /// Write editor content into the container. Returns whether a commit happened.
    fn flush_local(&mut self, origin: UpdateOrigin) -> Result<bool, ClientError> {
        let previous = self.state;
        self.set_state(AdapterState::ApplyingLocal);
        let result = self.write_editor_to_container(origin);
        if previous == AdapterState::ApplyingRemote {
            self.set_state(previous);
        } else {
            self.settle();
        }
        result
    }

    fn write_editor_to_container(&mut self, origin: UpdateOrigin) -> Result<bool, ClientError> {
        let content = self.editor.serialize()?;
        if content == self.last_synced {
            return Ok(false);
        }

        let mut splice = TextSplice::between(&self.last_synced, &content);
        let current = self.text.to_string();
        if current != self.last_synced {
            let remote = TextSplice::between(&self.last_synced, &current);
            splice = splice.rebase(&remote, &self.last_synced);
        }

        let len = self.text.len_unicode();
        let start = splice.start.min(len);
        let delete = splice.delete.min(len - start);
        if delete > 0 {
            self.text
                .delete(start, delete)
                .map_err(|e| ClientError::Crdt(e.to_string()))?;
        }
        if !splice.insert.is_empty() {
            self.text
                .insert(start, &splice.insert)
                .map_err(|e| ClientError::Crdt(e.to_string()))?;
        }
        self.doc
            .commit_with(CommitOptions::new().origin(origin.as_str()));

        debug!(slug = %self.slug, origin = origin.as_str(), "committed local edit");
        // The container may now hold merged text; the pending import
        // notification brings it back to the editor.
        self.last_synced = content;
        let _ = self.events.send(DocumentEvent::Committed { origin });
        Ok(true)
    }

    fn teardown(&mut self) {
        self.editor.set_listener(None);
        self.debouncer.cancel();
        if self.state != AdapterState::ApplyingRemote {
            self.flush_logged();
        }
    }
}

//! Edit scripts: a notebook's server-side starting point plus a list of
//! editor actions, replayed through a [`NotebookSession`].
//!
//! ```json
//! {
//!   "name": "Trip",
//!   "blocks": [{ "id": "…", "type": "heading1", "content": "Trip" }],
//!   "steps": [
//!     { "op": "update", "id": "…", "patch": { "content": "Trip to Lisbon" } },
//!     { "op": "wait", "ms": 500 },
//!     { "op": "add", "block": { "id": "…", "type": "todo", "content": "book" } },
//!     { "op": "flush" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use folio_sync::{MemoryStore, NotebookSession, OverallStatus, RemoteCall, SyncQueue};
use folio_types::{Block, BlockId, BlockPatch, Entity, NotebookId};

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub notebook: Option<NotebookId>,
    #[serde(default = "default_name")]
    pub name: String,
    /// What the remote store holds before the first step.
    #[serde(default)]
    pub blocks: Vec<Block>,
    pub steps: Vec<Step>,
}

fn default_name() -> String {
    "Untitled".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Add {
        block: Block,
        #[serde(default)]
        index: Option<usize>,
    },
    Update {
        id: BlockId,
        patch: BlockPatch,
    },
    Delete {
        id: BlockId,
    },
    Move {
        id: BlockId,
        index: usize,
    },
    Rename {
        name: String,
    },
    Wait {
        ms: u64,
    },
    Flush,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing script {}", path.display()))
    }
}

/// How replay ends once the last step has run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Ending {
    /// Flush and close the session.
    #[default]
    Close,
    /// Drop whatever is still pending.
    Abandon,
}

#[derive(Debug)]
pub struct Outcome {
    pub calls: Vec<RemoteCall>,
    pub status: OverallStatus,
    pub name: String,
    pub blocks: Vec<Block>,
}

/// Run `script` against `store` through a fresh session on `queue`.
///
/// Document errors (unknown ids, bad indices) abort the replay.
pub async fn replay(script: Script, store: &MemoryStore, queue: SyncQueue, ending: Ending) -> Result<Outcome> {
    let notebook = script.notebook.unwrap_or_else(NotebookId::new);
    for block in &script.blocks {
        store.seed(notebook, Entity::Block(block.clone()));
    }

    let mut session = NotebookSession::open(queue.clone(), notebook, script.name, script.blocks);
    info!(notebook = %notebook.short(), steps = script.steps.len(), "replaying");

    for (n, step) in script.steps.into_iter().enumerate() {
        debug!(step = n, ?step, "step");
        apply(&mut session, step)
            .await
            .with_context(|| format!("step {n}"))?;
    }

    let name = session.name();
    let blocks = session.document().blocks();
    // Read the status before the session releases its keys.
    let status = match ending {
        Ending::Close => {
            session.flush().await;
            let status = queue.overall_status_for(&notebook);
            session.close().await;
            status
        }
        Ending::Abandon => {
            let status = queue.overall_status_for(&notebook);
            session.abandon();
            status
        }
    };

    Ok(Outcome {
        calls: store.calls(),
        status,
        name,
        blocks,
    })
}

async fn apply(session: &mut NotebookSession, step: Step) -> Result<()> {
    match step {
        Step::Add { block, index } => session.add_block(block, index)?,
        Step::Update { id, patch } => session.update_block(&id, patch)?,
        Step::Delete { id } => session.delete_block(&id)?,
        Step::Move { id, index } => session.move_block(&id, index)?,
        Step::Rename { name } => {
            if !session.rename(&name) {
                debug!(%name, "rename ignored");
            }
        }
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        Step::Flush => session.flush().await,
    }
    Ok(())
}

/// One line per remote call, in issue order.
pub fn describe(call: &RemoteCall) -> String {
    let detail = match call.entity() {
        Some(Entity::Block(block)) => format!(" [{}] {:?}", block.kind, block.content),
        Some(Entity::NotebookName { name }) => format!(" {name:?}"),
        None => String::new(),
    };
    let verb = match call {
        RemoteCall::Create { .. } => "create",
        RemoteCall::Update { .. } => "update",
        RemoteCall::Delete { .. } => "delete",
    };
    format!("{verb:<6} {}{detail}", call.target())
}

/// Build a store and queue for a replay.
pub fn harness(config: folio_sync::SyncConfig, latency: Duration) -> (Arc<MemoryStore>, SyncQueue) {
    let store = Arc::new(MemoryStore::with_latency(latency));
    let queue = SyncQueue::new(store.clone(), config);
    (store, queue)
}

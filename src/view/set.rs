//! The hex and disassembly views of one session, kept coherent across
//! mutating commands.

use crate::channel::CommandChannel;
use crate::config::ViewConfig;
use crate::error::Result;
use crate::repository::{EngineRepository, Repository};
use crate::view::disasm::DisasmView;
use crate::view::hex::HexView;
use crate::view::range::ViewRange;
use std::sync::Arc;
use tracing::{debug, info};

/// Both views over one channel.
///
/// A command that may have changed the engine's state goes through
/// [`ViewSet::execute_mutating`]; commands run elsewhere must be followed by
/// [`ViewSet::after_mutation`] so neither view serves pre-mutation rows.
#[derive(Debug, Clone)]
pub struct ViewSet {
    channel: Arc<CommandChannel>,
    hex: HexView,
    disasm: DisasmView,
    radius: usize,
}

impl ViewSet {
    /// Discover the view range through the channel and build both views.
    pub async fn open(channel: Arc<CommandChannel>) -> Self {
        let config = channel.config().view.clone();
        let repo: Arc<dyn Repository> = Arc::new(EngineRepository::new(channel.clone()));
        let (range, source) = ViewRange::discover(repo.as_ref(), config.default_span).await;
        info!(%range, ?source, session_id = repo.session_id(), "Views opened");
        Self::with_repository(channel, repo, range, config)
    }

    /// Views over an explicit range and repository.
    pub fn with_repository(
        channel: Arc<CommandChannel>,
        repo: Arc<dyn Repository>,
        range: ViewRange,
        config: ViewConfig,
    ) -> Self {
        let radius = config.preload_radius;
        Self {
            hex: HexView::new(range, repo.clone(), config.clone()),
            disasm: DisasmView::new(range, repo, config),
            channel,
            radius,
        }
    }

    pub fn hex(&self) -> &HexView {
        &self.hex
    }

    pub fn disasm(&self) -> &DisasmView {
        &self.disasm
    }

    pub fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }

    /// Run a command that may write to the engine, then refresh both views
    /// around `focus`.
    pub async fn execute_mutating(&self, command: &str, focus: u64) -> Result<String> {
        let result = self.channel.execute(command).await?;
        self.after_mutation(focus).await;
        Ok(result)
    }

    /// Drop every cached row, then reload the rows around `focus`.
    pub async fn after_mutation(&self, focus: u64) {
        self.hex.invalidate_all();
        self.disasm.invalidate_all();
        let hex = self.hex.preload_around(focus, self.radius).await;
        let disasm = self.disasm.preload_around(focus, self.radius).await;
        debug!(focus, hex, disasm, "Views reloaded after mutation");
    }
}

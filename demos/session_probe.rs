//! Open a target in the engine, print the session and the first rows of
//! both views.
//!
//! ```text
//! cargo run --example session_probe -- /bin/ls
//! ENGINELINK_TRANSPORT=http cargo run --example session_probe -- /bin/ls
//! ```

use anyhow::{bail, Context, Result};
use enginelink::logging::init_tracing;
use enginelink::view::ViewSet;
use enginelink::{CommandChannel, EngineConfig, LaunchSpec};
use std::sync::Arc;

const ROWS: u64 = 8;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let Some(target) = std::env::args().nth(1) else {
        bail!("usage: session_probe <file>");
    };
    let config = EngineConfig::default()
        .with_env_overrides()
        .context("invalid ENGINELINK_* environment")?;

    let channel = Arc::new(CommandChannel::new(config));
    channel
        .open(LaunchSpec::file(&target))
        .await
        .with_context(|| format!("cannot open {}", target))?;
    if let Some(info) = channel.session() {
        println!("{}", serde_json::to_string_pretty(&info)?);
    }

    let views = ViewSet::open(channel.clone()).await;
    let start = views.hex().range().start;
    views.after_mutation(start).await;

    println!("hex {}", views.hex().range());
    for index in 0..ROWS.min(views.hex().row_count()) {
        if let Some(row) = views.hex().get_row_data(index) {
            println!("{:#012x}  {:<49} {}", row.address, row.hex(), row.ascii());
        }
    }

    println!("disassembly (~{} rows)", views.disasm().estimated_row_count());
    let first = views.disasm().index_of_address(start);
    for index in first..first + ROWS {
        match views.disasm().get_row_data(index) {
            Some(ins) => println!("{:#012x}  {:<24} {}", ins.address, ins.bytes, ins.opcode),
            None => break,
        }
    }

    channel.close().await;
    Ok(())
}

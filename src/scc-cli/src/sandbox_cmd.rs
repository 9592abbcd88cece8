//! Managed sandbox container subcommands.
//!
//! Everything here filters on the managed label, so unrelated containers on
//! the same runtime are never listed or removed.

use scc_common::SccResult;
use scc_sandbox::{ContainerRuntime, SandboxHandle};

use crate::cli::args::SandboxCommand;

pub async fn run(command: SandboxCommand) -> SccResult<i32> {
    let runtime = ContainerRuntime::detect().await?;
    match command {
        SandboxCommand::List => {
            let ids = runtime.list_managed().await?;
            if ids.is_empty() {
                println!("no managed containers");
                return Ok(0);
            }
            for id in ids {
                let handle = SandboxHandle(id);
                let report = runtime.status(&handle).await;
                println!("{}  {:?}", handle, report.status);
            }
        }
        SandboxCommand::Prune => {
            let removed = runtime.prune_managed().await?;
            println!("removed {removed} managed container(s)");
        }
    }
    Ok(0)
}

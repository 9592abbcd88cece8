//! Local exception management.
//!
//! Only local-scope exceptions can be created here; they clear delegation
//! denials and nothing else. Policy-scope exceptions live in the org config
//! repo and go through its review process.

use chrono::{Duration as ChronoDuration, Utc};

use scc_common::SccResult;
use scc_config::{Exception, ExceptionAllow, ExceptionScope};
use scc_policy::ExceptionStore;

use crate::cli::args::ExceptionsCommand;
use crate::context::CliContext;

pub fn run(command: ExceptionsCommand) -> SccResult<i32> {
    let ctx = CliContext::load()?;
    let store = ExceptionStore::open(ctx.paths.user_exceptions_file());

    match command {
        ExceptionsCommand::List => {
            let now = Utc::now();
            let exceptions = store.load()?;
            if exceptions.is_empty() {
                println!("no local exceptions");
                return Ok(0);
            }
            for exception in exceptions {
                let state = if exception.is_expired(now) {
                    "expired"
                } else {
                    "active"
                };
                println!(
                    "{:<20} {state:<8} until {}  {}",
                    exception.id,
                    exception.expires_at.format("%Y-%m-%d %H:%M"),
                    exception.reason
                );
            }
        }
        ExceptionsCommand::Add {
            id,
            plugins,
            mcp_servers,
            base_images,
            hours,
            reason,
        } => {
            let now = Utc::now();
            let exception = Exception {
                id: id.clone(),
                scope: ExceptionScope::Local,
                created_at: now,
                expires_at: now + ChronoDuration::hours(i64::from(hours)),
                reason,
                allow: ExceptionAllow {
                    plugins,
                    mcp_servers,
                    base_images,
                },
            };
            store.add(exception)?;
            println!("added local exception '{id}' (expires in {hours}h)");
            println!("note: local exceptions clear delegation denials only, never security blocks");
        }
        ExceptionsCommand::Remove { id } => {
            if store.remove(&id)? {
                println!("removed '{id}'");
            } else {
                println!("no exception named '{id}'");
            }
        }
    }
    Ok(0)
}

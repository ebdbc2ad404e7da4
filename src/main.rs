mod cli;
mod config;
mod conversation;
mod embedding;
mod executor;
mod gateway;
mod maintenance;
mod oplog;
mod resolver;
mod store;
mod tool_args;
mod tool_schema;
mod transport;
mod types;
mod vector_store;

use std::time::Duration;

use clap::Parser;

use cli::{Cli, Command};
use config::{AuraConfig, env_optional, load_config, save_config};
use conversation::Conversations;
use embedding::HttpEmbedder;
use executor::{Executor, Outcome};
use gateway::{AnthropicBackend, Gateway, OpenAiCompatBackend};
use maintenance::MaintenanceOrchestrator;
use oplog::OpLog;
use resolver::Resolver;
use store::Store;
use tool_args::now_epoch;
use transport::{MessageTransport, SpoolTransport};
use types::CoreError;
use vector_store::SqliteVectorIndex;

fn make_gateway(config: &AuraConfig, oplog: OpLog) -> Gateway {
    let local = OpenAiCompatBackend::new(
        &config.local_base_url,
        &config.local_model,
        &config.local_api_key,
        config.request_timeout_ms,
    );
    // A missing key just means cloud attempts fail and get logged; the
    // local tier keeps the daemon useful offline.
    let api_key = env_optional("ANTHROPIC_API_KEY").unwrap_or_default();
    let cloud = AnthropicBackend::new(
        &config.cloud_base_url,
        &config.cloud_model,
        &api_key,
        config.request_timeout_ms,
    );
    Gateway::new(Box::new(local), Box::new(cloud), oplog)
}

fn make_resolver(config: &AuraConfig) -> Result<Resolver, Box<dyn std::error::Error>> {
    let index = SqliteVectorIndex::open_or_create(&config.db_path())?;
    let embedder = HttpEmbedder::new(
        config.embed_base_url(),
        &config.embed_model,
        config.request_timeout_ms,
    );
    Ok(Resolver::new(index, Box::new(embedder)))
}

fn make_executor(config: &AuraConfig) -> Result<Executor, Box<dyn std::error::Error>> {
    let oplog = OpLog::new(config.log_dir());
    Ok(Executor::new(
        make_gateway(config, oplog.clone()),
        make_resolver(config)?,
        Conversations::new(oplog.clone()),
        oplog,
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.workspace);

    match cli.command {
        Command::Init => {
            std::fs::create_dir_all(&config.workspace)?;
            save_config(&config)?;
            let _ = Store::open_or_create(&config.db_path())?;
            let _ = SqliteVectorIndex::open_or_create(&config.db_path())?;
            let _ = SpoolTransport::new(config.spool_dir())?;
            std::fs::create_dir_all(config.log_dir())?;
            println!("Initialized workspace at {}", config.workspace.display());
            Ok(())
        }

        Command::Process { thread, text } => {
            let store = Store::open_or_create(&config.db_path())?;
            let executor = make_executor(&config)?;
            match executor.handle_message(&store, &thread, &text)? {
                Outcome::Reply(reply) => println!("{reply}"),
                Outcome::Ignored => println!("(ignored: conversation already resolved)"),
            }
            Ok(())
        }

        Command::Run => run_daemon(&config),

        Command::Sweep => {
            let store = Store::open_or_create(&config.db_path())?;
            let oplog = OpLog::new(config.log_dir());
            let gateway = make_gateway(&config, oplog.clone());
            let resolver = make_resolver(&config)?;
            let transport = SpoolTransport::new(config.spool_dir())?;
            let orch = MaintenanceOrchestrator::new(
                &gateway,
                &resolver,
                &transport,
                oplog,
                config.sweep_interval_secs as i64,
                config.audit_hour,
                now_epoch(),
            );
            let now = now_epoch();
            orch.run_sweep(&store, now)?;
            orch.run_reminders(&store, now)?;
            orch.run_purge(&store, now)?;
            println!("Maintenance pass complete.");
            Ok(())
        }

        Command::Status { limit, json } => {
            let store = Store::open_or_create(&config.db_path())?;
            let counts = store.counts()?;
            let entries = oplog::load_recent_entries(&config.log_dir(), limit);
            if json {
                let out = serde_json::json!({
                    "workspace": config.workspace,
                    "counts": counts.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
                    "recent_ops": entries,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Workspace: {}", config.workspace.display());
                for (table, n) in &counts {
                    println!("  {table}: {n}");
                }
                println!("Recent operations:");
                for e in &entries {
                    println!(
                        "  {} {}/{} [{}]{}",
                        e.ts_utc,
                        e.component,
                        e.event,
                        e.outcome,
                        e.detail.as_deref().map(|d| format!(" {d}")).unwrap_or_default()
                    );
                }
            }
            Ok(())
        }
    }
}

fn run_daemon(config: &AuraConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open_or_create(&config.db_path())?;
    let executor = make_executor(config)?;
    let transport = SpoolTransport::new(config.spool_dir())?;

    // Maintenance runs on its own thread with its own connections; a
    // nightly audit blocking on the cloud tier must never delay inbound
    // polling.
    let maint_config = config.clone();
    std::thread::Builder::new()
        .name("maintenance".to_string())
        .spawn(move || maintenance_loop(maint_config))?;

    eprintln!("[aura] daemon started, workspace {}", config.workspace.display());
    loop {
        for (path, msg) in transport.poll()? {
            match executor.handle_message(&store, &msg.thread_token, &msg.text) {
                Ok(Outcome::Reply(reply)) => {
                    transport.send(&msg.thread_token, &reply)?;
                    transport.mark_handled(&path)?;
                }
                Ok(Outcome::Ignored) => {
                    transport.mark_handled(&path)?;
                }
                // Both tiers down: leave the file in the inbox and retry
                // on a later poll.
                Err(CoreError::BackendUnavailable(reason)) => {
                    eprintln!("[aura] backends unavailable, will retry: {reason}");
                }
                Err(e) => {
                    eprintln!("[aura] message failed: {e}");
                    transport.send(
                        &msg.thread_token,
                        "Sorry, I couldn't process that message.",
                    )?;
                    transport.mark_handled(&path)?;
                }
            }
        }

        std::thread::sleep(Duration::from_secs(config.poll_interval_secs));
    }
}

/// Body of the maintenance thread. Every handle here — store, vector
/// index, gateway, transport — is a fresh connection owned by this thread;
/// nothing is shared with the worker loop except the files themselves.
fn maintenance_loop(config: AuraConfig) {
    let oplog = OpLog::new(config.log_dir());
    let store = match Store::open_or_create(&config.db_path()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("[maintenance] store unavailable: {e}");
            return;
        }
    };
    let resolver = match make_resolver(&config) {
        Ok(resolver) => resolver,
        Err(e) => {
            eprintln!("[maintenance] resolver unavailable: {e}");
            return;
        }
    };
    let transport = match SpoolTransport::new(config.spool_dir()) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("[maintenance] spool unavailable: {e}");
            return;
        }
    };
    let gateway = make_gateway(&config, oplog.clone());
    let mut orchestrator = MaintenanceOrchestrator::new(
        &gateway,
        &resolver,
        &transport,
        oplog,
        config.sweep_interval_secs as i64,
        config.audit_hour,
        now_epoch(),
    );
    loop {
        orchestrator.run_due_jobs(&store, now_epoch());
        std::thread::sleep(Duration::from_secs(config.poll_interval_secs));
    }
}

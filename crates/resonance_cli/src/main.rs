use clap::Parser;
use resonance_core::{HistoryEntry, ResonanceConfig};
use resonance_memory::{InMemoryStateStore, SqliteStateStore, StateStore};
use resonance_reasoning::{MockGenerator, TurnEngine, TurnRequest};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file (missing or invalid files fall back to defaults)
    #[arg(short, long, default_value = "config.toml", env = "RESONANCE_CONFIG")]
    config: String,

    /// Path to the state database; overrides `store.db_path`
    #[arg(short, long)]
    db: Option<String>,

    /// User id the conversation state is stored under
    #[arg(short, long, default_value = "local")]
    user: String,

    /// Keep state in memory only
    #[arg(long)]
    memory_store: bool,

    /// Run without a text generator (slot fallback replies only)
    #[arg(long)]
    no_generator: bool,

    /// Print per-turn diagnostics as JSON after each reply
    #[arg(long)]
    debug_diagnostics: bool,
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let mut config = ResonanceConfig::load_or_default(&args.config);
    if let Some(db) = &args.db {
        config.store.db_path = db.clone();
    }

    let store: Arc<dyn StateStore> = if args.memory_store {
        info!("Using in-memory state store");
        Arc::new(InMemoryStateStore::new())
    } else {
        info!("Opening state store at {}...", config.store.db_path);
        Arc::new(SqliteStateStore::new(&config.store.db_path).await?)
    };

    let mut engine = TurnEngine::new(config, store);
    if !args.no_generator {
        engine = engine.with_generator(Arc::new(MockGenerator::echo()));
    }

    println!("Resonance online. Type 'quit' to exit.");
    prompt()?;

    let stdin = io::stdin();
    let mut history: Vec<HistoryEntry> = Vec::new();
    let mut input = String::new();

    loop {
        input.clear();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let trimmed = input.trim();

        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if trimmed.is_empty() {
            prompt()?;
            continue;
        }

        let mut request = TurnRequest::new(args.user.as_str(), trimmed);
        request.history = history.clone();
        let outcome = engine.run_turn(request).await;

        println!("\n{}\n", outcome.text);
        if args.debug_diagnostics {
            let report = serde_json::json!({
                "frame": outcome.frame,
                "input_kind": outcome.input_kind,
                "shape": outcome.shape,
                "gate": outcome.gate,
                "spin": outcome.spin,
                "diagnostics": outcome.diagnostics,
                "turn_count": outcome.state.continuity.turn_count,
                "committed": outcome.committed,
            });
            println!("{}\n", report);
        }

        history.push(HistoryEntry::user(trimmed));
        history.push(HistoryEntry::assistant(outcome.text));
        // The engine bounds what it forwards; keep the local buffer small too
        let max = engine.config().history.max_turns;
        if history.len() > max {
            history.drain(..history.len() - max);
        }

        prompt()?;
    }

    Ok(())
}

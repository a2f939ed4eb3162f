use crate::config::Config;
use anyhow::{bail, Context, Result};
use canopy_common::{ActorId, NodeId};
use canopy_storage::{Draft, Lson, Pool, Snapshot};
use canopy_sync::{ClientHandle, Hub, ServerStore, SyncError};
use clap::Args;
use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of concurrent clients
    #[arg(short, long)]
    pub clients: Option<usize>,

    /// Random ops each client submits
    #[arg(short, long)]
    pub ops: Option<usize>,

    /// Seed for the random ops
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Start the server from this snapshot file
    #[arg(long)]
    pub from: Option<PathBuf>,

    /// Write the final server snapshot here
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct Plan {
    pub clients: usize,
    pub ops_per_client: usize,
    pub seed: u64,
    pub settle_timeout: Duration,
}

#[derive(Debug)]
pub struct Report {
    pub submitted: usize,
    pub refused: usize,
    pub version: u64,
    pub converged: bool,
    pub snapshot: Snapshot,
    pub elapsed: Duration,
}

pub fn simulate(args: SimulateArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let plan = Plan {
        clients: args.clients.unwrap_or(config.simulation.clients),
        ops_per_client: args.ops.unwrap_or(config.simulation.ops_per_client),
        seed: args.seed.unwrap_or(config.simulation.seed),
        settle_timeout: Duration::from_millis(config.simulation.settle_timeout_ms),
    };
    if plan.clients == 0 {
        bail!("At least one client is required");
    }

    let server = match &args.from {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Cannot read {}", path.display()))?;
            ServerStore::from_snapshot(&Snapshot::from_json_str(&content)?)?
        }
        None => ServerStore::new(),
    };

    println!("🌳 {} Canopy simulation", "Starting".green().bold());
    println!(
        "   Clients: {}  Ops/client: {}  Seed: {}",
        plan.clients, plan.ops_per_client, plan.seed
    );
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(run(server, &config, plan))?;

    if let Some(out) = &args.out {
        fs::write(out, report.snapshot.to_json_string()?)?;
        println!("   {} Wrote {}", "✓".green(), out.display());
    }

    println!("   Submitted: {}", report.submitted);
    if report.refused > 0 {
        println!("   {} {}", "Refused locally:".yellow(), report.refused);
    }
    println!("   Server version: {}", report.version);
    println!("   Nodes: {}", report.snapshot.len());
    println!("   Elapsed: {:?}", report.elapsed);
    println!();

    if !report.converged {
        bail!("Clients diverged from the server");
    }
    println!("✨ {} All clients converged", "Done".green().bold());
    Ok(())
}

/// Run `plan` against a hub hosting `server` and compare every client with
/// the server at the end
pub async fn run(server: ServerStore, config: &Config, plan: Plan) -> Result<Report> {
    let started = Instant::now();
    let hub = Hub::spawn(server, &config.sync);

    let mut clients = Vec::with_capacity(plan.clients);
    for _ in 0..plan.clients {
        clients.push(hub.join().await?);
    }
    let board = Board::prepare(&clients[0]).await?;
    settle(&clients, plan.settle_timeout).await?;
    let seeded = hub.snapshot().await?;
    if !converge(&clients, &seeded, plan.settle_timeout).await? {
        bail!("Clients never saw the initial board");
    }

    let mut tasks = Vec::with_capacity(clients.len());
    for (i, client) in clients.iter().enumerate() {
        let client = client.clone();
        let rng = StdRng::seed_from_u64(plan.seed.wrapping_add(i as u64));
        let ops = plan.ops_per_client;
        tasks.push(tokio::spawn(async move {
            drive(client, board, rng, ops).await
        }));
    }

    let mut submitted = 0;
    let mut refused = 0;
    for task in tasks {
        let (ok, failed) = task.await??;
        submitted += ok;
        refused += failed;
    }

    settle(&clients, plan.settle_timeout).await?;
    let snapshot = hub.snapshot().await?;
    let converged = converge(&clients, &snapshot, plan.settle_timeout).await?;
    let version = hub.version().await?;

    for client in &clients {
        client.shutdown().await;
    }
    hub.shutdown().await;

    info!(submitted, refused, version, converged, "Simulation finished");
    Ok(Report {
        submitted,
        refused,
        version,
        converged,
        snapshot,
        elapsed: started.elapsed(),
    })
}

/// Ids of the shared structures every client edits
#[derive(Debug, Clone, Copy)]
struct Board {
    cards: NodeId,
    tags: NodeId,
}

impl Board {
    async fn prepare(client: &ClientHandle) -> Result<Self> {
        let cards = existing_or_created(client, "cards", Draft::list([])).await?;
        let tags = existing_or_created(client, "tags", Draft::map::<&str>([])).await?;
        debug!(cards = %cards, tags = %tags, "Board ready");
        Ok(Self { cards, tags })
    }
}

async fn existing_or_created(client: &ClientHandle, key: &str, draft: Draft) -> Result<NodeId> {
    if let Some(Lson::Node(id)) = client.get(NodeId::root(), key).await? {
        return Ok(id);
    }
    let applied = client.set(NodeId::root(), key, draft).await?;
    applied
        .op
        .created_ids()
        .first()
        .copied()
        .with_context(|| format!("Creating {} produced no node", key))
}

const TITLES: [&str; 4] = ["draft", "review", "shipped", "archived"];
const TAGS: [&str; 3] = ["red", "green", "blue"];

/// Submit `ops` random edits. Returns how many were accepted locally and how
/// many the local pool refused.
async fn drive(
    client: ClientHandle,
    board: Board,
    mut rng: StdRng,
    ops: usize,
) -> Result<(usize, usize), SyncError> {
    let mut accepted = 0;
    let mut refused = 0;

    for step in 0..ops {
        let cards = card_count(&client).await?;
        let result = match rng.gen_range(0..10) {
            0..=2 => client
                .insert(board.cards, rng.gen_range(0..=cards), format!("card {}-{}", client.actor(), step))
                .await
                .map(|_| ()),
            3 if cards > 0 => client
                .delete(board.cards, rng.gen_range(0..cards))
                .await
                .map(|_| ()),
            4 if cards > 1 => client
                .move_item(board.cards, rng.gen_range(0..cards), rng.gen_range(0..cards))
                .await
                .map(|_| ()),
            5 | 6 => client
                .set(NodeId::root(), "status", TITLES[rng.gen_range(0..TITLES.len())])
                .await
                .map(|_| ()),
            7 => client
                .set(board.tags, TAGS[rng.gen_range(0..TAGS.len())], rng.gen_range(0..100i64))
                .await
                .map(|_| ()),
            8 => client.undo().await.map(|_| ()),
            _ => client
                .set(NodeId::root(), "updatedBy", client.actor().0 as i64)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => accepted += 1,
            // The list moved under us between the read and the write
            Err(SyncError::Storage(err)) => {
                debug!(actor = %client.actor(), error = %err, "Local op refused");
                refused += 1;
            }
            Err(err) => return Err(err),
        }

        if step % 8 == 0 {
            tokio::task::yield_now().await;
        }
    }
    Ok((accepted, refused))
}

async fn card_count(client: &ClientHandle) -> Result<usize, SyncError> {
    let json = client.to_json().await?;
    Ok(json
        .get("cards")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0))
}

/// Wait until no client has ops in flight
async fn settle(clients: &[ClientHandle], timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let mut pending = 0;
        for client in clients {
            pending += client.pending_len().await?;
        }
        if pending == 0 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("{} ops still pending after {:?}", pending, timeout);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Remote ops can trail the last ack, so compare until every client matches
/// the server or the timeout runs out
async fn converge(clients: &[ClientHandle], snapshot: &Snapshot, timeout: Duration) -> Result<bool> {
    let expected = Pool::from_snapshot(ActorId::SERVER, snapshot)?.to_json();
    let deadline = Instant::now() + timeout;
    loop {
        let mut diverged = Vec::new();
        for client in clients {
            if client.to_json().await? != expected {
                diverged.push(client.actor());
            }
        }
        if diverged.is_empty() {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            for actor in diverged {
                println!("   {} client {} diverged", "✗".red(), actor);
            }
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

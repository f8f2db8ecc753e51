use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod group;
mod records;
mod simulate;
mod telemetry;

use concord::ConcordConfig;
use concord::membership::ParticipantId;

/// Sibling-merging records and coordinator-free group membership.
///
/// concord stores records in a multi-version store that keeps concurrent
/// writes as siblings, and merges them on read. On top of that it runs a
/// join/part membership protocol: every participant periodically saves its
/// view, reloads, and acknowledges pending requests.
///
/// QUICK START:
///
///   # Terminal 1: join the group and keep acknowledging others
///   concord --id node-a run
///
///   # Terminal 2: join as a second participant
///   concord --id node-b run
///
///   # Anywhere: inspect the shared record
///   concord show
///
/// Settings come from concord.toml (see 'concord config').
#[derive(Parser)]
#[command(name = "concord")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'concord <command> --help' for more information on a specific command.")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "CONCORD_CONFIG", default_value = "concord.toml")]
    config: PathBuf,

    /// Participant id (overrides `membership.id`)
    #[arg(long, global = true, env = "CONCORD_ID")]
    id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the group once and exit
    ///
    /// Other members must be running ('concord run') to acknowledge the
    /// request within the join interval.
    Join,

    /// Leave the group
    Part,

    /// Join, then keep the membership loop running
    Run {
        /// Leave and exit after this many milliseconds
        #[arg(long = "for", value_name = "MS")]
        duration_ms: Option<u64>,
    },

    /// Show the group record
    Show {
        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Offer a work item to the group queue
    Offer {
        /// Item name
        item: String,
        /// JSON payload
        #[arg(default_value = "null")]
        payload: String,
    },

    /// Claim a work item from the group queue
    Claim {
        /// Item name
        item: String,
    },

    /// Mark a claimed work item finished
    Finish {
        /// Item name
        item: String,
    },

    /// Return a claimed work item to the queue
    Release {
        /// Item name
        item: String,
    },

    /// Print a stored record
    Get {
        /// Bucket name
        bucket: String,
        /// Record key
        key: String,
        /// Print each sibling instead of the merged record
        #[arg(long)]
        siblings: bool,
    },

    /// List keys in a bucket
    Keys {
        /// Bucket name
        bucket: String,
    },

    /// Run an in-process group and report convergence
    Simulate(simulate::SimulateArgs),

    /// Print the effective configuration
    Config,
}

/// Resolved global options shared by every command.
pub struct Context {
    pub config: ConcordConfig,
    pub id: ParticipantId,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let config = ConcordConfig::load(&cli.config)?;
        let id = match &cli.id {
            Some(id) => ParticipantId::new(id)?,
            None => config.membership.participant_id()?,
        };
        Ok(Self { config, id })
    }
}

fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();
    let ctx = Context::load(&cli)?;

    match cli.command {
        Commands::Join => group::join(&ctx),
        Commands::Part => group::part(&ctx),
        Commands::Run { duration_ms } => group::run(&ctx, duration_ms),
        Commands::Show { json } => group::show(&ctx, json),
        Commands::Offer { item, payload } => group::offer(&ctx, &item, &payload),
        Commands::Claim { item } => group::claim(&ctx, &item),
        Commands::Finish { item } => group::finish(&ctx, &item),
        Commands::Release { item } => group::release(&ctx, &item),
        Commands::Get {
            bucket,
            key,
            siblings,
        } => records::get(&ctx, &bucket, &key, siblings),
        Commands::Keys { bucket } => records::keys(&ctx, &bucket),
        Commands::Simulate(args) => simulate::run(&args),
        Commands::Config => {
            print_config(&cli, &ctx);
            Ok(())
        }
    }
}

fn print_config(cli: &Cli, ctx: &Context) {
    let store = &ctx.config.store;
    let m = &ctx.config.membership;
    println!("config file:      {}", cli.config.display());
    println!("participant id:   {}", ctx.id);
    println!("store.backend:    {}", store.backend);
    println!("store.path:       {}", store.path.display());
    println!(
        "store.client_id:  {}",
        store.client_id.as_deref().unwrap_or("(participant id)")
    );
    println!("membership.bucket: {}", m.bucket);
    println!("membership.key:    {}", m.key);
    println!("join_interval_ms:  {}", m.join_interval_ms);
    println!("part_interval_ms:  {}", m.part_interval_ms);
    println!("run_interval_ms:   {}", m.run_interval_ms);
}

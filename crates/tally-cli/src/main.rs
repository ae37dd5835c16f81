//! tally - poll service driver
//!
//! - `tally demo`: in-memory store 上で作成 → 同時投票 → ページング を一通り実行
//! - `tally routes`: 公開している操作の一覧

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tally_core::app::{PollService, ROUTES, ServiceBuilder};
use tally_core::config::ServiceConfig;
use tally_core::context::Context;
use tally_core::domain::{Poll, PollDraft};
use tally_core::impls::InMemoryStore;
use tally_core::ports::SystemClock;

/// Application name
const APP_NAME: &str = "tally";

#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Transactional poll service driver")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create polls, vote on the first one concurrently, then page through all of them
    Demo {
        /// Number of polls to create
        #[arg(long, default_value_t = 5)]
        polls: usize,

        /// Number of concurrent votes cast on the first poll
        #[arg(long, default_value_t = 100)]
        voters: usize,

        /// Page size used while listing
        #[arg(long)]
        page_size: Option<i64>,

        /// Referer sent with mutations (needed when allowed_referers is set)
        #[arg(long)]
        referer: Option<String>,

        /// Per-request timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Print the route table
    Routes,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    created: usize,
    votes_cast: usize,
    votes_failed: usize,
    pages: usize,
    listed: usize,
    first_poll: Poll,
}

type Service = PollService<InMemoryStore, SystemClock>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    match cli.command {
        Command::Routes => {
            for route in ROUTES {
                let guard = if route.operation.guarded() { "guarded" } else { "" };
                println!("{:<7} {:<6} /{:<26} {}", route.name, route.method.as_str(), route.path, guard);
            }
            Ok(())
        }
        Command::Demo {
            polls,
            voters,
            page_size,
            referer,
            timeout_ms,
        } => {
            anyhow::ensure!(polls > 0, "--polls must be at least 1");
            let service = Arc::new(ServiceBuilder::new(config).build_in_memory()?);

            let mut ctx = Context::background();
            if let Some(referer) = referer {
                ctx = ctx.with_referer(referer);
            }
            let report = run_demo(service, ctx, polls, voters, page_size, timeout_ms).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn run_demo(
    service: Arc<Service>,
    ctx: Context,
    polls: usize,
    voters: usize,
    page_size: Option<i64>,
    timeout_ms: u64,
) -> anyhow::Result<DemoReport> {
    let timeout = Duration::from_millis(timeout_ms);

    let mut first = None;
    for i in 0..polls {
        let draft = PollDraft::new(format!("Question #{}", i + 1), ["Yes", "No", "Maybe"]);
        let poll = service.add(&ctx.with_timeout(timeout), draft).await?;
        if first.is_none() {
            first = Some(poll);
        }
    }
    let first = first.context("no poll was created")?;
    let uid = first
        .uid
        .context("created poll has no uid")?
        .to_string();
    let answers = i64::try_from(first.answers.len())?;

    let mut handles = Vec::with_capacity(voters);
    for voter in 0..voters {
        let service = service.clone();
        let ctx = ctx.with_timeout(timeout);
        let uid = uid.clone();
        let answer = i64::try_from(voter)? % answers;
        handles.push(tokio::spawn(async move {
            service.vote(&ctx, &uid, answer).await
        }));
    }

    let mut votes_failed = 0;
    for handle in handles {
        if let Err(err) = handle.await? {
            tracing::warn!(error = %err, "vote failed");
            votes_failed += 1;
        }
    }

    let mut pages = 0;
    let mut listed = 0;
    let mut cursor: Option<String> = None;
    loop {
        let page = service
            .list(&ctx.with_timeout(timeout), page_size, cursor.as_deref())
            .await?;
        if page.is_empty() {
            break;
        }
        pages += 1;
        listed += page.polls.len();
        cursor = page.next.map(|marker| marker.encode());
        if cursor.is_none() {
            break;
        }
    }

    let first_poll = service.get(&ctx.with_timeout(timeout), &uid).await?;
    Ok(DemoReport {
        created: polls,
        votes_cast: voters - votes_failed,
        votes_failed,
        pages,
        listed,
        first_poll,
    })
}

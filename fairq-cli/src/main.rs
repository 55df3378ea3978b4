use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fairq-cli")]
#[command(about = "FairQ admin CLI - inspect and clear partitioned queues", long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 8650)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-partition pending/active/processed table for a queue
    Table {
        /// Queue to inspect
        queue: Option<String>,

        /// Show every known queue
        #[arg(long)]
        all: bool,

        /// Redraw until interrupted
        #[arg(long)]
        watch: bool,

        /// Seconds between redraws
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Drop a queue's jobs, reservations and counters
    Clear {
        queue: String,

        /// Only this partition
        #[arg(long)]
        partition: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Deserialize)]
struct Stats {
    strategy: String,
    limiter: String,
    max_concurrent: Option<usize>,
    queues: Vec<QueueStats>,
}

#[derive(Debug, Deserialize)]
struct QueueStats {
    queue: String,
    pending: usize,
    active: usize,
    processed: u64,
    partition_count: usize,
    partitions: Vec<PartitionStats>,
}

#[derive(Debug, Deserialize)]
struct PartitionStats {
    partition: String,
    queued: usize,
    active: usize,
    delayed: usize,
    processed: u64,
}

#[derive(Debug, Deserialize)]
struct ClearResponse {
    queue: String,
    cleared_partitions: usize,
}

struct BrokerClient {
    base_url: String,
    client: reqwest::Client,
}

impl BrokerClient {
    fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            client: reqwest::Client::new(),
        }
    }

    async fn stats(&self) -> Result<Stats> {
        self.client
            .get(format!("{}/stats", self.base_url))
            .send()
            .await
            .context("broker unreachable")?
            .error_for_status()
            .context("stats request failed")?
            .json::<Stats>()
            .await
            .context("malformed stats response")
    }

    async fn clear(&self, queue: &str, partition: Option<&str>) -> Result<ClearResponse> {
        let mut request = self
            .client
            .delete(format!("{}/queues/{}", self.base_url, queue));
        if let Some(partition) = partition {
            request = request.query(&[("partition", partition)]);
        }
        request
            .send()
            .await
            .context("broker unreachable")?
            .error_for_status()
            .context("clear request failed")?
            .json::<ClearResponse>()
            .await
            .context("malformed clear response")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for CLI output
    // Use info level by default to show user-facing messages
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let args = Args::parse();
    let client = BrokerClient::new(&args.host, args.port);

    if let Err(e) = run(args.command, &client).await {
        error!(error = %e, "{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, client: &BrokerClient) -> Result<()> {
    match command {
        Command::Table {
            queue,
            all,
            watch,
            interval,
        } => {
            if queue.is_none() && !all {
                bail!("specify a queue or pass --all");
            }
            if watch {
                loop {
                    let stats = client.stats().await?;
                    // Clear screen and home the cursor before redrawing.
                    print!("\x1b[2J\x1b[1;1H");
                    render_tables(&stats, queue.as_deref(), all);
                    info!(
                        "{}",
                        format!("refreshing every {interval}s - Ctrl-C to quit").dimmed()
                    );
                    tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
                }
            } else {
                let stats = client.stats().await?;
                render_tables(&stats, queue.as_deref(), all);
            }
        }

        Command::Clear {
            queue,
            partition,
            force,
        } => {
            if !force && !confirm(&queue, partition.as_deref())? {
                info!("{}", "aborted".yellow());
                return Ok(());
            }
            let cleared = client.clear(&queue, partition.as_deref()).await?;
            if cleared.cleared_partitions == 0 {
                info!("queue '{}' was already empty", cleared.queue.cyan());
            } else {
                info!(
                    "{} cleared {} partition(s) from '{}'",
                    "OK".green(),
                    cleared.cleared_partitions,
                    cleared.queue.cyan()
                );
            }
        }
    }

    Ok(())
}

fn confirm(queue: &str, partition: Option<&str>) -> Result<bool> {
    match partition {
        Some(partition) => info!("Clear partition '{partition}' of queue '{queue}'? [y/N]"),
        None => info!("Clear the whole queue '{queue}'? [y/N]"),
    }
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

fn render_tables(stats: &Stats, queue: Option<&str>, all: bool) {
    let cap = stats
        .max_concurrent
        .map(|cap| cap.to_string())
        .unwrap_or_else(|| "unlimited".to_string());
    info!(
        "strategy: {}   limiter: {} (cap {})",
        stats.strategy.bold(),
        stats.limiter.bold(),
        cap
    );

    let selected: Vec<&QueueStats> = stats
        .queues
        .iter()
        .filter(|q| all || queue == Some(q.queue.as_str()))
        .collect();

    if selected.is_empty() {
        match queue {
            Some(name) if !all => info!("queue '{}' has no recorded state", name.cyan()),
            _ => info!("no queues found"),
        }
        return;
    }

    for queue_stats in selected {
        info!(
            "{} {}  pending={} active={} processed={} partitions={}",
            "queue".dimmed(),
            queue_stats.queue.cyan().bold(),
            queue_stats.pending,
            queue_stats.active,
            queue_stats.processed,
            queue_stats.partition_count
        );
        info!(
            "{}",
            format!(
                "{:<32} {:>8} {:>8} {:>8} {:>10}",
                "PARTITION", "PENDING", "ACTIVE", "DELAYED", "PROCESSED"
            )
            .bold()
        );

        let mut partitions: Vec<&PartitionStats> = queue_stats.partitions.iter().collect();
        partitions.sort_by(|a, b| b.queued.cmp(&a.queued).then(a.partition.cmp(&b.partition)));
        for p in partitions {
            info!(
                "{:<32} {:>8} {:>8} {:>8} {:>10}",
                p.partition, p.queued, p.active, p.delayed, p.processed
            );
        }
    }
}

use chrono::{Duration, Utc};
use clap::Parser;
use lib_feed::{FeedClient, FeedConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Measures the live score feed's event rate", long_about = None)]
struct Args {
    /// Report interval in minutes
    #[clap(short, long, default_value_t = 1)]
    report_interval_minutes: u64,

    /// Feed base address
    #[clap(long, default_value = lib_feed::config::DEFAULT_BASE_URL)]
    base_url: String,
}

struct Stats {
    global_timestamps: VecDeque<chrono::DateTime<Utc>>,
    kind_timestamps: HashMap<String, VecDeque<chrono::DateTime<Utc>>>,
    errors: HashMap<&'static str, u64>,
}

fn record(stats: &Mutex<Stats>, label: String) {
    if let Ok(mut data) = stats.lock() {
        let now = Utc::now();
        data.global_timestamps.push_back(now);
        data.kind_timestamps.entry(label).or_default().push_back(now);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let stats = Arc::new(Mutex::new(Stats {
        global_timestamps: VecDeque::new(),
        kind_timestamps: HashMap::new(),
        errors: HashMap::new(),
    }));

    // Clone for the reporter task
    let stats_reporter = Arc::clone(&stats);
    let report_interval_seconds = args.report_interval_minutes * 60;
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(report_interval_seconds)).await;
            let now = Utc::now();
            let one_minute_ago = now - Duration::minutes(1);

            let Ok(mut data) = stats_reporter.lock() else { break };

            // Clean global
            while data.global_timestamps.front().is_some_and(|&t| t < one_minute_ago) {
                data.global_timestamps.pop_front();
            }
            let global_rate = data.global_timestamps.len();

            // Clean per kind and collect rates
            let mut rates: Vec<(String, usize)> = Vec::new();
            for (kind, dq) in data.kind_timestamps.iter_mut() {
                while dq.front().is_some_and(|&t| t < one_minute_ago) {
                    dq.pop_front();
                }
                if !dq.is_empty() {
                    rates.push((kind.clone(), dq.len()));
                }
            }

            // Sort DESC by msg/min
            rates.sort_by(|a, b| b.1.cmp(&a.1));

            let report = rates
                .iter()
                .map(|(s, r)| format!("{}: {} msg/min", s, r))
                .collect::<Vec<_>>()
                .join(", ");
            let errors = data
                .errors
                .iter()
                .map(|(k, n)| format!("{}: {}", k, n))
                .collect::<Vec<_>>()
                .join(", ");

            println!("\n----- 1-Minute Summary -----");
            println!("Global rate: {} msg/min", global_rate);
            println!("Kinds: {}", if report.is_empty() { "No data" } else { &report });
            println!("Errors (total): {}", if errors.is_empty() { "none" } else { &errors });
            println!("----------------------------\n");
        }
    });

    let client = FeedClient::new(FeedConfig::with_base_url(args.base_url))?;
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        on_ctrl_c.cancel();
    });

    println!("Connecting to {}... Press Ctrl+C to stop.", client.url());
    let mut feed = client.events(cancel)?;

    // Handle incoming messages
    while let Some(item) = feed.next().await {
        match item {
            Ok(event) => record(&stats, event.kind().to_string()),
            Err(err) => {
                eprintln!("{}", err);
                if let Ok(mut data) = stats.lock() {
                    *data.errors.entry(err.kind()).or_insert(0) += 1;
                }
            }
        }
    }

    println!("Feed ended.");
    Ok(())
}

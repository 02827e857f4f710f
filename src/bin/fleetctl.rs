use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Management CLI for the fleet-sync control plane", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Control plane version and node counts
    Status,
    /// List every registered node
    Nodes,
    /// Force a node to re-fetch its config on the next heartbeat
    Sync { node_id: String },
    /// Put a node into or take it out of maintenance
    Maintenance {
        node_id: String,
        #[arg(long, conflicts_with = "off")]
        on: bool,
        #[arg(long)]
        off: bool,
    },
    /// Per-window and cumulative traffic for a node
    Usage { node_id: String },
    /// Online nodes of a tenant
    Dispatchable { tenant: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Nodes => client.get(format!("{}/admin/nodes", base)),
        Commands::Sync { node_id } => client.post(format!("{}/admin/nodes/{}/sync", base, node_id)),
        Commands::Maintenance { node_id, on, off } => {
            if on == off {
                return Err("pass exactly one of --on or --off".into());
            }
            client
                .post(format!("{}/admin/nodes/{}/maintenance", base, node_id))
                .json(&json!({ "enabled": on }))
        }
        Commands::Usage { node_id } => client.get(format!("{}/admin/nodes/{}/usage", base, node_id)),
        Commands::Dispatchable { tenant } => {
            client.get(format!("{}/admin/tenants/{}/dispatchable", base, tenant))
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

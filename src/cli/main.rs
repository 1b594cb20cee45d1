use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "opsgraph-cli")]
#[command(about = "Opsgraph command line client", long_about = None)]
struct Cli {
    #[arg(short, long, env = "OPSGRAPH_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask for probable root causes of a symptom
    Rca {
        /// Symptom description
        query: String,

        #[arg(short, long)]
        component: Option<String>,

        #[arg(short = 'x', long)]
        error_code: Option<String>,
    },

    /// Alert operations
    #[command(subcommand)]
    Alert(AlertCommand),

    /// Event operations
    #[command(subcommand)]
    Event(EventCommand),

    /// Workflow operations
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Show an execution
    Status {
        #[arg(value_name = "EXECUTION_ID")]
        id: String,

        /// Poll until the execution finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Cancel a running execution
    Cancel {
        #[arg(value_name = "EXECUTION_ID")]
        id: String,
    },

    /// Check server health
    Health,
}

#[derive(Subcommand)]
enum AlertCommand {
    /// Trigger an alert
    Trigger {
        #[arg(short = 'T', long = "type")]
        alert_type: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(short = 'S', long, default_value = "medium")]
        severity: String,
    },

    /// Resolve the active alert for a fingerprint
    Resolve { fingerprint: String },

    /// List active alerts
    List {
        #[arg(short = 'S', long)]
        severity: Option<String>,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Create or replace an alert rule from a YAML or JSON file
    Rule { file: PathBuf },

    /// List alert rules
    Rules,

    /// Alert counters
    Stats,
}

#[derive(Subcommand)]
enum EventCommand {
    /// Send an event envelope from a JSON file ("-" for stdin)
    Send { file: PathBuf },
}

#[derive(Subcommand)]
enum WorkflowCommand {
    /// Register and run a workflow from a YAML or JSON file
    Submit { file: PathBuf },

    /// Register a workflow without running it
    Create { file: PathBuf },

    /// Run a registered workflow
    Execute {
        #[arg(value_name = "WORKFLOW_ID")]
        id: String,
    },

    /// List registered workflows
    List {
        /// Only enabled (true) or disabled (false) workflows
        #[arg(long)]
        enabled: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;
    let base = cli.endpoint.trim_end_matches('/');

    let body = match cli.command {
        Commands::Rca {
            query,
            component,
            error_code,
        } => {
            send(client.post(format!("{}/v1/rca", base)).json(&json!({
                "query": query,
                "component": component,
                "error_code": error_code,
            })))
            .await?
        }

        Commands::Alert(AlertCommand::Trigger {
            alert_type,
            title,
            description,
            severity,
        }) => {
            send(client.post(format!("{}/v1/alerts/trigger", base)).json(&json!({
                "type": alert_type,
                "title": title,
                "description": description,
                "severity": severity.to_lowercase(),
            })))
            .await?
        }

        Commands::Alert(AlertCommand::Resolve { fingerprint }) => {
            send(client.post(format!("{}/v1/alerts/{}/resolve", base, fingerprint))).await?
        }

        Commands::Alert(AlertCommand::List { severity, limit }) => {
            let mut request = client
                .get(format!("{}/v1/alerts/active", base))
                .query(&[("limit", limit)]);
            if let Some(severity) = severity {
                request = request.query(&[("severity", severity.to_lowercase())]);
            }
            send(request).await?
        }

        Commands::Alert(AlertCommand::Rule { file }) => {
            let rule = read_definition(&file)?;
            send(client.post(format!("{}/v1/alerts/rules", base)).json(&rule)).await?
        }

        Commands::Alert(AlertCommand::Rules) => {
            send(client.get(format!("{}/v1/alerts/rules", base))).await?
        }

        Commands::Alert(AlertCommand::Stats) => {
            send(client.get(format!("{}/v1/alerts/stats", base))).await?
        }

        Commands::Event(EventCommand::Send { file }) => {
            let envelope: Value = serde_json::from_str(&read_input(&file)?)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            send(client.post(format!("{}/v1/events", base)).json(&envelope)).await?
        }

        Commands::Workflow(WorkflowCommand::Submit { file }) => {
            let definition = read_definition(&file)?;
            send(client.post(format!("{}/v1/workflows/submit", base)).json(&definition)).await?
        }

        Commands::Workflow(WorkflowCommand::Create { file }) => {
            let definition = read_definition(&file)?;
            send(client.post(format!("{}/v1/workflows", base)).json(&definition)).await?
        }

        Commands::Workflow(WorkflowCommand::Execute { id }) => {
            send(client.post(format!("{}/v1/workflows/{}/execute", base, id))).await?
        }

        Commands::Workflow(WorkflowCommand::List { enabled }) => {
            let mut request = client.get(format!("{}/v1/workflows", base));
            if let Some(enabled) = enabled {
                request = request.query(&[("enabled", enabled)]);
            }
            send(request).await?
        }

        Commands::Status { id, wait } => {
            let url = format!("{}/v1/executions/{}", base, id);
            loop {
                let body = send(client.get(&url)).await?;
                let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
                if !wait || matches!(status, "completed" | "failed") {
                    break body;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }

        Commands::Cancel { id } => {
            send(client.post(format!("{}/v1/executions/{}/cancel", base, id))).await?
        }

        Commands::Health => send(client.get(format!("{}/health", base))).await?,
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Send a request and return its JSON body, failing on non-2xx
async fn send(request: RequestBuilder) -> anyhow::Result<Value> {
    let response = request.send().await.context("request failed")?;
    let status = response.status();
    let text = response.text().await?;
    let body: Value = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    if !status.is_success() {
        bail!(
            "server returned {}: {}",
            status,
            serde_json::to_string_pretty(&body)?
        );
    }
    Ok(body)
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

/// YAML is a superset of JSON, so one parser covers both
fn read_definition(path: &Path) -> anyhow::Result<Value> {
    let text = read_input(path)?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("{} is not valid YAML or JSON", path.display()))
}

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode, Url};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "defense-cli")]
#[command(about = "Operator CLI for the request-defense admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "DEFENSE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Request counters and rejection totals
    Metrics,
    /// List signing secrets (ids and algorithms only)
    Secrets,
    /// Install a new active signing secret
    Rotate {
        id: String,
        secret: String,
        #[arg(short, long)]
        algorithm: Option<String>,
    },
    /// Stop accepting tokens signed with a secret
    Retire { id: String },
    /// Invalidate every token issued to a subject
    Revoke { subject: String },
    /// Clear a login lockout (`username|address`)
    Unlock { identifier: String },
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

    let (method, segments, body): (Method, Vec<&str>, Option<Value>) = match &cli.command {
        Commands::Status => (Method::GET, vec!["admin", "status"], None),
        Commands::Metrics => (Method::GET, vec!["admin", "metrics"], None),
        Commands::Secrets => (Method::GET, vec!["admin", "secrets"], None),
        Commands::Rotate { id, secret, algorithm } => (
            Method::POST,
            vec!["admin", "secrets", "rotate"],
            Some(json!({ "id": id, "secret": secret, "algorithm": algorithm })),
        ),
        Commands::Retire { id } => (Method::POST, vec!["admin", "secrets", id.as_str(), "retire"], None),
        Commands::Revoke { subject } => (Method::POST, vec!["admin", "subjects", subject.as_str(), "revoke"], None),
        Commands::Unlock { identifier } => (Method::DELETE, vec!["admin", "lockouts", identifier.as_str()], None),
    };

    let mut url = Url::parse(&cli.url)?;
    url.path_segments_mut()
        .map_err(|_| "admin URL cannot be a base")?
        .pop_if_empty()
        .extend(segments);

    let mut request = client.request(method, url).headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
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
    if status == StatusCode::NO_CONTENT {
        println!("ok");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "puresign", about = "PureSign signature verification CLI")]
struct Cli {
    /// Base URL of the puresignd API
    #[arg(long, global = true, env = "PURESIGN_SERVER", default_value = "http://localhost:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the signature on a document image against a user's reference
    Verify {
        /// Document image (JPEG or PNG)
        file: PathBuf,
        /// User whose reference signature to compare against
        #[arg(short, long)]
        user: String,
        /// Ask the server for local processing
        #[arg(long)]
        local_processing: bool,
    },
    /// List a user's verifications, newest first
    History {
        user: String,
    },
    /// Show a user's profile
    Profile {
        user: String,
    },
    /// Check that the server is up
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = Url::parse(&cli.server).with_context(|| format!("invalid server URL {:?}", cli.server))?;

    match cli.command {
        Commands::Verify {
            file,
            user,
            local_processing,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let form = Form::new()
                .part("file", Part::bytes(bytes).file_name(file_name(&file)))
                .text("user_id", user)
                .text("local_processing", local_processing.to_string());

            tracing::debug!(file = %file.display(), "submitting document");
            let body = send(client.post(endpoint(&base, &["verify"])?).multipart(form)).await?;

            let score = body["confidence_score"].as_f64().unwrap_or_default();
            println!("Verification: {}", body["verification_id"].as_str().unwrap_or("?"));
            println!("  status:     {}", body["status"].as_str().unwrap_or("?"));
            println!("  confidence: {score:.3}");
            if let Some(url) = body["cleaned_sig_url"].as_str() {
                println!("  cleaned:    {url}");
            }
        }
        Commands::History { user } => {
            let body = send(client.get(endpoint(&base, &["verifications", user.as_str()])?)).await?;
            let rows = body["verifications"].as_array().cloned().unwrap_or_default();
            if rows.is_empty() {
                println!("No verifications for {user}");
            }
            for row in rows {
                let score = row["confidence_score"]
                    .as_f64()
                    .map(|s| format!("{s:.3}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<10}  {:>6}  {}",
                    row["timestamp"].as_str().unwrap_or("?"),
                    row["status"].as_str().unwrap_or("?"),
                    score,
                    row["id"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Profile { user } => {
            let body = send(client.get(endpoint(&base, &["profile", user.as_str()])?)).await?;
            println!("{}", serde_json::to_string_pretty(&body["profile"])?);
        }
        Commands::Health => {
            let body = send(client.get(endpoint(&base, &["health"])?)).await?;
            println!("puresignd: {}", body["status"].as_str().unwrap_or("unknown"));
        }
    }

    Ok(())
}

/// Send a request and return its JSON body, turning error responses into their `detail`.
async fn send(request: reqwest::RequestBuilder) -> Result<serde_json::Value> {
    let response = request.send().await.context("could not reach puresignd")?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    if !status.is_success() {
        let detail = body["detail"].as_str().unwrap_or("request failed");
        bail!("{status}: {detail}");
    }
    Ok(body)
}

/// Append path segments to the server URL, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("server URL {base} cannot take a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.jpg".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_escapes_user_ids() {
        let base = Url::parse("http://localhost:8000").unwrap();
        let url = endpoint(&base, &["verifications", "a/b?c#d"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/verifications/a%2Fb%3Fc%23d");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = Url::parse("https://api.example.com/puresign/").unwrap();
        let url = endpoint(&base, &["profile", "alice"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/puresign/profile/alice");
    }

    #[test]
    fn test_endpoint_rejects_non_hierarchical_base() {
        let base = Url::parse("mailto:ops@example.com").unwrap();
        assert!(endpoint(&base, &["health"]).is_err());
    }
}

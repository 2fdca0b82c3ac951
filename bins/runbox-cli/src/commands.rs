// CLI commands for submitting and inspecting runbox jobs
use anyhow::{bail, Context, Result};
use runbox_common::redis::RedisJobQueue;
use runbox_common::types::{JobState, PollResponse};
use runbox_common::{Config, LanguageRegistry, Submitter};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub fn load_registry(config: &Config) -> Result<LanguageRegistry> {
    LanguageRegistry::load(config.language_config_path.as_deref())
        .context("Failed to load language configuration")
}

pub async fn connect(config: &Config, registry: LanguageRegistry) -> Result<Submitter<RedisJobQueue>> {
    let lease_window = Duration::from_millis(config.max_timeout_ms + 30_000);
    let queue = RedisJobQueue::connect(&config.redis_url, lease_window, config.result_ttl_secs)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    Ok(Submitter::new(Arc::new(queue), Arc::new(registry), config))
}

/// Source text from `--code`, `--file <path>`, or `--file -` for stdin
pub fn read_source(file: Option<&Path>, code: Option<&str>) -> Result<String> {
    match (file, code) {
        (Some(_), Some(_)) => bail!("Pass either --file or --code, not both"),
        (None, Some(code)) => Ok(code.to_string()),
        (Some(path), None) if path == Path::new("-") => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("Failed to read source from stdin")?;
            Ok(source)
        }
        (Some(path), None) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => bail!("No source given: use --file or --code"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Exit status for a poll response: only a finished success is `true`
fn succeeded(response: &PollResponse) -> bool {
    response.state == JobState::Finished && response.status.as_deref() == Some("success")
}

/// Submit source for execution, optionally waiting for the result
pub async fn submit(
    submitter: &Submitter<RedisJobQueue>,
    language: &str,
    source: &str,
    timeout_ms: Option<u64>,
    wait: bool,
) -> Result<bool> {
    let timeout = timeout_ms.map(Duration::from_millis);

    let outcome = if wait {
        submitter.run(source, language, timeout).await
    } else {
        match submitter.submit(source, language, timeout).await {
            Ok(job_id) => {
                eprintln!("✓ Job {} queued", job_id);
                submitter.poll(job_id).await
            }
            Err(e) => Err(e),
        }
    };

    match outcome {
        Ok(response) => {
            if response.state != JobState::Finished {
                eprintln!("⏳ Result not ready yet, poll again with: runbox-cli poll --job-id {}", response.job_id);
            }
            print_json(&response)?;
            Ok(succeeded(&response) || (!wait && response.state != JobState::Finished))
        }
        Err(err) => match err.as_result() {
            Some(rejected) => {
                print_json(&rejected)?;
                Ok(false)
            }
            None => Err(err).context("Queue unavailable"),
        },
    }
}

/// Print the current state of a job, optionally waiting up to `wait_ms`
pub async fn poll(submitter: &Submitter<RedisJobQueue>, job_id: &str, wait_ms: Option<u64>) -> Result<bool> {
    let job_id = Uuid::parse_str(job_id).with_context(|| format!("Invalid job id: {}", job_id))?;

    let response = match wait_ms {
        Some(ms) => submitter.wait(job_id, Duration::from_millis(ms)).await,
        None => submitter.poll(job_id).await,
    }
    .with_context(|| format!("Failed to poll job {}", job_id))?;

    print_json(&response)?;
    Ok(response.state != JobState::Finished || succeeded(&response))
}

/// List registered languages
pub fn list_languages(registry: &LanguageRegistry) -> Result<()> {
    println!("📋 Registered Languages:\n");
    println!("{:<10} {:<24} {:<16} {}", "Name", "Image", "Source file", "Command");
    println!("{}", "─".repeat(90));

    for profile in registry.profiles() {
        println!(
            "{:<10} {:<24} {:<16} {}",
            profile.name,
            profile.image,
            profile.source_file,
            profile.command.join(" ")
        );
    }

    println!("\n✅ Total: {} language(s)", registry.profiles().count());
    Ok(())
}

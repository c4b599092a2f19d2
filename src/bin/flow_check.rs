//! flow-check: send one workout-logging message to thor-agent and show what happened.
//!
//! Stands in for the microphone and speaker so the agent side of the voice
//! flow can be checked from any machine.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use serde_json::Value;
use thor_pi::client::{AgentClient, BackendError, ToolCall};
use thor_pi::truncate_preview;
use tracing_subscriber::EnvFilter;

/// The agent may sit behind a slow local LLM.
const TIMEOUT: Duration = Duration::from_secs(90);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const UTTERANCE: &str = "Log my workout: floor press 3 sets of 12 at 45 pounds";

#[derive(Parser, Debug)]
#[command(name = "flow-check", about = "Simulate one voice turn against thor-agent")]
struct Args {
    /// thor-agent base URL
    #[arg(env = "BACKEND_URL", default_value = "http://localhost:3001")]
    url: String,
}

/// One line per entry of a `log_workout` result.
fn workout_lines(result: &Value) -> Vec<String> {
    let Some(entries) = result.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|r| {
            let text = |key: &str| r.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            let num = |key: &str| r.get(key).cloned().unwrap_or(Value::from(0));
            format!(
                "{}: {} {}x{} @{}lbs",
                text("status"),
                text("exercise"),
                num("sets"),
                num("reps"),
                num("weight_lbs")
            )
        })
        .collect()
}

fn print_tool_calls(calls: &[ToolCall]) {
    println!("\nTools called:");
    if calls.is_empty() {
        println!("   (none)");
    }
    for call in calls {
        println!("   - {}", call.tool);
        if call.tool == "log_workout" {
            for line in workout_lines(&call.result) {
                println!("     {line}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .init();
    let args = Args::parse();

    println!("{}", "=".repeat(70));
    println!("Simulating the voice client flow");
    println!("{}", "=".repeat(70));
    println!("\nUser speaks: \"{UTTERANCE}\"");
    println!("\nSending to agent at {}/chat ...", args.url);
    println!("   (this can take 30-60 seconds with a local LLM)");

    let mut client = match AgentClient::with_timeouts(&args.url, TIMEOUT, HEALTH_TIMEOUT) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("\nFailed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let reply = match client.send(UTTERANCE, false).await {
        Ok(reply) => reply,
        Err(BackendError::Timeout { .. }) => {
            eprintln!("\nRequest timed out after {} seconds", TIMEOUT.as_secs());
            eprintln!("   The LLM may be slow. Try the OpenAI API mode on the agent.");
            return ExitCode::FAILURE;
        }
        Err(BackendError::Connect { .. }) => {
            eprintln!("\nCould not connect to agent at {}", args.url);
            eprintln!("   Make sure thor-agent is running.");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("\nError: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("\nAgent responded in {:.1} seconds", start.elapsed().as_secs_f64());
    println!("\nAgent reply:\n   \"{}\"", truncate_preview(&reply.reply, 200));
    print_tool_calls(&reply.tool_calls);
    println!("\nThe Pi would now speak: \"{}\"", truncate_preview(&reply.reply, 100));

    println!("\n{}", "=".repeat(70));
    println!("Flow complete");
    println!("{}", "=".repeat(70));
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn workout_results_are_summarized() {
        let result = json!({"results": [
            {"status": "logged", "exercise": "floor press", "sets": 3, "reps": 12, "weight_lbs": 45}
        ]});
        assert_eq!(workout_lines(&result), vec!["logged: floor press 3x12 @45lbs"]);
    }

    #[test]
    fn long_replies_are_cut_on_a_char_boundary() {
        let reply = "Logged 3×12 floor press. ".repeat(10);
        let shown = truncate_preview(&reply, 100);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), 103);
    }

    #[test]
    fn missing_results_print_nothing() {
        assert!(workout_lines(&json!({"ok": true})).is_empty());
        assert!(workout_lines(&Value::Null).is_empty());
    }
}

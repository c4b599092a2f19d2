//! meta-runner-check: verify the meta-runner routes sample requests to the right agent.
//!
//! Prints which agent, intent and model handled each request.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use thor_pi::client::meta_runner::format_response;
use thor_pi::client::{MetaRunnerClient, RouterReply};
use thor_pi::config::RoutingMode;
use tracing_subscriber::EnvFilter;

const TIMEOUT: Duration = Duration::from_secs(90);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

struct Case {
    query: &'static str,
    description: &'static str,
    expected_agent: &'static str,
    expected_intent: &'static str,
}

const CASES: [Case; 4] = [
    Case {
        query: "What exercises should I do today?",
        description: "Query today's workout plan",
        expected_agent: "thor",
        expected_intent: "get_plan",
    },
    Case {
        query: "Log my workout: floor press 4x12 @45, skullcrusher 3x10 @20",
        description: "Log a workout",
        expected_agent: "thor",
        expected_intent: "log_workout",
    },
    Case {
        query: "I ate a chicken salad for lunch",
        description: "Log a meal",
        expected_agent: "nutrition",
        expected_intent: "log_meal",
    },
    Case {
        query: "I had a migraine today",
        description: "Log a health event",
        expected_agent: "health",
        expected_intent: "log_event",
    },
];

#[derive(Parser, Debug)]
#[command(name = "meta-runner-check", about = "Check meta-runner routing and model reporting")]
struct Args {
    /// meta-runner base URL
    #[arg(default_value = "http://localhost:3004")]
    url: String,
}

impl Case {
    fn matches(&self, reply: &RouterReply) -> bool {
        reply.agent == self.expected_agent && reply.intent == self.expected_intent
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .init();
    let args = Args::parse();

    println!("{}", "=".repeat(70));
    println!("Meta-runner routing check");
    println!("{}", "=".repeat(70));
    println!("\nMeta-runner URL: {}\n", args.url);

    let client = match MetaRunnerClient::with_timeouts(&args.url, TIMEOUT, HEALTH_TIMEOUT) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Checking meta-runner health...");
    if !client.health_check().await {
        eprintln!("Meta-runner service is not available at {}", args.url);
        return ExitCode::FAILURE;
    }
    println!("Meta-runner is healthy\n");

    let mut correct = 0;
    for (i, case) in CASES.iter().enumerate() {
        println!("[{}/{}] {}", i + 1, CASES.len(), case.description);
        println!("   Query: \"{}\"", case.query);
        println!(
            "   Expected: agent={}, intent={}",
            case.expected_agent, case.expected_intent
        );

        match client.send(case.query, RoutingMode::Auto).await {
            Ok(reply) => {
                println!("{}", format_response(&reply));
                if case.matches(&reply) {
                    correct += 1;
                    println!("   Routing: CORRECT");
                } else {
                    println!("   Routing mismatch: got {}/{}", reply.agent, reply.intent);
                }
                println!("   LLM used: {}/{}", reply.provider, reply.model);
            }
            Err(e) => println!("   Error: {e}"),
        }
        println!("\n{}\n", "-".repeat(70));
    }

    println!("{}", "=".repeat(70));
    println!("{correct}/{} requests routed as expected", CASES.len());
    println!("{}", "=".repeat(70));
    ExitCode::SUCCESS
}

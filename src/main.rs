use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use step_pilot::config;
use step_pilot::device::AdbDevice;
use step_pilot::engine::{EngineContext, EngineOptions, StepEngine, TestCase, TestStep};
use step_pilot::graph::{GraphClient, HttpGraphStore};
use step_pilot::logs::{LogCollector, LogWindow};
use step_pilot::reasoning::{ChatClient, ReasoningConfig, check_health};
use step_pilot::resolver::{AliasTable, load_schema};
use step_pilot::session::Session;

/// Step Pilot - graph-guided mobile UI test driver
#[derive(Parser, Debug)]
#[command(
    name = "step-pilot",
    about = "Execute natural-language UI test steps on an Android device using a UI graph",
    after_help = "ENVIRONMENT VARIABLES:\n\
        STEP_PILOT_REASONING_ENDPOINT  Chat completions endpoint\n\
        STEP_PILOT_REASONING_MODEL     Model name\n\
        STEP_PILOT_GRAPH_URL           Graph database HTTP URL\n\
        STEP_PILOT_ADB_PATH            Path to adb\n\
        STEP_PILOT_SESSION_DIR         Base directory for sessions\n\
        RUST_LOG                       Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a test case on the connected device
    Run {
        /// Test case JSON file ({"test_screen", "goal", "steps": [...]})
        #[arg(short, long, conflicts_with_all = ["screen", "goal", "step"])]
        case: Option<PathBuf>,

        /// Canonical screen the case starts from
        #[arg(long, required_unless_present = "case")]
        screen: Option<String>,

        /// Natural-language goal of the case
        #[arg(long, default_value = "")]
        goal: String,

        /// Step as "action|description|expected" (repeatable)
        #[arg(long)]
        step: Vec<String>,

        /// Keep running after a failed or uncertain step
        #[arg(long)]
        keep_going: bool,

        /// Output directory for screenshots and report (default: auto-generated in session dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep session files after completion (default: cleanup unless --output is specified)
        #[arg(long, short = 'k')]
        keep: bool,

        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the reasoning service and graph database respond
    Health {
        /// Seconds to wait for each service
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// Collect device logs for a while and print them
    Logs {
        /// Seconds to collect
        #[arg(long, default_value = "5")]
        seconds: u64,

        /// Print only the most recent line containing this keyword
        #[arg(long)]
        keyword: Option<String>,

        /// Number of lines to print
        #[arg(long, default_value = "50")]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::get();

    match args.command {
        Some(Commands::Run {
            case,
            screen,
            goal,
            step,
            keep_going,
            output,
            keep,
            json,
        }) => {
            let case = match case {
                Some(path) => serde_json::from_str::<TestCase>(&std::fs::read_to_string(&path)?)?,
                None => TestCase {
                    test_screen: screen.unwrap_or_default(),
                    goal,
                    steps: step.iter().map(|s| parse_step(s)).collect::<Result<_, _>>()?,
                },
            };

            let session = match &output {
                Some(dir) => Session::in_dir(dir),
                None => Session::with_name(&case.test_screen).keep(keep),
            };
            session.init()?;
            let session_dir = session.dir.clone();

            let ctx = EngineContext {
                graph: GraphClient::new(Arc::new(HttpGraphStore::new(&cfg.graph)?))
                    .timeout(Duration::from_secs(cfg.graph.timeout)),
                device: Arc::new(AdbDevice::new(&cfg.device)),
                reasoner: Arc::new(ChatClient::new(ReasoningConfig::default())?),
                logs: Arc::new(LogCollector::start(&cfg.device.adb_path, cfg.engine.log_window_minutes)?),
                aliases: AliasTable::load(&cfg.engine.alias_path)?,
                schema: load_schema(&cfg.engine.schema_path),
            };
            let options = EngineOptions::default()
                .stop_on_failure(cfg.engine.stop_on_failure && !keep_going)
                .screenshot_dir(&session_dir);

            let mut engine = StepEngine::new(ctx, options).with_session(session);
            let result = engine.run_case(&case).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.log());
                println!();
                println!("Status: {:?}", result.status);
                println!("Session: {}", session_dir.display());
            }
        }

        Some(Commands::Health { timeout }) => {
            let endpoint = config::reasoning_endpoint();
            match check_health(&endpoint, timeout).await {
                Ok(true) => println!("reasoning service: ok ({})", endpoint),
                Ok(false) => println!("reasoning service: not responding ({})", endpoint),
                Err(e) => println!("reasoning service: error: {}", e),
            }

            let graph = GraphClient::new(Arc::new(HttpGraphStore::new(&cfg.graph)?))
                .timeout(Duration::from_secs(timeout));
            match graph.run("RETURN 1 AS ok").await {
                Ok(_) => println!("graph database: ok ({})", cfg.graph.url),
                Err(e) => println!("graph database: error: {}", e),
            }
        }

        Some(Commands::Logs {
            seconds,
            keyword,
            lines,
        }) => {
            let collector = LogCollector::start(&cfg.device.adb_path, cfg.engine.log_window_minutes)?;
            tokio::time::sleep(Duration::from_secs(seconds)).await;

            match keyword {
                Some(keyword) => match collector.search(&keyword) {
                    Some(line) => println!("{}", line),
                    None => println!("no line containing {:?}", keyword),
                },
                None => {
                    for line in collector.tail(lines) {
                        println!("{}", line);
                    }
                }
            }
        }

        None => {
            println!("Step Pilot - graph-guided mobile UI test driver");
            println!();
            println!("Usage: step-pilot <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run     Run a test case on the connected device");
            println!("  health  Check the reasoning service and graph database");
            println!("  logs    Collect device logs and print them");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

/// Parse `"action|description|expected"`; the expected part is optional
fn parse_step(raw: &str) -> Result<TestStep, Box<dyn Error>> {
    let mut parts = raw.splitn(3, '|').map(str::trim);
    let action = parts.next().unwrap_or_default();
    let description = parts.next().unwrap_or_default();
    if action.is_empty() || description.is_empty() {
        return Err(format!("Invalid step '{}'. Use: action|description|expected", raw).into());
    }
    Ok(TestStep::new(action, description, parts.next().unwrap_or_default()))
}

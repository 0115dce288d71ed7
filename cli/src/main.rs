//! Loom CLI: a thin local binary that wires a single agent-loop invocation
//! for manual testing. Not a gateway — carries no channel-adapter logic.
//!
//! Subcommands: `run` (send one message through the agent loop), `tools
//! list` / `tools show` (inspect the built-in tool set).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use loom::agent_loop::{AgentLoop, AgentLoopConfig, RunRequest};
use loom::agent_model::AgentType;
use loom::bootstrap::BootstrapInput;
use loom::context::{CallContext, PeerKind};
use loom::memory::InMemoryStore;
use loom::policy::{PolicyCatalog, PolicyInput};
use loom::session::InMemorySessionStore;
use loom::tools::{
    AggregateToolSource, ApplyPatchTool, BashTool, GetRecentMessagesTool, GlobTool,
    ListMemoriesTool, LsTool, MultieditTool, ReadFileTool, RecallTool, RememberTool,
    SearchMemoriesTool, SkillTool, TodoReadTool, TodoWriteTool, ToolRegistry, WebFetcherTool,
    WriteFileTool,
};
use loom::{ChatOpenAI, MockLlm};

#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(about = "Loom — drive one agent-loop run from the command line")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Working folder for file/skill/todo tools (default: current directory)
    #[arg(short, long, value_name = "DIR", global = true)]
    working_folder: Option<PathBuf>,

    /// Verbose: log at debug level instead of the RUST_LOG default
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message through the agent loop and print the reply
    Run(RunArgs),
    /// Inspect the built-in tool set
    Tools(ToolsArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// User message
    #[arg(trailing_var_arg = true, required = true)]
    message: Vec<String>,

    /// Session key for conversation continuity; default generates a fresh one
    #[arg(long, value_name = "KEY")]
    session_key: Option<String>,

    /// Output the full run outcome as JSON instead of just the reply text
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct ToolsArgs {
    #[command(subcommand)]
    sub: ToolsCommand,
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// List all registered tools (name and description)
    List,
    /// Show one tool's full definition (name, description, input schema)
    Show {
        /// Tool name, e.g. `bash` or `web_fetcher`
        name: String,
        /// Output format: yaml (default) or json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        output: String,
    },
}

/// Registers every built-in tool into one source, the same set every run sees.
/// Memory tools share one in-process store namespaced under `cli`.
async fn build_tool_registry(working_folder: Arc<PathBuf>) -> Arc<ToolRegistry> {
    let source = AggregateToolSource::new();
    source.register_async(Box::new(BashTool::new())).await;
    source.register_async(Box::new(GetRecentMessagesTool::new())).await;
    source.register_async(Box::new(WebFetcherTool::new())).await;
    source
        .register_async(Box::new(ReadFileTool::new(working_folder.clone())))
        .await;
    source
        .register_async(Box::new(WriteFileTool::new(working_folder.clone())))
        .await;
    source
        .register_async(Box::new(ApplyPatchTool::new(working_folder.clone())))
        .await;
    source
        .register_async(Box::new(MultieditTool::new(working_folder.clone())))
        .await;
    source
        .register_async(Box::new(GlobTool::new(working_folder.clone())))
        .await;
    source
        .register_async(Box::new(LsTool::new(working_folder.clone())))
        .await;
    source
        .register_async(Box::new(SkillTool::new(working_folder.clone())))
        .await;
    source
        .register_async(Box::new(TodoReadTool::new(working_folder.clone())))
        .await;
    source
        .register_async(Box::new(TodoWriteTool::new(working_folder.clone())))
        .await;

    let store: Arc<dyn loom::Store> = Arc::new(InMemoryStore::new());
    let namespace = vec!["cli".to_string()];
    source
        .register_async(Box::new(RememberTool::new(store.clone(), namespace.clone())))
        .await;
    source
        .register_async(Box::new(RecallTool::new(store.clone(), namespace.clone())))
        .await;
    source
        .register_async(Box::new(SearchMemoriesTool::new(store.clone(), namespace.clone())))
        .await;
    source
        .register_async(Box::new(ListMemoriesTool::new(store, namespace)))
        .await;

    Arc::new(ToolRegistry::new(Arc::new(source)))
}

/// An `allow_*` profile containing every tool name currently registered — a
/// single-user local CLI run has no reason to restrict its own tool set.
async fn build_policy_catalog(tools: &ToolRegistry) -> Arc<PolicyCatalog> {
    let names: std::collections::HashSet<String> = tools
        .list_tools()
        .await
        .map(|specs| specs.into_iter().map(|s| s.name).collect())
        .unwrap_or_default();
    let mut profiles = std::collections::HashMap::new();
    profiles.insert("full".to_string(), names);
    Arc::new(PolicyCatalog { profiles, groups: std::collections::HashMap::new() })
}

fn build_llm() -> Arc<dyn loom::LlmClient> {
    if std::env::var("OPENAI_API_KEY").is_ok() {
        let model = std::env::var("LOOM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Arc::new(ChatOpenAI::new(model))
    } else {
        Arc::new(MockLlm::new(
            "OPENAI_API_KEY is not set; this is a mock reply for local testing.",
        ))
    }
}

fn generate_run_id() -> String {
    format!("run-{}", uuid::Uuid::new_v4())
}

async fn run_once(args: &RunArgs, working_folder: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let tools = build_tool_registry(Arc::new(working_folder.clone())).await;
    let policy_catalog = build_policy_catalog(&tools).await;
    let sessions: Arc<dyn loom::session::SessionStore> = Arc::new(InMemorySessionStore::new());
    let llm = build_llm();

    let agent_loop = AgentLoop::new(sessions, llm, tools, policy_catalog, AgentLoopConfig::default());

    let session_key = args
        .session_key
        .clone()
        .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let run_id = generate_run_id();

    let call_ctx = CallContext::new(
        "cli-agent",
        "cli-agent",
        AgentType::Open,
        "cli",
        session_key.as_str(),
        PeerKind::Direct,
        working_folder,
        run_id.clone(),
    );

    let policy_input = PolicyInput { global_profile: "full".to_string(), ..Default::default() };
    let bootstrap_input = BootstrapInput { identity: "You are a helpful local testing agent.".to_string(), ..Default::default() };

    let request = RunRequest {
        session_key,
        message: args.message.join(" "),
        user_id: None,
        channel: "cli".to_string(),
        chat_id: "cli".to_string(),
        peer_kind: "direct".to_string(),
        run_id,
        stream: None,
        history_limit: None,
        extra_system_prompt: None,
        parent_trace_id: None,
        parent_root_span_id: None,
    };

    let outcome = agent_loop
        .run(call_ctx, policy_input, bootstrap_input, request, &CancellationToken::new())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({
            "run_id": outcome.run_id,
            "status": format!("{:?}", outcome.status),
            "reply": outcome.reply,
            "suppressed": outcome.suppressed,
            "iterations": outcome.iterations,
            "input_tokens": outcome.input_tokens,
            "output_tokens": outcome.output_tokens,
        }))?);
    } else {
        println!("{}", outcome.reply);
    }

    Ok(())
}

async fn tools_list(working_folder: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let tools = build_tool_registry(Arc::new(working_folder)).await;
    for spec in tools.list_tools().await? {
        println!("{:<24} {}", spec.name, spec.description.unwrap_or_default());
    }
    Ok(())
}

async fn tools_show(working_folder: PathBuf, name: &str, output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let tools = build_tool_registry(Arc::new(working_folder)).await;
    let spec = tools
        .list_tools()
        .await?
        .into_iter()
        .find(|s| s.name == name)
        .ok_or_else(|| format!("no such tool: {name}"))?;

    if output.eq_ignore_ascii_case("json") {
        println!("{}", serde_json::to_string_pretty(&spec)?);
    } else {
        println!("{}", serde_yaml::to_string(&spec)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_and_apply("loom", None::<&std::path::Path>).ok();

    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let working_folder = args
        .working_folder
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    match &args.cmd {
        Command::Run(run_args) => {
            if let Err(e) = run_once(run_args, working_folder).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Command::Tools(tools_args) => match &tools_args.sub {
            ToolsCommand::List => {
                if let Err(e) = tools_list(working_folder).await {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
            ToolsCommand::Show { name, output } => {
                if let Err(e) = tools_show(working_folder, name, output).await {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        },
    }

    Ok(())
}

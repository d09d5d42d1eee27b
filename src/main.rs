use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use neighbor_panel::config::{PanelConfig, WorkerConfig};
use neighbor_panel::dashboard::{ActionResponse, RUN_ID_HEADER};
use neighbor_panel::error::PanelError;
use neighbor_panel::logs::{EventDecoder, LogEvent, MarkerSet};
use neighbor_panel::server::PanelServer;
use neighbor_panel::session::{LogEntry, Session};
use neighbor_panel::shutdown::install_shutdown_handler;
use neighbor_panel::worker::RunRequest;

#[derive(Parser, Debug)]
#[command(name = "neighbor-panel")]
#[command(version)]
#[command(about = "Control panel for the blog mutual-neighbor request worker")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the control panel web server
    Server(ServerArgs),

    /// Launch a run on a panel and follow its log
    Run {
        #[command(flatten)]
        client: ClientArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Stop the active run(s) on a panel
    Stop {
        #[command(flatten)]
        client: ClientArgs,

        /// Stop only this run (default: every active run)
        #[arg(long)]
        run_id: Option<Uuid>,
    },

    /// List active runs on a panel
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port for the control panel
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Interpreter that runs the worker script
    #[arg(long, env = "NEIGHBOR_PANEL_INTERPRETER")]
    interpreter: Option<PathBuf>,

    /// Worker script path
    #[arg(long, env = "NEIGHBOR_PANEL_SCRIPT")]
    script: Option<PathBuf>,

    /// Directory the worker runs in; relative paths resolve against it
    #[arg(long, env = "NEIGHBOR_PANEL_WORKDIR")]
    working_dir: Option<PathBuf>,

    /// JSON file overriding the log classification markers
    #[arg(long, env = "NEIGHBOR_PANEL_MARKERS")]
    markers: Option<PathBuf>,

    /// Maximum number of runs allowed at the same time
    #[arg(long, default_value = "1")]
    max_active_runs: usize,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Panel address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:3000")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Naver account ID
    #[arg(long, env = "NAVER_ID", default_value = "")]
    naver_id: String,

    /// Naver account password
    #[arg(long, env = "NAVER_PW", default_value = "", hide_env_values = true)]
    naver_pw: String,

    /// Blog search keyword
    #[arg(long, default_value = "")]
    keyword: String,

    /// Neighbor request message (defaults to the built-in greeting)
    #[arg(long)]
    message: Option<String>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl ClientArgs {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr.trim_end_matches('/'), path)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn print_entry(entry: &LogEntry, output: &OutputFormat) {
    match output {
        OutputFormat::Table => {
            println!(
                "[{}] {:<7} {}",
                entry.timestamp,
                entry.kind.as_str().to_uppercase(),
                entry.message
            );
        }
        OutputFormat::Json => match serde_json::to_string(entry) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("failed to encode log entry: {}", e),
        },
    }
}

fn log_and_print(session: &mut Session, event: LogEvent, output: &OutputFormat) {
    let entry = session.logs.push(event);
    print_entry(entry, output);
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let mut worker = WorkerConfig::default();
    if let Some(interpreter) = args.interpreter {
        worker.interpreter = interpreter;
    }
    if let Some(script) = args.script {
        worker.script = script;
    }
    worker.working_dir = args.working_dir;

    let markers = match &args.markers {
        Some(path) => MarkerSet::from_json_file(path)?,
        None => MarkerSet::default(),
    };

    let config = PanelConfig::new(listen_addr, worker)
        .with_markers(markers)
        .with_max_active_runs(args.max_active_runs);

    tracing::info!(
        listen_addr = %config.listen_addr,
        interpreter = %config.worker.interpreter.display(),
        script = %config.worker.script.display(),
        max_active_runs = config.max_active_runs,
        "Starting neighbor-panel"
    );

    let shutdown = install_shutdown_handler();
    PanelServer::new(config).run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_run(client: &ClientArgs, run: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new();
    session.update_account(1, run.naver_id, run.naver_pw);
    session.keyword = run.keyword;
    if let Some(message) = run.message {
        session.update_message(1, message);
    }

    let request = session.begin_run();
    for entry in session.logs.entries() {
        print_entry(entry, &client.output);
    }
    let Some(request) = request else {
        return Err("invalid run request".into());
    };

    let http = reqwest::Client::new();
    let response = match send_run(&http, client, &request).await {
        Ok(response) => response,
        Err(e) => {
            let event = LogEvent::error(format!("request failed: {}", e));
            log_and_print(&mut session, event, &client.output);
            return Err(e.into());
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let error = response
            .json::<ActionResponse>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| format!("launch failed with status {}", status));
        log_and_print(&mut session, LogEvent::error(error.clone()), &client.output);
        return Err(error.into());
    }

    let run_id = response
        .headers()
        .get(RUN_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Uuid>().ok());

    let mut decoder = EventDecoder::new();
    let body = response.bytes_stream();
    tokio::pin!(body);
    let mut stop_sent = false;

    loop {
        tokio::select! {
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in decoder.push(&bytes) {
                        log_and_print(&mut session, event, &client.output);
                    }
                }
                Some(Err(e)) => {
                    let event = LogEvent::error(format!("stream error: {}", e));
                    log_and_print(&mut session, event, &client.output);
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if stop_sent {
                    break;
                }
                // Keep reading: the panel ends the stream with a terminal event.
                stop_sent = true;
                let result = send_stop(&http, client, run_id).await;
                let event = match result {
                    Ok(reply) if reply.success => LogEvent::warning("stop requested"),
                    Ok(reply) => LogEvent::error(reply.error.unwrap_or_default()),
                    Err(e) => LogEvent::error(format!("stop failed: {}", e)),
                };
                log_and_print(&mut session, event, &client.output);
            }
        }
    }

    if let Some(event) = decoder.finish() {
        log_and_print(&mut session, event, &client.output);
    }

    Ok(())
}

async fn send_run(
    http: &reqwest::Client,
    client: &ClientArgs,
    request: &RunRequest,
) -> neighbor_panel::error::Result<reqwest::Response> {
    Ok(http.post(client.url("/api/run")).json(request).send().await?)
}

async fn send_stop(
    http: &reqwest::Client,
    client: &ClientArgs,
    run_id: Option<Uuid>,
) -> neighbor_panel::error::Result<ActionResponse> {
    let mut request = http.post(client.url("/api/stop"));
    if let Some(run_id) = run_id {
        request = request.query(&[("run_id", run_id.to_string())]);
    }
    Ok(request.send().await?.json().await?)
}

async fn handle_stop(
    client: &ClientArgs,
    run_id: Option<Uuid>,
) -> Result<(), Box<dyn std::error::Error>> {
    let http = reqwest::Client::new();
    let response = send_stop(&http, client, run_id).await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Table => {
            if response.success {
                println!("{}", response.message.unwrap_or_default());
            } else {
                println!("Stop failed: {}", response.error.unwrap_or_default());
            }
        }
    }
    Ok(())
}

async fn handle_status(client: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runs: Vec<serde_json::Value> = reqwest::get(client.url("/api/runs"))
        .await
        .and_then(|response| response.error_for_status())
        .map_err(PanelError::Http)?
        .json()
        .await
        .map_err(PanelError::Http)?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Table => {
            if runs.is_empty() {
                println!("No active runs");
                return Ok(());
            }
            println!("{:<38} {:<8} {:<26} KEYWORD", "RUN ID", "PID", "STARTED");
            println!("{}", "-".repeat(84));
            for run in &runs {
                let pid = run["pid"]
                    .as_u64()
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<38} {:<8} {:<26} {}",
                    run["run_id"].as_str().unwrap_or("-"),
                    pid,
                    run["started_at"].as_str().unwrap_or("-"),
                    run["keyword"].as_str().unwrap_or("-"),
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Run { client, run } => {
            handle_run(&client, run).await?;
        }
        Commands::Stop { client, run_id } => {
            handle_stop(&client, run_id).await?;
        }
        Commands::Status { client } => {
            handle_status(&client).await?;
        }
    }

    Ok(())
}

//! swebee 命令行入口
//!
//! 只把参数填进 AgentConfig、安装日志与信号处理，并打印最终汇总；编排逻辑全部在库里。

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::mpsc;

use swebee::agent::{cleanup_task, list_tasks, TaskReport};
use swebee::config::{load_config, AgentConfig};
use swebee::core::{state_dir, AgentBuilder, SessionSupervisor, TaskStatus};
use swebee::memory::FileCheckpointStore;
use swebee::react::AgentEvent;

#[derive(Parser, Debug)]
#[command(name = "swebee", version, about = "Autonomous software-engineering task agent")]
struct Cli {
    /// Task description
    task: Vec<String>,

    /// Directory the agent works in
    #[arg(short = 'w', long, default_value = ".")]
    working_dir: PathBuf,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// Primary model
    #[arg(short, long)]
    model: Option<String>,

    /// Full model chain, comma separated (overrides --model)
    #[arg(long, value_delimiter = ',')]
    models: Option<Vec<String>>,

    /// Resume a stored task by id
    #[arg(long, value_name = "ID")]
    resume: Option<String>,

    #[arg(long)]
    no_web: bool,

    #[arg(long)]
    no_notebooks: bool,

    #[arg(long)]
    no_shell: bool,

    /// Do not write the progress report
    #[arg(long)]
    no_progress: bool,

    #[arg(long)]
    debug: bool,

    /// Extra configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// List stored tasks and exit
    #[arg(long, conflicts_with_all = ["resume", "cleanup"])]
    list: bool,

    /// Delete a stored task's checkpoint and exit
    #[arg(long, value_name = "ID", conflicts_with = "resume")]
    cleanup: Option<String>,
}

impl Cli {
    fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig::new(self.task.join(" "), self.working_dir.clone());
        config.max_iterations = self.max_iterations;
        match &self.models {
            Some(models) if !models.is_empty() => {
                config.model = Some(models[0].clone());
                config.fallback_models = Some(models[1..].to_vec());
            }
            _ => config.model = self.model.clone(),
        }
        config.enable_web = !self.no_web;
        config.enable_notebooks = !self.no_notebooks;
        config.enable_shell = !self.no_shell;
        config.enable_progress = !self.no_progress;
        config.resume_id = self.resume.clone();
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    swebee::observability::init(cli.debug);

    let app = load_config(cli.config.clone()).context("Failed to load configuration")?;

    if cli.list || cli.cleanup.is_some() {
        let working_dir = cli
            .working_dir
            .canonicalize()
            .with_context(|| format!("Working directory {} not found", cli.working_dir.display()))?;
        let store = FileCheckpointStore::new(state_dir(&app, &working_dir), working_dir);
        if let Some(task_id) = &cli.cleanup {
            cleanup_task(&store, task_id).with_context(|| format!("Failed to remove task {task_id}"))?;
            println!("Removed task {task_id}");
            return Ok(());
        }
        let tasks = list_tasks(&store).context("Failed to list tasks")?;
        if tasks.is_empty() {
            println!("No stored tasks in {}", store.dir().display());
        }
        for task in tasks {
            match (task.status, task.problem) {
                (Some(status), _) => println!(
                    "{}  {:<10} {}/{}  {}",
                    task.task_id,
                    status,
                    task.iterations,
                    task.max_iterations,
                    task.description.lines().next().unwrap_or_default()
                ),
                (None, problem) => println!(
                    "{}  unreadable: {}",
                    task.task_id,
                    problem.unwrap_or_default()
                ),
            }
        }
        return Ok(());
    }

    if cli.resume.is_none() && cli.task.is_empty() {
        bail!("Provide a task description or --resume <ID>");
    }

    let supervisor = SessionSupervisor::new();
    supervisor.install_signal_handlers();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let agent = AgentBuilder::new(app, cli.agent_config())
        .with_events(event_tx)
        .with_cancel_token(supervisor.cancel_token())
        .build()
        .context("Failed to build agent")?;

    let report = agent.run_task().await.context("Task could not be run")?;
    let progress = agent.progress_path();
    drop(agent);
    let _ = printer.await;

    print_report(&report, progress);
    if report.status == TaskStatus::Completed {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::IterationStarted {
            iteration,
            max_iterations,
            ..
        } => eprintln!("── iteration {iteration}/{max_iterations}"),
        AgentEvent::ToolCall { tool, args, .. } => eprintln!("  → {tool} {args}"),
        AgentEvent::Progress { record, .. } => {
            let mark = if record.result.success { "ok" } else { "failed" };
            eprintln!("  ← {} ({mark}, {} ms)", record.action, record.duration_ms);
        }
        AgentEvent::Compacted {
            entries_covered,
            tokens_before,
            tokens_after,
            ..
        } => eprintln!("  context compacted: {entries_covered} entries, {tokens_before} → {tokens_after} tokens"),
        AgentEvent::SubAgentSpawned { child_id, depth, .. } => {
            eprintln!("  sub-agent {child_id} started (depth {depth})")
        }
        AgentEvent::SubAgentFinished { child_id, status, .. } => {
            eprintln!("  sub-agent {child_id} {status}")
        }
        _ => {}
    }
}

fn print_report(report: &TaskReport, progress: Option<PathBuf>) {
    println!();
    println!("Task {}: {}", report.task_id, report.status);
    println!("Iterations: {}", report.iterations);
    if let Some(model) = &report.model_used {
        println!("Model used: {model}");
    }
    if !report.tools_used.is_empty() {
        println!("Tools used: {}", report.tools_used.join(", "));
    }
    if !report.files_touched.is_empty() {
        println!("Files touched: {}", report.files_touched.join(", "));
    }
    if report.tokens.total > 0 {
        println!(
            "Tokens: {} ({} prompt, {} completion)",
            report.tokens.total, report.tokens.prompt, report.tokens.completion
        );
    }
    if report.sub_agents_spawned > 0 {
        println!("Sub-agents: {}", report.sub_agents_spawned);
    }
    if let Some(answer) = &report.final_answer {
        println!("\n{answer}");
    }
    if let Some(failure) = &report.failure {
        println!("\nStopped: {failure}");
    }
    if report.resume_possible {
        println!("\nResume with: swebee --resume {}", report.task_id);
    }
    if let Some(path) = progress {
        println!("Progress report: {}", path.display());
    }
}

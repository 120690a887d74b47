//! orc CLI entry point

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};

use orc::cli::{Cli, Command, StreamMode};
use orc::config::Config;
use orc::domain::{TaskId, TaskStatus, Weight};
use orc::engine::Engine;
use orc::events::{EventFilter, run_json_sink, run_text_sink};
use orc::scheduler::RunRequest;
use orc::store::{ProjectPaths, Registry, StoreHandle};

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Exit code contract: 0 completed, 2 failed, 3 blocked, 130 cancelled
fn exit_code_for(status: TaskStatus, last_error: Option<&str>) -> i32 {
    match status {
        TaskStatus::Completed => 0,
        TaskStatus::Blocked => 3,
        TaskStatus::Failed if last_error.is_some_and(|e| e.starts_with("cancelled")) => 130,
        TaskStatus::Failed => 2,
        _ => 0,
    }
}

fn parse_task_id(raw: &str) -> Result<TaskId> {
    TaskId::parse(raw).ok_or_else(|| eyre!("invalid task id '{}' (expected TASK-0001)", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let project_root = match &cli.project {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    let paths = ProjectPaths::new(&project_root);

    match cli.command {
        Command::New {
            title,
            description,
            weight,
            category,
        } => {
            let weight = match weight.as_deref() {
                Some(raw) => Some(
                    Weight::parse(raw)
                        .ok_or_else(|| eyre!("invalid weight '{}' (trivial|small|medium|large|greenfield)", raw))?,
                ),
                None => None,
            };
            let store = StoreHandle::spawn(paths.db_path())?;
            let description = description.unwrap_or_else(|| title.clone());
            let task = store
                .create_task(&title, &description, category, weight, &config.git.target_branch)
                .await?;
            tokio::fs::create_dir_all(paths.attachments_dir(&task.id)).await.ok();
            println!("{} {} - {}", "created".green(), task.id, task.title);
        }

        Command::List { status } => {
            let filter = match status.as_deref() {
                Some(raw) => Some(TaskStatus::parse(raw).ok_or_else(|| eyre!("invalid status '{}'", raw))?),
                None => None,
            };
            let store = StoreHandle::spawn(paths.db_path())?;
            for task in store.list_tasks(filter).await? {
                let weight = task.weight.map(|w| w.to_string()).unwrap_or_else(|| "-".to_string());
                println!("{}  {:<10}  {:<10}  {}", task.id, task.status, weight, task.title);
            }
        }

        Command::Show { id } => {
            let task_id = parse_task_id(&id)?;
            let store = StoreHandle::spawn(paths.db_path())?;
            let snapshot = store.snapshot(&task_id, 10).await?;
            let task = snapshot.task;

            println!("{}  {}", task.id.to_string().bold(), task.title);
            println!("  status:  {}", task.status);
            println!("  weight:  {}", task.weight.map(|w| w.to_string()).unwrap_or_else(|| "-".into()));
            println!("  branch:  {} -> {}", task.branch, task.target_branch);
            println!(
                "  tokens:  {} in / {} out (cache: {} created, {} read)  ${:.4}",
                task.input_tokens, task.output_tokens, task.cache_creation_tokens, task.cache_read_tokens, task.cost_usd
            );
            if let Some(error) = &task.last_error {
                println!("  error:   {}", error.red());
            }
            for phase in &snapshot.phases {
                println!("  phase {:<12} {:<10} ({} iterations)", phase.phase_id, phase.status, phase.iteration);
            }
        }

        Command::Run { id, stream } => {
            let task_id = parse_task_id(&id)?;
            let llm = orc::llm::create_client(&config.llm).map_err(|e| eyre!("LLM client: {}", e))?;
            let hosting = orc::hosting::create_provider(&config.hosting).map_err(|e| eyre!("hosting: {}", e))?;
            let engine = Engine::open(&project_root, config, llm, hosting).await?;

            let sink = match stream {
                StreamMode::None => None,
                StreamMode::Text => {
                    let sub = engine.bus.subscribe(EventFilter::for_task(task_id.clone()));
                    Some(tokio::spawn(run_text_sink(sub)))
                }
                StreamMode::Json => {
                    let sub = engine.bus.subscribe(EventFilter::for_task(task_id.clone()));
                    Some(tokio::spawn(run_json_sink(sub)))
                }
            };

            engine
                .scheduler
                .submit(RunRequest::new(task_id.clone()))
                .await
                .map_err(|e| eyre!("submit refused: {}", e))?;

            let scheduler = Arc::clone(&engine.scheduler);
            let wait_id = task_id.clone();
            tokio::select! {
                _ = async move { scheduler.wait_for(&wait_id).await } => {}
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("{}", "cancelling...".yellow());
                    let _ = engine.scheduler.cancel(&task_id).await;
                    std::process::exit(130);
                }
            }

            if let Some(sink) = sink {
                sink.abort();
            }

            let task = engine.task(&task_id).await?;
            println!("{} {}", task.id, task.status);
            std::process::exit(exit_code_for(task.status, task.last_error.as_deref()));
        }

        Command::Decide { decision_id, answer } => {
            // Auxiliary write: goes straight to the database so it also
            // works while another process runs the engine. A blocked
            // runner polls for it.
            let store = StoreHandle::spawn(paths.db_path())?;
            let decision = store.resolve_decision(decision_id, answer.as_str()).await?;
            println!("{} decision {} for {} = {}", "resolved".green(), decision_id, decision.task_id, answer);
        }

        Command::Decisions { id } => {
            let task_id = parse_task_id(&id)?;
            let store = StoreHandle::spawn(paths.db_path())?;
            let decisions = store.open_decisions(&task_id).await?;
            if decisions.is_empty() {
                println!("no open decisions for {}", task_id);
            }
            for decision in decisions {
                println!(
                    "{}  [{}] {} [{}]",
                    decision.id,
                    decision.phase_id,
                    decision.question,
                    decision.options.join(" | ")
                );
            }
        }

        Command::Status => {
            let store = StoreHandle::spawn(paths.db_path())?;
            let tasks = store.list_tasks(None).await?;
            let count = |s: TaskStatus| tasks.iter().filter(|t| t.status == s).count();
            println!("tasks: {}", tasks.len());
            println!("  running:   {}", count(TaskStatus::Running));
            println!("  blocked:   {}", count(TaskStatus::Blocked));
            println!("  paused:    {}", count(TaskStatus::Paused));
            println!("  completed: {}", count(TaskStatus::Completed));
            println!("  failed:    {}", count(TaskStatus::Failed));
        }

        Command::Projects => {
            let registry = Registry::open(&Registry::default_path())?;
            for project in registry.list_projects()? {
                println!("{:<40} {}", project.root, project.name);
            }
        }
    }

    Ok(())
}

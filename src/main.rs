mod io;
mod logging;
mod project;
mod serve;

#[cfg(test)]
mod test_utils;

use clap::{Parser, Subcommand};
use io::file_system::RealFileSystem;
use logging::{LogConfig, init_logging};
use project::command::{OverlayVariables, ProcessEnvironment, VariableSource};
use project::compilation_database::CompilationDatabaseParser;
use project::index::{
    ChannelReanalysisTrigger, ImportCompletion, LoggingReanalysisTrigger, ReanalysisTrigger,
};
use project::{ProjectId, ProjectLayout, WorkspaceSession};

use serve::{DatabaseReport, MetadataField, QueryReport, REANALYSIS_BUFFER_SIZE};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{BufReader, stdin, stdout};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// CLI arguments for the compilation database metadata service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project root directory (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Path to compile_commands.json (overrides COMPDB_COMMANDS_FILE env var)
    #[arg(long, value_name = "FILE")]
    compile_commands: Option<PathBuf>,

    /// Value for `$NAME` references in recorded commands, taking precedence over the environment
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_variable)]
    variables: Vec<(String, String)>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides COMPDB_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import the compilation database once and print metadata for each path as JSON
    Query {
        /// Print only this field instead of the full metadata
        #[arg(long, value_enum)]
        field: Option<MetadataField>,

        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },
    /// Parse the compilation database once and report its files and skipped entries
    Check,
    /// Answer line commands on stdin while merging database changes as they are signalled
    Serve,
}

/// Parse a `NAME=VALUE` command line assignment
fn parse_variable(assignment: &str) -> Result<(String, String), String> {
    match assignment.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", assignment)),
    }
}

/// Variable source for command expansion: the environment, overridden by `--var`
fn variable_source(overrides: Vec<(String, String)>) -> Arc<dyn VariableSource> {
    if overrides.is_empty() {
        Arc::new(ProcessEnvironment)
    } else {
        Arc::new(OverlayVariables::new(
            overrides.into_iter().collect(),
            ProcessEnvironment,
        ))
    }
}

fn open_session(
    trigger: Arc<dyn ReanalysisTrigger>,
    variables: Arc<dyn VariableSource>,
) -> (
    WorkspaceSession<RealFileSystem>,
    mpsc::Receiver<ImportCompletion>,
) {
    let (session, completions) = WorkspaceSession::new(RealFileSystem, trigger);
    (session.with_variables(variables), completions)
}

/// Wait until the first import of `project` has been merged
async fn await_first_import(
    session: &mut WorkspaceSession<RealFileSystem>,
    completions: &mut mpsc::Receiver<ImportCompletion>,
    project: ProjectId,
) {
    while let Some(completion) = completions.recv().await {
        if let Some(finished) = session.handle_completion(completion).await {
            if finished.project != project {
                continue;
            }
            if finished.is_success() {
                info!("Imported {} files", finished.file_count);
            } else {
                warn!("No metadata available: {:?}", finished.outcome);
            }
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());

    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let project_root = match args.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let project_root = serve::absolute_path(&std::env::current_dir()?, &project_root);

    let layout = ProjectLayout::from_env(project_root.clone(), args.compile_commands);
    info!(
        "Using compilation database {} for project root {}",
        layout.commands_file_path.display(),
        project_root.display()
    );
    let variables = variable_source(args.variables);

    match args.command {
        Command::Check => {
            let snapshot = CompilationDatabaseParser::new(RealFileSystem)
                .with_variables(variables)
                .parse(&layout.commands_file_path);
            let report = DatabaseReport::from_snapshot(layout.commands_file_path, &snapshot);
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::Query { field, paths } => {
            let (mut session, mut completions) =
                open_session(Arc::new(LoggingReanalysisTrigger), variables);
            let project = session.attach(layout);
            await_first_import(&mut session, &mut completions, project).await;

            for path in paths {
                let item = session.item_for(serve::absolute_path(&project_root, &path));
                let line = match field {
                    Some(field) => {
                        serde_json::to_string(&serve::field_output(&session, project, field, item)?)?
                    }
                    None => {
                        let report = QueryReport::collect(&session, project, item)?;
                        if report.metadata.is_empty() {
                            warn!("No build metadata for {}", report.item.path.display());
                        }
                        serde_json::to_string(&report)?
                    }
                };
                println!("{}", line);
            }
            session.detach(project);
        }
        Command::Serve => {
            let (trigger, mut reanalysis) = ChannelReanalysisTrigger::new(REANALYSIS_BUFFER_SIZE);
            let (mut session, mut completions) = open_session(Arc::new(trigger), variables);
            let project = session.attach(layout);

            serve::run(
                &mut session,
                &mut completions,
                &mut reanalysis,
                project,
                &project_root,
                BufReader::new(stdin()),
                stdout(),
            )
            .await?;
            session.detach(project);
        }
    }

    info!("Shutting down");
    Ok(())
}

//! sqlbatch - run SQL scripts against a database in batches and in parallel.

mod cli;

use cli::Cli;
use sqlbatch::config::{Config, ConnectionConfig};
use sqlbatch::db::{Database, MockDatabase, SqlxDatabase};
use sqlbatch::error::{Result, SqlBatchError};
use sqlbatch::handler::{Exclusive, RowHandler};
use sqlbatch::import::ImportPipeline;
use sqlbatch::lexer::StatementLexer;
use sqlbatch::logging;
use sqlbatch::output::SqlEcho;
use sqlbatch::pipeline::Coordinator;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();

    match &cli.log_file {
        Some(path) => {
            let path = path.clone().unwrap_or_else(logging::get_log_path);
            logging::init_file_logging(&path);
        }
        None => logging::init_stderr_logging(),
    }

    if let Err(e) = run(&cli) {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    cli.validate()?;

    let config_path = cli.config_path();
    debug!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;
    let execution = &config.execution;

    let settings = cli.execution_settings(execution)?;
    let jobs = cli.jobs(execution)?;
    let mut lexer = StatementLexer::new(cli.lexer_config(execution))?;
    add_sources(cli, &mut lexer)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| SqlBatchError::internal(format!("Failed to start async runtime: {e}")))?;
    let handle = runtime.handle().clone();

    let mock = cli.mock_db.then(MockDatabase::new);
    let import_target = cli.import_target();

    // An import drains one query on one worker; --jobs sizes the import side.
    let query_workers = if import_target.is_some() { 1 } else { jobs };

    let source = match &mock {
        Some(mock) => Arc::new(mock.clone()) as Arc<dyn Database>,
        None => {
            let connection = resolve_connection(cli, &config)?;
            info!("Connecting to {}", connection.display_string());
            open_database(&connection, query_workers, &handle)?
        }
    };

    let mut databases = vec![Arc::clone(&source)];

    let (handler, query_settings): (Arc<dyn RowHandler>, _) = match import_target {
        Some(target) => {
            let destination = match &mock {
                Some(mock) => Arc::new(mock.clone()) as Arc<dyn Database>,
                None => {
                    let connection = resolve_import_connection(cli, &config)?;
                    info!("Importing into {}", connection.display_string());
                    open_database(&connection, jobs, &handle)?
                }
            };
            databases.push(Arc::clone(&destination));

            let import_settings = cli.import_settings(execution)?;
            let pipeline =
                ImportPipeline::new(destination, target, jobs, import_settings.clone())?;
            (
                Arc::new(Exclusive::new(pipeline)) as Arc<dyn RowHandler>,
                import_settings.unbatched(),
            )
        }
        None => {
            let options = cli.output_options()?;
            let handler = options.handler(open_output(cli.output_file.as_deref())?)?;
            (handler, settings)
        }
    };

    let mut coordinator = Coordinator::new(source, query_settings, query_workers, Some(handler))?;
    if cli.echo_sql {
        coordinator = coordinator.with_echo(Arc::new(SqlEcho::stderr()));
    }

    let result = coordinator.run(&mut lexer).into_result();

    for database in &databases {
        if let Err(e) = database.close() {
            error!("Failed to close database: {}", e);
        }
    }

    let stats = result?;
    info!(
        "Done: {} statements, {} batches, {} commits, {} rollbacks",
        stats.statements, stats.batches, stats.commits, stats.rollbacks
    );
    Ok(())
}

/// Adds inline SQL, then input files, to the lexer in the order given.
fn add_sources(cli: &Cli, lexer: &mut StatementLexer) -> Result<()> {
    for sql in cli.inline_sql() {
        lexer.add_str(sql);
    }
    for input in &cli.input_files {
        if input == "-" {
            lexer.add_stdin();
        } else {
            lexer.add_file(Path::new(input))?;
        }
    }
    Ok(())
}

fn open_database(
    connection: &ConnectionConfig,
    workers: usize,
    handle: &Handle,
) -> Result<Arc<dyn Database>> {
    let max_connections = u32::try_from(workers).unwrap_or(u32::MAX);
    let database = SqlxDatabase::connect(connection, max_connections, handle.clone())?;
    Ok(Arc::new(database))
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                SqlBatchError::config(format!("Cannot create {}: {e}", path.display()))
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

/// Looks up a connection that was asked for by name.
fn named_connection(config: &Config, name: &str) -> Result<ConnectionConfig> {
    config.get_connection(Some(name)).cloned().ok_or_else(|| {
        SqlBatchError::config(format!("Connection '{}' not found in config file", name))
    })
}

/// Resolves the source connection from CLI args, config file, and environment.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<ConnectionConfig> {
    // Precedence:
    // 1. CLI URL (highest)
    // 2. Named connection from config
    // 3. Default connection from config
    // 4. DATABASE_URL
    let from_cli = cli.to_connection_config();

    let mut connection = if from_cli.url.is_some() {
        ConnectionConfig::default()
    } else if let Some(name) = cli.connection_name() {
        named_connection(config, name)?
    } else {
        config.get_connection(None).cloned().unwrap_or_default()
    };

    connection.merge(&from_cli);
    connection.apply_env_defaults();

    if connection.url.is_none() {
        return Err(SqlBatchError::config(
            "No database connection configured: use --url, --connection or DATABASE_URL",
        ));
    }
    Ok(connection)
}

/// Resolves the import target connection. There is no default target.
fn resolve_import_connection(cli: &Cli, config: &Config) -> Result<ConnectionConfig> {
    let from_cli = cli.to_import_connection_config();

    let mut connection = match (&from_cli.url, cli.import_connection.as_deref()) {
        (None, Some(name)) => named_connection(config, name)?,
        _ => ConnectionConfig::default(),
    };
    connection.merge(&from_cli);

    if connection.url.is_none() {
        return Err(SqlBatchError::config(
            "Import target needs --import-url or --import-connection",
        ));
    }
    Ok(connection)
}

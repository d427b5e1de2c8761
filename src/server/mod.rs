//! The RESP protocol front-end.
//!
//! Parallel connection tasks feed a strictly ordered apply path: each task
//! parses frames, routes commands through the dispatcher, and writes replies.
//! Administrative commands (`PING`, `VERSION`, `AUTH`, `QUIT`) are handled
//! here; SQL and `PROC` commands end up in the state machine, writes by way
//! of the consensus layer.
//!
//! Tiger Style: concurrent connections are bounded by a semaphore, and every
//! connection task is tracked so shutdown can drain them.

mod connection;
mod frame;

pub use connection::Connection;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::ServerConfig;
use crate::consensus::Consensus;
use crate::constants::MAX_CONCURRENT_CONNECTIONS;
use crate::dispatch;
use crate::dispatch::Routed;
use crate::error::ServerError;
use crate::machine::SqlMachine;
use crate::reply::Reply;
use crate::session::Session;

/// What a handled command means for the connection.
enum Outcome {
    Reply(Reply),
    /// Write the reply, then close the connection.
    Close(Reply),
}

/// The accept loop plus everything a connection task needs.
pub struct Server {
    config: Arc<ServerConfig>,
    machine: Arc<SqlMachine>,
    consensus: Arc<dyn Consensus>,
}

impl Server {
    pub fn new(config: ServerConfig, machine: Arc<SqlMachine>, consensus: Arc<dyn Consensus>) -> Self {
        Self {
            config: Arc::new(config),
            machine,
            consensus,
        }
    }

    /// Serve until `cancel` fires, then drain connection tasks.
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ServerError> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CONNECTIONS));
        let tracker = TaskTracker::new();
        info!(
            addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            max_connections = MAX_CONCURRENT_CONNECTIONS,
            "listening for client connections"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("server received shutdown signal");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(%addr, "connection limit reached, rejecting");
                            continue;
                        }
                    };
                    debug!(%addr, "client connected");
                    let config = Arc::clone(&self.config);
                    let machine = Arc::clone(&self.machine);
                    let consensus = Arc::clone(&self.consensus);
                    let conn_cancel = cancel.clone();
                    tracker.spawn(async move {
                        let _permit = permit;
                        if let Err(err) = handle_connection(stream, config, machine, consensus, conn_cancel).await {
                            debug!(%addr, error = %err, "connection ended with error");
                        }
                        debug!(%addr, "client disconnected");
                    });
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    config: Arc<ServerConfig>,
    machine: Arc<SqlMachine>,
    consensus: Arc<dyn Consensus>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let mut conn = Connection::new(stream);
    let mut session = Session::new(config.auth.is_some())?;

    loop {
        let args = tokio::select! {
            _ = cancel.cancelled() => break,
            read = conn.read_command() => match read {
                Ok(Some(args)) => args,
                Ok(None) => break,
                Err(err) => {
                    // Tell the client what went wrong before dropping it.
                    let _ = conn.write_error(&err.wire_message()).await;
                    return Err(err);
                }
            },
        };
        match handle_command(args, &mut session, &config, &machine, &consensus).await {
            Ok(Outcome::Reply(reply)) => conn.write_reply(&reply).await?,
            Ok(Outcome::Close(reply)) => {
                conn.write_reply(&reply).await?;
                break;
            }
            Err(err) => {
                if matches!(err, ServerError::Internal { .. }) {
                    error!(error = %err, "command failed internally");
                }
                conn.write_error(&err.wire_message()).await?;
            }
        }
    }
    Ok(())
}

async fn handle_command(
    args: Vec<String>,
    session: &mut Session,
    config: &Arc<ServerConfig>,
    machine: &Arc<SqlMachine>,
    consensus: &Arc<dyn Consensus>,
) -> Result<Outcome, ServerError> {
    let name = args[0].to_lowercase();

    if !session.authenticated && name != "auth" && name != "quit" {
        return Err(ServerError::AuthRequired);
    }

    match name.as_str() {
        "ping" => match args.len() {
            1 => Ok(Outcome::Reply(Reply::Simple("PONG".to_string()))),
            2 => Ok(Outcome::Reply(Reply::Bulk(args[1].clone()))),
            _ => Err(ServerError::WrongNumberOfArguments),
        },
        "version" => Ok(Outcome::Reply(Reply::Bulk(config.version.clone()))),
        "auth" => {
            if args.len() != 2 {
                return Err(ServerError::WrongNumberOfArguments);
            }
            let Some(secret) = &config.auth else {
                return Err(ServerError::AuthNotEnabled);
            };
            if args[1] == *secret {
                session.authenticated = true;
                Ok(Outcome::Reply(Reply::ok()))
            } else {
                session.authenticated = false;
                Err(ServerError::Unauthorized)
            }
        }
        "quit" => Ok(Outcome::Close(Reply::ok())),
        "proc" => proc_command(args, machine, consensus).await.map(Outcome::Reply),
        // Replicated primitives are internal; clients never send them.
        "$exec" | "$query" => Err(ServerError::UnknownCommand { name }),
        "$any" => {
            if args.len() < 2 {
                return Err(ServerError::WrongNumberOfArguments);
            }
            let routed = route_sql(args[1..].join(" "), session)?;
            sql_command(routed, machine, consensus).await.map(Outcome::Reply)
        }
        _ => {
            let routed = route_sql(args.join(" "), session)?;
            sql_command(routed, machine, consensus).await.map(Outcome::Reply)
        }
    }
}

/// Classify and rewrite the raw SQL text. Synchronous so the session's
/// (non-`Sync`) validator handle never needs to cross an `.await`.
fn route_sql(raw: String, session: &Session) -> Result<Routed, ServerError> {
    dispatch::route_sql(&raw, Some(session.validator()))
}

/// The catch-all SQL path: run whatever `route_sql` decided.
async fn sql_command(
    routed: Routed,
    machine: &Arc<SqlMachine>,
    consensus: &Arc<dyn Consensus>,
) -> Result<Reply, ServerError> {
    match routed {
        Routed::Immediate(reply) => Ok(reply),
        Routed::Query { payload } => run_query(machine, payload).await,
        Routed::Exec { payload } => consensus.propose(vec!["$EXEC".to_string(), payload]).await,
    }
}

async fn run_query(machine: &Arc<SqlMachine>, payload: String) -> Result<Reply, ServerError> {
    let machine = Arc::clone(machine);
    tokio::task::spawn_blocking(move || machine.apply_query(&payload))
        .await
        .map_err(|err| ServerError::Internal {
            message: format!("query task failed: {err}"),
        })?
}

async fn proc_command(
    args: Vec<String>,
    machine: &Arc<SqlMachine>,
    consensus: &Arc<dyn Consensus>,
) -> Result<Reply, ServerError> {
    if args.len() < 2 {
        return Err(ServerError::ProcArity);
    }
    match args[1].to_lowercase().as_str() {
        "help" => {
            if args.len() != 2 {
                return Err(ServerError::ProcArity);
            }
            Ok(Reply::Array(
                [
                    "PROC EXEC name [arg ...]",
                    "PROC SET name script",
                    "PROC GET name",
                    "PROC DEL name",
                    "PROC LIST",
                ]
                .iter()
                .map(|line| Reply::Bulk(line.to_string()))
                .collect(),
            ))
        }
        "get" => {
            if args.len() != 3 {
                return Err(ServerError::ProcArity);
            }
            let machine = Arc::clone(machine);
            let name = args[2].clone();
            let script = tokio::task::spawn_blocking(move || machine.proc_get(&name))
                .await
                .map_err(|err| ServerError::Internal {
                    message: format!("proc get task failed: {err}"),
                })??;
            Ok(match script {
                Some(script) => Reply::Bulk(script),
                None => Reply::Nil,
            })
        }
        "list" => {
            if args.len() != 2 {
                return Err(ServerError::ProcArity);
            }
            let machine = Arc::clone(machine);
            let names = tokio::task::spawn_blocking(move || machine.proc_list())
                .await
                .map_err(|err| ServerError::Internal {
                    message: format!("proc list task failed: {err}"),
                })??;
            Ok(Reply::Array(names.into_iter().map(Reply::Bulk).collect()))
        }
        // Mutating subcommands are writes; the whole command replicates.
        "set" | "del" | "delete" | "exec" => consensus.propose(args).await,
        other => Err(ServerError::UnknownProcCommand {
            command: args[0].clone(),
            sub: other.to_string(),
        }),
    }
}

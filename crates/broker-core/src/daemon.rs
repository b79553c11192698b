//! Daemon supervision: socket lifecycle, accept loop, idle reaper, shutdown.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use ncb_types::config::BrokerConfig;
use netconf_core::NetconfClient;
use socket2::{Domain, SockAddr, Socket, Type};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::connection;
use crate::dispatch::Dispatcher;
use crate::error::{BrokerError, BrokerResult};
use crate::registry::SessionRegistry;

/// Run the daemon until SIGTERM or SIGINT arrives.
pub async fn run<C: NetconfClient>(client: Arc<C>, config: BrokerConfig) -> BrokerResult<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = sigint.recv() => info!("SIGINT received"),
        }
    };
    run_until(client, config, shutdown).await
}

/// Run the daemon until `shutdown` resolves. Split out from [`run`] so the
/// lifecycle can be driven without process signals.
pub async fn run_until<C, F>(client: Arc<C>, config: BrokerConfig, shutdown: F) -> BrokerResult<()>
where
    C: NetconfClient,
    F: std::future::Future<Output = ()>,
{
    let listener = bind_socket(&config)?;
    info!(socket = %config.socket_path.display(), "listening for front-end connections");

    let registry = SessionRegistry::new();
    let dispatcher = Arc::new(Dispatcher::new(client, registry.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reaper = {
        let registry = registry.clone();
        let idle_timeout = config.idle_timeout;
        let mut tick = interval(config.reap_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                tick.tick().await;
                registry.cleanup_expired(idle_timeout).await;
            }
        })
    };

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("accepted front-end connection");
                    workers.push(tokio::spawn(connection::serve(
                        stream,
                        dispatcher.clone(),
                        shutdown_rx.clone(),
                    )));
                    workers.retain(|worker| !worker.is_finished());
                }
                Err(err) => {
                    warn!(error = %err, "accepting front-end connection failed");
                }
            }
        }
    }

    info!(workers = workers.len(), "shutting down");
    let _ = shutdown_tx.send(true);
    reaper.abort();

    for mut worker in workers {
        if timeout(config.shutdown_grace, &mut worker).await.is_err() {
            warn!("worker did not stop in time, aborting it");
            worker.abort();
        }
    }

    registry.close_all().await;

    if let Err(err) = std::fs::remove_file(&config.socket_path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %err, "failed to remove socket file");
        }
    }
    info!("shutdown complete");
    Ok(())
}

/// Bind the listening UNIX socket, replacing any stale file from an earlier
/// run and opening the mode up so local front-ends can reach it.
fn bind_socket(config: &BrokerConfig) -> BrokerResult<UnixListener> {
    let path = &config.socket_path;
    if path.exists() {
        std::fs::remove_file(path).map_err(|source| BrokerError::SocketCleanup {
            path: path.clone(),
            source,
        })?;
    }

    let bind_err = |source: std::io::Error| BrokerError::Bind {
        path: path.clone(),
        source,
    };

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(bind_err)?;
    let address = SockAddr::unix(path).map_err(bind_err)?;
    socket.bind(&address).map_err(bind_err)?;
    socket.listen(config.backlog as i32).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)) {
        warn!(error = %err, "could not loosen socket permissions");
    }

    let listener: std::os::unix::net::UnixListener = socket.into();
    UnixListener::from_std(listener).map_err(bind_err)
}

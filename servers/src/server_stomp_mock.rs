use anyhow::Result;
use tokio::signal;

mod stomp_mock;
use stomp_mock::{config, demo, downstream, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    lib_realtime::loggers::setup_logging("server_stomp_mock", &config.log_dir(), config.log_level())?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let broker_state = state::BrokerState::new(shutdown_tx.clone(), config.heartbeat_ms());

    let mut downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        broker_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let demo_handle = if config.demo() {
        Some(tokio::spawn(demo::run(
            broker_state.clone(),
            config.demo_interval_ms(),
            shutdown_tx.subscribe(),
        )))
    } else {
        None
    };

    // Wait for shutdown signal, or for the listener to die on its own
    let mut broker_result = None;
    tokio::select! {
        result = &mut downstream_handle => {
            broker_result = Some(result);
        }
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    let broker_result = match broker_result {
        Some(result) => result,
        None => downstream_handle.await,
    };
    match broker_result {
        Ok(Err(e)) => log::error!("Broker stopped with error: {:#}", e),
        Err(e) => log::error!("Broker task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Some(handle) = demo_handle {
        let _ = handle.await;
    }

    log::info!("Shutdown complete.");
    Ok(())
}

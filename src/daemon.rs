use crate::config::schema::AppConfig;
use crate::device::{build_service, input, VirtualDeck};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run the virtual device daemon.
///
/// Serves the device protocol on `config.device.listen` and reads simulated
/// button input from stdin until Ctrl-C.
///
/// # Errors
/// Returns `DeviceError` if the service cannot be built or the listener
/// cannot be bound.
pub async fn run(config: AppConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    let deck = Arc::new(VirtualDeck::from_config(&config));
    let service = Arc::new(build_service(&deck, &config)?);
    let listener = TcpListener::bind(&config.device.listen).await?;

    let server_handle = spawn_server(listener, &service, &cancel);
    let input_handle = spawn_input(&deck, &cancel);

    info!(
        "opendeck device {} running, grid {}",
        config.device.id, config.device.grid
    );

    tokio::select! {
        () = cancel.cancelled() => {}
        () = async { tokio::signal::ctrl_c().await.ok(); } => {
            info!("received SIGINT, shutting down");
        }
    }

    info!("daemon shutting down...");
    cancel.cancel();
    service.shutdown();

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = server_handle.await;
        let _ = input_handle.await;
    })
    .await;

    info!("daemon stopped");
    Ok(())
}

fn spawn_server(
    listener: TcpListener,
    service: &Arc<crate::service::DeviceService>,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let server_service = Arc::clone(service);
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        let result = crate::transport::serve(listener, server_service, server_cancel.clone()).await;
        if let Err(e) = result {
            error!("server error: {e}");
            server_cancel.cancel();
        }
    })
}

fn spawn_input(deck: &Arc<VirtualDeck>, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let input_deck = Arc::clone(deck);
    let input_cancel = cancel.clone();
    tokio::spawn(async move {
        let lines = input::spawn_stdin_reader();
        input::read_input_loop(lines, input_deck, input_cancel).await;
    })
}

//! HTTP/1.1 control API over the coordinator.
mod http;
mod routes;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::error::{AppError, AppResult, ServerError};
use crate::shutdown::ShutdownReceiver;

use http::{read_http_request, write_error_response, write_json_response};

/// Binds the control API listener.
///
/// # Errors
///
/// Returns an error when the address cannot be bound.
pub async fn bind_control(listen: SocketAddr) -> AppResult<TcpListener> {
    let listener = TcpListener::bind(listen).await.map_err(|err| {
        AppError::server(ServerError::Bind {
            addr: listen.to_string(),
            source: err,
        })
    })?;
    let local = listener
        .local_addr()
        .map_err(|err| AppError::server(ServerError::LocalAddr { source: err }))?;
    info!("Control API listening on http://{}", local);
    Ok(listener)
}

/// Accepts control connections until shutdown is broadcast. Each
/// connection carries one request and is handled on its own task.
pub async fn serve_control(
    listener: TcpListener,
    coordinator: Coordinator,
    mut shutdown_rx: ShutdownReceiver,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Control API shutting down.");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!("Control connection from {}", peer);
                    tokio::spawn(handle_connection(socket, coordinator.clone()));
                }
                Err(err) => warn!("Failed to accept control connection: {}", err),
            },
        }
    }
}

async fn handle_connection(mut socket: TcpStream, coordinator: Coordinator) {
    let request = match read_http_request(&mut socket).await {
        Ok(request) => request,
        Err(err) => {
            if write_error_response(&mut socket, &err).await.is_err() {
                // Socket closed while writing error response.
            }
            return;
        }
    };

    let outcome = match routes::route(&request.method, &request.path, &request.query) {
        Ok(route) => routes::handle(&coordinator, route, &request.body).await,
        Err(err) => Err(err),
    };
    let written = match outcome {
        Ok(body) => write_json_response(&mut socket, 200, &body).await,
        Err(err) => {
            debug!(
                "{} {} -> {} {}",
                request.method, request.path, err.status, err.message
            );
            write_error_response(&mut socket, &err).await
        }
    };
    if let Err(err) = written {
        debug!("Failed to write control response: {}", err);
    }
}

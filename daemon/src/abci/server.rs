//! Consensus-driver transport server.
//!
//! One Unix-socket listener, one consensus-driver session at a time. The
//! read loop accumulates bytes, drains every complete frame, runs the
//! handlers in arrival order, and flushes the batch's responses in one
//! coalesced write, so responses can never reorder. A closed or misbehaving
//! connection ends the session and re-arms the listener; a fatal handler
//! error propagates out so the process exits without committing.

use bytes::BytesMut;
use log::{error, info, warn};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};

use super::codec::{drain_frames, write_frame};
use super::dispatch::Dispatcher;
use super::proto::Request;
use crate::core::error::ChainError;

/// Read chunk size for the session loop.
const MAX_READ_BYTES: usize = 64 * 1024;

pub struct AbciServer {
    socket_path: PathBuf,
    dispatcher: Dispatcher,
}

impl AbciServer {
    pub fn new(socket_path: PathBuf, dispatcher: Dispatcher) -> Self {
        Self {
            socket_path,
            dispatcher,
        }
    }

    /// Serve until a shutdown signal arrives or a fatal error occurs.
    pub async fn run(mut self) -> Result<(), ChainError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            error!("cannot bind {}: {}", self.socket_path.display(), e);
            ChainError::Io(e)
        })?;
        info!("listening on {}", self.socket_path.display());

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let outcome = loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break Ok(());
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            info!("consensus driver connected");
                            match self.serve_session(stream).await {
                                Ok(()) => info!("session ended, awaiting reconnect"),
                                Err(fatal) => break Err(fatal),
                            }
                        }
                        Err(e) => error!("accept failed: {}", e),
                    }
                }
            }
        };

        let _ = std::fs::remove_file(&self.socket_path);
        outcome
    }

    /// Drive one driver connection to completion. `Ok` means the connection
    /// closed and the listener should re-arm; `Err` is fatal.
    async fn serve_session(&mut self, mut stream: UnixStream) -> Result<(), ChainError> {
        let mut buffer = BytesMut::with_capacity(MAX_READ_BYTES);

        loop {
            let read = match stream.read_buf(&mut buffer).await {
                Ok(n) => n,
                Err(e) => {
                    error!("session read error: {}", e);
                    return Ok(());
                }
            };
            if read == 0 {
                warn!("consensus driver closed connection");
                return Ok(());
            }

            let requests: Vec<Request> = match drain_frames(&mut buffer) {
                Ok(requests) => requests,
                Err(e) => {
                    error!("framing error, dropping connection: {}", e);
                    return Ok(());
                }
            };
            if requests.is_empty() {
                continue;
            }

            // Handlers run sequentially in arrival order; the batch's
            // responses flush together to keep ordering trivially correct.
            let mut out = BytesMut::new();
            for request in requests {
                let response = self.dispatcher.handle(request)?;
                out.extend_from_slice(&write_frame(&response));
            }

            if let Err(e) = stream.write_all(&out).await {
                error!("session write error: {}", e);
                return Ok(());
            }
            if let Err(e) = stream.flush().await {
                error!("session flush error: {}", e);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abci::codec::{extract_frame, write_frame};
    use crate::abci::proto::{
        RequestEcho, RequestValue, Response, ResponseValue,
    };
    use crate::config::NodeConfig;
    use crate::core::app::App;
    use crate::core::storage::StateStore;
    use prost::Message;

    fn test_dispatcher() -> Dispatcher {
        let home = std::env::temp_dir().join(format!("kura_server_{}", std::process::id()));
        std::fs::create_dir_all(&home).unwrap();
        let config = NodeConfig::for_tests("kura-test", &home);
        Dispatcher::new(App::with_store(config, StateStore::temporary().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn test_session_round_trip_over_socket() {
        let dir = std::env::temp_dir().join(format!("kura_sock_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let socket_path = dir.join("abci_test.sock");
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path).unwrap();
        let mut server = AbciServer {
            socket_path: socket_path.clone(),
            dispatcher: test_dispatcher(),
        };

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            server.serve_session(stream).await.unwrap();
        });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();

        // Two pipelined requests in one write
        let mut payload = BytesMut::new();
        for message in ["first", "second"] {
            payload.extend_from_slice(&write_frame(&Request {
                value: Some(RequestValue::Echo(RequestEcho {
                    message: message.into(),
                })),
            }));
        }
        client.write_all(&payload).await.unwrap();

        // Responses come back framed, in order
        let mut buffer = BytesMut::new();
        let mut messages = Vec::new();
        while messages.len() < 2 {
            client.read_buf(&mut buffer).await.unwrap();
            while let Some(body) = extract_frame(&mut buffer).unwrap() {
                let response = Response::decode(body).unwrap();
                match response.value {
                    Some(ResponseValue::Echo(e)) => messages.push(e.message),
                    other => panic!("unexpected response: {:?}", other.is_some()),
                }
            }
        }
        assert_eq!(messages, ["first", "second"]);

        drop(client);
        server_task.await.unwrap();
        let _ = std::fs::remove_file(&socket_path);
    }
}

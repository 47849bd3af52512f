use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{
        Mutex,
        mpsc::{self, error::TrySendError},
    },
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    credentials::CredentialStore,
    directory::ClientId,
    dispatch::Action,
    frame::FrameReader,
    message::{Envelope, write_envelope},
    state::RelayState,
};

pub struct Relay {
    listener: TcpListener,
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<RelayState>,
    max_frame_len: usize,
    outbox_capacity: usize,
}

impl Relay {
    pub fn new(listener: TcpListener, state: RelayState, config: &RelayConfig) -> Self {
        Self {
            listener,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                max_frame_len: config.max_frame_len,
                outbox_capacity: config.outbox_capacity,
            }),
        }
    }

    /// Opens (or seeds) the account store and binds the listening socket.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let credentials = CredentialStore::open(&config.accounts_path)
            .await
            .with_context(|| {
                format!(
                    "failed to open account store {}",
                    config.accounts_path.display()
                )
            })?;
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;

        let state = RelayState::new(credentials, config.duplicate_sessions);
        Ok(Self::new(listener, state, &config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, shared } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&shared).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &shared);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(shared: &Shared) {
    info!("relay shutting down");
    let state = shared.state.lock().await;
    let notice = Envelope::notice("server shutting down");
    for client in state.directory().ids() {
        deliver_one(&state, client, notice.clone());
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, shared: &Arc<Shared>) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, shared),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, shared: &Arc<Shared>) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, shared).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let (outbox, inbox) = mpsc::channel(shared.outbox_capacity);
    let client = shared.state.lock().await.connect(outbox);
    info!(%peer, %client, "client connected");

    let writer_task = tokio::spawn(run_writer(writer, inbox, client));
    let mut reader = FrameReader::new(reader, shared.max_frame_len);
    let result = run_reader(&shared, &mut reader, client).await;

    cleanup_client_disconnect(&shared, client, peer).await;
    // Removing the client dropped its outbox, so the writer drains and stops.
    if let Err(err) = writer_task.await {
        warn!(%client, error = ?err, "writer task failed");
    }

    result
}

async fn run_reader(
    shared: &Shared,
    reader: &mut FrameReader<OwnedReadHalf>,
    client: ClientId,
) -> Result<()> {
    loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(%client, "peer closed the connection");
                return Ok(());
            }
            Err(err) if !err.is_fatal() => {
                debug!(%client, error = %err, "discarding frame");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(%client, error = %err, "discarding malformed envelope");
                continue;
            }
        };

        if !handle_envelope(shared, client, envelope).await {
            return Ok(());
        }
    }
}

/// Runs one dispatch step under the state lock. Returns `false` once the
/// client asked to leave.
async fn handle_envelope(shared: &Shared, client: ClientId, envelope: Envelope) -> bool {
    let mut state = shared.state.lock().await;
    let actions = state.dispatch(client, envelope).await;

    let mut keep_open = true;
    for action in actions {
        match action {
            Action::Send { to, envelope } => deliver_one(&state, to, envelope),
            Action::Disconnect { client: target } if target == client => keep_open = false,
            Action::Disconnect { client: target } => {
                debug!(%client, %target, "disconnect for another connection ignored");
            }
        }
    }
    keep_open
}

fn deliver_one(state: &RelayState, to: ClientId, envelope: Envelope) {
    let Some(recipient) = state.directory().get(to) else {
        debug!(client = %to, "recipient already gone");
        return;
    };

    match recipient.outbox().try_send(envelope) {
        Ok(()) => {}
        Err(TrySendError::Full(envelope)) => {
            warn!(client = %to, kind = %envelope.kind, "outbox full; dropping envelope");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(client = %to, "outbox closed; dropping envelope");
        }
    }
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut inbox: mpsc::Receiver<Envelope>,
    client: ClientId,
) {
    while let Some(envelope) = inbox.recv().await {
        if let Err(err) = write_envelope(&mut writer, &envelope).await {
            debug!(%client, error = ?err, "failed to deliver envelope");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(%client, error = ?err, "failed to shut down writer cleanly");
    }
}

async fn cleanup_client_disconnect(shared: &Shared, client: ClientId, peer: SocketAddr) {
    let removed = shared.state.lock().await.remove_client(client);
    if let Some(record) = removed {
        info!(%peer, %client, identity = record.identity(), "client disconnected");
    }
}

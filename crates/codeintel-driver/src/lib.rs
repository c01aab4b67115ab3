//! Driver Server (C4): the single process that owns the `SqlEngine`
//! connection and serves every other component over a length-prefixed JSON
//! protocol on a UNIX socket, generalizing the request/response shape
//! `daemon::handle_connection` used for its single `ping` RPC into the full
//! op table (spec §4.4).

pub mod dispatch;
pub mod wire;

use anyhow::{Context, Result};
use codeintel_protocol::{Request, Response};
use codeintel_store::{QueryJournal, SqlEngine};
use dispatch::Driver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};

/// `{db_path}.sock`: the socket lives next to the database file it fronts,
/// so a driver and its store are always found together.
#[must_use]
pub fn socket_path_for_db(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push(".sock");
    PathBuf::from(s)
}

/// Opens the store (running startup integrity/migration before any
/// connection is accepted, per spec §4.1/§4.4), binds the socket, and serves
/// connections until the listener is dropped or accept fails. A failure here
/// is expected to end the process — the Worker Manager (C10) owns restarts.
pub async fn run_driver(db_path: &Path, journal_path: Option<&Path>) -> Result<()> {
    let mut engine = SqlEngine::open(db_path).context("opening sql store")?;
    if let Some(jp) = journal_path {
        let journal = QueryJournal::open(jp, codeintel_store::JournalConfig::default())
            .context("opening query journal")?;
        engine = engine.with_journal(Arc::new(journal));
    }
    let driver = Arc::new(Driver::new(Arc::new(engine)));

    let socket_path = socket_path_for_db(db_path);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).context("removing stale socket")?;
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding socket at {}", socket_path.display()))?;
    log::info!("driver listening on {}", socket_path.display());

    loop {
        let (stream, _addr) = listener.accept().await.context("accepting connection")?;
        let driver = Arc::clone(&driver);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, driver).await {
                log::warn!("connection closed with error: {e:#}");
            }
        });
    }
}

async fn serve_connection(stream: UnixStream, driver: Arc<Driver>) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        let request = match wire::read_request(&mut reader).await? {
            Some(req) => req,
            None => return Ok(()),
        };
        let response = dispatch_request(&driver, request);
        wire::write_response(&mut writer, &response).await?;
    }
}

fn dispatch_request(driver: &Driver, request: Request) -> Response {
    match driver.handle(request.op) {
        Ok(value) => Response::ok(request.id, value),
        Err(err) => Response::err(request.id, err),
    }
}

//! Connection acceptor and the state that outlives a single connection.

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{info, warn};

use crate::auth::Credential;
use crate::config::ServerConfig;
use crate::engine::{self, RunHandle};
use crate::events::Timeline;
use crate::session::{Session, SessionEnd};
use crate::shutdown::ShutdownHook;
use crate::timing::Hardware;

/// Server-wide state shared by consecutive sessions.
///
/// The active run lives here rather than in a session, so a controller that
/// reconnects can still stop it.
pub struct ServerContext {
    config: ServerConfig,
    credential: Credential,
    hardware: Hardware,
    shutdown: Box<dyn ShutdownHook>,
    active: Option<RunHandle>,
    #[cfg(test)]
    fail_launches: bool,
}

impl ServerContext {
    pub fn new(config: ServerConfig, hardware: Hardware, shutdown: Box<dyn ShutdownHook>) -> Self {
        let credential = Credential::from_secret(&config.secret);
        Self {
            config,
            credential,
            hardware,
            shutdown,
            active: None,
            #[cfg(test)]
            fail_launches: false,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    /// Whether a run is still executing. Finished runs are dropped here.
    pub fn run_active(&mut self) -> bool {
        let finished = match self.active.as_mut() {
            Some(run) => run.is_finished(),
            None => return false,
        };
        if finished {
            if let Some(run) = self.active.take() {
                info!(outcome = ?run.outcome(), "previous run finished");
            }
            return false;
        }
        true
    }

    /// Starts `timeline` on its own thread. The caller checks `run_active`.
    pub fn launch(&mut self, timeline: Timeline) -> io::Result<()> {
        #[cfg(test)]
        if self.fail_launches {
            return Err(io::Error::other("launch refused"));
        }

        info!(entries = timeline.len(), "starting timeline");
        let run = engine::spawn_run(
            timeline,
            self.hardware.clone(),
            self.config.scheduler_settings(),
        )?;
        self.active = Some(run);
        Ok(())
    }

    /// Cancels the active run. `false` if nothing was running.
    pub fn stop_active(&mut self) -> bool {
        if !self.run_active() {
            return false;
        }
        if let Some(run) = &self.active {
            info!("cancelling active run");
            run.cancel();
        }
        true
    }

    /// Cancels and joins any run, then hands off to the host hook.
    pub fn request_shutdown(&mut self) {
        if let Some(run) = self.active.take() {
            run.cancel();
            let outcome = run.wait();
            info!(?outcome, "run ended for shutdown");
        }
        self.shutdown.request_shutdown();
    }

    #[cfg(test)]
    pub(crate) fn fail_launches(&mut self, fail: bool) {
        self.fail_launches = fail;
    }

    #[cfg(test)]
    pub(crate) fn take_active_run(&mut self) -> Option<RunHandle> {
        self.active.take()
    }
}

/// Supplies the address the acceptor binds. A Bluetooth deployment
/// resolves the adapter's RFCOMM endpoint here.
pub trait AddressProvider {
    fn current_listen_address(&self) -> io::Result<SocketAddr>;
}

/// An address taken verbatim from configuration.
pub struct ConfiguredAddress(pub String);

impl AddressProvider for ConfiguredAddress {
    fn current_listen_address(&self) -> io::Result<SocketAddr> {
        self.0.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' did not resolve to an address", self.0),
            )
        })
    }
}

pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    pub fn bind(provider: &dyn AddressProvider) -> io::Result<Self> {
        let addr = provider.current_listen_address()?;
        let listener = TcpListener::bind(addr)?;
        info!(addr = %listener.local_addr()?, "listening for controllers");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves one connection at a time until a client requests shutdown.
    pub fn serve(&self, ctx: &mut ServerContext) -> io::Result<()> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if Self::handle(stream, ctx) == Some(SessionEnd::ShutdownRequested) {
                info!("shutdown requested, acceptor stopping");
                return Ok(());
            }
        }
        Ok(())
    }

    fn handle(stream: TcpStream, ctx: &mut ServerContext) -> Option<SessionEnd> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        info!(%peer, "controller connected");

        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
        let reader = match stream.try_clone() {
            Ok(read_half) => BufReader::new(read_half),
            Err(e) => {
                warn!(%peer, error = %e, "failed to split connection");
                return None;
            }
        };

        match Session::new(reader, stream, ctx).run() {
            Ok(end) => {
                info!(%peer, ?end, "controller disconnected");
                Some(end)
            }
            Err(e) => {
                warn!(%peer, error = %e, "session ended");
                None
            }
        }
    }
}

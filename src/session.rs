use std::io::{self, BufRead, Read, Write};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::Timeline;
use crate::hardware::validate_name;
use crate::protocol::{Command, ProtocolError, Reply, upload};
use crate::server::ServerContext;
use crate::timing::{CompileError, compile_with};

/// Longest accepted command line, newline included.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("authentication failed")]
    Auth,
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl SessionError {
    /// Compile and protocol errors are reported and the connection stays up.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Auth | SessionError::Transport(_))
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Disconnected,
    ShutdownRequested,
}

enum Flow {
    Continue,
    End(SessionEnd),
}

/// One connected controller. Authentication and the pending timeline live
/// here and die with the connection; the active run belongs to the server.
pub struct Session<'a, R, W> {
    reader: R,
    writer: W,
    ctx: &'a mut ServerContext,
    authenticated: bool,
    pending: Option<Timeline>,
}

impl<'a, R: BufRead, W: Write> Session<'a, R, W> {
    pub fn new(reader: R, writer: W, ctx: &'a mut ServerContext) -> Self {
        Self {
            reader,
            writer,
            ctx,
            authenticated: false,
            pending: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Serves frames until the peer disconnects, authentication fails, the
    /// transport breaks or shutdown is requested.
    pub fn run(mut self) -> Result<SessionEnd, SessionError> {
        loop {
            let frame = match self.read_frame()? {
                None => return Ok(SessionEnd::Disconnected),
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!(error = %e, "rejected frame");
                    self.reply(Reply::Error(e.to_string()))?;
                    continue;
                }
            };

            let frame = frame.trim();
            if frame.is_empty() {
                continue;
            }

            match self.dispatch(frame) {
                Ok(Flow::Continue) => {}
                Ok(Flow::End(end)) => return Ok(end),
                Err(e) if !e.is_fatal() => {
                    warn!(error = %e, "command failed");
                    self.reply(Reply::Error(e.to_string()))?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `None` on a clean end of stream.
    fn read_frame(&mut self) -> io::Result<Option<Result<String, ProtocolError>>> {
        let mut buf = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_FRAME_BYTES as u64)
            .read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        if read == MAX_FRAME_BYTES && buf.last() != Some(&b'\n') {
            self.reader.skip_until(b'\n')?;
            return Ok(Some(Err(ProtocolError::FrameTooLong(MAX_FRAME_BYTES))));
        }

        Ok(Some(
            String::from_utf8(buf).map_err(|_| ProtocolError::NotUtf8),
        ))
    }

    fn reply(&mut self, reply: Reply) -> io::Result<()> {
        debug!(%reply, "reply");
        writeln!(self.writer, "{reply}")?;
        self.writer.flush()
    }

    fn dispatch(&mut self, frame: &str) -> Result<Flow, SessionError> {
        if !self.authenticated && !frame.starts_with('0') {
            warn!("command before authentication");
            self.reply(Reply::NotAuthenticated)?;
            return Ok(Flow::Continue);
        }

        let command = Command::parse(frame)?;
        info!(command = command.name(), "received");

        match command {
            Command::Authenticate(presented) => self.authenticate(presented),
            Command::Ping => {
                self.reply(Reply::Pong)?;
                Ok(Flow::Continue)
            }
            Command::LoadSequence(text) => self.load_sequence(text),
            Command::UploadAsset(header) => self.upload(header),
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Shutdown => {
                self.reply(Reply::ShuttingDown)?;
                self.ctx.request_shutdown();
                Ok(Flow::End(SessionEnd::ShutdownRequested))
            }
        }
    }

    fn authenticate(&mut self, presented: &str) -> Result<Flow, SessionError> {
        if self.ctx.credential().verify(presented) {
            info!("controller authenticated");
            self.authenticated = true;
            self.reply(Reply::Verified)?;
            Ok(Flow::Continue)
        } else {
            warn!("authentication failed, closing connection");
            self.authenticated = false;
            self.reply(Reply::AuthFailed)?;
            Err(SessionError::Auth)
        }
    }

    fn load_sequence(&mut self, text: &str) -> Result<Flow, SessionError> {
        let timeline = compile_with(text, &self.ctx.config().compile_limits())?;
        info!(entries = timeline.len(), stop_at = timeline.stop_at(), "sequence loaded");
        match timeline.to_ron() {
            Ok(dump) => debug!(timeline = %dump, "compiled timeline"),
            Err(e) => debug!(error = %e, "could not render timeline"),
        }

        self.pending = Some(timeline);
        self.reply(Reply::SequenceLoaded)?;
        Ok(Flow::Continue)
    }

    fn upload(&mut self, header: &str) -> Result<Flow, SessionError> {
        let config = self.ctx.config().upload.clone();
        let claimed = upload::parse_header(header, &config.start_marker)?;

        info!(name = claimed, "upload started");
        self.reply(Reply::UploadStarted)?;

        // Always consume the payload so a rejected upload doesn't leak into
        // the command stream.
        let received = upload::receive(&mut self.reader, &mut self.writer, &config)?;
        if received.overflowed {
            return Err(ProtocolError::UploadTooLarge(config.max_bytes).into());
        }

        let name = validate_name(claimed).map_err(ProtocolError::from)?;
        let bytes = upload::decode(&received.payload)?;
        let path = self
            .ctx
            .hardware()
            .assets
            .write(name, &bytes)
            .map_err(ProtocolError::from)?;

        info!(name, bytes = bytes.len(), chunks = received.chunks, path = %path.display(), "upload stored");
        self.reply(Reply::UploadSaved(name.to_string()))?;
        Ok(Flow::Continue)
    }

    fn start(&mut self) -> Result<Flow, SessionError> {
        if self.ctx.run_active() {
            self.reply(Reply::AlreadyRunning)?;
            return Ok(Flow::Continue);
        }
        let Some(timeline) = self.pending.take() else {
            self.reply(Reply::NothingPending)?;
            return Ok(Flow::Continue);
        };

        match self.ctx.launch(timeline.clone()) {
            Ok(()) => self.reply(Reply::Starting)?,
            Err(e) => {
                warn!(error = %e, "failed to start timeline, keeping it pending");
                self.pending = Some(timeline);
                self.reply(Reply::Error(e.to_string()))?;
            }
        }
        Ok(Flow::Continue)
    }

    fn stop(&mut self) -> Result<Flow, SessionError> {
        if self.ctx.stop_active() {
            self.reply(Reply::Stopping)?;
        } else {
            self.reply(Reply::NothingRunning)?;
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::secret_digest;
    use crate::hardware::DirAssetStore;
    use crate::server::tests::{context, context_with_assets};
    use crate::timing::RunOutcome;
    use std::io::{BufReader, Cursor};
    use std::sync::Arc;

    fn login() -> String {
        format!("0{}\n", secret_digest("test-secret"))
    }

    fn converse(ctx: &mut ServerContext, input: &str) -> (Result<SessionEnd, SessionError>, Vec<String>) {
        let mut out = Vec::new();
        let result = Session::new(Cursor::new(input.as_bytes().to_vec()), &mut out, ctx).run();
        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        (result, lines)
    }

    #[test]
    fn commands_require_authentication() {
        let (mut ctx, _shutdown) = context();
        let input = format!("1\n2light,1,0,10\n{}1\n", login());

        let (result, lines) = converse(&mut ctx, &input);

        assert!(matches!(result, Ok(SessionEnd::Disconnected)));
        assert_eq!(
            lines,
            vec![
                "Nicht angemeldet",
                "Nicht angemeldet",
                "Verbindung verifiziert",
                "Test erfolgreich"
            ]
        );
    }

    #[test]
    fn wrong_credential_closes_the_session() {
        let (mut ctx, _shutdown) = context();

        let (result, lines) = converse(&mut ctx, "0deadbeef\n1\n");

        assert!(matches!(result, Err(SessionError::Auth)));
        assert_eq!(lines, vec!["Verbindung fehlgeschlagen"]);
    }

    #[test]
    fn compile_errors_keep_the_connection() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}2bogus,1,2\n1\n", login());

        let (result, lines) = converse(&mut ctx, &input);

        assert!(matches!(result, Ok(SessionEnd::Disconnected)));
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("Fehler bei der Verarbeitung: clause 0 is malformed"));
        assert_eq!(lines[2], "Test erfolgreich");
    }

    #[test]
    fn unknown_opcode_keeps_the_connection() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}9\nx\n1\n", login());

        let (_, lines) = converse(&mut ctx, &input);

        assert_eq!(lines[1], "Fehler bei der Verarbeitung: unknown opcode '9'");
        assert_eq!(lines[2], "Fehler bei der Verarbeitung: unknown opcode 'x'");
        assert_eq!(lines[3], "Test erfolgreich");
    }

    #[test]
    fn start_without_sequence() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}4\n5\n", login());

        let (_, lines) = converse(&mut ctx, &input);

        assert_eq!(lines[1], "Keine Abfolge erhalten");
        assert_eq!(lines[2], "Keine Abfolge aktiv");
    }

    #[test]
    fn start_then_stop_cancels_the_run() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}2light,1,0,10000\n4\n5\n", login());

        let (_, lines) = converse(&mut ctx, &input);

        assert_eq!(
            lines,
            vec![
                "Verbindung verifiziert",
                "Abfolge erfolgreich erhalten",
                "Startet abfolge",
                "Stoppe Abfolge"
            ]
        );
        let run = ctx.take_active_run().unwrap();
        assert_eq!(run.wait(), Some(RunOutcome::Cancelled));
    }

    #[test]
    fn pending_sequence_is_consumed_by_start() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}2light,1,0,10\n4\n", login());

        converse(&mut ctx, &input);
        let run = ctx.take_active_run().unwrap();
        assert_eq!(run.wait(), Some(RunOutcome::Completed));

        let (_, lines) = converse(&mut ctx, &format!("{}4\n", login()));
        assert_eq!(lines[1], "Keine Abfolge erhalten");
    }

    #[test]
    fn failed_launch_keeps_the_sequence_pending() {
        let (mut ctx, _shutdown) = context();
        ctx.fail_launches(true);
        let mut out = Vec::new();
        let mut session = Session::new(Cursor::new(Vec::new()), &mut out, &mut ctx);

        session.load_sequence("light,1,0,10").unwrap();
        session.start().unwrap();
        assert!(session.pending.is_some());

        session.ctx.fail_launches(false);
        session.start().unwrap();
        assert!(session.pending.is_none());
        drop(session);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Abfolge erfolgreich erhalten");
        assert!(lines[1].starts_with("Fehler bei der Verarbeitung"));
        assert_eq!(lines[2], "Startet abfolge");
        assert_eq!(ctx.take_active_run().unwrap().wait(), Some(RunOutcome::Completed));
    }

    #[test]
    fn oversized_blink_is_rejected_and_session_continues() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}2light,1,0,18446744073709550000,2\n1\n", login());

        let (result, lines) = converse(&mut ctx, &input);

        assert!(matches!(result, Ok(SessionEnd::Disconnected)));
        assert!(lines[1].contains("too many blink toggles"));
        assert_eq!(lines[2], "Test erfolgreich");
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}2light,1,0,10000\n4\n2light,2,0,10\n4\n", login());

        let (_, lines) = converse(&mut ctx, &input);

        assert_eq!(lines[4], "Abfolge laeuft bereits");
        ctx.stop_active();
        assert_eq!(ctx.take_active_run().unwrap().wait(), Some(RunOutcome::Cancelled));
    }

    #[test]
    fn stop_from_a_new_session_reaches_the_active_run() {
        let (mut ctx, _shutdown) = context();
        converse(&mut ctx, &format!("{}2light,1,0,10000\n4\n", login()));

        let (_, lines) = converse(&mut ctx, &format!("{}5\n", login()));

        assert_eq!(lines[1], "Stoppe Abfolge");
        assert_eq!(ctx.take_active_run().unwrap().wait(), Some(RunOutcome::Cancelled));
    }

    #[test]
    fn uploads_are_decoded_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctx, _shutdown) = context_with_assets(Arc::new(DirAssetStore::new(dir.path())));
        let input = format!("{}3:clip.wav:START\naGVs\nbG8END\n1\n", login());
        let mut out = Vec::new();

        // Small reads so the payload arrives in several chunks.
        let reader = BufReader::with_capacity(4, Cursor::new(input.into_bytes()));
        let result = Session::new(reader, &mut out, &mut ctx).run();

        assert!(matches!(result, Ok(SessionEnd::Disconnected)));
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let (first, rest) = lines.split_at(2);
        let (acks, tail) = rest.split_at(rest.len() - 2);
        assert_eq!(first, ["Verbindung verifiziert", "Audio Datei beginnt Transfer"]);
        assert!(!acks.is_empty());
        assert!(acks.iter().all(|line| *line == "Teil empfangen"));
        assert_eq!(tail, ["Audio Datei gespeichet als clip.wav", "Test erfolgreich"]);
        assert_eq!(std::fs::read(dir.path().join("clip.wav")).unwrap(), b"hello");
    }

    #[test]
    fn traversal_names_are_rejected_after_draining_payload() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner");
        std::fs::create_dir(&inner).unwrap();
        let (mut ctx, _shutdown) = context_with_assets(Arc::new(DirAssetStore::new(&inner)));
        let input = format!("{}3:../evil.wav:START\naGVsbG8=END\n1\n", login());

        let (_, lines) = converse(&mut ctx, &input);

        assert_eq!(lines[1], "Audio Datei beginnt Transfer");
        assert!(lines[2].contains("invalid asset name"));
        assert_eq!(lines[3], "Test erfolgreich");
        assert!(!dir.path().join("evil.wav").exists());
    }

    #[test]
    fn malformed_upload_header_is_reported() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}3clip.wav\n1\n", login());

        let (_, lines) = converse(&mut ctx, &input);

        assert!(lines[1].starts_with("Fehler bei der Verarbeitung: upload header"));
        assert_eq!(lines[2], "Test erfolgreich");
    }

    #[test]
    fn upload_cut_off_is_a_transport_error() {
        let (mut ctx, _shutdown) = context();
        let input = format!("{}3:clip.wav:START\naGVs", login());

        let (result, _) = converse(&mut ctx, &input);

        assert!(matches!(result, Err(SessionError::Transport(_))));
    }

    #[test]
    fn shutdown_ends_session_and_notifies_host() {
        let (mut ctx, shutdown) = context();
        let input = format!("{}2light,1,0,10000\n4\n6\n1\n", login());

        let (result, lines) = converse(&mut ctx, &input);

        assert!(matches!(result, Ok(SessionEnd::ShutdownRequested)));
        assert_eq!(lines.last().unwrap(), "Fahre herunter");
        assert!(shutdown.requested());
        assert!(!ctx.run_active());
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let (mut ctx, _shutdown) = context();
        let mut input = login().into_bytes();
        input.extend_from_slice(b"2\xff\xfe\n1\n");
        let mut out = Vec::new();

        Session::new(Cursor::new(input), &mut out, &mut ctx).run().unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("frame is not valid UTF-8"));
        assert!(text.ends_with("Test erfolgreich\n"));
    }
}

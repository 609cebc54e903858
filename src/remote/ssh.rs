//! SSH-backed remote session.
//!
//! One TCP connection carries both the SFTP subsystem (stat, upload,
//! setstat) and short-lived exec channels for `mkdir -p` / `createrepo`.
//! Commands are assembled from argument vectors and quoted with
//! `shell-words` before they reach the remote shell. Their stderr is merged
//! into stdout on the channel so a chatty command cannot stall on a full
//! stderr window while stdout is drained.

use std::fs::File;
use std::io::{self, Read};
use std::net::TcpStream;
use std::path::Path;

use ssh2::{ExtendedData, FileStat, Session, Sftp};

use super::{
    CommandOutput, ConnectionContext, Connector, RemoteArtifactDescriptor, RemoteError,
    RemoteSession, RemoteStat, SFTP_NO_SUCH_FILE, command_line,
};

/// Opens [`SshSession`]s using ssh-agent or an explicit identity file.
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    type Session = SshSession;

    fn connect(&self, ctx: &ConnectionContext) -> Result<SshSession, RemoteError> {
        let tcp = TcpStream::connect((ctx.host.as_str(), ctx.port)).map_err(|e| {
            RemoteError::Connect {
                host: ctx.host.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| RemoteError::Connect {
            host: ctx.host.clone(),
            reason: e.message().to_string(),
        })?;

        match &ctx.identity_file {
            Some(key) => session.userauth_pubkey_file(&ctx.username, None, key, None)?,
            None => session.userauth_agent(&ctx.username)?,
        }
        if !session.authenticated() {
            return Err(RemoteError::AuthRejected {
                user: ctx.username.clone(),
            });
        }

        let sftp = session.sftp()?;
        tracing::debug!(host = %ctx.host, port = ctx.port, user = %ctx.username, "ssh session established");

        Ok(SshSession { session, sftp })
    }
}

/// A live SSH session with an open SFTP channel.
pub struct SshSession {
    session: Session,
    sftp: Sftp,
}

impl RemoteSession for SshSession {
    fn stat(&mut self, path: &str) -> Result<RemoteStat, RemoteError> {
        match self.sftp.stat(Path::new(path)) {
            Ok(st) => Ok(RemoteStat::Present(RemoteArtifactDescriptor {
                mtime: st.mtime.unwrap_or(0),
                size: st.size.unwrap_or(0),
            })),
            Err(e) if matches!(e.code(), ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => {
                Ok(RemoteStat::Absent)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let mut source = File::open(local)?;
        let mut target = self.sftp.create(Path::new(remote))?;
        let written = io::copy(&mut source, &mut target)?;
        Ok(written)
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), RemoteError> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        };
        self.sftp.setstat(Path::new(path), stat)?;
        Ok(())
    }

    fn exec(&mut self, argv: &[&str]) -> Result<CommandOutput, RemoteError> {
        let command = command_line(argv);
        let mut channel = self.session.channel_session()?;
        channel.handle_extended_data(ExtendedData::Merge)?;
        channel.exec(&command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        channel.wait_close()?;

        let signal = channel.exit_signal()?;
        let exit_status = channel_status(channel.exit_status()?, signal.exit_signal.as_deref());
        let stderr = match signal.exit_signal {
            Some(name) => {
                tracing::warn!(command = %command, signal = %name, "remote command killed by signal");
                format!("killed by signal {name}")
            }
            None => String::new(),
        };

        Ok(CommandOutput {
            exit_status,
            stdout,
            stderr,
        })
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        self.session.disconnect(None, "repository sync finished", None)?;
        Ok(())
    }
}

/// Exit status of a closed channel.
///
/// libssh2 reports 0 when the server sent `exit-signal` instead of
/// `exit-status`, so a signalled command is mapped to `128 + signo` like a
/// shell would.
fn channel_status(exit_status: i32, signal: Option<&str>) -> i32 {
    match signal {
        Some(name) => 128 + signal_number(name),
        None => exit_status,
    }
}

fn signal_number(name: &str) -> i32 {
    match name.trim_start_matches("SIG") {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "ABRT" => 6,
        "FPE" => 8,
        "KILL" => 9,
        "SEGV" => 11,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        "USR1" => 10,
        "USR2" => 12,
        _ => 0,
    }
}

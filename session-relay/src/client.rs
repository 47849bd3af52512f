use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    directory::UNKNOWN_IDENTITY,
    frame::{DEFAULT_MAX_FRAME_LEN, FrameReader, write_frame},
    message::{Envelope, MessageType, PrivatePayload, SERVER_SOURCE, read_envelope},
};

/// A line typed at the client prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Register { username: String, password: String },
    Login { username: String, password: String },
    Logout,
    CreateSession { name: String },
    JoinSession { name: String },
    LeaveSession,
    List,
    Private { target: String, text: String },
    Quit,
    Say { text: String },
}

impl ConsoleCommand {
    /// Parses one line of input. Blank lines yield `None`.
    ///
    /// Anything not starting with `/` is chat text for the current session.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if !trimmed.starts_with('/') {
            return Ok(Some(ConsoleCommand::Say {
                text: trimmed.to_string(),
            }));
        }

        let (command, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        let rest = rest.trim();
        let command = command.to_ascii_lowercase();
        let args: Vec<&str> = rest.split_whitespace().collect();

        let parsed = match (command.as_str(), args.as_slice()) {
            ("/register", [username, password]) => ConsoleCommand::Register {
                username: username.to_string(),
                password: password.to_string(),
            },
            ("/login", [username, password]) => ConsoleCommand::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            ("/logout", []) => ConsoleCommand::Logout,
            ("/createsession", [name]) => ConsoleCommand::CreateSession {
                name: name.to_string(),
            },
            ("/joinsession", [name]) => ConsoleCommand::JoinSession {
                name: name.to_string(),
            },
            ("/leavesession", []) => ConsoleCommand::LeaveSession,
            ("/list", []) => ConsoleCommand::List,
            ("/quit", []) => ConsoleCommand::Quit,
            ("/pm", [target, _, ..]) => ConsoleCommand::Private {
                target: target.to_string(),
                text: rest[target.len()..].trim().to_string(),
            },
            ("/register" | "/login", _) => bail!("usage: {command} <username> <password>"),
            ("/createsession" | "/joinsession", _) => bail!("usage: {command} <session>"),
            ("/pm", _) => bail!("usage: /pm <user> <message>"),
            ("/logout" | "/leavesession" | "/list" | "/quit", _) => {
                bail!("{command} takes no arguments")
            }
            _ => bail!(
                "unknown command {command}. Try /register, /login, /logout, /createsession, \
                 /joinsession, /leavesession, /list, /pm, /quit"
            ),
        };
        Ok(Some(parsed))
    }

    /// The envelope to send for this command, `None` for purely local ones.
    pub fn to_envelope(&self, identity: &str) -> Result<Option<Envelope>> {
        let envelope = match self {
            ConsoleCommand::Register { username, password } => {
                Envelope::new(MessageType::Register, username.as_str(), password.as_str())
            }
            ConsoleCommand::Login { username, password } => {
                Envelope::new(MessageType::Login, username.as_str(), password.as_str())
            }
            ConsoleCommand::Logout => Envelope::new(MessageType::Exit, identity, ""),
            ConsoleCommand::CreateSession { name } => {
                Envelope::new(MessageType::NewSess, identity, name.as_str())
            }
            ConsoleCommand::JoinSession { name } => {
                Envelope::new(MessageType::Join, identity, name.as_str())
            }
            ConsoleCommand::LeaveSession => Envelope::new(MessageType::LeaveSess, identity, ""),
            ConsoleCommand::List => Envelope::new(MessageType::Query, identity, ""),
            ConsoleCommand::Private { target, text } => {
                let data = PrivatePayload::new(target.as_str(), text.as_str())
                    .to_data()
                    .context("failed to encode private message")?;
                Envelope::new(MessageType::PrivateMessage, identity, data)
            }
            ConsoleCommand::Say { text } => {
                Envelope::new(MessageType::Message, identity, text.as_str())
            }
            ConsoleCommand::Quit => return Ok(None),
        };
        Ok(Some(envelope))
    }
}

/// Who this terminal is logged in as, as far as the relay has confirmed.
#[derive(Debug, Default)]
struct Identity {
    confirmed: Option<String>,
    pending: Option<String>,
}

impl Identity {
    fn name(&self) -> &str {
        self.confirmed.as_deref().unwrap_or(UNKNOWN_IDENTITY)
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    let mut identity = Identity::default();

    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut input, &mut identity).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(FrameReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((FrameReader::new(reader, DEFAULT_MAX_FRAME_LEN), writer))
}

async fn run_client_loop(
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    identity: &mut Identity,
) -> Result<()> {
    loop {
        select! {
            server_message = read_envelope(reader) => {
                if !handle_server_message(server_message, identity).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                let keep_going = handle_stdin_input(bytes_read, input, writer, identity).await?;
                // A cancelled read_line leaves partial input in the buffer.
                input.clear();
                if !keep_going {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(
    message: io::Result<Option<Envelope>>,
    identity: &mut Identity,
) -> Result<bool> {
    match message? {
        Some(envelope) => {
            match envelope.kind {
                MessageType::LoAck => identity.confirmed = identity.pending.take(),
                MessageType::LoNak => identity.pending = None,
                _ => {}
            }
            render_server_message(envelope).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

/// Returns `false` once the client should stop. Input the relay could never
/// accept is reported on stderr and the prompt stays open.
async fn handle_stdin_input<W>(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut W,
    identity: &mut Identity,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let command = match ConsoleCommand::parse(input) {
        Ok(Some(command)) => command,
        Ok(None) => return Ok(true),
        Err(err) => {
            write_stderr(&format!("!!! {err}")).await?;
            return Ok(true);
        }
    };

    if let Some(envelope) = command.to_envelope(identity.name())? {
        let encoded = match envelope.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                write_stderr(&format!("!!! {err}")).await?;
                return Ok(true);
            }
        };
        write_frame(writer, &encoded).await?;
    }

    if let ConsoleCommand::Login { username, .. } = &command {
        identity.pending = Some(username.clone());
    }

    match command {
        ConsoleCommand::Quit | ConsoleCommand::Logout => {
            write_stdout("*** leaving relay").await?;
            Ok(false)
        }
        _ => Ok(true),
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn render_server_message(envelope: Envelope) -> io::Result<()> {
    let Envelope {
        kind, source, data, ..
    } = envelope;
    match kind {
        MessageType::LoAck => write_stdout("*** logged in").await,
        MessageType::RegAck => write_stdout("*** registered").await,
        MessageType::NsAck => write_stdout(&format!("*** created session {data}")).await,
        MessageType::JnAck => write_stdout(&format!("*** joined session {data}")).await,
        MessageType::QuAck => write_stdout(&data).await,
        MessageType::LoNak | MessageType::RegNak | MessageType::JnNak => {
            write_stderr(&format!("!!! {data}")).await
        }
        MessageType::Message if source == SERVER_SOURCE => {
            write_stderr(&format!("!!! {data}")).await
        }
        MessageType::Message => write_stdout(&format!("<{source}> {data}")).await,
        MessageType::PrivateMessage => write_stdout(&format!("[pm from {source}] {data}")).await,
        other => write_stdout(&format!("*** {other} from {source}: {data}")).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

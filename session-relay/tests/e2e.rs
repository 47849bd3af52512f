//! Drives the `session_relay` binary the way a person would: one server
//! process and two interactive clients talking through their stdin/stdout.

use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, bail, ensure};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const LINE_TIMEOUT: Duration = Duration::from_secs(3);

type StdoutLines = Lines<BufReader<ChildStdout>>;

#[tokio::test]
async fn two_terminals_share_a_session() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("session_relay");
    let accounts = tempfile::tempdir()?;

    let mut server = start_server(&binary, &accounts.path().join("accounts.txt"))?;
    let addr = listening_addr(&mut server.output).await?;
    let server_output = tokio::spawn(discard_lines(server.output));

    let mut alice = Terminal::open(&binary, &addr).await?;
    let mut bob = Terminal::open(&binary, &addr).await?;

    alice.type_line("/login client1 password1").await?;
    alice.expect("*** logged in").await?;
    alice.type_line("/createsession room1").await?;
    alice.expect("*** created session room1").await?;

    bob.type_line("/login client2 password2").await?;
    bob.expect("*** logged in").await?;
    bob.type_line("/joinsession room1").await?;
    bob.expect("*** joined session room1").await?;

    alice.type_line("hello bob").await?;
    bob.expect("<client1> hello bob").await?;

    bob.type_line("/pm client1 psst: over here").await?;
    alice.expect("[pm from client2] psst: over here").await?;

    alice.type_line("/list").await?;
    alice.expect("Users: client1, client2").await?;
    alice.expect("Sessions: room1").await?;

    alice.type_line("/logout").await?;
    alice.expect("*** leaving relay").await?;
    bob.type_line("/quit").await?;
    bob.expect("*** leaving relay").await?;

    alice.exits_cleanly("alice").await?;
    bob.exits_cleanly("bob").await?;

    // Nothing stops the relay but a signal.
    let _ = server.child.kill().await;
    let _ = server_output.await;
    Ok(())
}

#[tokio::test]
async fn server_without_port_is_a_usage_error() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("session_relay");
    let status = Command::new(binary)
        .arg("server")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    ensure!(!status.success(), "server started without a port");
    Ok(())
}

struct Server {
    child: Child,
    output: StdoutLines,
}

fn start_server(binary: &Path, accounts: &Path) -> Result<Server> {
    let mut child = Command::new(binary)
        .args(["server", "0", "--host", "127.0.0.1", "--accounts"])
        .arg(accounts)
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("spawning relay server")?;
    let stdout = child.stdout.take().context("server has no stdout")?;

    Ok(Server {
        child,
        output: BufReader::new(stdout).lines(),
    })
}

/// Skips log lines until the `relay listening on <addr>` banner.
async fn listening_addr(output: &mut StdoutLines) -> Result<String> {
    loop {
        let line = next_line(output).await?.context("server exited before listening")?;
        let Some((_, addr)) = line.rsplit_once("listening on ") else {
            continue;
        };
        let addr = addr.trim();
        ensure!(addr.contains(':'), "banner without a socket address: {line}");
        return Ok(addr.to_string());
    }
}

async fn discard_lines(mut output: StdoutLines) {
    while let Ok(Some(_)) = output.next_line().await {}
}

/// One interactive client process.
struct Terminal {
    child: Child,
    keyboard: ChildStdin,
    screen: StdoutLines,
}

impl Terminal {
    async fn open(binary: &Path, addr: &str) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(["client", "--server", addr])
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawning client")?;
        let keyboard = child.stdin.take().context("client has no stdin")?;
        let stdout = child.stdout.take().context("client has no stdout")?;

        let mut terminal = Self {
            child,
            keyboard,
            screen: BufReader::new(stdout).lines(),
        };
        terminal.expect(&format!("*** connected to {addr}")).await?;
        Ok(terminal)
    }

    async fn type_line(&mut self, line: &str) -> Result<()> {
        self.keyboard
            .write_all(format!("{line}\n").as_bytes())
            .await
            .with_context(|| format!("typing '{line}'"))?;
        self.keyboard.flush().await?;
        Ok(())
    }

    async fn expect(&mut self, wanted: &str) -> Result<()> {
        match next_line(&mut self.screen).await {
            Ok(Some(line)) if line == wanted => Ok(()),
            Ok(Some(line)) => bail!("expected '{wanted}', saw '{line}'"),
            Ok(None) => bail!("client exited while waiting for '{wanted}'"),
            Err(err) => Err(err.context(format!("waiting for '{wanted}'"))),
        }
    }

    async fn exits_cleanly(mut self, name: &str) -> Result<()> {
        let status = timeout(LINE_TIMEOUT, self.child.wait())
            .await
            .with_context(|| format!("{name} did not exit"))??;
        ensure!(status.success(), "{name} exited with {status}");
        Ok(())
    }
}

async fn next_line(lines: &mut StdoutLines) -> Result<Option<String>> {
    let line = timeout(LINE_TIMEOUT, lines.next_line())
        .await
        .context("timed out waiting for output")??;
    Ok(line.map(|line| line.trim_end_matches('\r').to_string()))
}

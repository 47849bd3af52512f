use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{DuplicateSessions, RelayConfig},
    frame::DEFAULT_MAX_FRAME_LEN,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server on the given TCP port.
    Server(ServerArgs),
    /// Connect to a relay and chat interactively.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Address to bind the listening socket to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Account file, created with the default accounts if missing.
    #[arg(long, default_value = "accounts.txt")]
    pub accounts: PathBuf,

    /// Whether NEW_SESS may reuse the name of an existing session.
    #[arg(long, value_enum, default_value_t = DuplicateSessions::Reject)]
    pub duplicate_sessions: DuplicateSessions,

    /// Largest accepted frame payload in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,
}

impl From<ServerArgs> for RelayConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            listen: SocketAddr::new(args.host, args.port),
            accounts_path: args.accounts,
            duplicate_sessions: args.duplicate_sessions,
            max_frame_len: args.max_frame_len,
            ..RelayConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_required() {
        assert!(Cli::try_parse_from(["session_relay", "server"]).is_err());
        assert!(Cli::try_parse_from(["session_relay", "server", "5000", "6000"]).is_err());
    }

    #[test]
    fn server_args_become_config() {
        let cli = Cli::try_parse_from([
            "session_relay",
            "server",
            "5050",
            "--host",
            "127.0.0.1",
            "--duplicate-sessions",
            "allow",
        ])
        .expect("valid arguments");

        let Command::Server(args) = cli.command else {
            panic!("expected server subcommand");
        };
        let config = RelayConfig::from(args);
        assert_eq!(config.listen, "127.0.0.1:5050".parse().unwrap());
        assert_eq!(config.duplicate_sessions, DuplicateSessions::Allow);
        assert_eq!(config.accounts_path, PathBuf::from("accounts.txt"));
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }
}

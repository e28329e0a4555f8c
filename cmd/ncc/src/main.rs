//! ncc
//!
//! Exchanges length-prefixed frames over TCP. Every frame that is not an
//! Ack gets an Ack back; lines typed on stdin are sent as VariableLength
//! frames.
//!
//! Usage:
//!     ncc <listening_port>              # server: broadcast stdin to all peers
//!     ncc <remote_host> <remote_port>   # client: send stdin to the server
//!
//! Test with:
//!     ncc 9999 &
//!     NCC_LOG_LEVEL=debug ncc localhost 9999

use std::io::{self, BufReader};
use std::process::ExitCode;
use std::thread;

use nix::sys::signal::{signal, SigHandler, Signal};

use ncc_core::log;
use ncc_core::{log_error, log_info};
use ncc_runtime::{
    run_input_loop, ClientConfig, Mode, NetError, NetResult, Server, ServerConfig, TcpClient,
};

const USAGE: &str = "Usage: ncc <listening_port|remote_host remote_port>";

fn main() -> ExitCode {
    log::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = match Mode::from_args(&args) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    // Writes to a vanished peer must surface as EPIPE, not kill the process
    // SAFETY: installs SIG_IGN, no handler code runs
    if let Err(errno) = unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) } {
        log_error!("Failed to ignore SIGPIPE: {}", errno.desc());
    }

    let result = match mode {
        Mode::Server(config) => serve(config),
        Mode::Client(config) => connect(config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn serve(config: ServerConfig) -> NetResult<()> {
    let server = Server::bind(config)?;
    log_info!("Listening on port {}", server.local_port()?);

    let handle = server.handle();
    thread::Builder::new()
        .name("ncc-console".into())
        .spawn(move || {
            let stdin = io::stdin();
            if let Err(e) = run_input_loop(stdin.lock(), |line| {
                handle.broadcast(line);
                true
            }) {
                log_error!("Console failed: {}", e);
            }
        })
        .map_err(NetError::Thread)?;

    server.run()
}

fn connect(config: ClientConfig) -> NetResult<()> {
    let client = TcpClient::connect(config)?;
    client.run(BufReader::new(io::stdin()))
}

//! Operator console on stdin.
//!
//! The reader turns lines into `CommandLine` records and queues them; the
//! executor runs them one at a time and prints each reply.

pub mod output;

use crate::dispatch::{CommandLine, Dispatcher};
use output::OutputSink;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const MAX_ARGS: usize = 8;
pub const MAX_TOKEN_LEN: usize = 31;

fn truncate(token: &str) -> String {
    let mut end = token.len().min(MAX_TOKEN_LEN);
    while !token.is_char_boundary(end) {
        end -= 1;
    }
    token[..end].to_string()
}

/// Split a line on whitespace. Extra arguments beyond `MAX_ARGS` are dropped
/// and long tokens are cut to `MAX_TOKEN_LEN` bytes.
pub fn tokenize(line: &str) -> Option<CommandLine> {
    let mut tokens = line.split_whitespace().map(truncate);
    let cmd = tokens.next()?;
    Some(CommandLine {
        cmd,
        args: tokens.take(MAX_ARGS).collect(),
    })
}

/// Read lines from `input` until cancelled. End of input parks the reader.
pub async fn run_reader<R>(input: R, queue: mpsc::Sender<CommandLine>, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let Some(command) = tokenize(&line) else {
                    continue;
                };
                if queue.send(command).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                info!("console input closed");
                cancel.cancelled().await;
                return;
            }
            Err(e) => warn!("console read failed: {e}"),
        }
    }
}

pub async fn run_executor(
    dispatcher: Dispatcher,
    mut queue: mpsc::Receiver<CommandLine>,
    output: OutputSink,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            () = cancel.cancelled() => return,
            command = queue.recv() => match command {
                Some(command) => command,
                None => return,
            },
        };
        output.print(&dispatcher.dispatch(&command));
    }
}

#[cfg(test)]
mod tests {
    use super::output::tests::Captured;
    use super::*;
    use crate::bus;
    use crate::config::schema::{BusConfig, NetworkConfig};
    use crate::detector::ProximityStatus;
    use crate::event::{LightCmd, LightMsg};
    use crate::faults::FaultRegister;
    use crate::net::NetStatus;
    use crate::settings::SettingsStore;
    use std::sync::Arc;

    #[test]
    fn tokenizer_limits() {
        assert_eq!(tokenize("   \t "), None);
        let cmd = tokenize("  light   play 3 ").unwrap();
        assert_eq!(cmd.cmd, "light");
        assert_eq!(cmd.args, vec!["play", "3"]);

        let many = tokenize("x 1 2 3 4 5 6 7 8 9 10").unwrap();
        assert_eq!(many.args.len(), MAX_ARGS);
        assert_eq!(many.args.last().map(String::as_str), Some("8"));

        let long = tokenize(&format!("cfg set ssid {}", "a".repeat(40))).unwrap();
        assert_eq!(long.args[2].len(), MAX_TOKEN_LEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let token = format!("{}é", "a".repeat(30));
        assert_eq!(truncate(&token), "a".repeat(30));
    }

    #[tokio::test]
    async fn lines_flow_to_replies() {
        let (bus, mut ends) = bus::create(&BusConfig::default()).unwrap();
        let dispatcher = Dispatcher {
            bus,
            settings: Arc::new(SettingsStore::new(
                std::env::temp_dir().join("propd-console-unused.json"),
            )),
            faults: Arc::new(FaultRegister::new()),
            net: Arc::new(NetStatus::new(&NetworkConfig::default())),
            prox: Arc::new(ProximityStatus::default()),
        };
        let captured = Captured::default();
        let output = OutputSink::new(captured.clone());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(8);

        let input: &[u8] = b"light play 2\n\nbogus\n";
        let reader = tokio::spawn(run_reader(input, tx, cancel.clone()));
        let executor = tokio::spawn(run_executor(dispatcher, rx, output, cancel.clone()));

        let msg = ends.light.recv().await.unwrap();
        assert_eq!(msg, LightMsg::new(LightCmd::Play, 2));

        cancel.cancel();
        reader.await.unwrap();
        executor.await.unwrap();
        assert!(captured.text().starts_with("Queued light Play 2\n"));
    }
}

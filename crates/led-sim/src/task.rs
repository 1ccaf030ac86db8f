//! Virtual controller actor task
//!
//! Owns a [`VirtualController`] and talks line-JSON over an async stream,
//! the same way a real board talks over its serial port. Test code steers
//! the board through a command channel and watches decoded commands on a
//! broadcast channel.

use std::io;

use led_protocol::Command;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::VirtualController;

/// Commands that can be sent to a running virtual controller
#[derive(Debug, Clone)]
pub enum VirtualControllerCommand {
    /// Raise or clear a channel fault
    Fault { driver: i64, channel: i64, fault: bool },
    /// Report a switch panel mask
    Buttons { switch: i64, mask: i64 },
    /// Send a raw line as-is
    Raw(String),
    /// Advance the simulated uptime
    Advance(i64),
    /// Stop the task, dropping the stream
    Shutdown,
}

/// Run a virtual controller over `stream`
///
/// Returns the controller when the stream closes or a shutdown is
/// requested, so a test can reconnect it to a fresh stream.
pub async fn run_virtual_controller<S>(
    mut stream: S,
    mut controller: VirtualController,
    mut cmd_rx: mpsc::Receiver<VirtualControllerCommand>,
    received_tx: broadcast::Sender<Command>,
) -> io::Result<VirtualController>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    let mut pending: Vec<u8> = Vec::new();
    info!("Starting virtual controller {}", controller.id());

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                let n = match result {
                    Ok(0) => {
                        debug!("Virtual controller {} stream closed", controller.id());
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Virtual controller {} stream error: {}", controller.id(), e);
                        return Err(e);
                    }
                };
                pending.extend_from_slice(&buf[..n]);
                while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&raw);
                    if let Some(command) = controller.process_line(&line) {
                        let _ = received_tx.send(command);
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(VirtualControllerCommand::Fault { driver, channel, fault }) => {
                        controller.set_fault(driver, channel, fault);
                    }
                    Some(VirtualControllerCommand::Buttons { switch, mask }) => {
                        controller.report_buttons(switch, mask);
                    }
                    Some(VirtualControllerCommand::Raw(line)) => controller.emit_raw(line),
                    Some(VirtualControllerCommand::Advance(ms)) => controller.advance(ms),
                    Some(VirtualControllerCommand::Shutdown) | None => {
                        info!("Virtual controller {} shutting down", controller.id());
                        break;
                    }
                }
            }
        }

        while let Some(line) = controller.take_output() {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\n").await?;
        }
        stream.flush().await?;
    }

    Ok(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_answers_status_and_reports_commands() {
        let (ours, theirs) = duplex(4096);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (received_tx, mut received_rx) = broadcast::channel(8);
        let task = tokio::spawn(run_virtual_controller(
            theirs,
            VirtualController::new("sim", 1),
            cmd_rx,
            received_tx,
        ));

        let (read_half, mut write_half) = tokio::io::split(ours);
        write_half.write_all(b"{\"cm\":\"status\"}\r\n").await.unwrap();
        assert_eq!(received_rx.recv().await.unwrap(), Command::Status);

        let mut lines = BufReader::new(read_half).lines();
        let status = lines.next_line().await.unwrap().unwrap();
        assert!(status.contains("\"t\":\"status\""));

        cmd_tx
            .send(VirtualControllerCommand::Buttons { switch: 4, mask: 2 })
            .await
            .unwrap();
        let event = lines.next_line().await.unwrap().unwrap();
        assert!(event.contains("can.message"));

        cmd_tx.send(VirtualControllerCommand::Shutdown).await.unwrap();
        let board = task.await.unwrap().unwrap();
        assert_eq!(board.received(), &[Command::Status]);
    }
}

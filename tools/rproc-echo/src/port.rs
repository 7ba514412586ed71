//! The firmware's vdev, as the virtio console port the host exposes it as.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
    sync::mpsc,
    thread,
    time::Duration,
};

use miette::{Context, IntoDiagnostic};

use crate::{Echo, MAX_MSG};

/// How long to wait for each part of a reply.
const TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Port {
    port: File,
    rx: mpsc::Receiver<std::io::Result<Vec<u8>>>,
}

impl Port {
    pub fn open(path: &Path) -> miette::Result<Self> {
        let port = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .into_diagnostic()?;
        let reader = port.try_clone().into_diagnostic()?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("port-reader".into())
            .spawn(move || read_loop(reader, tx))
            .into_diagnostic()?;
        tracing::debug!(path = %path.display(), "opened port");
        Ok(Self { port, rx })
    }
}

impl Echo for Port {
    fn request(&mut self, msg: &[u8]) -> miette::Result<Vec<u8>> {
        self.port
            .write_all(msg)
            .into_diagnostic()
            .context("Error writing to port")?;

        // The reply may come back in pieces.
        let mut reply = Vec::with_capacity(msg.len());
        while reply.len() < msg.len() {
            let chunk = match self.rx.recv_timeout(TIMEOUT) {
                Ok(chunk) => chunk.into_diagnostic().context("Error reading from port")?,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(miette::miette!("Timeout waiting for response"))
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(miette::miette!("port closed"))
                }
            };
            tracing::trace!(len = chunk.len(), "read from port");
            reply.extend_from_slice(&chunk);
        }
        Ok(reply)
    }
}

fn read_loop(mut port: File, tx: mpsc::Sender<std::io::Result<Vec<u8>>>) {
    let mut buf = [0u8; MAX_MSG];
    loop {
        let res = match port.read(&mut buf) {
            Ok(0) => return,
            Ok(len) => Ok(buf[..len].to_vec()),
            Err(e) => Err(e),
        };
        let failed = res.is_err();
        if tx.send(res).is_err() || failed {
            return;
        }
    }
}

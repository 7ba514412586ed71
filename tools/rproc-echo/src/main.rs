use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use clap::Parser;
use firmware::{echo::CaseSwap, Handler};
use miette::{Context, IntoDiagnostic};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Targets, prelude::*};

mod port;
mod sim;

/// The longest message the firmware's buffers take.
const MAX_MSG: usize = 256;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    target: Target,

    /// send `Test 0` up to `Test <N-1>` and check every reply, instead of
    /// echoing lines read from stdin.
    #[arg(short = 'l', long = "loop", global = true, value_name = "N")]
    iterations: Option<u32>,

    /// a comma-separated list of `tracing` targets and levels to enable.
    ///
    /// for example, `info,vring=trace` enables the `INFO` level globally, and
    /// every level for the ring code.
    ///
    /// see <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/targets/struct.Targets.html#filtering-with-targets>
    /// for more details on this syntax.
    #[arg(
        short,
        long = "trace",
        global = true,
        env = "RPROC_TRACE",
        default_value_t = Targets::new().with_default(LevelFilter::INFO),
    )]
    trace_filter: Targets,
}

#[derive(Debug, clap::Subcommand)]
enum Target {
    /// talk to the firmware through its virtio port device
    Port {
        /// path to the port device (usually /dev/vport0p0)
        path: PathBuf,
    },
    /// serve the firmware's channel from a thread in this process
    Sim {
        /// firmware config to take the ring layout from. defaults to the
        /// config this tool was built with.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Something a message can be sent to and answered by.
trait Echo {
    fn request(&mut self, msg: &[u8]) -> miette::Result<Vec<u8>>;
}

fn main() -> miette::Result<()> {
    let Args {
        target,
        iterations,
        trace_filter,
    } = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(trace_filter))
        .init();

    match target {
        Target::Port { path } => {
            let mut port = port::Port::open(&path)
                .with_context(|| format!("failed to open port {}", path.display()))?;
            serve(&mut port, iterations)
        }
        Target::Sim { config } => {
            let config = match config {
                Some(path) => rproc_config::buildtime::load_file(path)?,
                None => rproc_config::include_config!()
                    .map_err(|e| miette::miette!("{e}"))
                    .context("built-in config is invalid")?,
            };
            tracing::debug!(settings = ?config.firmware, "loaded settings");
            let mut sim = sim::Sim::start(&config.firmware)?;
            serve(&mut sim, iterations)
        }
    }
}

fn serve(target: &mut impl Echo, iterations: Option<u32>) -> miette::Result<()> {
    match iterations {
        Some(n) => test_loop(target, n),
        None => interactive(target),
    }
}

fn test_loop(target: &mut impl Echo, iterations: u32) -> miette::Result<()> {
    println!("Looping {iterations} times");
    for i in 0..iterations {
        let msg = format!("Test {i}");
        let reply = echo(target, msg.as_bytes())?;
        let expected = swapped(msg.as_bytes());
        if reply != expected {
            return Err(miette::miette!(
                "expected '{}', received '{}'",
                String::from_utf8_lossy(&expected),
                String::from_utf8_lossy(&reply),
            ));
        }
    }
    println!("All {iterations} replies matched");
    Ok(())
}

fn interactive(target: &mut impl Echo) -> miette::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush().into_diagnostic()?;

        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = line.into_diagnostic().context("reading stdin")?;
        if line.is_empty() {
            continue;
        }
        echo(target, line.as_bytes())?;
    }
}

fn echo(target: &mut impl Echo, msg: &[u8]) -> miette::Result<Vec<u8>> {
    if msg.len() > MAX_MSG {
        return Err(miette::miette!(
            "message is {} bytes, but the firmware only takes {MAX_MSG}",
            msg.len()
        ));
    }
    println!("Sending '{}'", String::from_utf8_lossy(msg));
    let reply = target.request(msg)?;
    println!("Received '{}'", String::from_utf8_lossy(&reply));
    Ok(reply)
}

/// The reply the echo firmware gives to `msg`.
fn swapped(msg: &[u8]) -> Vec<u8> {
    let mut out = vec![0; msg.len()];
    let len = CaseSwap.handle(msg, &mut out);
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loopback(Vec<Vec<u8>>);

    impl Echo for Loopback {
        fn request(&mut self, msg: &[u8]) -> miette::Result<Vec<u8>> {
            self.0.push(msg.to_vec());
            Ok(swapped(msg))
        }
    }

    #[test]
    fn loop_sends_numbered_messages() {
        let mut target = Loopback(Vec::new());
        test_loop(&mut target, 3).unwrap();
        assert_eq!(target.0, [&b"Test 0"[..], b"Test 1", b"Test 2"]);
    }

    #[test]
    fn loop_rejects_wrong_reply() {
        struct Parrot;
        impl Echo for Parrot {
            fn request(&mut self, msg: &[u8]) -> miette::Result<Vec<u8>> {
                Ok(msg.to_vec())
            }
        }
        assert!(test_loop(&mut Parrot, 1).is_err());
    }

    #[test]
    fn oversized_messages_not_sent() {
        let mut target = Loopback(Vec::new());
        assert!(echo(&mut target, &[b'a'; MAX_MSG + 1]).is_err());
        assert!(target.0.is_empty());
    }

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from(["rproc-echo", "port", "/dev/vport0p0", "-l", "5"]).unwrap();
        assert_eq!(args.iterations, Some(5));
        assert!(matches!(args.target, Target::Port { .. }));

        let args = Args::try_parse_from(["rproc-echo", "sim", "--loop", "2"]).unwrap();
        assert!(matches!(args.target, Target::Sim { config: None }));
    }
}

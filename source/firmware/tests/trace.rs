//! The trace buffer as the global default subscriber.
//!
//! This is its own test binary, so nothing else installs a global default.

use firmware::{settings::TraceSettings, trace::TraceSubscriber};

static TRACE: TraceSubscriber = TraceSubscriber::from_settings(&TraceSettings::new());

#[test]
fn installed_globally() {
    TRACE.attach(Box::leak(Box::new([0u8; 256])));
    TRACE.install().unwrap();
    assert!(TRACE.install().is_err());

    tracing::info!(ring = "incoming", "drained");
    tracing::debug!("below the default level");

    let lines = TRACE
        .with_buffer(|buf| String::from_utf8(buf.as_bytes().to_vec()).unwrap())
        .unwrap();
    assert_eq!(lines, "INFO trace: drained ring=\"incoming\"\n");
}

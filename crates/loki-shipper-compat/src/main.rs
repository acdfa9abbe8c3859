// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process::Stdio};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::Command,
    time::Duration,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use loki_shipper::{LokiTransport, StreamType, TransportConfig};

// One read is one chunk; chunks larger than this arrive split.
const BUFFER_SIZE: usize = 8192;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const EXIT_USAGE: i32 = 2;
const EXIT_SPAWN_FAILED: i32 = 127;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOKI_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let mut args = env::args().skip(1);
    let Some(program) = args.next() else {
        error!("usage: loki-shipper-compat <command> [args...]");
        std::process::exit(EXIT_USAGE);
    };

    let transport = LokiTransport::new(TransportConfig::from_env());
    let code = run(&program, args.collect(), transport.clone()).await;

    if !transport.shutdown(SHUTDOWN_GRACE).await {
        error!("LOKI | Exiting with undelivered log pushes");
    }
    std::process::exit(code);
}

async fn run(program: &str, args: Vec<String>, transport: LokiTransport) -> i32 {
    let mut child = match Command::new(program)
        .args(&args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to start {program}: {e}");
            return EXIT_SPAWN_FAILED;
        }
    };
    info!("Started {program} (pid {:?})", child.id());

    let stdout_pump = child.stdout.take().map(|stdout| {
        let transport = transport.clone();
        tokio::spawn(async move {
            pump(stdout, tokio::io::stdout(), |chunk| {
                transport.send(chunk, StreamType::Log)
            })
            .await
        })
    });
    let stderr_pump = child.stderr.take().map(|stderr| {
        let transport = transport.clone();
        tokio::spawn(async move {
            pump(stderr, tokio::io::stderr(), |chunk| {
                transport.send(chunk, StreamType::Error)
            })
            .await
        })
    });

    let status = tokio::select! {
        status = child.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping {program}");
            if let Err(e) = child.start_kill() {
                error!("Failed to stop {program}: {e}");
            }
            child.wait().await
        }
    };

    for handle in [stdout_pump, stderr_pump].into_iter().flatten() {
        if let Err(e) = handle.await {
            error!("Output pump failed: {e}");
        }
    }

    match status {
        Ok(status) => {
            info!("{program} exited with {status}");
            status.code().unwrap_or(1)
        }
        Err(e) => {
            error!("Failed to wait for {program}: {e}");
            1
        }
    }
}

/// Copies `reader` to `mirror` and hands every chunk read to `ship`.
///
/// A UTF-8 sequence cut by a read boundary is held back and shipped with the
/// next chunk; only bytes that can never decode are replaced.
async fn pump<R, W, F>(mut reader: R, mut mirror: W, ship: F) -> usize
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(&str),
{
    let mut buf = vec![0; BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::with_capacity(BUFFER_SIZE);
    let mut chunks = 0;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                error!("Failed to read process output: {e}");
                break;
            }
        };
        if let Err(e) = mirror.write_all(&buf[..n]).await {
            debug!("Failed to mirror process output: {e}");
        }
        if let Err(e) = mirror.flush().await {
            debug!("Failed to flush mirrored process output: {e}");
        }

        pending.extend_from_slice(&buf[..n]);
        let complete = complete_utf8_len(&pending);
        if complete == 0 {
            continue;
        }
        ship(&String::from_utf8_lossy(&pending[..complete]));
        pending.drain(..complete);
        chunks += 1;
    }
    if !pending.is_empty() {
        ship(&String::from_utf8_lossy(&pending));
        chunks += 1;
    }
    chunks
}

// Length of the prefix that does not end in a truncated UTF-8 sequence.
// Invalid bytes inside the prefix are left for lossy decoding.
fn complete_utf8_len(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                Some(len) => start += e.valid_up_to() + len,
                None => return start + e.valid_up_to(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tracing_test::traced_test;

    // Accepts writes, fails every flush.
    struct UnflushableWriter;

    impl AsyncWrite for UnflushableWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_pump_mirrors_and_ships_each_read() {
        let input: &[u8] = b"[script:mybag] Player connected\nsecond line";
        let mut mirror = Vec::new();
        let shipped = Mutex::new(Vec::new());

        let chunks = pump(input, &mut mirror, |chunk| {
            shipped.lock().unwrap().push(chunk.to_string())
        })
        .await;

        assert_eq!(chunks, 1);
        assert_eq!(mirror, input);
        assert_eq!(
            shipped.into_inner().unwrap(),
            vec!["[script:mybag] Player connected\nsecond line".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pump_splits_large_output() {
        let input = vec![b'a'; BUFFER_SIZE + 10];
        let mut mirror = Vec::new();
        let shipped = Mutex::new(0usize);

        let chunks = pump(input.as_slice(), &mut mirror, |chunk| {
            *shipped.lock().unwrap() += chunk.len()
        })
        .await;

        assert_eq!(chunks, 2);
        assert_eq!(mirror.len(), BUFFER_SIZE + 10);
        assert_eq!(*shipped.lock().unwrap(), BUFFER_SIZE + 10);
    }

    #[tokio::test]
    async fn test_pump_empty_output() {
        let mut mirror = Vec::new();
        let chunks = pump(&b""[..], &mut mirror, |_| panic!("nothing to ship")).await;
        assert_eq!(chunks, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_pump_logs_flush_failure_and_keeps_shipping() {
        let shipped = Mutex::new(Vec::new());

        let chunks = pump(&b"still shipped"[..], UnflushableWriter, |chunk| {
            shipped.lock().unwrap().push(chunk.to_string())
        })
        .await;

        assert_eq!(chunks, 1);
        assert_eq!(shipped.into_inner().unwrap(), vec!["still shipped".to_string()]);
        assert!(logs_contain("Failed to flush mirrored process output"));
    }

    #[tokio::test]
    async fn test_pump_keeps_utf8_split_across_reads() {
        let mut input = vec![b'a'; BUFFER_SIZE - 1];
        input.extend_from_slice("é tail".as_bytes());
        let mut mirror = Vec::new();
        let shipped = Mutex::new(String::new());

        let chunks = pump(input.as_slice(), &mut mirror, |chunk| {
            shipped.lock().unwrap().push_str(chunk)
        })
        .await;

        let shipped = shipped.into_inner().unwrap();
        assert_eq!(chunks, 2);
        assert_eq!(mirror, input);
        assert!(!shipped.contains('\u{fffd}'));
        assert_eq!(shipped.as_bytes(), input.as_slice());
    }

    #[tokio::test]
    async fn test_pump_replaces_invalid_bytes() {
        let input: &[u8] = b"ok\xffok";
        let mut mirror = Vec::new();
        let shipped = Mutex::new(Vec::new());

        pump(input, &mut mirror, |chunk| {
            shipped.lock().unwrap().push(chunk.to_string())
        })
        .await;

        assert_eq!(mirror, input);
        assert_eq!(shipped.into_inner().unwrap(), vec!["ok\u{fffd}ok".to_string()]);
    }

    #[tokio::test]
    async fn test_pump_ships_truncated_tail_at_eof() {
        let input: &[u8] = b"done \xc3";
        let shipped = Mutex::new(Vec::new());

        let chunks = pump(input, tokio::io::sink(), |chunk| {
            shipped.lock().unwrap().push(chunk.to_string())
        })
        .await;

        assert_eq!(chunks, 1);
        assert_eq!(shipped.into_inner().unwrap(), vec!["done \u{fffd}".to_string()]);
    }

    #[test]
    fn test_complete_utf8_len() {
        assert_eq!(complete_utf8_len(b"abc"), 3);
        assert_eq!(complete_utf8_len(b"ab\xc3"), 2);
        assert_eq!(complete_utf8_len(b"\xe2\x9c"), 0);
        assert_eq!(complete_utf8_len(b"a\xffb"), 3);
        assert_eq!(complete_utf8_len(b"a\xffb\xf0\x9f"), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let code = run(
            "sh",
            vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
            LokiTransport::disabled(),
        )
        .await;
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let code = run(
            "definitely-not-a-real-program-name",
            vec![],
            LokiTransport::disabled(),
        )
        .await;
        assert_eq!(code, EXIT_SPAWN_FAILED);
    }
}

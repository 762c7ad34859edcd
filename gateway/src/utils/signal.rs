use std::future::Future;

use anyhow::Result;
use tokio::signal::unix;

pub const TERMINATION_SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT];

/// Drives `f` to completion unless one of [`TERMINATION_SIGNALS`] arrives first.
pub async fn run_or_terminate<F>(f: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let run_fut = tokio::spawn(f);
    let stop_fut = any_signal(TERMINATION_SIGNALS)?;
    tokio::select! {
        res = run_fut => res?,
        signal = stop_fut => {
            let signal = signal?;
            tracing::info!(signal = signal.as_raw_value(), "received termination signal");
            Ok(())
        }
    }
}

pub fn any_signal<I>(signals: I) -> Result<tokio::sync::oneshot::Receiver<unix::SignalKind>>
where
    I: IntoIterator<Item = libc::c_int>,
{
    let (tx, rx) = tokio::sync::oneshot::channel();

    // Subscribe eagerly so a registration failure surfaces to the caller.
    let streams = signals
        .into_iter()
        .map(|raw| {
            let kind = unix::SignalKind::from_raw(raw);
            unix::signal(kind).map(|stream| (kind, stream))
        })
        .collect::<std::io::Result<Vec<_>>>()?;

    let any_signal = futures_util::future::select_all(streams.into_iter().map(
        |(kind, mut stream)| {
            Box::pin(async move {
                stream.recv().await;
                kind
            })
        },
    ));

    tokio::spawn(async move {
        let signal = any_signal.await.0;
        tx.send(signal).ok();
    });

    Ok(rx)
}

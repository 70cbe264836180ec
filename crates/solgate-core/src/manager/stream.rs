use futures::Stream;
use serde_json::{json, Value};
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::mpsc;

use crate::{
    manager::{errors::CallError, ConnectionManager},
    responses::{DecodeError, MethodResult, ProgramAccount},
    types::Priority,
};

/// Program accounts pushed by a background producer through a bounded channel.
///
/// The producer blocks once the buffer is full, so a slow consumer throttles discovery.
/// Dropping the stream or calling [`AccountStream::cancel`] stops the producer at its
/// next send or before its next program.
pub struct AccountStream {
    rx: mpsc::Receiver<Result<ProgramAccount, CallError>>,
}

impl AccountStream {
    /// Next account, or `None` once every program was scanned or the stream cancelled.
    pub async fn next(&mut self) -> Option<Result<ProgramAccount, CallError>> {
        self.rx.recv().await
    }

    /// Stops the producer. Items already buffered can still be drained.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

impl Stream for AccountStream {
    type Item = Result<ProgramAccount, CallError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl ConnectionManager {
    /// Scans `programs` one after another with `getProgramAccounts`, streaming each
    /// decoded account. A failing program yields its error and the scan moves on.
    #[must_use]
    pub fn stream_program_accounts(
        self: &Arc<Self>,
        programs: Vec<String>,
        config: Option<Value>,
        priority: Priority,
    ) -> AccountStream {
        let (tx, rx) = mpsc::channel(self.settings().stream_buffer.max(1));
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_signal();

        tokio::spawn(async move {
            for program in programs {
                if tx.is_closed() {
                    break;
                }
                let params = match &config {
                    Some(config) => json!([program, config]),
                    None => json!([program]),
                };

                let scan = async {
                    const METHOD: &str = "getProgramAccounts";
                    let payload = manager.call(METHOD, params, priority).await?;
                    match MethodResult::decode(METHOD, payload)? {
                        MethodResult::ProgramAccounts(accounts) => Ok::<_, CallError>(accounts),
                        _ => Err(CallError::Decode(DecodeError::UnexpectedShape {
                            method: METHOD.to_string(),
                            reason: "result is not a program account list".to_string(),
                        })),
                    }
                };
                let accounts = tokio::select! {
                    result = scan => result,
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("account stream stopped by shutdown");
                        return;
                    }
                };

                let items: Vec<Result<ProgramAccount, CallError>> = match accounts {
                    Ok(accounts) => accounts.into_iter().map(Ok).collect(),
                    Err(e) => {
                        tracing::debug!(program = %program, error = %e, "program scan failed");
                        vec![Err(e)]
                    }
                };
                for item in items {
                    if tx.send(item).await.is_err() {
                        tracing::debug!(program = %program, "account stream consumer gone");
                        return;
                    }
                }
            }
        });

        AccountStream { rx }
    }
}

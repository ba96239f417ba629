//! Token streams produced by `SessionManager::infer`

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// One item of a token stream; `Done`, `Cancelled` and `Error` are terminal
#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    Token(String),
    Done,
    Cancelled,
    Error(String),
}

/// A lazy, finite, non-restartable stream of generated tokens
///
/// The producer runs on a dedicated blocking worker; dropping the stream or
/// calling [`TokenStream::cancel`] stops generation within one iteration of
/// the worker loop.
pub struct TokenStream {
    rx: mpsc::Receiver<TokenEvent>,
    cancel: CancellationToken,
}

impl TokenStream {
    pub(crate) fn new(rx: mpsc::Receiver<TokenEvent>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Receive the next event, `None` once the worker has finished
    pub async fn next_event(&mut self) -> Option<TokenEvent> {
        self.rx.recv().await
    }

    /// Request cooperative cancellation of the generation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream into the full generated text
    ///
    /// Returns `Error::Cancelled` if the stream was cancelled mid-way and
    /// `Error::InternalFailure` if generation failed.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(event) = self.next_event().await {
            match event {
                TokenEvent::Token(token) => text.push_str(&token),
                TokenEvent::Done => return Ok(text),
                TokenEvent::Cancelled => return Err(Error::Cancelled),
                TokenEvent::Error(message) => return Err(Error::InternalFailure(message)),
            }
        }
        Ok(text)
    }
}

impl futures_core::Stream for TokenStream {
    type Item = TokenEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        // An abandoned stream must not leave the worker generating.
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_text_concatenates_until_done() {
        let (tx, rx) = mpsc::channel(8);
        let stream = TokenStream::new(rx, CancellationToken::new());
        for token in ["a ", "b ", "c"] {
            tx.send(TokenEvent::Token(token.to_string())).await.unwrap();
        }
        tx.send(TokenEvent::Done).await.unwrap();

        assert_eq!(stream.collect_text().await.unwrap(), "a b c");
    }

    #[tokio::test]
    async fn test_collect_text_surfaces_cancellation() {
        let (tx, rx) = mpsc::channel(8);
        let stream = TokenStream::new(rx, CancellationToken::new());
        tx.send(TokenEvent::Token("a".to_string())).await.unwrap();
        tx.send(TokenEvent::Cancelled).await.unwrap();

        assert!(matches!(stream.collect_text().await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_stream_adapter_yields_events_in_order() {
        use futures_util::StreamExt;

        let (tx, rx) = mpsc::channel(8);
        let stream = TokenStream::new(rx, CancellationToken::new());
        tx.send(TokenEvent::Token("hi".to_string())).await.unwrap();
        tx.send(TokenEvent::Done).await.unwrap();
        drop(tx);

        let events: Vec<TokenEvent> = stream.collect().await;
        assert!(matches!(events[0], TokenEvent::Token(ref t) if t == "hi"));
        assert!(matches!(events[1], TokenEvent::Done));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_drop_cancels_generation() {
        let (_tx, rx) = mpsc::channel::<TokenEvent>(8);
        let token = CancellationToken::new();
        let stream = TokenStream::new(rx, token.clone());
        drop(stream);
        assert!(token.is_cancelled());
    }
}

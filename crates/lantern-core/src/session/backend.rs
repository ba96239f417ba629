//! Native inference backend contract
//!
//! The host never touches model weights or sampling internals; it drives a
//! backend through this trait family. `open` and `next_token` are blocking
//! and are always called from a worker context, never from the primary one.

use std::path::Path;

use thiserror::Error;

use super::{LoadParams, SamplingParams};

/// Errors a backend can report, kept distinct so the session manager can
/// map them onto the host taxonomy
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend rejected model format: {0}")]
    Format(String),

    #[error("backend out of resources: {0}")]
    Resource(String),

    #[error("backend runtime error: {0}")]
    Runtime(String),
}

/// A loadable inference backend (e.g. a llama.cpp binding)
pub trait InferenceBackend: Send + Sync + 'static {
    /// Open a model file, returning a handle to the loaded weights.
    /// Blocking; run on a worker.
    fn open(
        &self,
        path: &Path,
        params: &LoadParams,
    ) -> std::result::Result<Box<dyn ModelHandle>, BackendError>;
}

/// A loaded model; dropped on unload, which releases backend resources
pub trait ModelHandle: Send + Sync {
    /// Start a generation for one prompt. Blocking; run on a worker.
    fn begin(
        &self,
        prompt: &str,
        sampling: &SamplingParams,
    ) -> std::result::Result<Box<dyn TokenSource>, BackendError>;
}

/// Pull-based token production for one generation
pub trait TokenSource: Send {
    /// Produce the next token, `None` when generation is finished.
    /// Blocking; the session manager drives this from its worker loop and
    /// checks cancellation between calls.
    fn next_token(&mut self) -> std::result::Result<Option<String>, BackendError>;
}

/// Deterministic backend used by tests and the CLI dry-run: generation
/// echoes the prompt back one whitespace-separated token at a time
#[derive(Debug, Default)]
pub struct EchoBackend;

impl InferenceBackend for EchoBackend {
    fn open(
        &self,
        _path: &Path,
        _params: &LoadParams,
    ) -> std::result::Result<Box<dyn ModelHandle>, BackendError> {
        Ok(Box::new(EchoHandle))
    }
}

struct EchoHandle;

impl ModelHandle for EchoHandle {
    fn begin(
        &self,
        prompt: &str,
        sampling: &SamplingParams,
    ) -> std::result::Result<Box<dyn TokenSource>, BackendError> {
        let mut tokens: Vec<String> = prompt
            .split_whitespace()
            .map(|word| format!("{word} "))
            .collect();
        tokens.truncate(sampling.max_tokens);
        tokens.reverse();
        Ok(Box::new(EchoSource { tokens }))
    }
}

struct EchoSource {
    tokens: Vec<String>,
}

impl TokenSource for EchoSource {
    fn next_token(&mut self) -> std::result::Result<Option<String>, BackendError> {
        Ok(self.tokens.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_backend_replays_prompt() {
        let backend = EchoBackend;
        let handle = backend
            .open(Path::new("/tmp/model.gguf"), &LoadParams::default())
            .expect("open");
        let mut source = handle
            .begin("hello local world", &SamplingParams::default())
            .expect("begin");

        let mut output = String::new();
        while let Some(token) = source.next_token().expect("token") {
            output.push_str(&token);
        }
        assert_eq!(output.trim_end(), "hello local world");
    }

    #[test]
    fn test_echo_backend_honors_max_tokens() {
        let backend = EchoBackend;
        let handle = backend
            .open(Path::new("/tmp/model.gguf"), &LoadParams::default())
            .expect("open");
        let sampling = SamplingParams { max_tokens: 2, ..SamplingParams::default() };
        let mut source = handle.begin("a b c d e", &sampling).expect("begin");

        let mut count = 0;
        while source.next_token().expect("token").is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}

//! High-level client mapping named operations onto brew invocations.
//!
//! [`Brew`] ties the process engine to the disk cache:
//!
//! - [`Brew::perform`] / [`Brew::perform_text`] run an operation buffered
//! - [`Brew::stream`] relays an operation's output live
//! - [`Brew::refresh`] / [`Brew::refresh_text`] consult the cache first and
//!   only launch brew when the entry is stale, missing, or a refresh is forced
//!
//! Successful mutations mark the cache keys they affect as stale.
//!
//! Every entry point checks the operation's declared [`Mode`]: a streaming
//! install cannot be run buffered, and a plain-text listing cannot be
//! decoded as JSON. A mismatch is [`ExecutionError::ModeMismatch`] and brew
//! is never launched.
//!
//! # Examples
//!
//! ```no_run
//! use taproom::{Brew, Config, Operation};
//!
//! #[tokio::main]
//! async fn main() -> taproom::Result<()> {
//!     let brew = Brew::new(&Config::from_env());
//!
//!     let installed = brew
//!         .refresh(&Operation::Installed, serde_json::Value::Null, false)
//!         .await?;
//!     println!("{}", installed.value);
//!
//!     Ok(())
//! }
//! ```

use crate::cache::{CacheEntry, DiskCache, IsEmpty};
use crate::config::Config;
use crate::error::{ExecutionError, Result};
use crate::operation::{ExitPolicy, Mode, Operation};
use crate::process::{ProcessResult, Runner};
use crate::stream::{Lines, OutputLine, OutputStream};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

/// Where a refreshed value came from
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// A fresh cache entry; brew was not launched
    Cache,
    /// Fetched from brew just now
    Fetched,
    /// The fetch failed; the value is the last known one
    Fallback(ExecutionError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Refreshed<T> {
    pub value: T,
    pub source: Source,
    /// Capture time of the cache entry holding the value; `None` for
    /// operations without a cache policy
    pub captured_at: Option<DateTime<Utc>>,
}

/// Homebrew client with a result cache
#[derive(Debug, Clone)]
pub struct Brew {
    runner: Runner,
    cache: DiskCache,
    max_age: Option<Duration>,
}

impl Brew {
    pub fn new(config: &Config) -> Self {
        let mut brew = Self::with_parts(
            Runner::new(&config.brew_path),
            DiskCache::new(&config.cache_dir),
        );
        brew.max_age = config.max_age;
        brew
    }

    pub fn with_parts(runner: Runner, cache: DiskCache) -> Self {
        Self {
            runner,
            cache,
            max_age: None,
        }
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Whether `brew --version` runs successfully
    pub async fn is_available(&self) -> bool {
        self.runner.run_buffered(&["--version"], &[]).await.is_ok()
    }

    /// Run buffered and apply the operation's exit policy.
    ///
    /// Accepts [`Mode::Raw`] and [`Mode::Decoded`] operations.
    pub async fn perform_result(&self, op: &Operation) -> Result<ProcessResult> {
        check_mode(op, Mode::Raw, &[Mode::Raw, Mode::Decoded])?;
        tracing::debug!(operation = op.name(), "performing");
        let result = self.runner.output(&op.args(), op.env()).await?;

        let result = match op.exit_policy() {
            ExitPolicy::Strict => result.into_success()?,
            ExitPolicy::AllowNonZero => {
                if !result.success() {
                    tracing::debug!(
                        operation = op.name(),
                        status = result.status,
                        "non-zero exit reported as findings"
                    );
                }
                result
            }
        };

        invalidate(self.cache.clone(), op.invalidates()).await;
        Ok(result)
    }

    /// Run buffered and return stdout
    pub async fn perform_text(&self, op: &Operation) -> Result<String> {
        Ok(self.perform_result(op).await?.stdout)
    }

    /// Run buffered and decode stdout as JSON
    pub async fn perform<T: DeserializeOwned>(&self, op: &Operation) -> Result<T> {
        check_mode(op, Mode::Decoded, &[Mode::Decoded])?;
        let text = self.perform_text(op).await?;
        serde_json::from_str(&text).map_err(|err| {
            ExecutionError::decode(format!("brew {} returned unexpected JSON: {err}", op.name()))
        })
    }

    /// Relay the operation's output live.
    ///
    /// Cache keys the operation affects are marked stale once the stream
    /// ends successfully.
    ///
    /// A non-streaming operation yields [`ExecutionError::ModeMismatch`] as
    /// the stream's only item.
    pub fn stream(&self, op: &Operation) -> OperationStream {
        let inner = match check_mode(op, Mode::Streaming, &[Mode::Streaming]) {
            Ok(()) => {
                tracing::debug!(operation = op.name(), "streaming");
                self.runner.run_streaming(&op.args(), op.env())
            }
            Err(err) => OutputStream::failed(err),
        };

        OperationStream {
            inner,
            cache: self.cache.clone(),
            invalidates: op.invalidates(),
            invalidating: None,
            done: false,
        }
    }

    /// Cache-aware read of a JSON operation.
    ///
    /// `current` is what the caller already shows. See
    /// [`DiskCache::restore_if_needed`] for how the cache entry and `current`
    /// combine. When brew fails but a non-empty value is available, that value
    /// is returned with [`Source::Fallback`] instead of the error.
    pub async fn refresh<T>(&self, op: &Operation, current: T, force_refresh: bool) -> Result<Refreshed<T>>
    where
        T: DeserializeOwned + Serialize + IsEmpty,
    {
        check_mode(op, Mode::Decoded, &[Mode::Decoded])?;
        self.refresh_with(op, current, force_refresh, || self.perform::<T>(op))
            .await
    }

    /// Cache-aware read of a plain-text operation
    pub async fn refresh_text(
        &self,
        op: &Operation,
        current: String,
        force_refresh: bool,
    ) -> Result<Refreshed<String>> {
        // Decoded operations share cache keys with JSON payloads
        check_mode(op, Mode::Raw, &[Mode::Raw])?;
        self.refresh_with(op, current, force_refresh, || self.perform_text(op))
            .await
    }

    async fn refresh_with<T, F, Fut>(
        &self,
        op: &Operation,
        current: T,
        force_refresh: bool,
        fetch: F,
    ) -> Result<Refreshed<T>>
    where
        T: DeserializeOwned + Serialize + IsEmpty,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(policy) = op.cache_policy() else {
            return Ok(Refreshed {
                value: fetch().await?,
                source: Source::Fetched,
                captured_at: None,
            });
        };

        let max_age = self.max_age.unwrap_or(policy.max_age);
        let restored = self
            .cache
            .restore_if_needed(current, policy.key, max_age, force_refresh);

        if !restored.needs_fetch {
            return Ok(Refreshed {
                value: restored.value,
                source: Source::Cache,
                captured_at: restored.captured_at,
            });
        }

        match fetch().await {
            Ok(value) => {
                let entry = CacheEntry::new(value);
                self.cache.save_entry(policy.key, &entry);
                Ok(Refreshed {
                    value: entry.payload,
                    source: Source::Fetched,
                    captured_at: Some(entry.captured_at),
                })
            }
            Err(err) if !restored.value.is_empty() => {
                tracing::warn!(operation = op.name(), %err, "fetch failed, using last known value");
                Ok(Refreshed {
                    value: restored.value,
                    source: Source::Fallback(err),
                    captured_at: restored.captured_at,
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// Reject `op` unless its declared mode is one of `accepted`
fn check_mode(op: &Operation, requested: Mode, accepted: &[Mode]) -> Result<()> {
    let declared = op.mode();
    if accepted.contains(&declared) {
        return Ok(());
    }

    tracing::debug!(operation = op.name(), ?declared, ?requested, "mode mismatch");
    Err(ExecutionError::ModeMismatch {
        operation: op.name(),
        declared,
        requested,
    })
}

/// Mark `keys` stale. The file I/O runs on the blocking pool.
async fn invalidate(cache: DiskCache, keys: &'static [&'static str]) {
    if keys.is_empty() {
        return;
    }

    let task = tokio::task::spawn_blocking(move || {
        for key in keys {
            cache.mark_stale(key);
        }
    });
    if let Err(err) = task.await {
        tracing::warn!(%err, "cache invalidation failed");
    }
}

/// Live output of a named operation
pub struct OperationStream {
    inner: OutputStream,
    cache: DiskCache,
    invalidates: &'static [&'static str],
    /// Set once brew exits successfully; the stream ends when it completes
    invalidating: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    done: bool,
}

impl OperationStream {
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }

    /// Kill brew; the next item is [`ExecutionError::Cancelled`]
    pub fn cancel(&mut self) {
        self.inner.cancel();
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.with_timeout(timeout);
        self
    }

    /// Consume every chunk and return the terminal state
    pub async fn finish(mut self) -> Result<()> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(())
    }

    pub fn lines(self) -> Lines<Self> {
        Lines::new(self)
    }
}

impl fmt::Debug for OperationStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationStream")
            .field("inner", &self.inner)
            .field("invalidates", &self.invalidates)
            .field("done", &self.done)
            .finish()
    }
}

impl Stream for OperationStream {
    type Item = Result<OutputLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            // Callers see the end of the stream only once the cache reflects
            // the mutation
            if let Some(task) = this.invalidating.as_mut() {
                ready!(task.as_mut().poll(cx));
                this.invalidating = None;
                this.done = true;
                return Poll::Ready(None);
            }

            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(None) => {
                    let cache = this.cache.clone();
                    this.invalidating = Some(Box::pin(invalidate(cache, this.invalidates)));
                }
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                other => return other,
            }
        }
    }
}

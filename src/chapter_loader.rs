//! Cancellable per-chapter description loading.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::description::ChapterBundle;
use crate::error::FetchError;
use crate::store::{CacheKey, CacheNamespace, KeyValueStore};

/// Cancellation hook checked between fetch attempts.
pub trait CancelToken {
    fn is_cancelled(&self) -> bool;
}

/// Never-cancel token for default call paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shared abort flag. Clones observe the same state.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl CancelToken for AbortSignal {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Backend that serves descriptions and images for a logical chapter.
pub trait DescriptionSource {
    fn fetch_chapter(
        &mut self,
        chapter: u32,
        cancel: &dyn CancelToken,
    ) -> Result<ChapterBundle, FetchError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Total fetch attempts while extraction reports in-progress.
    pub max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_initial_ms: 2_000,
            retry_max_ms: 30_000,
        }
    }
}

/// Handle for one chapter load, superseded by the next [`ChapterLoader::begin`].
#[derive(Clone, Debug)]
pub struct ChapterRequest {
    pub chapter: u32,
    pub generation: u64,
    signal: AbortSignal,
}

impl ChapterRequest {
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

pub struct ChapterLoader<S> {
    store: S,
    user: String,
    book: String,
    config: LoaderConfig,
    generation: u64,
    in_flight: Option<AbortSignal>,
}

impl<S: KeyValueStore> ChapterLoader<S> {
    pub fn new(
        store: S,
        user: impl Into<String>,
        book: impl Into<String>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            store,
            user: user.into(),
            book: book.into(),
            config,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start loading `chapter`, aborting whatever was in flight.
    pub fn begin(&mut self, chapter: u32) -> ChapterRequest {
        if let Some(previous) = self.in_flight.take() {
            previous.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        let signal = AbortSignal::new();
        self.in_flight = Some(signal.clone());
        ChapterRequest {
            chapter,
            generation: self.generation,
            signal,
        }
    }

    /// Abort the in-flight request, if any.
    pub fn cancel(&mut self) {
        if let Some(signal) = self.in_flight.take() {
            signal.abort();
        }
    }

    /// Whether results for `request` may still be applied.
    pub fn is_current(&self, request: &ChapterRequest) -> bool {
        request.generation == self.generation && !request.is_cancelled()
    }

    pub fn cache_key(&self, chapter: u32) -> CacheKey {
        CacheKey::new(CacheNamespace::ChapterBundle, &self.user, &self.book).with_chapter(chapter)
    }

    /// Cached bundle for `chapter`. Undecodable entries are deleted.
    pub fn cached(&self, chapter: u32) -> Option<ChapterBundle> {
        let key = self.cache_key(chapter);
        let bytes = match self.store.get(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("chapter cache read failed for {}: {}", key.storage_key(), err);
                return None;
            }
        };
        match serde_json::from_slice::<ChapterBundle>(&bytes) {
            Ok(bundle) if bundle.chapter == chapter => Some(bundle),
            Ok(bundle) => {
                log::warn!(
                    "chapter cache {} holds chapter {}, dropping",
                    key.storage_key(),
                    bundle.chapter
                );
                self.delete_quiet(&key);
                None
            }
            Err(err) => {
                log::warn!("corrupt chapter cache {}: {}", key.storage_key(), err);
                self.delete_quiet(&key);
                None
            }
        }
    }

    /// Drop the cached bundle for `chapter`.
    pub fn invalidate(&self, chapter: u32) {
        self.delete_quiet(&self.cache_key(chapter));
    }

    /// Resolve the bundle for `request` from cache or `source`.
    ///
    /// In-progress responses are retried up to `max_attempts` times, waiting
    /// through `sleep` between attempts. Cancellation is checked before every
    /// attempt and after every wait. Bundles with descriptions are cached.
    pub fn load<D, F>(
        &self,
        source: &mut D,
        request: &ChapterRequest,
        mut sleep: F,
    ) -> Result<ChapterBundle, FetchError>
    where
        D: DescriptionSource + ?Sized,
        F: FnMut(u64),
    {
        if request.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if let Some(bundle) = self.cached(request.chapter) {
            return Ok(bundle);
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            if request.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            attempt += 1;
            match source.fetch_chapter(request.chapter, &request.signal) {
                Ok(bundle) => {
                    if bundle.chapter != request.chapter {
                        return Err(FetchError::Malformed(format!(
                            "requested chapter {}, got {}",
                            request.chapter, bundle.chapter
                        )));
                    }
                    if request.is_cancelled() {
                        return Err(FetchError::Cancelled);
                    }
                    self.store_bundle(&bundle);
                    return Ok(bundle);
                }
                Err(FetchError::InProgress { retry_after_ms }) => {
                    if attempt >= max_attempts {
                        log::warn!(
                            "chapter {} extraction still running after {} attempts",
                            request.chapter,
                            attempt
                        );
                        return Err(FetchError::Exhausted { attempts: attempt });
                    }
                    let delay = retry_after_ms
                        .unwrap_or_else(|| {
                            retry_backoff_ms(
                                attempt,
                                self.config.retry_initial_ms,
                                self.config.retry_max_ms,
                            )
                        })
                        .min(self.config.retry_max_ms);
                    log::debug!(
                        "chapter {} extraction in progress, attempt {} of {}, waiting {}ms",
                        request.chapter,
                        attempt,
                        max_attempts,
                        delay
                    );
                    sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn store_bundle(&self, bundle: &ChapterBundle) {
        // Empty bundles would hide descriptions extracted later.
        if bundle.descriptions.is_empty() {
            return;
        }
        let key = self.cache_key(bundle.chapter);
        match serde_json::to_vec(bundle) {
            Ok(bytes) => {
                if let Err(err) = self.store.set(&key, &bytes) {
                    log::warn!("failed to cache chapter {}: {}", bundle.chapter, err);
                }
            }
            Err(err) => log::warn!("failed to encode chapter {}: {}", bundle.chapter, err),
        }
    }

    fn delete_quiet(&self, key: &CacheKey) {
        if let Err(err) = self.store.delete(key) {
            log::warn!("failed to delete {}: {}", key.storage_key(), err);
        }
    }
}

fn retry_backoff_ms(attempt: u32, initial_ms: u64, max_ms: u64) -> u64 {
    let shift = attempt.saturating_sub(1).min(16);
    initial_ms.saturating_mul(1u64 << shift).min(max_ms)
}

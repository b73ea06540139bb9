//! Bounded-retry lookups
//!
//! Reentrant record lookups write into a caller-supplied buffer whose
//! required size isn't known up front. [`BufferedLookup`] drives such a
//! lookup as an explicit state machine:
//!
//! ```text
//! Sizing --(buffer allocated)--> Requesting
//! Requesting --(too small)-----> Sizing      (buffer doubles)
//! Requesting --(record)--------> Success
//! Requesting --(no match)------> NotFound
//! Requesting --(other error)---> Failed
//! ```
//!
//! Only the "buffer too small" signal causes a retry. There is no ceiling
//! besides memory unless one is configured.

use crate::config::LookupConfig;
use crate::error::{Error, Result};

/// What one attempt of the underlying lookup reported
#[derive(Debug, PartialEq, Eq)]
pub enum Attempt<T> {
    Found(T),
    NotFound,
    /// The buffer could not hold the record
    TooSmall,
}

/// States of a [`BufferedLookup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    /// About to allocate a buffer of `size` bytes
    Sizing { size: usize },
    /// Waiting on the lookup with a buffer of `size` bytes
    Requesting { size: usize },
    Success,
    NotFound,
    Failed,
}

impl LookupState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LookupState::Success | LookupState::NotFound | LookupState::Failed
        )
    }
}

/// Drives a buffer-sized lookup to a terminal state
#[derive(Debug)]
pub struct BufferedLookup {
    state: LookupState,
    max_attempts: Option<usize>,
    attempts: usize,
    buffer_size: usize,
}

impl BufferedLookup {
    pub fn new(config: &LookupConfig) -> Self {
        Self {
            state: LookupState::Sizing {
                size: config.initial_buffer_size(),
            },
            max_attempts: config.max_attempts(),
            attempts: 0,
            buffer_size: 0,
        }
    }

    pub fn state(&self) -> LookupState {
        self.state
    }

    /// Number of times the underlying lookup ran
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Size of the last buffer handed to the lookup
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = LookupState::Failed;
        err
    }

    fn allocate(&mut self, size: usize) -> Result<Vec<u8>> {
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return Err(self.fail(Error::Resource(format!(
                "record lookup gave up after {} attempts",
                self.attempts
            ))));
        }
        let mut buf = Vec::new();
        if buf.try_reserve_exact(size).is_err() {
            return Err(self.fail(Error::Resource(format!(
                "cannot allocate {size} byte lookup buffer"
            ))));
        }
        buf.resize(size, 0);
        self.buffer_size = size;
        self.state = LookupState::Requesting { size };
        Ok(buf)
    }

    /// Run `lookup` until it finds a record, runs out of matches, or fails.
    ///
    /// `lookup` receives a zeroed buffer and reports [`Attempt::TooSmall`]
    /// when the record did not fit.
    pub fn run<T, F>(&mut self, mut lookup: F) -> Result<Option<T>>
    where
        F: FnMut(&mut [u8]) -> Result<Attempt<T>>,
    {
        loop {
            match self.state {
                LookupState::Sizing { size } => {
                    let mut buf = self.allocate(size)?;
                    self.attempts += 1;
                    match lookup(&mut buf) {
                        Ok(Attempt::Found(record)) => {
                            self.state = LookupState::Success;
                            return Ok(Some(record));
                        }
                        Ok(Attempt::NotFound) => {
                            self.state = LookupState::NotFound;
                            return Ok(None);
                        }
                        Ok(Attempt::TooSmall) => {
                            let Some(next) = size.checked_mul(2) else {
                                return Err(self.fail(Error::Resource(
                                    "lookup buffer size overflow".to_string(),
                                )));
                            };
                            tracing::trace!(size, next, "lookup buffer too small, growing");
                            self.state = LookupState::Sizing { size: next };
                        }
                        Err(err) => return Err(self.fail(err)),
                    }
                }
                LookupState::Requesting { .. } => {
                    // Only reachable if a previous run panicked mid-request.
                    return Err(self.fail(Error::protocol("lookup interrupted")));
                }
                LookupState::Success | LookupState::NotFound | LookupState::Failed => {
                    return Err(Error::protocol("lookup already finished"));
                }
            }
        }
    }
}

/// Run a one-shot buffered lookup with `config`
pub fn lookup_with_retry<T, F>(config: &LookupConfig, lookup: F) -> Result<Option<T>>
where
    F: FnMut(&mut [u8]) -> Result<Attempt<T>>,
{
    BufferedLookup::new(config).run(lookup)
}

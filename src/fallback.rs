//! Ordered first-success fallback.
//!
//! [`FallbackChain`] is the one retry-by-alternative mechanism in the crate.
//! The strategy selector runs extraction strategies through it, and the
//! toolkit loader runs its probe-and-construct candidates through it.

use std::{fmt::Display, future::Future};

/// What happened while walking a chain.
#[derive(Debug)]
pub struct FallbackTrace<E> {
    /// Names of the links that were attempted, in order.
    pub attempted: Vec<String>,
    /// Every failure, in order, paired with the link's name.
    pub failures: Vec<(String, E)>,
}

impl<E> FallbackTrace<E> {
    fn new() -> Self {
        Self {
            attempted: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Split the trace into the attempted names and the last failure.
    pub fn into_last(mut self) -> (Vec<String>, Option<E>) {
        let last = self.failures.pop().map(|(_, error)| error);
        (self.attempted, last)
    }
}

/// An ordered list of named alternatives, tried until one succeeds.
#[derive(Debug, Clone)]
pub struct FallbackChain<T> {
    links: Vec<(String, T)>,
}

impl<T> Default for FallbackChain<T> {
    fn default() -> Self {
        Self { links: Vec::new() }
    }
}

impl<T> FromIterator<(String, T)> for FallbackChain<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        Self {
            links: iter.into_iter().collect(),
        }
    }
}

impl<T: Clone> FallbackChain<T> {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a link.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, link: T) -> Self {
        self.links.push((name.into(), link));
        self
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns `true` when there is nothing to try.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|(name, _)| name.as_str())
    }

    /// Try each link in order and stop at the first success.
    ///
    /// `on_failure` runs after each failed link that is followed by another
    /// one, before the next link starts. On success the trace lists every
    /// link that was attempted, including the winner; on exhaustion the
    /// trace is returned as the error.
    pub async fn run<R, E, F, Fut, H>(
        &self,
        mut attempt: F,
        mut on_failure: H,
    ) -> Result<(R, FallbackTrace<E>), FallbackTrace<E>>
    where
        E: Display,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        H: FnMut(&str, &E),
    {
        let mut trace = FallbackTrace::new();

        for (position, (name, link)) in self.links.iter().enumerate() {
            trace.attempted.push(name.clone());
            log::debug!("Trying {name} ({} of {})", position + 1, self.links.len());

            match attempt(link.clone()).await {
                Ok(value) => {
                    log::info!("{name} succeeded");
                    return Ok((value, trace));
                }
                Err(error) => {
                    let has_next = position + 1 < self.links.len();
                    if has_next {
                        log::warn!("{name} failed: {error}; falling back");
                        on_failure(name, &error);
                    } else {
                        log::warn!("{name} failed: {error}; no alternatives left");
                    }
                    trace.failures.push((name.clone(), error));
                }
            }
        }

        Err(trace)
    }
}

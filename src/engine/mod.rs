//! Warm-up cycles: outbound sending and inbound replies.
//!
//! Both cycles share one set of collaborators and process accounts one at
//! a time. A failure on one account is logged and reported as an event;
//! only a failure to load the account list aborts a pass.

pub mod reply;
pub mod warmup;

use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::activity::ActivityLogger;
use crate::content::ContentGenerator;
use crate::events::EventSink;
use crate::store::{AccountStore, RecipientPool};
use crate::transport::TransportFactory;

pub use reply::{ReplyCycle, ReplyReport};
pub use warmup::{CycleReport, WarmupCycle};

/// Everything a cycle talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountStore>,
    pub recipients: Arc<dyn RecipientPool>,
    pub activity: ActivityLogger,
    pub events: EventSink,
    pub transports: Arc<dyn TransportFactory>,
    pub content: Arc<dyn ContentGenerator>,
}

/// Random source shared by one cycle's firings. Never held across an await.
pub(crate) struct SharedRng(Mutex<StdRng>);

impl SharedRng {
    pub(crate) fn from_entropy() -> Self {
        Self(Mutex::new(StdRng::from_entropy()))
    }

    pub(crate) fn seeded(rng: StdRng) -> Self {
        Self(Mutex::new(rng))
    }

    pub(crate) fn with<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

/// First `max` characters of `s`.
pub(crate) fn excerpt(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

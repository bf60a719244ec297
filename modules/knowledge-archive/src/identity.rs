// Rotating client identities (user agent, viewport, accept-language).
// The pool is shared read-mostly across concurrent runs; the only mutable
// state is the index of the last identity handed out, kept in an atomic.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use knowledge_common::{Identity, Viewport};
use rand::Rng;

/// Source of identities for fetch attempts. Substitutable in tests with a fixed sequence.
pub trait IdentitySource: Send + Sync {
    fn next(&self) -> Identity;
}

const NONE: usize = usize::MAX;

pub struct IdentityPool {
    identities: Vec<Identity>,
    last: AtomicUsize,
}

impl IdentityPool {
    pub fn new(identities: Vec<Identity>) -> Result<Self> {
        if identities.is_empty() {
            bail!("identity pool needs at least one identity");
        }
        Ok(Self {
            identities,
            last: AtomicUsize::new(NONE),
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Uniform pick from every index except `previous`.
    fn pick(&self, previous: usize) -> usize {
        let n = self.identities.len();
        let mut rng = rand::rng();
        if previous >= n {
            return rng.random_range(0..n);
        }
        let candidate = rng.random_range(0..n - 1);
        if candidate >= previous {
            candidate + 1
        } else {
            candidate
        }
    }
}

impl IdentitySource for IdentityPool {
    fn next(&self) -> Identity {
        if self.identities.len() == 1 {
            return self.identities[0].clone();
        }

        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let chosen = self.pick(previous);
            match self
                .last
                .compare_exchange_weak(previous, chosen, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return self.identities[chosen].clone(),
                Err(current) => previous = current,
            }
        }
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self {
            identities: default_identities(),
            last: AtomicUsize::new(NONE),
        }
    }
}

const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

fn identity(user_agent: &str, width: u32, height: u32, device_scale_factor: f64) -> Identity {
    Identity {
        user_agent: user_agent.to_string(),
        viewport: Viewport {
            width,
            height,
            device_scale_factor,
        },
        accept_language: ACCEPT_LANGUAGE.to_string(),
    }
}

/// Built-in desktop identities.
pub fn default_identities() -> Vec<Identity> {
    vec![
        identity(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
            1920,
            1080,
            1.0,
        ),
        identity(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
            1440,
            900,
            2.0,
        ),
        identity(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
            1536,
            864,
            1.25,
        ),
        identity(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
            1680,
            1050,
            2.0,
        ),
        identity(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
            1366,
            768,
            1.0,
        ),
        identity(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
            1600,
            900,
            1.0,
        ),
    ]
}

//! Shuffle-bag selector
//!
//! Each category draws from its own bag: every candidate plays once per
//! cycle in random order. A refilled bag never starts with the previous
//! pick when more than one candidate exists. Later positions are not
//! checked, so with three or more candidates a repeat two picks apart
//! across a refill is still possible.

use crate::foundation::collections::unique_in_order;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct BagState {
    signature: String,
    all: Vec<String>,
    remaining: VecDeque<String>,
    last_picked: Option<String>,
}

fn signature_of(items: &[String]) -> String {
    let mut sorted: Vec<&str> = items.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join("\u{1}")
}

/// Per-category non-repeating random picker
#[derive(Debug)]
pub struct ShuffleBag<R: Rng = StdRng> {
    bags: HashMap<String, BagState>,
    rng: R,
}

impl ShuffleBag<StdRng> {
    /// Create a bag seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a bag with a fixed seed
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for ShuffleBag<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> ShuffleBag<R> {
    /// Create a bag over a caller-provided generator
    pub fn with_rng(rng: R) -> Self {
        Self {
            bags: HashMap::new(),
            rng,
        }
    }

    /// Pick the next candidate for `category`
    ///
    /// Returns `None` only for an empty candidate list.
    pub fn pick(&mut self, category: &str, candidates: &[String]) -> Option<String> {
        let unique = unique_in_order(candidates);
        if unique.len() <= 1 {
            return unique.into_iter().next();
        }

        let signature = signature_of(&unique);
        let state = self.bags.entry(category.to_string()).or_default();
        if state.signature != signature {
            let last_picked = state
                .last_picked
                .take()
                .filter(|last| unique.contains(last));
            *state = BagState {
                signature,
                all: unique,
                remaining: VecDeque::new(),
                last_picked,
            };
        }

        if state.remaining.is_empty() {
            let mut refill = state.all.clone();
            fisher_yates(&mut refill, &mut self.rng);
            if let Some(last) = &state.last_picked {
                if refill.len() > 1 && refill[0] == *last {
                    if let Some(swap_index) = refill.iter().skip(1).position(|item| item != last) {
                        refill.swap(0, swap_index + 1);
                    }
                }
            }
            state.remaining = refill.into();
        }

        let next = state.remaining.pop_front()?;
        state.last_picked = Some(next.clone());
        Some(next)
    }

    /// Forget every bag
    pub fn clear(&mut self) {
        self.bags.clear();
    }
}

fn fisher_yates<T, R: Rng>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

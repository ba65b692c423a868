//! Chain ordering.
//!
//! The cutting time of a chain does not depend on where it sits in the job,
//! so only the travel moves between chains are optimized. A greedy nearest
//! neighbour tour is refined by simulated annealing over two moves:
//!
//! - **Reversal**: reverse a run of chains, flipping each of them. A run of
//!   one flips a single chain.
//! - **Swap**: exchange two chains.
//!
//! Travel time is symmetric, so both moves only change the hops at their
//! boundaries and each proposal is evaluated in constant time.

use crate::geometry::Point;
use crate::progress::{CancellationToken, Progress};
use crate::time_estimator::{MotionParameters, TimeEstimator};
use crate::types::Chain;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_MAX_ITERATIONS: usize = 200_000;
pub const DEFAULT_STALL_LIMIT: usize = 50_000;
/// Final temperature relative to the initial one.
const FINAL_TEMPERATURE_RATIO: f64 = 1e-4;
const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Visit {
    chain: usize,
    reversed: bool,
}

impl Visit {
    fn flipped(self) -> Visit {
        Visit {
            chain: self.chain,
            reversed: !self.reversed,
        }
    }
}

#[derive(Debug)]
struct Best {
    order: Vec<Visit>,
    travel: f64,
}

#[derive(Debug)]
pub struct Optimizer {
    chains: Vec<Chain>,
    /// Start and end of every chain as given.
    endpoints: Vec<(Point, Point)>,
    params: MotionParameters,
    cutting: f64,
    max_iterations: usize,
    stall_limit: usize,
    time_limit: Option<Duration>,
    seed: Option<u64>,
    progress: Progress,
    cancel: CancellationToken,
    best: Mutex<Best>,
}

impl Optimizer {
    pub fn new(chains: Vec<Chain>, params: MotionParameters) -> Self {
        let endpoints: Vec<(Point, Point)> = chains.iter().map(|c| (c.start(), c.end())).collect();
        let cutting = chains
            .iter()
            .map(|c| TimeEstimator::chain_duration(c, &params))
            .sum();
        let order = identity(chains.len());
        let mut optimizer = Self {
            chains,
            endpoints,
            params,
            cutting,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            stall_limit: DEFAULT_STALL_LIMIT,
            time_limit: None,
            seed: None,
            progress: Progress::new(),
            cancel: CancellationToken::new(),
            best: Mutex::new(Best {
                order: Vec::new(),
                travel: 0.0,
            }),
        };
        let travel = optimizer.travel(&order);
        *optimizer.best.get_mut() = Best { order, travel };
        optimizer
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Stop after this many iterations without a new best ordering.
    pub fn with_stall_limit(mut self, iterations: usize) -> Self {
        self.stall_limit = iterations.max(1);
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Share progress reporting with a caller-owned handle.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Stop when `cancel` fires, in addition to [`Optimizer::cancel_handle`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(&self) -> f64 {
        self.progress.get()
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Best ordering found so far.
    pub fn current_best_solution(&self) -> Vec<Chain> {
        self.materialize(&self.best.lock().order)
    }

    /// Estimated duration of [`Optimizer::current_best_solution`], in seconds.
    pub fn current_best_duration(&self) -> f64 {
        self.cutting + self.best.lock().travel
    }

    /// Order the chains. The result is never slower than the input order.
    pub fn optimize(&self) -> Vec<Chain> {
        let n = self.chains.len();
        if n < 2 {
            self.progress.advance(1.0);
            return self.chains.clone();
        }
        let started = Instant::now();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let input_travel = self.best.lock().travel;
        let mut current = self.nearest_neighbour();
        let mut current_travel = self.travel(&current);
        let mut best_travel = input_travel;
        if current_travel < best_travel {
            best_travel = current_travel;
            self.publish(&current, current_travel);
        }

        let initial_temperature = (current_travel / (n - 1) as f64).max(1e-6);
        let cooling = FINAL_TEMPERATURE_RATIO.powf(1.0 / self.max_iterations.max(1) as f64);
        let mut temperature = initial_temperature;
        let mut since_improvement = 0;
        let mut iterations = 0;

        while iterations < self.max_iterations {
            if self.cancel.is_cancelled()
                || since_improvement >= self.stall_limit
                || self.time_limit.is_some_and(|limit| started.elapsed() >= limit)
            {
                break;
            }
            iterations += 1;

            let a = rng.gen_range(0..n);
            let b = rng.gen_range(0..n);
            let (i, j) = (a.min(b), a.max(b));
            let reversal = i == j || rng.gen_bool(0.5);
            let delta = if reversal {
                self.reversal_delta(&current, i, j)
            } else {
                self.swap(&mut current, i, j)
            };
            let accept = delta < 0.0 || rng.gen::<f64>() < (-delta / temperature).exp();
            if accept {
                if reversal {
                    reverse_run(&mut current, i, j);
                }
                current_travel += delta;
            } else if !reversal {
                current.swap(i, j);
            }

            if current_travel < best_travel - 1e-9 {
                // Resum to keep rounding drift out of the published value.
                best_travel = self.travel(&current);
                self.publish(&current, best_travel);
                since_improvement = 0;
            } else {
                since_improvement += 1;
            }
            temperature *= cooling;
            if iterations % PROGRESS_INTERVAL == 0 {
                self.progress
                    .advance(iterations as f64 / self.max_iterations as f64);
            }
        }
        self.progress.advance(1.0);

        let best = self.best.lock();
        info!(
            chains = n,
            iterations,
            input_travel,
            travel = best.travel,
            "optimized chain order"
        );
        self.materialize(&best.order)
    }

    fn publish(&self, order: &[Visit], travel: f64) {
        debug!(travel, "new best ordering");
        let mut best = self.best.lock();
        best.order.clear();
        best.order.extend_from_slice(order);
        best.travel = travel;
    }

    fn start(&self, visit: Visit) -> Point {
        let (from, to) = self.endpoints[visit.chain];
        if visit.reversed {
            to
        } else {
            from
        }
    }

    fn end(&self, visit: Visit) -> Point {
        self.start(visit.flipped())
    }

    fn hop(&self, from: Visit, to: Visit) -> f64 {
        TimeEstimator::hop_duration(self.end(from), self.start(to), &self.params)
    }

    fn travel(&self, order: &[Visit]) -> f64 {
        order.windows(2).map(|pair| self.hop(pair[0], pair[1])).sum()
    }

    /// Change in travel time from reversing positions `i..=j`.
    fn reversal_delta(&self, order: &[Visit], i: usize, j: usize) -> f64 {
        let mut delta = 0.0;
        if i > 0 {
            delta += self.hop(order[i - 1], order[j].flipped()) - self.hop(order[i - 1], order[i]);
        }
        if j + 1 < order.len() {
            delta += self.hop(order[i].flipped(), order[j + 1]) - self.hop(order[j], order[j + 1]);
        }
        delta
    }

    /// Swap positions `i < j` in place and return the change in travel time.
    fn swap(&self, order: &mut [Visit], i: usize, j: usize) -> f64 {
        let mut hops = [i.checked_sub(1), Some(i), j.checked_sub(1), Some(j)];
        hops.sort_unstable();
        let last = order.len() - 1;
        let mut affected: Vec<usize> = hops.into_iter().flatten().filter(|&k| k < last).collect();
        affected.dedup();
        let cost = |order: &[Visit]| -> f64 { affected.iter().map(|&k| self.hop(order[k], order[k + 1])).sum() };
        let before = cost(order);
        order.swap(i, j);
        cost(order) - before
    }

    fn nearest_neighbour(&self) -> Vec<Visit> {
        let n = self.chains.len();
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut current = Visit {
            chain: 0,
            reversed: false,
        };
        visited[0] = true;
        order.push(current);
        for _ in 1..n {
            let here = self.end(current);
            let mut next: Option<(f64, Visit)> = None;
            for (chain, &(from, to)) in self.endpoints.iter().enumerate() {
                if visited[chain] {
                    continue;
                }
                for (reversed, entry) in [(false, from), (true, to)] {
                    let d = here.distance_to(entry);
                    if next.map_or(true, |(best, _)| d < best) {
                        next = Some((d, Visit { chain, reversed }));
                    }
                }
            }
            let Some((_, visit)) = next else { break };
            visited[visit.chain] = true;
            order.push(visit);
            current = visit;
        }
        order
    }

    fn materialize(&self, order: &[Visit]) -> Vec<Chain> {
        order
            .iter()
            .map(|v| {
                let chain = &self.chains[v.chain];
                if v.reversed {
                    chain.reversed()
                } else {
                    chain.clone()
                }
            })
            .collect()
    }
}

fn identity(n: usize) -> Vec<Visit> {
    (0..n)
        .map(|chain| Visit {
            chain,
            reversed: false,
        })
        .collect()
}

fn reverse_run(order: &mut [Visit], i: usize, j: usize) {
    order[i..=j].reverse();
    for visit in &mut order[i..=j] {
        *visit = visit.flipped();
    }
}

//! Behavior registry and the built-in tick behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use futures::future::{BoxFuture, FutureExt};

use super::args::BoundArgs;
use super::executor::{Behavior, Plan};
use crate::model::CommandPath;

/// Behaviors keyed by command path.
#[derive(Clone, Default)]
pub struct Behaviors {
    by_path: HashMap<CommandPath, Arc<dyn Behavior>>,
}

impl Behaviors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: CommandPath, behavior: Arc<dyn Behavior>) -> &mut Self {
        self.by_path.insert(path, behavior);
        self
    }

    pub fn with(mut self, path: CommandPath, behavior: Arc<dyn Behavior>) -> Self {
        self.register(path, behavior);
        self
    }

    pub fn get(&self, path: &CommandPath) -> Option<Arc<dyn Behavior>> {
        self.by_path.get(path).cloned()
    }

    pub fn paths(&self) -> impl Iterator<Item = &CommandPath> {
        self.by_path.keys()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Ticks `attempts` times and reports `tick N`.
///
/// Reads `attempts` (default 5), `debug` and `price` from the bound arguments.
#[derive(Debug, Clone)]
pub struct TickBehavior {
    interval: Duration,
    default_attempts: u64,
}

impl TickBehavior {
    pub const DEFAULT_ATTEMPTS: u64 = 5;

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            default_attempts: Self::DEFAULT_ATTEMPTS,
        }
    }

    pub fn with_default_attempts(mut self, attempts: u64) -> Self {
        self.default_attempts = attempts;
        self
    }
}

impl Behavior for TickBehavior {
    fn plan(&self, args: &BoundArgs) -> Result<Plan> {
        let units = match args.get_f64("attempts") {
            None => self.default_attempts,
            Some(_) => match args.get_i64("attempts") {
                Some(n) if n >= 0 => n as u64,
                Some(n) => bail!("attempts must not be negative, got {n}"),
                None => bail!("attempts must be a whole number"),
            },
        };
        Ok(Plan {
            units,
            interval: self.interval,
        })
    }

    fn step<'a>(&'a self, unit: u64, args: &'a BoundArgs) -> BoxFuture<'a, Result<Option<String>>> {
        async move {
            let message = if args.get_bool("debug").unwrap_or(false) {
                let price = args.get_f64("price").unwrap_or(0.0);
                format!("tick {unit} (price {price})")
            } else {
                format!("tick {unit}")
            };
            Ok(Some(message))
        }
        .boxed()
    }
}

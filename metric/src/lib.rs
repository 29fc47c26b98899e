//! A small, dependency-light metrics registry.
//!
//! Instruments are grouped under a name in a shared [`Registry`] and split by
//! [`Attributes`] (e.g. `partition`, `tenant`). Recorders are cheap to clone and hand
//! out to individual tasks, which then update them without going back through the
//! registry.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, missing_docs)]

use parking_lot::Mutex;
use std::{
    any::Any,
    collections::BTreeMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// A set of key/value pairs identifying one observation of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Attributes(BTreeMap<&'static str, String>);

impl Attributes {
    /// Build an [`Attributes`] set from a slice of key/value pairs.
    pub fn from(pairs: &[(&'static str, &str)]) -> Self {
        Self(pairs.iter().map(|(k, v)| (*k, v.to_string())).collect())
    }

    /// An empty attribute set, for instruments with no dimensions.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl<const N: usize> From<[(&'static str, &str); N]> for Attributes {
    fn from(pairs: [(&'static str, &str); N]) -> Self {
        Self::from(&pairs[..])
    }
}

impl<const N: usize> From<&[(&'static str, &str); N]> for Attributes {
    fn from(pairs: &[(&'static str, &str); N]) -> Self {
        Self::from(&pairs[..])
    }
}

/// A single instrument type that a [`Metric`] can hand out recorders for.
pub trait MetricObserver: Clone + Default + Debug + Send + Sync + 'static {}
impl<T> MetricObserver for T where T: Clone + Default + Debug + Send + Sync + 'static {}

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    /// Increment the counter by `value`.
    pub fn inc(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    /// Read the current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A value that can go up or down, used for things like lag.
#[derive(Debug, Clone, Default)]
pub struct U64Gauge(Arc<AtomicI64>);

impl U64Gauge {
    /// Set the gauge to an absolute value.
    pub fn set(&self, value: u64) {
        self.0.store(value as i64, Ordering::Relaxed);
    }

    /// Read the current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed).max(0) as u64
    }
}

/// A histogram of durations, bucketed by power-of-two seconds.
#[derive(Debug, Clone)]
pub struct DurationHistogram(Arc<Mutex<DurationHistogramState>>);

#[derive(Debug, Default)]
struct DurationHistogramState {
    count: u64,
    total: Duration,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(DurationHistogramState::default())))
    }
}

impl DurationHistogram {
    /// Record one observation.
    pub fn record(&self, value: Duration) {
        let mut state = self.0.lock();
        state.count += 1;
        state.total += value;
    }

    /// Number of observations recorded.
    pub fn count(&self) -> u64 {
        self.0.lock().count
    }

    /// Sum of all observations recorded.
    pub fn total(&self) -> Duration {
        self.0.lock().total
    }
}

/// Shared storage for one named instrument, keyed by [`Attributes`].
#[derive(Debug)]
struct Storage<T>(Mutex<BTreeMap<Attributes, T>>);

/// A named, typed instrument. Handed out by [`Registry::register_metric`].
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    storage: Arc<Storage<T>>,
}

impl<T> Clone for Metric<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<T: MetricObserver> Metric<T> {
    /// The name this instrument was registered under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get (creating if necessary) the recorder for the given attribute set.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T {
        let mut map = self.storage.0.lock();
        map.entry(attributes.into()).or_insert_with(T::default).clone()
    }

    /// Get the recorder for the given attribute set, if it has been observed before.
    pub fn get_observer(&self, attributes: &Attributes) -> Option<T> {
        self.storage.0.lock().get(attributes).cloned()
    }
}

/// A registry of named instruments, shared across a process.
///
/// Each name may only ever be registered with a single concrete instrument type; mixing
/// types under one name is a programming error and panics, the same way mismatched
/// Prometheus metric types do at scrape time.
#[derive(Debug, Default)]
pub struct Registry {
    instruments: Mutex<BTreeMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl Registry {
    /// Create a new, empty [`Registry`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or look up an already-registered) named instrument of type `T`.
    ///
    /// The `description` is accepted for documentation purposes at call sites but is not
    /// currently surfaced anywhere; it mirrors the signature of the stack's metrics registry.
    pub fn register_metric<T: MetricObserver>(
        &self,
        name: &'static str,
        _description: &'static str,
    ) -> Metric<T> {
        let mut instruments = self.instruments.lock();
        let erased = instruments
            .entry(name)
            .or_insert_with(|| Arc::new(Storage::<T>(Mutex::new(BTreeMap::new()))) as Arc<dyn Any + Send + Sync>)
            .clone();
        let storage = erased
            .downcast::<Storage<T>>()
            .unwrap_or_else(|_| panic!("instrument {name:?} registered under a different type"));
        Metric { name, storage }
    }

    /// Look up an already-registered instrument without creating it.
    pub fn get_instrument<T: MetricObserver>(&self, name: &str) -> Option<Metric<T>> {
        let instruments = self.instruments.lock();
        let (name, erased) = instruments.get_key_value(name)?;
        let storage = Arc::clone(erased).downcast::<Storage<T>>().ok()?;
        Some(Metric { name, storage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_records_per_attribute_set() {
        let registry = Registry::new();
        let metric: Metric<U64Counter> = registry.register_metric("fetch_errors_total", "");

        let p0 = metric.recorder(Attributes::from(&[("partition", "0")]));
        let p1 = metric.recorder(Attributes::from(&[("partition", "1")]));

        p0.inc(2);
        p1.inc(1);
        p0.inc(1);

        assert_eq!(
            metric
                .get_observer(&Attributes::from(&[("partition", "0")]))
                .unwrap()
                .fetch(),
            3
        );
        assert_eq!(
            metric
                .get_observer(&Attributes::from(&[("partition", "1")]))
                .unwrap()
                .fetch(),
            1
        );
    }

    #[test]
    fn recorder_handles_share_state() {
        let registry = Registry::new();
        let metric: Metric<U64Gauge> = registry.register_metric("partition_lag", "");

        let a = metric.recorder(Attributes::from(&[("partition", "0")]));
        let b = metric.recorder(Attributes::from(&[("partition", "0")]));

        a.set(42);
        assert_eq!(b.fetch(), 42);
    }

    #[test]
    fn get_instrument_round_trips_through_registry() {
        let registry = Registry::new();
        let metric: Metric<U64Counter> = registry.register_metric("commits_total", "");
        metric.recorder(Attributes::empty()).inc(5);

        let looked_up: Metric<U64Counter> = registry.get_instrument("commits_total").unwrap();
        assert_eq!(looked_up.get_observer(&Attributes::empty()).unwrap().fetch(), 5);
    }

    #[test]
    fn histogram_accumulates() {
        let hist = DurationHistogram::default();
        hist.record(Duration::from_millis(100));
        hist.record(Duration::from_millis(200));
        assert_eq!(hist.count(), 2);
        assert_eq!(hist.total(), Duration::from_millis(300));
    }
}

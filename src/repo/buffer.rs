/// Fixed-capacity rolling buffers backing charts and 3D trails
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// `(x, y)` point; `x` is the sample timestamp in POSIX seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RollingPoint<T> {
    pub x: f64,
    pub y: T,
}

impl<T> RollingPoint<T> {
    pub fn new(x: f64, y: T) -> Self {
        Self { x, y }
    }
}

/// Append-at-tail, evict-at-head FIFO clamped to `capacity` elements
#[derive(Debug, Clone)]
pub struct RollingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RollingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Replace the whole window; only the most recent `capacity` survive
    pub fn replace_all<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.clear();
        for item in items {
            self.push(item);
        }
    }

    /// Oldest first
    pub fn to_series(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Live charts fed from the selected spacecraft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Temperature,
    Velocity,
    Position,
    SignalQuality,
    Energy,
}

impl ChartKind {
    pub const ALL: [ChartKind; 5] = [
        ChartKind::Temperature,
        ChartKind::Velocity,
        ChartKind::Position,
        ChartKind::SignalQuality,
        ChartKind::Energy,
    ];

    pub fn series_count(&self) -> usize {
        match self {
            ChartKind::Position => 3,
            _ => 1,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "temperature" => Some(ChartKind::Temperature),
            "velocity" => Some(ChartKind::Velocity),
            "position" => Some(ChartKind::Position),
            "signal_quality" | "signal" => Some(ChartKind::SignalQuality),
            "energy" | "power" => Some(ChartKind::Energy),
            _ => None,
        }
    }
}

/// Series key: chart plus series index within it
pub type SeriesKey = (ChartKind, usize);

/// One independent buffer per chart series
#[derive(Debug, Clone)]
pub struct SeriesRepo {
    series: HashMap<SeriesKey, RollingBuffer<RollingPoint<f64>>>,
}

impl SeriesRepo {
    pub fn new(capacity: usize) -> Self {
        let series = ChartKind::ALL
            .iter()
            .flat_map(|chart| (0..chart.series_count()).map(move |i| (*chart, i)))
            .map(|key| (key, RollingBuffer::new(capacity)))
            .collect();
        Self { series }
    }

    /// Append; returns false for an unknown series
    pub fn push(&mut self, key: SeriesKey, point: RollingPoint<f64>) -> bool {
        match self.series.get_mut(&key) {
            Some(buffer) => {
                buffer.push(point);
                true
            }
            None => false,
        }
    }

    pub fn replace_all(&mut self, key: SeriesKey, points: Vec<RollingPoint<f64>>) {
        if let Some(buffer) = self.series.get_mut(&key) {
            buffer.replace_all(points);
        }
    }

    pub fn series(&self, key: SeriesKey) -> Vec<RollingPoint<f64>> {
        self.series
            .get(&key)
            .map(RollingBuffer::to_series)
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = SeriesKey> + '_ {
        self.series.keys().copied()
    }
}

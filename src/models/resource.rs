use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A non-negative, multi-dimensional resource vector.
///
/// `cpu` and `memory` are first-class fields because every policy code path in this crate
/// exercises them directly (millicores and bytes, matching the source-of-truth object shapes in
/// `with_xline::utils`); `extra` carries any additional named dimensions so the algebra below
/// still treats the whole vector uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub cpu: u64,
    #[serde(default)]
    pub memory: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, u64>,
}

impl Resource {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(cpu: u64, memory: u64) -> Self {
        Self {
            cpu,
            memory,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, dimension: impl Into<String>, value: u64) -> Self {
        self.extra.insert(dimension.into(), value);
        self
    }

    /// All dimension names carried by this vector, `cpu`/`memory` first, then `extra` sorted.
    pub fn dimensions(&self) -> Vec<&str> {
        let mut dims = vec!["cpu", "memory"];
        dims.extend(self.extra.keys().map(String::as_str));
        dims
    }

    pub fn get(&self, dimension: &str) -> u64 {
        match dimension {
            "cpu" => self.cpu,
            "memory" => self.memory,
            other => *self.extra.get(other).unwrap_or(&0),
        }
    }

    pub fn set(&mut self, dimension: &str, value: u64) {
        match dimension {
            "cpu" => self.cpu = value,
            "memory" => self.memory = value,
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu == 0 && self.memory == 0 && self.extra.values().all(|&v| v == 0)
    }

    pub fn add(&self, other: &Resource) -> Resource {
        let mut out = Resource::new(self.cpu + other.cpu, self.memory + other.memory);
        for dim in self
            .extra
            .keys()
            .chain(other.extra.keys())
            .collect::<std::collections::BTreeSet<_>>()
        {
            out.extra.insert(dim.clone(), self.get(dim) + other.get(dim));
        }
        out
    }

    /// Subtracts `other` from `self`. A component going negative is a programming defect, not a
    /// runtime condition: callers MUST check `other.less_equal(self)` first.
    pub fn sub(&self, other: &Resource) -> Resource {
        let mut out = Resource::new(
            self.cpu.checked_sub(other.cpu).expect("resource underflow on cpu"),
            self.memory
                .checked_sub(other.memory)
                .expect("resource underflow on memory"),
        );
        for dim in self
            .extra
            .keys()
            .chain(other.extra.keys())
            .collect::<std::collections::BTreeSet<_>>()
        {
            let v = self
                .get(dim)
                .checked_sub(other.get(dim))
                .unwrap_or_else(|| panic!("resource underflow on {dim}"));
            out.extra.insert(dim.clone(), v);
        }
        out
    }

    pub fn less_equal(&self, other: &Resource) -> bool {
        if self.cpu > other.cpu || self.memory > other.memory {
            return false;
        }
        self.extra
            .keys()
            .chain(other.extra.keys())
            .all(|dim| self.get(dim) <= other.get(dim))
    }

    /// The fraction of `total` that `self` represents on its most heavily used dimension —
    /// the DRF dominant share. Dimensions with zero total capacity are skipped.
    pub fn dominant_share(&self, total: &Resource) -> f64 {
        let mut share: f64 = 0.0;
        for dim in self.dimensions() {
            let t = total.get(dim);
            if t == 0 {
                continue;
            }
            let frac = self.get(dim) as f64 / t as f64;
            if frac > share {
                share = frac;
            }
        }
        share
    }
}

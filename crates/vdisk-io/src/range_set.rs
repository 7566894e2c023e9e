/// A half-open sector range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SectorRange {
    pub start: u64,
    pub end: u64,
}

impl SectorRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[cfg(test)]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    fn touches(&self, other: &SectorRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Sorted, disjoint set of sector ranges. Adjacent ranges are merged on insert.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct SectorRangeSet {
    ranges: Vec<SectorRange>,
}

impl SectorRangeSet {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    #[cfg(test)]
    pub fn ranges(&self) -> &[SectorRange] {
        &self.ranges
    }

    #[cfg(test)]
    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(SectorRange::len).sum()
    }

    pub fn insert(&mut self, start: u64, end: u64) {
        let mut new = SectorRange::new(start, end);
        if new.is_empty() {
            return;
        }

        // First range that ends at or after `new.start` may touch it.
        let first = self.ranges.partition_point(|r| r.end < new.start);
        let mut last = first;
        while last < self.ranges.len() && self.ranges[last].touches(&new) {
            let r = self.ranges[last];
            new = SectorRange::new(new.start.min(r.start), new.end.max(r.end));
            last += 1;
        }
        self.ranges.splice(first..last, std::iter::once(new));
    }

    /// Whether any sector in `[start, end)` is in the set.
    pub fn intersects(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return false;
        }
        let idx = self.ranges.partition_point(|r| r.end <= start);
        self.ranges.get(idx).is_some_and(|r| r.start < end)
    }
}

/// The single contiguous part of a cache file whose bytes belong to the
/// current epoch.
///
/// `upper_bound` is an exclusive bound measured from the start of the file,
/// not a byte count relative to `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidRegion {
    start: u64,
    upper_bound: u64,
}

impl ValidRegion {
    pub fn new(start: u64, upper_bound: u64) -> Self {
        Self { start, upper_bound }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn upper_bound(&self) -> u64 {
        self.upper_bound
    }

    pub fn set_start(&mut self, start: u64) {
        self.start = start;
    }

    pub fn set_upper_bound(&mut self, upper_bound: u64) {
        self.upper_bound = upper_bound;
    }

    pub fn reset(&mut self) {
        self.start = 0;
        self.upper_bound = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.upper_bound <= self.start
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.upper_bound
    }
}

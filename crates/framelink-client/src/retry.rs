/// Bounded counter of consecutive automatic reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    ceiling: u32,
}

impl RetryState {
    pub fn new(ceiling: u32) -> Self {
        Self { attempts: 0, ceiling }
    }

    /// Attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Maximum number of attempts.
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// True once no further attempt may be made.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.ceiling
    }

    /// Count one more attempt and return its 1-based number, or `None` if the
    /// ceiling is already reached.
    pub fn record_attempt(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    /// A session opened: start counting from zero again.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Stop all further attempts until the next reset.
    pub fn freeze(&mut self) {
        self.attempts = self.ceiling;
    }
}

/// One-shot timer owned by the component that schedules it.
///
/// Scheduling replaces any pending deadline, so a concern never fires twice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<u64>,
}

impl Timer {
    pub fn schedule(&mut self, now_ms: u64, delay_ms: u64) {
        self.deadline = Some(now_ms.saturating_add(delay_ms));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn remaining(&self, now_ms: u64) -> Option<u64> {
        self.deadline.map(|deadline| deadline.saturating_sub(now_ms))
    }

    /// True once, when the deadline has passed. The timer is cleared on fire.
    pub fn fire(&mut self, now_ms: u64) -> bool {
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Repeating poller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticker {
    period_ms: u64,
    next_at: Option<u64>,
}

impl Ticker {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            next_at: None,
        }
    }

    /// Restarting always drops the previous schedule.
    pub fn start(&mut self, now_ms: u64) {
        self.next_at = Some(now_ms + self.period_ms);
    }

    pub fn stop(&mut self) {
        self.next_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_at.is_some()
    }

    /// Number of periods elapsed since the last poll; coalesces missed ticks.
    pub fn poll(&mut self, now_ms: u64) -> u64 {
        let Some(next_at) = self.next_at else {
            return 0;
        };
        if now_ms < next_at {
            return 0;
        }
        let ticks = (now_ms - next_at) / self.period_ms + 1;
        self.next_at = Some(next_at + ticks * self.period_ms);
        ticks
    }
}

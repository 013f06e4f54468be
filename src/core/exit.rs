use std::fmt;

/// Why a process run inside the VM came to an end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExitReason {
    /// Killed at the end of its time budget.
    Timeout,
    /// Exited with status zero.
    Normal,
    /// Exited with a nonzero status or was terminated by a signal.
    Error,
}

impl ExitReason {
    pub const ALL: [ExitReason; 3] = [ExitReason::Timeout, ExitReason::Normal, ExitReason::Error];

    const fn bit(self) -> u8 {
        match self {
            ExitReason::Timeout => 1 << 0,
            ExitReason::Normal => 1 << 1,
            ExitReason::Error => 1 << 2,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitReason::Timeout => "timeout",
            ExitReason::Normal => "normal exit",
            ExitReason::Error => "error exit",
        };
        f.write_str(name)
    }
}

/// Non-empty set of exit reasons accepted as an ordinary end of a run.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitCondition(u8);

impl ExitCondition {
    /// A harness either completes or gets killed at the deadline. Crashes of
    /// harness-wrapped programs are detected from console output, so a
    /// nonzero exit of the harness itself is a failure.
    pub const HARNESS: ExitCondition =
        ExitCondition(ExitReason::Timeout.bit() | ExitReason::Normal.bit());

    /// A compiled reproducer may legitimately die abnormally.
    pub const RAW_BINARY: ExitCondition = ExitCondition(
        ExitReason::Timeout.bit() | ExitReason::Normal.bit() | ExitReason::Error.bit(),
    );

    /// Returns `None` for an empty set of reasons.
    pub fn from_reasons(reasons: &[ExitReason]) -> Option<Self> {
        let bits = reasons.iter().fold(0, |acc, r| acc | r.bit());
        (bits != 0).then_some(ExitCondition(bits))
    }

    pub fn contains(&self, reason: ExitReason) -> bool {
        self.0 & reason.bit() != 0
    }

    pub fn union(self, other: ExitCondition) -> ExitCondition {
        ExitCondition(self.0 | other.0)
    }

    pub fn is_superset_of(&self, other: &ExitCondition) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn reasons(&self) -> impl Iterator<Item = ExitReason> {
        let condition = *self;
        ExitReason::ALL
            .into_iter()
            .filter(move |r| condition.contains(*r))
    }
}

impl fmt::Debug for ExitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.reasons()).finish()
    }
}

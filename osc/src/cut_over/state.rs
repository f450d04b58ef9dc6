use std::fmt;

/// Phase of the cut-over.
///
/// The normal path is `Copying -> Draining -> Locked -> Swapped -> Done`. `Failed` can be
/// entered from every phase before `Swapped`; a failed attempt restarts at `Draining` when
/// attempts are left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutOverState {
    /// The backfill is still running.
    Copying,
    /// The backfill is complete, waiting for the replay to reach the backfill checkpoint.
    Draining,
    /// Writes to the original table are blocked while the replay catches up.
    Locked,
    /// The shadow table replaced the original table.
    Swapped,
    /// Tables are swapped and unlocked.
    Done,
    /// The attempt was abandoned, the original table is untouched.
    Failed { reason: String },
}

impl CutOverState {
    pub fn can_transition_to(&self, next: &CutOverState) -> bool {
        use CutOverState::*;

        matches!(
            (self, next),
            (Copying, Draining)
                | (Draining, Locked)
                | (Locked, Swapped)
                | (Swapped, Done)
                | (Copying | Draining | Locked, Failed { .. })
                | (Failed { .. }, Draining)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CutOverState::Done | CutOverState::Failed { .. })
    }
}

impl fmt::Display for CutOverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutOverState::Copying => f.write_str("copying"),
            CutOverState::Draining => f.write_str("draining"),
            CutOverState::Locked => f.write_str("locked"),
            CutOverState::Swapped => f.write_str("swapped"),
            CutOverState::Done => f.write_str("done"),
            CutOverState::Failed { .. } => f.write_str("failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> CutOverState {
        CutOverState::Failed {
            reason: "lock timeout".to_string(),
        }
    }

    #[test]
    fn follows_the_happy_path() {
        let path = [
            CutOverState::Copying,
            CutOverState::Draining,
            CutOverState::Locked,
            CutOverState::Swapped,
            CutOverState::Done,
        ];

        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn never_fails_after_swap() {
        assert!(CutOverState::Locked.can_transition_to(&failed()));
        assert!(!CutOverState::Swapped.can_transition_to(&failed()));
        assert!(!CutOverState::Done.can_transition_to(&failed()));
    }

    #[test]
    fn never_skips_phases() {
        assert!(!CutOverState::Copying.can_transition_to(&CutOverState::Locked));
        assert!(!CutOverState::Draining.can_transition_to(&CutOverState::Swapped));
        assert!(!failed().can_transition_to(&CutOverState::Locked));
        assert!(failed().can_transition_to(&CutOverState::Draining));
    }
}

/// Monitors held by one method activation, in the order they were entered
///
/// The same object can be in the list more than once (monitors are re-entrant).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LockState<O> {
    monitors: Vec<O>,
}

impl<O: PartialEq + Clone> LockState<O> {
    pub fn new() -> LockState<O> {
        LockState { monitors: vec![] }
    }

    pub fn enter(&mut self, monitor: O) {
        self.monitors.push(monitor);
    }

    /// Remove the most recent entry of the monitor
    ///
    /// Returns `false` if the monitor was not held.
    pub fn exit(&mut self, monitor: &O) -> bool {
        match self.monitors.iter().rposition(|held| held == monitor) {
            Some(idx) => {
                self.monitors.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Held monitors, oldest first
    pub fn to_vec(&self) -> Vec<O> {
        self.monitors.clone()
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

impl<O> From<Vec<O>> for LockState<O> {
    fn from(monitors: Vec<O>) -> Self {
        LockState { monitors }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_removes_most_recent() {
        let mut locks = LockState::new();
        locks.enter('a');
        locks.enter('b');
        locks.enter('a');
        locks.enter('c');

        assert!(locks.exit(&'a'));
        assert_eq!(locks.to_vec(), vec!['a', 'b', 'c']);
        assert!(!locks.exit(&'z'), "z was never entered");
        assert!(locks.exit(&'c'));
        assert!(locks.exit(&'b'));
        assert_eq!(locks.to_vec(), vec!['a']);
    }
}

use super::Error;

/// What instrumented code should do when it reaches a continuation point or its prologue
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Run the original code
    Normal,

    /// Unwind the call stack, saving each frame on the way out
    Saving,

    /// Re-enter the call stack, restoring each frame on the way in
    Loading,
}

impl Mode {
    /// Integer seen by generated code (`getMode`/`setMode`)
    pub const fn as_int(self) -> i32 {
        match self {
            Mode::Normal => 0,
            Mode::Saving => 1,
            Mode::Loading => 2,
        }
    }

    pub fn from_int(mode: i32) -> Result<Mode, Error> {
        match mode {
            0 => Ok(Mode::Normal),
            1 => Ok(Mode::Saving),
            2 => Ok(Mode::Loading),
            other => Err(Error::InvalidMode(other)),
        }
    }
}

/// Saved call stack of one coroutine
///
/// States are kept outermost first. A cycle of execution goes:
///
///   1. [`Continuation::begin_cycle`] switches to [`Mode::Loading`] if anything was saved
///   2. each instrumented method prologue calls [`Continuation::load_next_method_state`] until the
///      innermost restore block switches back to [`Mode::Normal`]
///   3. a suspend switches to [`Mode::Saving`] and every method on the way out calls
///      [`Continuation::push_new_method_state`]
///   4. [`Continuation::finish_cycle`] keeps what was pushed (the cut-point chain) for next time
///
/// If an exception escapes while loading, generated code calls [`Continuation::reset`] so the
/// same saved states can be loaded again.
#[derive(Clone, Debug)]
pub struct Continuation<S> {
    mode: Mode,
    saved: Vec<S>,
    first: usize,
    next_load: usize,
    next_unload: Option<usize>,
    cutpoints: Vec<S>,
    first_cutpoint: Option<usize>,
}

impl<S: Clone> Continuation<S> {
    pub fn new() -> Continuation<S> {
        Continuation {
            mode: Mode::Normal,
            saved: vec![],
            first: 0,
            next_load: 0,
            next_unload: None,
            cutpoints: vec![],
            first_cutpoint: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        log::trace!("Continuation mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
    }

    /// Next saved state to restore, moving outer to inner
    pub fn load_next_method_state(&mut self) -> Result<S, Error> {
        let state = self
            .saved
            .get(self.next_load)
            .cloned()
            .ok_or(Error::NoStateToLoad {
                next_load: self.next_load,
                saved: self.saved.len(),
            })?;
        self.next_unload = Some(self.next_load);
        self.next_load += 1;
        Ok(state)
    }

    /// Record a state while unwinding
    ///
    /// Methods unwind inner to outer, so each new state goes in front of the others.
    pub fn push_new_method_state(&mut self, state: S) {
        self.cutpoints.insert(0, state);
        self.first_cutpoint = Some(0);
    }

    /// Undo a partial restore
    pub fn reset(&mut self) {
        log::debug!(
            "Resetting continuation after {} of {} states loaded",
            self.next_load - self.first,
            self.saved.len()
        );
        self.next_load = self.first;
        self.next_unload = None;
        self.cutpoints.clear();
        self.first_cutpoint = None;
        self.mode = Mode::Normal;
    }

    /// Prepare for running the coroutine entry point
    pub fn begin_cycle(&mut self) {
        self.next_load = self.first;
        self.next_unload = None;
        self.cutpoints.clear();
        self.first_cutpoint = None;
        self.mode = if self.saved.is_empty() {
            Mode::Normal
        } else {
            Mode::Loading
        };
    }

    /// Wrap up after the coroutine entry point returns
    ///
    /// Returns whether the coroutine suspended (so there is more to run).
    pub fn finish_cycle(&mut self) -> Result<bool, Error> {
        match self.mode {
            Mode::Saving => {
                self.saved = std::mem::take(&mut self.cutpoints);
                self.first = 0;
                self.next_load = 0;
                self.next_unload = None;
                self.first_cutpoint = None;
                self.mode = Mode::Normal;
                log::debug!("Suspended with {} saved states", self.saved.len());
                Ok(true)
            }
            Mode::Normal => {
                self.saved.clear();
                self.first = 0;
                self.next_load = 0;
                self.next_unload = None;
                self.cutpoints.clear();
                self.first_cutpoint = None;
                Ok(false)
            }
            Mode::Loading => Err(Error::IncompleteRestore {
                loaded: self.next_load - self.first,
                saved: self.saved.len(),
            }),
        }
    }

    /// Saved states, outermost first
    pub fn saved_states(&self) -> &[S] {
        &self.saved
    }

    /// Replace the saved states (eg. after reading a snapshot)
    pub fn set_saved_states(&mut self, saved: Vec<S>) {
        self.saved = saved;
        self.first = 0;
        self.next_load = 0;
        self.next_unload = None;
        self.cutpoints.clear();
        self.first_cutpoint = None;
        self.mode = Mode::Normal;
    }

    /// Mutable access to a saved state
    pub fn saved_state_mut(&mut self, index: usize) -> Option<&mut S> {
        self.saved.get_mut(index)
    }

    pub fn first(&self) -> usize {
        self.first
    }

    pub fn next_load(&self) -> usize {
        self.next_load
    }

    pub fn next_unload(&self) -> Option<usize> {
        self.next_unload
    }

    pub fn first_cutpoint(&self) -> Option<usize> {
        self.first_cutpoint
    }

    /// States pushed while unwinding in the current cycle
    pub fn cutpoints(&self) -> &[S] {
        &self.cutpoints
    }
}

impl<S: Clone> Default for Continuation<S> {
    fn default() -> Self {
        Continuation::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn modes() {
        for mode in [Mode::Normal, Mode::Saving, Mode::Loading] {
            assert_eq!(Mode::from_int(mode.as_int()), Ok(mode));
        }
        assert_eq!(Mode::from_int(7), Err(Error::InvalidMode(7)));
    }

    #[test]
    fn save_then_load() {
        let mut cont: Continuation<&str> = Continuation::new();
        cont.begin_cycle();
        assert_eq!(cont.mode(), Mode::Normal);

        // Unwind from the inner method out
        cont.set_mode(Mode::Saving);
        cont.push_new_method_state("inner");
        cont.push_new_method_state("outer");
        assert_eq!(cont.first_cutpoint(), Some(0));
        assert_eq!(cont.finish_cycle(), Ok(true));
        assert_eq!(cont.saved_states(), &["outer", "inner"]);

        cont.begin_cycle();
        assert_eq!(cont.mode(), Mode::Loading);
        assert_eq!(cont.load_next_method_state(), Ok("outer"));
        assert_eq!(cont.next_unload(), Some(0));
        assert_eq!(cont.load_next_method_state(), Ok("inner"));
        assert_eq!(cont.next_unload(), Some(1));
        assert!(
            cont.load_next_method_state().is_err(),
            "only two states were saved"
        );

        // Innermost restore switches back to normal and the coroutine runs to completion
        cont.set_mode(Mode::Normal);
        assert_eq!(cont.finish_cycle(), Ok(false));
        assert!(cont.saved_states().is_empty());
    }

    #[test]
    fn reset_rewinds_pointers() {
        let mut cont: Continuation<u32> = Continuation::new();
        cont.set_saved_states(vec![1, 2, 3]);
        cont.begin_cycle();
        cont.load_next_method_state().unwrap();
        cont.load_next_method_state().unwrap();
        cont.push_new_method_state(9);

        cont.reset();
        assert_eq!(cont.mode(), Mode::Normal);
        assert_eq!(cont.next_load(), cont.first());
        assert_eq!(cont.next_unload(), None);
        assert_eq!(cont.first_cutpoint(), None);
        assert!(cont.cutpoints().is_empty());
        assert_eq!(cont.saved_states(), &[1, 2, 3]);
    }

    #[test]
    fn incomplete_restore() {
        let mut cont: Continuation<u32> = Continuation::new();
        cont.set_saved_states(vec![1, 2]);
        cont.begin_cycle();
        cont.load_next_method_state().unwrap();
        assert_eq!(
            cont.finish_cycle(),
            Err(Error::IncompleteRestore {
                loaded: 1,
                saved: 2
            })
        );
    }
}

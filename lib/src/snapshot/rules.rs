use super::{CoroutineState, Error, Frame, FrameKey, FrameResolver, VersionedFrame};
use std::collections::{HashMap, HashSet};

type FrameRewrite<O> = Box<dyn Fn(Frame<O>) -> Frame<O>>;

/// Fixes up values of frames with a given key, without changing the key
pub struct FrameInterceptPoint<O> {
    pub key: FrameKey,
    intercept: FrameRewrite<O>,
}

impl<O> FrameInterceptPoint<O> {
    pub fn new(key: FrameKey, intercept: impl Fn(Frame<O>) -> Frame<O> + 'static) -> Self {
        FrameInterceptPoint {
            key,
            intercept: Box::new(intercept),
        }
    }
}

/// Migrates frames with a given key to an equivalent frame for other code
pub struct FrameUpdatePoint<O> {
    pub key: FrameKey,
    update: FrameRewrite<O>,
}

impl<O> FrameUpdatePoint<O> {
    pub fn new(key: FrameKey, update: impl Fn(Frame<O>) -> Frame<O> + 'static) -> Self {
        FrameUpdatePoint {
            key,
            update: Box::new(update),
        }
    }
}

/// Applies intercept and update rules when writing and reading snapshots
pub struct SnapshotCodec<O> {
    interceptors: HashMap<FrameKey, FrameInterceptPoint<O>>,
    updaters: HashMap<FrameKey, FrameUpdatePoint<O>>,
}

impl<O: Clone> SnapshotCodec<O> {
    /// Collect rules, rejecting two rules of the same kind for the same key
    pub fn new(
        interceptors: Vec<FrameInterceptPoint<O>>,
        updaters: Vec<FrameUpdatePoint<O>>,
    ) -> Result<SnapshotCodec<O>, Error> {
        let mut intercept_map = HashMap::new();
        for interceptor in interceptors {
            if intercept_map.contains_key(&interceptor.key) {
                return Err(Error::DuplicateRule(interceptor.key));
            }
            intercept_map.insert(interceptor.key.clone(), interceptor);
        }

        let mut update_map = HashMap::new();
        for updater in updaters {
            if update_map.contains_key(&updater.key) {
                return Err(Error::DuplicateRule(updater.key));
            }
            update_map.insert(updater.key.clone(), updater);
        }

        Ok(SnapshotCodec {
            interceptors: intercept_map,
            updaters: update_map,
        })
    }

    /// Codec with no rules
    pub fn plain() -> SnapshotCodec<O> {
        SnapshotCodec {
            interceptors: HashMap::new(),
            updaters: HashMap::new(),
        }
    }

    fn intercept(&self, frame: Frame<O>) -> Result<Frame<O>, Error> {
        let key = frame.key();
        match self.interceptors.get(&key) {
            None => Ok(frame),
            Some(interceptor) => {
                let intercepted = (interceptor.intercept)(frame);
                if intercepted.key() != key {
                    return Err(Error::InterceptChangedKey(key));
                }
                Ok(intercepted)
            }
        }
    }

    /// Apply the update rule for the frame's key, if there is one
    fn update(&self, frame: &Frame<O>) -> Result<Option<Frame<O>>, Error> {
        let key = frame.key();
        match self.updaters.get(&key) {
            None => Ok(None),
            Some(updater) => {
                let updated = (updater.update)(frame.clone());
                if updated.key() == key {
                    return Err(Error::UpdateKeptKey(key));
                }
                Ok(Some(updated))
            }
        }
    }

    /// Expand a captured frame into the chain of its representations
    ///
    /// The captured frame comes first, followed by each frame the update rules produce from it.
    pub fn versions(&self, frame: Frame<O>) -> Result<VersionedFrame<O>, Error> {
        let mut representations = vec![];
        let mut seen: HashSet<FrameKey> = HashSet::new();
        let mut current = frame;

        loop {
            current = self.intercept(current)?;
            let key = current.key();
            if !seen.insert(key.clone()) {
                return Err(Error::UpdateCycle(key));
            }
            let next = self.update(&current)?;
            representations.push(current);
            match next {
                Some(updated) => current = updated,
                None => break,
            }
        }

        log::trace!(
            "Frame {} written with {} representations",
            representations[0].key(),
            representations.len()
        );
        Ok(VersionedFrame { representations })
    }

    /// Pick the first representation that can be loaded, following rules if needed
    pub fn resolve(
        &self,
        versioned: &VersionedFrame<O>,
        resolver: &dyn FrameResolver,
    ) -> Result<Frame<O>, Error> {
        let mut tried = vec![];

        for representation in &versioned.representations {
            let mut seen: HashSet<FrameKey> = HashSet::new();
            // Stored representations were intercepted when written
            let mut current = representation.clone();
            loop {
                let key = current.key();
                if !seen.insert(key.clone()) {
                    return Err(Error::UpdateCycle(key));
                }
                if resolver.is_loadable(&key) {
                    log::debug!("Resolved saved frame to {}", key);
                    return Ok(current);
                }
                tried.push(key);
                match self.update(&current)? {
                    Some(updated) => current = self.intercept(updated)?,
                    None => break,
                }
            }
        }

        Err(Error::NoLoadableFrame(tried))
    }

    /// Snapshot of a suspended coroutine, from its frames (outermost first)
    pub fn capture(&self, payload: O, frames: Vec<Frame<O>>) -> Result<CoroutineState<O>, Error> {
        let frames = frames
            .into_iter()
            .map(|frame| self.versions(frame))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(CoroutineState { payload, frames })
    }

    /// Frames to load from a snapshot (outermost first)
    pub fn restore(
        &self,
        state: &CoroutineState<O>,
        resolver: &dyn FrameResolver,
    ) -> Result<Vec<Frame<O>>, Error> {
        state
            .frames
            .iter()
            .map(|versioned| self.resolve(versioned, resolver))
            .collect()
    }
}

//! `LazyStatic` like initialization.

/// The initialization state
enum State<F, T> {
    /// The data is uninitialized, initialization is pending.
    ///
    /// The inner closure contains the initialization function.
    Uninitialized(F),
    /// The data is initialized, and ready for use.
    Initialized(T),
}

/// A lazily initialized container.
///
/// This container starts out simply containing an initializer (i.e., a function to construct the
/// value in question). When the value is requested, the initializer runs. Initialization may fail,
/// in which case the container stays uninitialized and the next request tries again.
pub struct LazyInit<F, T> {
    /// The internal state.
    state: State<F, T>,
}

impl<F: FnMut() -> Result<T, ()>, T> LazyInit<F, T> {
    /// Create a new to-be-initialized container.
    ///
    /// The closure will be executed when initialization is required, until it succeeds once.
    #[inline]
    pub const fn new(init: F) -> LazyInit<F, T> {
        LazyInit {
            state: State::Uninitialized(init),
        }
    }

    /// Create an already initialized container.
    #[inline]
    pub const fn initialized(inner: T) -> LazyInit<F, T> {
        LazyInit {
            state: State::Initialized(inner),
        }
    }

    /// Get a mutable reference to the inner value.
    ///
    /// If it is uninitialized, it will be initialized and then returned. If initialization fails,
    /// the error is returned and nothing changes.
    #[inline]
    pub fn get(&mut self) -> Result<&mut T, ()> {
        if let State::Uninitialized(ref mut f) = self.state {
            let inner = f()?;
            self.state = State::Initialized(inner);
        }

        match self.state {
            State::Initialized(ref mut x) => Ok(x),
            State::Uninitialized(_) => Err(()),
        }
    }

    /// Get the inner value, if it has been initialized.
    #[inline]
    pub fn get_initialized(&mut self) -> Option<&mut T> {
        match self.state {
            State::Initialized(ref mut x) => Some(x),
            State::Uninitialized(_) => None,
        }
    }
}

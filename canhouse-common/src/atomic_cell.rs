//! A `critical_section` backed cell for sharing small values between interrupt handlers and the
//! main loop
//!
//! Some of the targets (e.g. thumbv6m, or the 8-bit parts the house boards started on) have no
//! compare-and-swap, so every access takes a short critical section instead.

use core::cell::Cell;
use critical_section::Mutex;

/// A cell which can be shared between an interrupt handler and the main loop
#[derive(Debug)]
pub struct AtomicCell<T: Copy> {
    inner: Mutex<Cell<T>>,
}

impl<T: Copy> AtomicCell<T> {
    /// Create a new cell holding `value`
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Read the current value
    pub fn load(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Overwrite the current value
    pub fn store(&self, value: T) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value));
    }

    /// Store a new value, returning the previous one
    pub fn replace(&self, value: T) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).replace(value))
    }

    /// Apply `f` to the stored value
    ///
    /// If `f` returns `Some`, the new value is stored and the previous value is returned in `Ok`.
    /// Otherwise the value is left untouched and returned in `Err`.
    pub fn fetch_update(&self, mut f: impl FnMut(T) -> Option<T>) -> Result<T, T> {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let old_value = cell.get();
            match f(old_value) {
                Some(new_value) => {
                    cell.set(new_value);
                    Ok(old_value)
                }
                None => Err(old_value),
            }
        })
    }
}

impl<T: Copy + Default> AtomicCell<T> {
    /// Read the value and reset the cell to its default
    ///
    /// This is how the main loop consumes a pending item left by an interrupt handler.
    pub fn take(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }
}

impl<T: Copy + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

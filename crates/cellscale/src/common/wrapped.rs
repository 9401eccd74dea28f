use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Shared, single-threaded mutable state (`Rc<RefCell<T>>`).
///
/// Cloning the wrapper clones the pointer, so every clone observes the same value.
#[derive(Default, Debug)]
pub struct WrappedRcRefCell<T: ?Sized> {
    inner: Rc<RefCell<T>>,
}

impl<T> WrappedRcRefCell<T> {
    /// Not called `new` so that wrapped types may define their own constructor.
    #[inline]
    pub fn wrap(t: T) -> Self {
        WrappedRcRefCell {
            inner: Rc::new(RefCell::new(t)),
        }
    }
}

impl<T: ?Sized> WrappedRcRefCell<T> {
    /// Panics whenever `RefCell::borrow()` would.
    #[inline]
    #[track_caller]
    pub fn get(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Panics whenever `RefCell::borrow_mut()` would.
    #[inline]
    #[track_caller]
    pub fn get_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }
}

impl<T: ?Sized> Clone for WrappedRcRefCell<T> {
    #[inline]
    fn clone(&self) -> Self {
        WrappedRcRefCell {
            inner: self.inner.clone(),
        }
    }
}

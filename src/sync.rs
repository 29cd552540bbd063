#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::thread;

    pub(crate) type MutexGuard<'a, T> = loom::sync::MutexGuard<'a, T>;

    pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

    impl<T> Mutex<T> {
        pub(crate) fn new(val: T) -> Self {
            Self(loom::sync::Mutex::new(val))
        }

        pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
            self.0.lock().unwrap()
        }
    }

    pub(crate) struct Condvar(loom::sync::Condvar);

    impl Condvar {
        pub(crate) fn new() -> Self {
            Self(loom::sync::Condvar::new())
        }

        pub(crate) fn notify_all(&self) {
            self.0.notify_all();
        }

        pub(crate) fn wait_until<'a, T>(
            &self,
            mut guard: MutexGuard<'a, T>,
            mut ready: impl FnMut(&mut T) -> bool,
        ) -> MutexGuard<'a, T> {
            while !ready(&mut *guard) {
                guard = self.0.wait(guard).unwrap();
            }
            guard
        }
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use parking_lot::{Mutex, MutexGuard};

    #[derive(Debug, Default)]
    pub(crate) struct Condvar(parking_lot::Condvar);

    impl Condvar {
        pub(crate) fn new() -> Self {
            Self(parking_lot::Condvar::new())
        }

        pub(crate) fn notify_all(&self) {
            self.0.notify_all();
        }

        pub(crate) fn wait_until<'a, T>(
            &self,
            mut guard: MutexGuard<'a, T>,
            mut ready: impl FnMut(&mut T) -> bool,
        ) -> MutexGuard<'a, T> {
            while !ready(&mut *guard) {
                self.0.wait(&mut guard);
            }
            guard
        }
    }
}

pub(crate) use imp::*;

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{ConcurrencyError, Result};

struct State {
    available: usize,
    interrupted: bool,
}

/// A counting semaphore bounding the number of open transactions of one kind.
pub(crate) struct Admission {
    state: Mutex<State>,
    cvar: Condvar,
    permits: usize,
}

impl Admission {
    pub fn new(permits: usize) -> Self {
        Admission {
            state: Mutex::new(State {
                available: permits,
                interrupted: false,
            }),
            cvar: Condvar::new(),
            permits,
        }
    }

    /// Block until a permit is available, the timeout elapses or the admission is interrupted.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock();
        let waiting = |s: &mut State| s.available == 0 && !s.interrupted;
        match timeout {
            None => self.cvar.wait_while(&mut state, waiting),
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                let res = self.cvar.wait_while_until(&mut state, waiting, deadline);
                if res.timed_out() && waiting(&mut state) {
                    return Err(ConcurrencyError::AdmissionTimedOut.into());
                }
            }
        }
        if state.interrupted {
            return Err(ConcurrencyError::AdmissionInterrupted.into());
        }
        state.available -= 1;
        Ok(())
    }

    /// Take a permit if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.interrupted || state.available == 0 {
            return false;
        }
        state.available -= 1;
        true
    }

    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.available < self.permits {
            state.available += 1;
        }
        self.cvar.notify_one();
    }

    /// Fail every current and future wait.
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.cvar.notify_all();
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.state.lock().available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Arc;

    #[test]
    fn waiter_is_admitted_on_release() {
        let admission = Arc::new(Admission::new(1));
        admission.acquire(None).unwrap();

        let waiter = {
            let admission = admission.clone();
            std::thread::spawn(move || admission.acquire(None))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        admission.release();
        waiter.join().unwrap().unwrap();
        assert_eq!(admission.available(), 0);
    }

    #[test]
    fn wait_times_out() {
        let admission = Admission::new(1);
        assert!(admission.try_acquire());
        assert!(!admission.try_acquire());
        assert!(matches!(
            admission.acquire(Some(Duration::from_millis(20))),
            Err(Error::Concurrency(ConcurrencyError::AdmissionTimedOut))
        ));
    }

    #[test]
    fn interrupt_wakes_waiters() {
        let admission = Arc::new(Admission::new(1));
        admission.acquire(None).unwrap();

        let waiter = {
            let admission = admission.clone();
            std::thread::spawn(move || admission.acquire(None))
        };
        std::thread::sleep(Duration::from_millis(20));
        admission.interrupt();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(Error::Concurrency(ConcurrencyError::AdmissionInterrupted))
        ));
    }
}

//! Cooperative synchronization primitives shared by the station tasks

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_sync::waitqueue::MultiWakerRegistration;

/// Tasks that may wait on the gate at the same time.
pub const GATE_WAITERS: usize = 12;

struct GateState {
    suspended: bool,
    waiters: MultiWakerRegistration<GATE_WAITERS>,
}

/// Suspension point every task passes before it takes a lock.
///
/// While suspended, [`SuspendGate::wait_resumed`] parks the caller until
/// [`SuspendGate::resume`] is called. A task that already holds a lock is not
/// interrupted; it finishes its critical section and parks at its next pass.
pub struct SuspendGate {
    state: BlockingMutex<CriticalSectionRawMutex, RefCell<GateState>>,
}

impl SuspendGate {
    pub const fn new() -> Self {
        Self {
            state: BlockingMutex::new(RefCell::new(GateState {
                suspended: false,
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    pub fn suspend(&self) {
        self.state.lock(|state| state.borrow_mut().suspended = true);
    }

    /// Lift the suspension and wake every parked task.
    pub fn resume(&self) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.suspended = false;
            state.waiters.wake();
        });
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock(|state| state.borrow().suspended)
    }

    pub async fn wait_resumed(&self) {
        poll_fn(|cx| {
            self.state.lock(|state| {
                let mut state = state.borrow_mut();
                if state.suspended {
                    state.waiters.register(cx.waker());
                    Poll::Pending
                } else {
                    Poll::Ready(())
                }
            })
        })
        .await
    }
}

impl Default for SuspendGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-slot handoff where the producer waits until the consumer has
/// taken and acknowledged its event.
pub struct Rendezvous<T: Send> {
    event: Signal<CriticalSectionRawMutex, T>,
    ack: Signal<CriticalSectionRawMutex, ()>,
}

impl<T: Send> Rendezvous<T> {
    pub const fn new() -> Self {
        Self {
            event: Signal::new(),
            ack: Signal::new(),
        }
    }

    /// Publish `value` and wait for [`Rendezvous::acknowledge`].
    pub async fn raise(&self, value: T) {
        self.ack.reset();
        self.event.signal(value);
        self.ack.wait().await;
    }

    /// Take the pending event, if any, without waiting.
    pub fn poll(&self) -> Option<T> {
        self.event.try_take()
    }

    pub async fn wait(&self) -> T {
        self.event.wait().await
    }

    pub fn acknowledge(&self) {
        self.ack.signal(());
    }
}

impl<T: Send> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::pin::pin;
    use embassy_futures::join::join;
    use embassy_futures::{block_on, poll_once};

    #[test]
    fn test_open_gate_passes_immediately() {
        let gate = SuspendGate::new();
        assert!(!gate.is_suspended());
        block_on(gate.wait_resumed());
    }

    #[test]
    fn test_suspended_gate_parks_every_waiter() {
        let gate = SuspendGate::new();
        gate.suspend();
        assert!(gate.is_suspended());

        let mut first = pin!(gate.wait_resumed());
        let mut second = pin!(gate.wait_resumed());
        assert!(poll_once(first.as_mut()).is_pending());
        assert!(poll_once(second.as_mut()).is_pending());

        gate.resume();
        assert!(poll_once(first.as_mut()).is_ready());
        assert!(poll_once(second.as_mut()).is_ready());
    }

    #[test]
    fn test_raise_waits_for_acknowledge() {
        let rendezvous: Rendezvous<u8> = Rendezvous::new();
        let mut raise = pin!(rendezvous.raise(7));
        assert!(poll_once(raise.as_mut()).is_pending());

        assert_eq!(rendezvous.poll(), Some(7));
        assert_eq!(rendezvous.poll(), None);
        assert!(poll_once(raise.as_mut()).is_pending());

        rendezvous.acknowledge();
        assert!(poll_once(raise.as_mut()).is_ready());
    }

    #[test]
    fn test_consumer_task_receives_events_in_order() {
        let rendezvous: Rendezvous<u8> = Rendezvous::new();
        let producer = async {
            for value in 1..=3 {
                rendezvous.raise(value).await;
            }
        };
        let consumer = async {
            let mut seen = [0u8; 3];
            for slot in seen.iter_mut() {
                *slot = rendezvous.wait().await;
                rendezvous.acknowledge();
            }
            seen
        };
        let ((), seen) = block_on(join(producer, consumer));
        assert_eq!(seen, [1, 2, 3]);
    }
}

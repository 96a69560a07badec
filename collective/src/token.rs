use crate::device::Device;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Condvar, Mutex, PoisonError},
};

#[derive(Default)]
pub struct Streams(Mutex<HashMap<Device, Arc<Stream>>>);

impl Streams {
    fn stream(&self, device: &Device) -> Arc<Stream> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(*device)
            .or_default()
            .clone()
    }
}

/// Ordering handle for one collective call on one device.
pub struct SyncToken {
    device: Device,
    ticket: u64,
    stream: Option<Arc<Stream>>,
}

impl SyncToken {
    pub fn create(streams: &Streams, device: &Device) -> Self {
        let stream = streams.stream(device);
        let ticket = stream.issue();
        Self {
            device: *device,
            ticket,
            stream: Some(stream),
        }
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Blocks until every earlier token of this device is released.
    #[must_use]
    pub(crate) fn acquire(mut self) -> TokenGuard {
        let stream = self.stream.take().unwrap_or_default();
        stream.wait(self.ticket);
        TokenGuard {
            stream,
            ticket: self.ticket,
        }
    }
}

impl Drop for SyncToken {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.retire(self.ticket)
        }
    }
}

pub(crate) struct TokenGuard {
    stream: Arc<Stream>,
    ticket: u64,
}

impl Drop for TokenGuard {
    #[inline]
    fn drop(&mut self) {
        self.stream.retire(self.ticket)
    }
}

#[derive(Default)]
pub(crate) struct Stream {
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Default)]
struct State {
    issued: u64,
    current: u64,
    retired: BTreeSet<u64>,
}

impl Stream {
    fn issue(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let ticket = state.issued;
        state.issued += 1;
        ticket
    }

    fn wait(&self, ticket: u64) {
        let _state = self
            .cond
            .wait_while(
                self.state.lock().unwrap_or_else(PoisonError::into_inner),
                |state| state.current < ticket,
            )
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn retire(&self, ticket: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.retired.insert(ticket);
        loop {
            let current = state.current;
            if !state.retired.remove(&current) {
                break;
            }
            state.current += 1;
        }
        drop(state);
        self.cond.notify_all()
    }
}

#[cfg(test)]
mod test {
    use super::{Streams, SyncToken};
    use crate::device::Device;
    use std::{
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    };

    #[test]
    fn test_issue_order() {
        let streams = Streams::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tokens = (0..4)
            .map(|_| SyncToken::create(&streams, &Device::cpu()))
            .collect::<Vec<_>>();

        // later tokens start first but still run in creation order
        let handles = tokens
            .into_iter()
            .enumerate()
            .rev()
            .map(|(i, token)| {
                let log = log.clone();
                let handle = thread::spawn(move || {
                    let _guard = token.acquire();
                    log.lock().unwrap().push(i);
                });
                thread::sleep(Duration::from_millis(10));
                handle
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap()
        }
        assert_eq!(*log.lock().unwrap(), [0, 1, 2, 3]);
    }

    #[test]
    fn test_drop_releases() {
        let streams = Streams::default();
        let first = SyncToken::create(&streams, &Device::accelerator(0));
        let second = SyncToken::create(&streams, &Device::accelerator(0));
        let other = SyncToken::create(&streams, &Device::accelerator(1));
        drop(first);
        drop(second.acquire());
        drop(other.acquire());
        let _third = SyncToken::create(&streams, &Device::accelerator(0)).acquire();
    }
}
